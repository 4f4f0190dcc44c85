mod common;

use common::compile;
use eql::schema::{EntityMetadata, InMemorySchema, SchemaResolver, Table};
use eql::{
    to_json, to_json_pretty, ArgBinding, ArgSource, CompileOptions, Compiler, ResultItem,
    StatementKind,
};
use std::sync::Arc;
use std::time::Duration;

fn named(name: &str, sql_ordinal: usize) -> ArgBinding {
    ArgBinding {
        source: ArgSource::Named(name.to_string()),
        sql_ordinal,
    }
}

fn positional(n: u32, sql_ordinal: usize) -> ArgBinding {
    ArgBinding {
        source: ArgSource::Positional(n),
        sql_ordinal,
    }
}

// ============================================================================
// Argument plan
// ============================================================================

#[test]
fn test_repeated_parameter_binds_every_marker() {
    let query = compile(
        "SELECT e.name FROM Employee e WHERE e.salary BETWEEN :min AND :max OR e.salary = :min",
    )
    .unwrap();
    assert_eq!(
        query.sql(),
        "SELECT e.name FROM employees e WHERE (e.salary BETWEEN ? AND ? OR e.salary = ?)"
    );
    assert_eq!(
        query.arguments(),
        &[named("min", 1), named("max", 2), named("min", 3)]
    );
    assert_eq!(
        query.parameters(),
        &[
            ArgSource::Named("min".into()),
            ArgSource::Named("max".into())
        ]
    );
    assert_eq!(query.graph().arguments[0].sql_ordinals, vec![1, 3]);
}

#[test]
fn test_positional_parameters_follow_sql_order() {
    let query = compile("SELECT e.id FROM Employee e WHERE e.salary > ?2 AND e.name = ?1").unwrap();
    assert_eq!(query.arguments(), &[positional(2, 1), positional(1, 2)]);
    assert_eq!(
        query.parameters(),
        &[ArgSource::Positional(2), ArgSource::Positional(1)]
    );
}

#[test]
fn test_bare_markers_are_numbered() {
    let query = compile("SELECT e.id FROM Employee e WHERE e.salary > ? AND e.name = ?").unwrap();
    assert_eq!(query.arguments(), &[positional(1, 1), positional(2, 2)]);
}

#[test]
fn test_select_list_parameter_comes_first() {
    let query = compile("SELECT e.salary * :rate FROM Employee e WHERE e.id = :id").unwrap();
    assert_eq!(query.arguments(), &[named("rate", 1), named("id", 2)]);
}

#[test]
fn test_no_parameters() {
    let query = compile("SELECT o FROM Order o").unwrap();
    assert!(query.arguments().is_empty());
    assert!(query.parameters().is_empty());
}

// ============================================================================
// Cache facts
// ============================================================================

#[test]
fn test_cache_facts_single_table() {
    let product = compile("SELECT p FROM Product p").unwrap();
    assert_eq!(product.cache_max_age(), Duration::from_secs(5));
    assert!(product.tables_read_only());

    let order = compile("SELECT o FROM Order o").unwrap();
    assert_eq!(order.cache_max_age(), Duration::from_secs(1));
    assert!(!order.tables_read_only());
}

#[test]
fn test_cache_facts_take_minimum_over_joins() {
    let query = compile("SELECT o.id FROM Order o WHERE o.customer.name = 'x'").unwrap();
    assert_eq!(query.cache_max_age(), Duration::from_millis(250));
}

#[test]
fn test_eliminated_join_is_not_read() {
    let query = compile("SELECT o.id FROM Order o WHERE o.customer = ?1").unwrap();
    assert_eq!(query.cache_max_age(), Duration::from_secs(1));
}

#[test]
fn test_cache_facts_include_subqueries_and_collections() {
    let query = compile(
        "SELECT p.id FROM Product p WHERE EXISTS (SELECT i.id FROM LineItem i WHERE i.product = p)",
    )
    .unwrap();
    assert_eq!(query.cache_max_age(), Duration::from_millis(250));
    assert!(!query.tables_read_only());

    let query = compile("SELECT o.id FROM Order o WHERE o.tags IS EMPTY").unwrap();
    assert_eq!(query.cache_max_age(), Duration::from_millis(250));
}

#[test]
fn test_cache_facts_without_tables() {
    let query = compile("SELECT CURRENT_TIMESTAMP").unwrap();
    assert_eq!(query.cache_max_age(), Duration::from_millis(250));
    assert!(query.tables_read_only());
}

// ============================================================================
// Result shape
// ============================================================================

#[test]
fn test_result_shape_with_fetch() {
    let query = compile("SELECT o, o.total FROM Order o JOIN FETCH o.customer").unwrap();
    let shape = query.result_shape();
    assert_eq!(
        shape.items,
        vec![
            ResultItem::Entity {
                entity: "Order".into(),
                columns: vec![
                    "id".into(),
                    "total".into(),
                    "status".into(),
                    "customer_id".into()
                ],
            },
            ResultItem::Scalar,
        ]
    );
    assert_eq!(shape.fetches.len(), 1);
    assert_eq!(shape.fetches[0].owner, "o");
    assert_eq!(shape.fetches[0].path, "o.customer");
    assert_eq!(shape.fetches[0].entity, "Customer");
    assert!(!shape.distinct);
}

#[test]
fn test_result_shape_constructor() {
    let query = compile("SELECT DISTINCT NEW com.acme.Totals(o.id, o.total) FROM Order o").unwrap();
    let shape = query.result_shape();
    assert_eq!(shape.constructor.as_deref(), Some("com.acme.Totals"));
    assert_eq!(shape.items, vec![ResultItem::Scalar, ResultItem::Scalar]);
    assert!(shape.distinct);
}

#[test]
fn test_statement_kind() {
    assert_eq!(compile("SELECT o FROM Order o").unwrap().kind(), StatementKind::Select);
    let update = compile("UPDATE Order o SET o.status = 'X'").unwrap();
    assert_eq!(update.kind(), StatementKind::Update);
    assert!(update.result_shape().items.is_empty());
    assert_eq!(
        compile("DELETE FROM Order o").unwrap().kind(),
        StatementKind::Delete
    );
}

// ============================================================================
// JSON output
// ============================================================================

#[test]
fn test_json_output() {
    let query = compile("SELECT o.id FROM Order o WHERE o.id = :id").unwrap();
    let value: serde_json::Value = serde_json::from_str(&to_json(&query)).unwrap();

    assert_eq!(value["kind"], "select");
    assert_eq!(value["sql"], "SELECT o.id FROM orders o WHERE o.id = ?");
    assert_eq!(value["cache_max_age_ms"], 1000);
    assert_eq!(value["tables_read_only"], false);
    assert_eq!(value["arguments"][0]["sql_ordinal"], 1);
    assert_eq!(value["arguments"][0]["source"]["kind"], "named");
    assert_eq!(value["arguments"][0]["source"]["value"], "id");
    assert_eq!(value["result_shape"]["items"][0]["kind"], "scalar");
    assert!(value.get("graph").is_none());

    assert!(to_json_pretty(&query).contains("\n  \"source\": "));
}

// ============================================================================
// Options and compiler reuse
// ============================================================================

#[test]
fn test_custom_options() {
    let schema = common::schema();
    let compiler = Compiler::with_options(
        &schema,
        CompileOptions {
            true_literal: "1".into(),
            false_literal: "0".into(),
            alias_prefix: "j".into(),
        },
    );
    let query = compiler
        .compile("SELECT o.customer.name FROM Order o WHERE (o.total > 1) = FALSE")
        .unwrap();
    assert_eq!(
        query.sql(),
        "SELECT j0.name FROM orders o LEFT OUTER JOIN customers j0 \
         ON o.customer_id = j0.id WHERE (o.total > 1) = 0"
    );
    assert_eq!(compiler.options().alias_prefix, "j");
}

#[test]
fn test_generated_alias_skips_user_alias() {
    assert_eq!(
        common::sql("SELECT eql0.customer.name FROM Order eql0"),
        "SELECT eql1.name FROM orders eql0 LEFT OUTER JOIN customers eql1 \
         ON eql0.customer_id = eql1.id"
    );
}

#[test]
fn test_generated_alias_skips_alias_declared_later() {
    // eql0 is only declared by the sub-select, after o.customer is bound
    let sql = common::sql(
        "SELECT o.customer.name FROM Order o \
         WHERE EXISTS (SELECT eql0 FROM Product eql0 WHERE eql0.price > o.total)",
    );
    assert!(sql.starts_with("SELECT eql1.name FROM orders o"), "{sql}");
    assert!(sql.contains("customers eql1"), "{sql}");
    assert!(sql.contains("FROM products eql0 WHERE eql0.price > o.total"), "{sql}");
    assert!(!sql.contains("customers eql0"), "{sql}");
}

#[test]
fn test_compile_is_deterministic() {
    let text = "SELECT o FROM Order o WHERE o.customer.name = :n AND o.items IS NOT EMPTY";
    let first = compile(text).unwrap();
    let second = compile(text).unwrap();
    assert_eq!(first.sql(), second.sql());
    assert_eq!(first.arguments(), second.arguments());
    assert_eq!(first.source(), text);
}

#[test]
fn test_compiler_shared_between_threads() {
    let compiler = Compiler::new(Arc::new(common::schema()));
    let text = "SELECT o.customer.name FROM Order o WHERE o.total > ?1";
    let expected = compiler.compile(text).unwrap().sql().to_string();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| compiler.compile(text).unwrap().sql().to_string()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

struct SingleEntity(Arc<EntityMetadata>);

impl SchemaResolver for SingleEntity {
    fn lookup_schema(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        (self.0.name == name).then(|| self.0.clone())
    }
}

#[test]
fn test_custom_schema_resolver() {
    let resolver = SingleEntity(Arc::new(
        EntityMetadata::new("Note", Table::new("app.notes"))
            .with_id("id", "id")
            .with_column("body", "note body"),
    ));
    let query = eql::compile("SELECT n.body FROM Note n WHERE n.id = 1", &resolver).unwrap();
    assert_eq!(
        query.sql(),
        "SELECT n.\"note body\" FROM app.notes n WHERE n.id = 1"
    );
}

#[test]
fn test_schema_from_json() {
    let schema = InMemorySchema::from_json(
        r#"{
            "entities": [{
                "name": "Tag",
                "table": { "name": "tags" },
                "id": ["id"],
                "fields": [
                    { "name": "id", "kind": "column", "column": "id" },
                    { "name": "label", "kind": "column", "column": "label" }
                ]
            }]
        }"#,
    )
    .unwrap();
    let query = eql::compile("SELECT t FROM Tag t", &schema).unwrap();
    assert_eq!(query.sql(), "SELECT t.id, t.label FROM tags t");
}

#[test]
fn test_error_display() {
    let err = compile("SELECT x FROM Nope x").unwrap_err();
    assert_eq!(
        err.to_string(),
        "'Nope' is an unknown entity\nin \"SELECT x FROM Nope x\""
    );
    assert_eq!(err.query, "SELECT x FROM Nope x");
}
