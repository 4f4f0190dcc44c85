// tests/parser_tests.rs

mod common;

use eql::ast::{
    ArgSource, BinOp, Expr, FromId, JoinKind, JoinSemantics, QueryBody, QueryId,
};
use eql::schema::InMemorySchema;
use eql::{Lexer, ParsedQuery, Parser, QueryCompileError};

fn parse(text: &str) -> ParsedQuery {
    let schema = common::schema();
    match Parser::new(Lexer::new(text), &schema).parse() {
        Ok(parsed) => parsed,
        Err(e) => panic!("failed to parse {text}: {e}"),
    }
}

fn parse_error(text: &str) -> QueryCompileError {
    let schema = common::schema();
    match Parser::new(Lexer::new(text), &schema).parse() {
        Ok(_) => panic!("expected {text} to fail"),
        Err(e) => e,
    }
}

fn where_clause(parsed: &ParsedQuery) -> &Expr {
    parsed
        .graph
        .query(parsed.root)
        .where_clause()
        .expect("where clause")
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_select_entity() {
    let parsed = parse("SELECT o FROM Order o WHERE o.total > 10");
    let root = parsed.graph.query(parsed.root);
    assert_eq!(root.from_list, vec![FromId(0)]);

    let select = root.as_select().unwrap();
    assert_eq!(select.results, vec![Expr::LoadEntity { from: FromId(0) }]);
    assert!(matches!(
        where_clause(&parsed),
        Expr::Binary {
            op: BinOp::GreaterThan,
            ..
        }
    ));
}

#[test]
fn test_select_defaults_to_first_item() {
    let parsed = parse("FROM Order o");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.results, vec![Expr::LoadEntity { from: FromId(0) }]);
}

#[test]
fn test_alias_defaults_to_entity_name() {
    let parsed = parse("SELECT Customer FROM Customer");
    assert_eq!(parsed.graph.item(FromId(0)).alias, "Customer");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.results, vec![Expr::LoadEntity { from: FromId(0) }]);
}

#[test]
fn test_qualified_entity_name() {
    let parsed = parse("SELECT o FROM com.acme.Order o");
    assert_eq!(parsed.graph.item(FromId(0)).entity_name(), "Order");
}

#[test]
fn test_unqualified_field_uses_first_item() {
    let parsed = parse("SELECT name FROM Customer");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.results, vec![Expr::column(FromId(0), "name")]);
}

#[test]
fn test_update_assignments() {
    let parsed = parse("UPDATE Employee e SET e.salary = 10, name = 'x'");
    match &parsed.graph.query(parsed.root).body {
        QueryBody::Update(update) => {
            assert_eq!(update.assignments.len(), 2);
            assert_eq!(update.assignments[0].columns, vec!["salary"]);
            assert_eq!(update.assignments[1].field, "name");
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(parsed.graph.item(FromId(0)).sql_name, "employees");
}

#[test]
fn test_delete_without_from_keyword() {
    let parsed = parse("DELETE Order o WHERE o.status = 'X'");
    assert!(matches!(
        parsed.graph.query(parsed.root).body,
        QueryBody::Delete(_)
    ));
}

// ============================================================================
// FROM clause
// ============================================================================

#[test]
fn test_to_one_paths_are_shared() {
    let parsed = parse("SELECT o.customer.name, o.customer.email FROM Order o");
    assert_eq!(parsed.graph.query(parsed.root).from_list.len(), 2);
    assert_eq!(parsed.graph.item(FromId(1)).alias, "eql0");
}

#[test]
fn test_from_path_is_inner_join() {
    let parsed = parse("SELECT c FROM Order o, o.customer c");
    let c = parsed.graph.item(FromId(1));
    assert_eq!(c.semantics, JoinSemantics::Inner);
    assert_eq!(c.join.as_ref().unwrap().kind, JoinKind::ToOne);
}

#[test]
fn test_left_join_is_outer() {
    let parsed = parse("SELECT o FROM Order o LEFT OUTER JOIN o.items i");
    let i = parsed.graph.item(FromId(1));
    assert_eq!(i.semantics, JoinSemantics::Outer);
    assert_eq!(i.join.as_ref().unwrap().kind, JoinKind::ToMany);
    assert_eq!(
        i.join.as_ref().unwrap().link,
        vec![("id".to_string(), "order_id".to_string())]
    );
}

#[test]
fn test_in_collection_is_inner_join() {
    let parsed = parse("SELECT i FROM Order o, IN(o.items) i");
    assert_eq!(parsed.graph.item(FromId(1)).semantics, JoinSemantics::Inner);
}

#[test]
fn test_many_to_many_adds_association_item() {
    let parsed = parse("SELECT t FROM Order o JOIN o.tags t");
    let from_list = &parsed.graph.query(parsed.root).from_list;
    assert_eq!(from_list.len(), 3);

    let association = parsed.graph.item(FromId(1));
    assert_eq!(association.alias, "eql0");
    assert_eq!(association.table.name, "order_tags");
    assert!(association.entity.is_none());

    let tag = parsed.graph.item(FromId(2));
    assert_eq!(tag.alias, "t");
    assert_eq!(tag.join.as_ref().unwrap().parent, FromId(1));
}

#[test]
fn test_join_fetch_is_recorded() {
    let parsed = parse("SELECT o FROM Order o JOIN FETCH o.customer");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.fetches.len(), 1);
    assert_eq!(select.fetches[0].path, "o.customer");
    assert!(parsed.graph.item(select.fetches[0].target).fetch);
}

#[test]
fn test_join_fetch_needs_selected_owner() {
    // no select list: the implicit result does not count as selecting o
    let err = parse_error("FROM Order o JOIN FETCH o.items");
    assert_eq!(err.code(), "JoinFetchNotSelected");

    let err = parse_error("SELECT c FROM Order o JOIN FETCH o.customer c");
    assert_eq!(err.code(), "JoinFetchNotSelected");

    let parsed = parse("SELECT o, c FROM Order o JOIN FETCH o.items, Customer c");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.fetches.len(), 1);
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_and_binds_tighter_than_or() {
    let parsed = parse("SELECT o FROM Order o WHERE o.total > 1 OR o.total < 0 AND o.status = 'X'");
    match where_clause(&parsed) {
        Expr::Disjunction(parts) => {
            assert_eq!(parts.len(), 2);
            assert!(matches!(&parts[1], Expr::Conjunction(inner) if inner.len() == 2));
        }
        other => panic!("expected disjunction, got {other:?}"),
    }
}

#[test]
fn test_multiplication_binds_tighter_than_addition() {
    let parsed = parse("SELECT e FROM Employee e WHERE e.salary = 1 + 2 * 3");
    match where_clause(&parsed) {
        Expr::Binary { right, .. } => match right.as_ref() {
            Expr::Binary {
                op: BinOp::Add,
                right,
                ..
            } => assert!(matches!(
                right.as_ref(),
                Expr::Binary {
                    op: BinOp::Multiply,
                    ..
                }
            )),
            other => panic!("expected addition, got {other:?}"),
        },
        other => panic!("expected comparison, got {other:?}"),
    }
}

#[test]
fn test_entity_compared_to_parameter_uses_identity() {
    let parsed = parse("SELECT o FROM Order o WHERE o.customer = ?1");
    let Expr::Binary { left, .. } = where_clause(&parsed) else {
        panic!("expected comparison");
    };
    assert_eq!(**left, Expr::column(FromId(1), "id"));
}

#[test]
fn test_path_equal_to_alias_is_join() {
    let parsed = parse("SELECT c FROM Customer c, Order o WHERE o.customer = c");
    match where_clause(&parsed) {
        Expr::Join(join) => {
            assert_eq!(join.parent, FromId(1));
            assert_eq!(join.target, FromId(0));
        }
        other => panic!("expected join, got {other:?}"),
    }
}

#[test]
fn test_collection_in_expression_adds_no_item() {
    let parsed = parse("SELECT o FROM Order o WHERE o.items IS NOT EMPTY");
    assert_eq!(parsed.graph.query(parsed.root).from_list.len(), 1);
    assert!(matches!(
        where_clause(&parsed),
        Expr::IsEmpty { negated: true, .. }
    ));
}

#[test]
fn test_subquery_is_nested_block() {
    let parsed =
        parse("SELECT o FROM Order o WHERE EXISTS (SELECT i FROM LineItem i WHERE i.order = o)");
    assert_eq!(parsed.graph.queries.len(), 2);
    assert_eq!(parsed.graph.query(QueryId(1)).parent, Some(QueryId(0)));
    assert_eq!(where_clause(&parsed), &Expr::Exists(QueryId(1)));
}

#[test]
fn test_object_in_select() {
    let parsed = parse("SELECT OBJECT(o) FROM Order o");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.results, vec![Expr::LoadEntity { from: FromId(0) }]);
}

#[test]
fn test_keyword_named_field() {
    let parsed = parse("SELECT i.order.total FROM LineItem i");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert_eq!(select.results, vec![Expr::column(FromId(1), "total")]);
}

#[test]
fn test_parameters_in_first_use_order() {
    let parsed = parse("SELECT e.salary * :rate FROM Employee e WHERE e.id = :id AND e.salary > :rate");
    let sources: Vec<&ArgSource> = parsed.graph.arguments.iter().map(|a| &a.source).collect();
    assert_eq!(
        sources,
        vec![
            &ArgSource::Named("rate".into()),
            &ArgSource::Named("id".into())
        ]
    );
}

#[test]
fn test_locate_is_lowered() {
    let parsed = parse("SELECT LOCATE('x', c.name) FROM Customer c");
    let select = parsed.graph.query(parsed.root).as_select().unwrap();
    assert!(matches!(select.results[0], Expr::Case { .. }));
}

#[test]
fn test_size_of_collection() {
    let parsed = parse("SELECT o FROM Order o WHERE SIZE(o.items) > 2");
    let Expr::Binary { left, .. } = where_clause(&parsed) else {
        panic!("expected comparison");
    };
    assert!(matches!(left.as_ref(), Expr::Size(c) if c.path == "o.items"));
}

#[test]
fn test_collection_path_kept_for_member_of() {
    let parsed = parse("SELECT o FROM Order o WHERE :t MEMBER OF o.tags");
    match where_clause(&parsed) {
        Expr::MemberOf {
            item, collection, ..
        } => {
            assert_eq!(item, &vec![Expr::Argument(0)]);
            assert_eq!(collection.element_keys, vec!["tag_id"]);
            assert_eq!(collection.table.name, "order_tags");
        }
        other => panic!("expected MEMBER OF, got {other:?}"),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_error_reports_token_and_position() {
    let err = parse_error("SELECT o FROM Order o WHERE o.nope = 1");
    assert_eq!(err.code(), "UnknownField");
    assert_eq!(err.token.as_deref(), Some("nope"));
    assert_eq!(err.position, Some(30));
}

#[test]
fn test_parse_errors() {
    let cases = [
        ("SELECT x FROM Nope x", "UnknownEntity"),
        ("SELECT o FROM Order o, Customer O", "DuplicateAlias"),
        ("SELECT o FROM Order o WHERE x = 1", "UnknownIdentifier"),
        ("SELECT o.status.x FROM Order o", "NotNavigable"),
        ("SELECT x FROM Order o, o.status x", "NotAnEntity"),
        ("SELECT o.items FROM Order o", "CollectionNotAllowed"),
        ("SELECT o FROM Order o WHERE o.items = 1", "CollectionNotAllowed"),
        ("SELECT p FROM Parcel p WHERE p.shipment = ?1", "CompositeIdentity"),
        ("SELECT 1 + 2", "MissingFrom"),
        ("SELECT o FROM Order o HAVING COUNT(o) > 1", "HavingWithoutGroupBy"),
        ("SELECT c.name FROM Order o JOIN FETCH o.customer c", "JoinFetchNotSelected"),
        ("SELECT o FROM Order o WHERE o.total MEMBER OF o.tags", "MemberOfItem"),
        ("SELECT o FROM Order o WHERE :t MEMBER OF o.status", "MemberOfCollection"),
        ("SELECT o FROM Order o, Customer c WHERE c MEMBER OF o.tags", "MemberOfTypeMismatch"),
        ("SELECT NEW Summary(o.id) FROM Order o", "ConstructorNotQualified"),
        ("SELECT o FROM Order o WHERE o.id = ?1 OR o.id = :id", "MixedParameters"),
        ("SELECT o FROM Order o WHERE OBJECT(o) = 1", "ObjectOutsideSelect"),
        ("SELECT MOD(e.salary) FROM Employee e", "WrongArgumentCount"),
        ("SELECT o FROM Order o WHERE o.status IN ()", "EmptyInList"),
        ("SELECT o FROM Order o WHERE o.status NOT = 'x'", "UnexpectedNot"),
        ("SELECT c FROM Customer c WHERE c.name LIKE 'a' ESCAPE 1", "EscapeRequiresString"),
        ("SELECT o FROM Order o WHERE EXISTS (1)", "SubqueryExpected"),
        ("SELECT o FROM Order o garbage", "Expected"),
        ("UPDATE Parcel p SET p.shipment = ?1", "CompositeAssignment"),
        ("UPDATE Employee e SET e.nope = 1", "UnknownField"),
    ];
    for (text, code) in cases {
        assert_eq!(parse_error(text).code(), code, "{text}");
    }
}

#[test]
fn test_constructor_class_lookup() {
    let schema = common::schema()
        .with_class("com.acme.Summary")
        .with_class("com.other.Summary");
    let parse = |text: &str| Parser::new(Lexer::new(text), &schema).parse();

    assert!(parse("SELECT NEW com.acme.Summary(o.id) FROM Order o").is_ok());
    assert_eq!(
        parse("SELECT NEW com.acme.Nope(o.id) FROM Order o")
            .unwrap_err()
            .code(),
        "UnknownClass"
    );

    let empty = InMemorySchema::new();
    let err = Parser::new(Lexer::new("SELECT o FROM Order o"), &empty)
        .parse()
        .unwrap_err();
    assert_eq!(err.code(), "UnknownEntity");
}
