// tests/optimizer_tests.rs

mod common;

use common::{compile, error_code, sql, ORDER_COLUMNS};
use eql::ast::{FromId, JoinSemantics};

// ============================================================================
// Join elimination
// ============================================================================

#[test]
fn test_unused_join_target_folds_into_foreign_key() {
    let query = compile("SELECT o FROM Order o, o.customer c WHERE c.id = ?1").unwrap();
    assert_eq!(
        query.sql(),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             WHERE o.customer_id IS NOT NULL AND o.customer_id = ?"
        )
    );
    let root = &query.graph().queries[0];
    assert_eq!(root.from_list, vec![FromId(0)]);
}

#[test]
fn test_unused_join_parent_is_replaced_by_child() {
    assert_eq!(
        sql("SELECT i FROM Order o, IN(o.items) i"),
        "SELECT i.id, i.qty, i.price, i.order_id, i.product_id \
         FROM line_items i WHERE i.order_id IS NOT NULL"
    );
}

#[test]
fn test_parent_key_reads_child_link_column() {
    assert_eq!(
        sql("SELECT o.id, i.qty FROM Order o JOIN o.items i"),
        "SELECT i.order_id, i.qty FROM line_items i WHERE i.order_id IS NOT NULL"
    );
}

#[test]
fn test_association_table_can_replace_owner() {
    assert_eq!(
        sql("SELECT o.id, t.label FROM Order o JOIN o.tags t"),
        "SELECT eql0.order_id, t.label FROM order_tags eql0, tags t \
         WHERE eql0.tag_id = t.id AND eql0.order_id IS NOT NULL"
    );
}

#[test]
fn test_elimination_stops_at_used_item() {
    // the address join folds into eql0.address_id, the customer join stays
    assert_eq!(
        sql("SELECT o.id FROM Order o WHERE o.customer.address = ?1"),
        "SELECT o.id FROM orders o, customers eql0 \
         WHERE o.customer_id = eql0.id AND eql0.address_id = ?"
    );
}

#[test]
fn test_outer_join_target_is_kept() {
    assert_eq!(
        sql("SELECT o.id FROM Order o LEFT JOIN o.customer c"),
        "SELECT o.id FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id"
    );
}

#[test]
fn test_fetched_target_is_kept() {
    let query = compile("SELECT o FROM Order o JOIN FETCH o.customer c").unwrap();
    assert_eq!(query.graph().queries[0].from_list.len(), 2);
}

#[test]
fn test_discriminated_target_is_kept() {
    let schema = common::schema().with_entity(
        eql::EntityMetadata::new("Garage", eql::Table::new("garages"))
            .with_id("id", "id")
            .with_many_to_one("car", "Car", &["car_id"]),
    );
    let query = eql::compile("SELECT g.id FROM Garage g WHERE g.car = ?1", &schema).unwrap();
    assert_eq!(
        query.sql(),
        "SELECT g.id FROM garages g, vehicles eql0 \
         WHERE g.car_id = eql0.id AND eql0.kind = 'CAR' AND eql0.id = ?"
    );
}

#[test]
fn test_subquery_keeps_its_only_join() {
    assert_eq!(
        sql("SELECT o FROM Order o WHERE 5 IN (SELECT c.id FROM o.customer c)"),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             WHERE 5 IN (SELECT c.id FROM customers c WHERE o.customer_id = c.id)"
        )
    );
    assert_eq!(
        sql("SELECT o FROM Order o WHERE EXISTS (SELECT 1 FROM o.customer c WHERE c.id = 5)"),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             WHERE EXISTS (SELECT 1 FROM customers c WHERE o.customer_id = c.id AND c.id = 5)"
        )
    );
}

// ============================================================================
// Join semantics
// ============================================================================

#[test]
fn test_is_null_on_target_keeps_outer_join() {
    assert_eq!(
        sql("SELECT o.id FROM Order o WHERE o.customer.name IS NULL"),
        "SELECT o.id FROM orders o LEFT OUTER JOIN customers eql0 \
         ON o.customer_id = eql0.id WHERE eql0.name IS NULL"
    );
}

#[test]
fn test_disjunction_needs_every_branch() {
    assert_eq!(
        sql("SELECT o.id FROM Order o WHERE o.customer.name = 'a' OR o.total > 1"),
        "SELECT o.id FROM orders o LEFT OUTER JOIN customers eql0 \
         ON o.customer_id = eql0.id WHERE (eql0.name = 'a' OR o.total > 1)"
    );
    assert_eq!(
        sql("SELECT o.id FROM Order o WHERE o.customer.name = 'a' OR o.customer.email = 'b'"),
        "SELECT o.id FROM orders o, customers eql0 \
         WHERE o.customer_id = eql0.id AND (eql0.name = 'a' OR eql0.email = 'b')"
    );
}

#[test]
fn test_inner_child_makes_parent_inner() {
    let query = compile(
        "SELECT o.customer.name FROM Order o WHERE o.customer.address.city = 'Oslo'",
    )
    .unwrap();
    assert_eq!(
        query.sql(),
        "SELECT eql0.name FROM orders o, customers eql0, addresses eql1 \
         WHERE o.customer_id = eql0.id AND eql0.address_id = eql1.id AND eql1.city = 'Oslo'"
    );
    let graph = query.graph();
    assert_eq!(graph.item(FromId(1)).semantics, JoinSemantics::Inner);
    assert_eq!(graph.item(FromId(2)).semantics, JoinSemantics::Inner);
}

#[test]
fn test_having_requirement_makes_join_inner() {
    let query = compile(
        "SELECT e.department.name, COUNT(e) FROM Employee e \
         GROUP BY e.department.name HAVING e.department.name = 'Sales'",
    )
    .unwrap();
    assert_eq!(
        query.sql(),
        "SELECT eql0.name, COUNT(e.id) FROM employees e, departments eql0 \
         WHERE e.department_id = eql0.id GROUP BY eql0.name HAVING eql0.name = 'Sales'"
    );
    assert_eq!(query.graph().item(FromId(1)).semantics, JoinSemantics::Inner);
}

#[test]
fn test_outer_joins_follow_their_parent() {
    assert_eq!(
        sql("SELECT i.product.name, o.customer.name FROM Order o, LineItem i"),
        "SELECT eql0.name, eql1.name FROM orders o \
         LEFT OUTER JOIN customers eql1 ON o.customer_id = eql1.id, line_items i \
         LEFT OUTER JOIN products eql0 ON i.product_id = eql0.id"
    );
}

#[test]
fn test_correlated_navigation_is_inner() {
    assert_eq!(
        sql("SELECT o.id FROM Order o WHERE EXISTS \
             (SELECT i.id FROM LineItem i WHERE i.qty > 1 AND o.customer.name = 'x')"),
        "SELECT o.id FROM orders o WHERE EXISTS (SELECT i.id FROM line_items i, customers eql0 \
         WHERE o.customer_id = eql0.id AND i.qty > 1 AND eql0.name = 'x')"
    );
}

// ============================================================================
// Bulk statements
// ============================================================================

#[test]
fn test_bulk_statement_cannot_outer_join() {
    assert_eq!(
        error_code("DELETE FROM Employee e WHERE e.department.name IS NULL"),
        "BulkStatementJoin"
    );
    let err = compile("UPDATE Employee e SET e.name = e.department.name").unwrap_err();
    assert_eq!(
        err.reason,
        eql::ErrorReason::BulkStatementJoin {
            entity: "Department".to_string()
        }
    );
}

#[test]
fn test_bulk_statement_join_moves_into_exists() {
    let query = compile("DELETE FROM Employee e WHERE e.department.name = 'Sales'").unwrap();
    let graph = query.graph();
    assert_eq!(graph.queries[0].from_list, vec![FromId(0)]);
    let exists = graph.queries.last().unwrap();
    assert_eq!(exists.parent, Some(eql::ast::QueryId(0)));
    assert_eq!(exists.from_list, vec![FromId(1)]);
    assert_eq!(graph.item(FromId(1)).owner, exists.id);
}

#[test]
fn test_bulk_statement_join_eliminated() {
    assert_eq!(
        sql("DELETE FROM Employee e WHERE e.department.id = 3"),
        "DELETE FROM employees WHERE employees.department_id = 3"
    );
}
