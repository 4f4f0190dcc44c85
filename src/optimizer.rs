//! Join optimization.
//!
//! Runs once per compiled statement, over every query block with nested
//! blocks first. For each block it:
//!
//! 1. absorbs `path = alias` join predicates from the top-level WHERE
//!    conjunction into the from-item they join;
//! 2. removes from-items whose only use is their own join, restarting after
//!    each removal since one removal can enable another;
//! 3. decides inner or outer semantics for the remaining implicit joins;
//! 4. moves outer-joined items right after their join parent.
//!
//! UPDATE and DELETE statements end up with a single from-item: joins they
//! still need become a correlated `EXISTS` sub-select.

use crate::ast::{
    AbstractQuery, ColumnRef, Expr, FromId, JoinExpr, JoinKind, JoinSemantics, Literal,
    QueryBody, QueryGraph, QueryId, SelectQuery, Usage,
};
use crate::error::ErrorReason;
use tracing::{debug, trace};

/// Optimize every query block of `graph` in place.
pub fn optimize(graph: &mut QueryGraph) -> Result<(), ErrorReason> {
    for index in (0..graph.queries.len()).rev() {
        let query = QueryId(index);
        absorb_joins(graph, query);
        while eliminate_one(graph, query) {}
        infer_semantics(graph, query);
        reorder_outer(graph, query);
        correlate_bulk_joins(graph, query)?;
    }
    Ok(())
}

fn absorb_joins(graph: &mut QueryGraph, query: QueryId) {
    if let Some(where_clause) = graph.query_mut(query).where_clause_mut().take() {
        let mut kept = Vec::new();
        for conjunct in where_clause.into_conjuncts() {
            match conjunct {
                Expr::Join(join) if can_absorb(graph, query, &join) => {
                    debug!(
                        parent = %graph.item(join.parent).alias,
                        target = %graph.item(join.target).alias,
                        "absorbed join predicate"
                    );
                    let item = graph.item_mut(join.target);
                    item.semantics = JoinSemantics::Inner;
                    item.join = Some(join);
                }
                other => kept.push(other),
            }
        }
        *graph.query_mut(query).where_clause_mut() = Expr::and_all(kept);
    }

    for expr in graph.query_mut(query).expressions_mut() {
        expr.replace_joins();
    }
}

fn can_absorb(graph: &QueryGraph, query: QueryId, join: &JoinExpr) -> bool {
    let target = graph.item(join.target);
    if target.owner != query || target.join.is_some() || join.extra.is_some() {
        return false;
    }
    let mut current = Some(join.parent);
    while let Some(id) = current {
        if id == join.target {
            return false;
        }
        current = graph.item(id).join.as_ref().map(|j| j.parent);
    }
    true
}

/// Live items, in any block, joined to `parent`.
fn children_of(graph: &QueryGraph, parent: FromId) -> Vec<FromId> {
    graph
        .queries
        .iter()
        .flat_map(|q| q.from_list.iter().copied())
        .filter(|id| {
            graph
                .item(*id)
                .join
                .as_ref()
                .is_some_and(|j| j.parent == parent)
        })
        .collect()
}

fn eliminate_one(graph: &mut QueryGraph, query: QueryId) -> bool {
    let live = graph.query(query).from_list.clone();
    for id in live {
        if is_unused_target(graph, query, id) {
            eliminate_target(graph, query, id);
            return true;
        }
        if let Some(child) = unused_parent(graph, query, id) {
            eliminate_parent(graph, query, id, child);
            return true;
        }
    }
    false
}

/// A to-one join whose target is only referenced through the columns its
/// parent already holds.
fn is_unused_target(graph: &QueryGraph, query: QueryId, id: FromId) -> bool {
    let item = graph.item(id);
    let Some(join) = &item.join else {
        return false;
    };
    if join.kind != JoinKind::ToOne
        || item.semantics == JoinSemantics::Outer
        || join.extra.is_some()
        || item.fetch
    {
        return false;
    }
    if !children_of(graph, id).is_empty() {
        return false;
    }
    // a sub-select joined only to an enclosing item keeps its FROM clause
    if graph.query(query).from_list.len() <= 1 {
        return false;
    }
    !graph.query_touches_except(query, id, &join.target_columns(), Some(id))
}

/// A root whose single child is a to-many join and which is otherwise only
/// referenced through the link columns.
fn unused_parent(graph: &QueryGraph, query: QueryId, id: FromId) -> Option<FromId> {
    let item = graph.item(id);
    if item.join.is_some() || item.fetch || item.owner != query {
        return None;
    }
    let children = children_of(graph, id);
    let [child] = children.as_slice() else {
        return None;
    };
    let child_item = graph.item(*child);
    let join = child_item.join.as_ref()?;
    if join.kind != JoinKind::ToMany
        || child_item.semantics == JoinSemantics::Outer
        || child_item.owner != query
    {
        return None;
    }
    if graph.query_touches_except(query, id, &join.parent_columns(), Some(*child)) {
        return None;
    }
    Some(*child)
}

fn rewrite_subtree(graph: &mut QueryGraph, query: QueryId, f: &mut dyn FnMut(&mut ColumnRef)) {
    for q in graph.subtree(query) {
        for expr in graph.query_mut(q).expressions_mut() {
            expr.rewrite_columns(f);
        }
        let items = graph.query(q).from_list.clone();
        for item in items {
            if let Some(extra) = graph
                .item_mut(item)
                .join
                .as_mut()
                .and_then(|j| j.extra.as_mut())
            {
                extra.rewrite_columns(f);
            }
        }
    }
}

fn not_null(from: FromId, column: &str) -> Expr {
    Expr::IsNull {
        expr: Box::new(Expr::column(from, column)),
        negated: true,
    }
}

fn push_filter(graph: &mut QueryGraph, query: QueryId, filter: Expr) {
    let filters = &mut graph.query_mut(query).filters;
    if !filters.contains(&filter) {
        filters.push(filter);
    }
}

fn eliminate_target(graph: &mut QueryGraph, query: QueryId, id: FromId) {
    let item = graph.item(id);
    let Some(join) = item.join.clone() else {
        return;
    };
    let inner = item.semantics == JoinSemantics::Inner;
    debug!(alias = %item.alias, parent = %graph.item(join.parent).alias, "eliminated join target");

    rewrite_subtree(graph, query, &mut |c| {
        if c.from == id {
            if let Some(column) = join.parent_column_for(&c.column) {
                c.column = column.to_string();
                c.from = join.parent;
            }
        }
    });
    graph.query_mut(query).from_list.retain(|f| *f != id);

    if inner {
        for column in join.parent_columns() {
            push_filter(graph, query, not_null(join.parent, &column));
        }
    }
}

fn eliminate_parent(graph: &mut QueryGraph, query: QueryId, id: FromId, child: FromId) {
    let Some(join) = graph.item_mut(child).join.take() else {
        return;
    };
    debug!(
        alias = %graph.item(id).alias,
        child = %graph.item(child).alias,
        "eliminated join parent"
    );

    rewrite_subtree(graph, query, &mut |c| {
        if c.from == id {
            if let Some(column) = join.target_column_for(&c.column) {
                c.column = column.to_string();
                c.from = child;
            }
        }
    });

    let from_list = &mut graph.query_mut(query).from_list;
    from_list.retain(|f| *f != child);
    if let Some(slot) = from_list.iter_mut().find(|f| **f == id) {
        *slot = child;
    }

    for column in join.target_columns() {
        push_filter(graph, query, not_null(child, &column));
    }
    if let Some(extra) = join.extra {
        push_filter(graph, query, *extra);
    }
}

fn infer_semantics(graph: &mut QueryGraph, query: QueryId) {
    let block = graph.query(query);
    let mut conjuncts: Vec<Expr> = block
        .where_clause()
        .cloned()
        .map(Expr::into_conjuncts)
        .unwrap_or_default();
    conjuncts.extend(block.filters.iter().cloned());
    if let Some(having) = block.as_select().and_then(|s| s.having.clone()) {
        conjuncts.extend(having.into_conjuncts());
    }
    let live = block.from_list.clone();

    for &id in &live {
        let item = graph.item(id);
        let Some(join) = &item.join else {
            continue;
        };
        let correlated = graph.item(join.parent).owner != query;
        if item.semantics != JoinSemantics::Unknown && !correlated {
            continue;
        }
        let inner = correlated || {
            let mut mentioning = conjuncts
                .iter()
                .filter(|c| c.uses_from(id, Usage::Any, graph))
                .peekable();
            mentioning.peek().is_some()
                && mentioning.all(|c| c.uses_from(id, Usage::IsInnerJoin, graph))
        };
        trace!(alias = %item.alias, inner, "inferred join semantics");
        graph.item_mut(id).semantics = if inner {
            JoinSemantics::Inner
        } else {
            JoinSemantics::Outer
        };
    }

    // an outer parent of an inner child is effectively inner
    let mut changed = true;
    while changed {
        changed = false;
        for &id in &live {
            let item = graph.item(id);
            if item.semantics != JoinSemantics::Inner {
                continue;
            }
            let Some(parent) = item.join.as_ref().map(|j| j.parent) else {
                continue;
            };
            if graph.item(parent).is_outer() && live.contains(&parent) {
                debug!(alias = %graph.item(parent).alias, "outer join parent of inner join made inner");
                graph.item_mut(parent).semantics = JoinSemantics::Inner;
                changed = true;
            }
        }
    }
}

fn reorder_outer(graph: &mut QueryGraph, query: QueryId) {
    let list = graph.query(query).from_list.clone();
    let outer_parent = |id: FromId| -> Option<FromId> {
        let item = graph.item(id);
        if !item.is_outer() {
            return None;
        }
        item.join
            .as_ref()
            .map(|j| j.parent)
            .filter(|p| list.contains(p))
    };

    fn place(
        id: FromId,
        list: &[FromId],
        outer_parent: &dyn Fn(FromId) -> Option<FromId>,
        ordered: &mut Vec<FromId>,
    ) {
        ordered.push(id);
        for &child in list {
            if outer_parent(child) == Some(id) {
                place(child, list, outer_parent, ordered);
            }
        }
    }

    let mut ordered = Vec::with_capacity(list.len());
    for &id in &list {
        if outer_parent(id).is_none() {
            place(id, &list, &outer_parent, &mut ordered);
        }
    }
    if ordered != list {
        trace!(query = query.0, "reordered outer joins");
    }
    graph.query_mut(query).from_list = ordered;
}

/// UPDATE and DELETE name a single table. Inner joins left after
/// elimination move into a correlated `EXISTS (SELECT 1 ...)` together with
/// every condition that reads them; outer joins, and joined tables read by
/// SET values, have no such rewrite.
fn correlate_bulk_joins(graph: &mut QueryGraph, query: QueryId) -> Result<(), ErrorReason> {
    let view: &QueryGraph = graph;
    let block = view.query(query);
    if matches!(block.body, QueryBody::Select(_)) || block.from_list.len() <= 1 {
        return Ok(());
    }
    let joined = block.from_list[1..].to_vec();
    let reads_joined = |expr: &Expr| joined.iter().any(|id| expr.uses_from(*id, Usage::Any, view));

    let assigns_joined = match &block.body {
        QueryBody::Update(update) => update.assignments.iter().any(|a| reads_joined(&a.value)),
        _ => false,
    };
    let outer = joined
        .iter()
        .any(|id| view.item(*id).semantics != JoinSemantics::Inner);
    if outer || assigns_joined {
        let entity = view.item(joined[0]).entity_name().to_string();
        return Err(ErrorReason::BulkStatementJoin { entity });
    }

    let (moved_filters, kept_filters): (Vec<Expr>, Vec<Expr>) =
        block.filters.iter().cloned().partition(|f| reads_joined(f));
    let (moved, mut kept): (Vec<Expr>, Vec<Expr>) = block
        .where_clause()
        .cloned()
        .map(Expr::into_conjuncts)
        .unwrap_or_default()
        .into_iter()
        .partition(|c| reads_joined(c));

    let exists = QueryId(graph.queries.len());
    let mut correlated = AbstractQuery::new(
        exists,
        Some(query),
        QueryBody::Select(SelectQuery {
            has_from: true,
            results: vec![Expr::Literal(Literal::Integer(1))],
            where_clause: Expr::and_all(moved),
            ..SelectQuery::default()
        }),
    );
    correlated.from_list = joined.clone();
    correlated.filters = moved_filters;
    graph.queries.push(correlated);
    for id in &joined {
        graph.item_mut(*id).owner = exists;
    }
    debug!(query = query.0, joined = joined.len(), "moved bulk statement joins into EXISTS");

    kept.push(Expr::Exists(exists));
    let block = graph.query_mut(query);
    block.from_list.truncate(1);
    block.filters = kept_filters;
    *block.where_clause_mut() = Expr::and_all(kept);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, FromItem};
    use crate::schema::Table;

    fn item(id: usize, alias: &str, join: Option<JoinExpr>, semantics: JoinSemantics) -> FromItem {
        FromItem {
            id: FromId(id),
            alias: alias.to_string(),
            sql_name: alias.to_string(),
            table: Table::new(alias),
            entity: None,
            owner: QueryId(0),
            join,
            semantics,
            fetch: false,
        }
    }

    fn to_one(parent: usize, target: usize, fk: &str) -> JoinExpr {
        JoinExpr {
            parent: FromId(parent),
            target: FromId(target),
            link: vec![(fk.to_string(), "id".to_string())],
            kind: JoinKind::ToOne,
            extra: None,
        }
    }

    fn graph(items: Vec<FromItem>, where_clause: Option<Expr>) -> QueryGraph {
        let mut graph = QueryGraph::default();
        let mut query = AbstractQuery::new(
            QueryId(0),
            None,
            QueryBody::Select(SelectQuery {
                has_from: true,
                where_clause,
                results: vec![Expr::LoadEntity { from: FromId(0) }],
                ..SelectQuery::default()
            }),
        );
        query.from_list = items.iter().map(|i| i.id).collect();
        graph.items = items;
        graph.queries.push(query);
        graph
    }

    #[test]
    fn test_unused_target_folds_into_foreign_key() {
        let mut g = graph(
            vec![
                item(0, "o", None, JoinSemantics::Unknown),
                item(1, "c", Some(to_one(0, 1, "customer_id")), JoinSemantics::Unknown),
            ],
            Some(Expr::binary(
                BinOp::Equal,
                Expr::column(FromId(1), "id"),
                Expr::Argument(0),
            )),
        );
        optimize(&mut g).unwrap();
        assert_eq!(g.query(QueryId(0)).from_list, vec![FromId(0)]);
        assert_eq!(
            g.query(QueryId(0)).where_clause(),
            Some(&Expr::binary(
                BinOp::Equal,
                Expr::column(FromId(0), "customer_id"),
                Expr::Argument(0)
            ))
        );
    }

    #[test]
    fn test_target_used_beyond_key_is_kept_and_inferred_outer() {
        let mut g = graph(
            vec![
                item(0, "o", None, JoinSemantics::Unknown),
                item(1, "c", Some(to_one(0, 1, "customer_id")), JoinSemantics::Unknown),
            ],
            None,
        );
        if let QueryBody::Select(s) = &mut g.queries[0].body {
            s.results.push(Expr::column(FromId(1), "name"));
        }
        optimize(&mut g).unwrap();
        assert_eq!(g.item(FromId(1)).semantics, JoinSemantics::Outer);
    }

    #[test]
    fn test_required_predicate_makes_join_inner() {
        let name_eq = Expr::binary(
            BinOp::Equal,
            Expr::column(FromId(1), "name"),
            Expr::Argument(0),
        );
        let mut g = graph(
            vec![
                item(0, "o", None, JoinSemantics::Unknown),
                item(1, "c", Some(to_one(0, 1, "customer_id")), JoinSemantics::Unknown),
            ],
            Some(name_eq.clone()),
        );
        optimize(&mut g).unwrap();
        assert_eq!(g.item(FromId(1)).semantics, JoinSemantics::Inner);

        let mut g = graph(
            vec![
                item(0, "o", None, JoinSemantics::Unknown),
                item(1, "c", Some(to_one(0, 1, "customer_id")), JoinSemantics::Unknown),
            ],
            Some(Expr::not(name_eq)),
        );
        optimize(&mut g).unwrap();
        assert_eq!(g.item(FromId(1)).semantics, JoinSemantics::Outer);
    }

    #[test]
    fn test_inner_child_forces_inner_parent() {
        let mut g = graph(
            vec![
                item(0, "o", None, JoinSemantics::Unknown),
                item(1, "c", Some(to_one(0, 1, "customer_id")), JoinSemantics::Unknown),
                item(2, "a", Some(to_one(1, 2, "address_id")), JoinSemantics::Unknown),
            ],
            Some(Expr::binary(
                BinOp::Equal,
                Expr::column(FromId(2), "city"),
                Expr::Argument(0),
            )),
        );
        if let QueryBody::Select(s) = &mut g.queries[0].body {
            s.results.push(Expr::column(FromId(1), "name"));
        }
        optimize(&mut g).unwrap();
        assert_eq!(g.item(FromId(2)).semantics, JoinSemantics::Inner);
        assert_eq!(g.item(FromId(1)).semantics, JoinSemantics::Inner);
    }
}
