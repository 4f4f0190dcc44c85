//! The compiled query.
//!
//! A [`Query`] is the immutable result of compiling one query text: the SQL
//! string, how user parameters bind to its `?` markers, cache facts about
//! the tables it reads, and the shape of its result rows. It holds no
//! interior mutability and can be shared freely between threads, which is
//! what lets a caller keep a cache of compiled queries keyed by text.
//!
//! # Features
//!
//! - **Argument plan** via [`Query::arguments()`] - one binding per `?`, in SQL order
//! - **Parameter list** via [`Query::parameters()`] - distinct parameters in first-use order
//! - **Cache facts** - [`Query::cache_max_age()`] and [`Query::tables_read_only()`]
//! - **JSON rendering** via [`to_json()`] and [`to_json_pretty()`]
//!
//! # Examples
//!
//! ```
//! use eql::schema::{EntityMetadata, InMemorySchema, Table};
//! use eql::output::to_json;
//!
//! let schema = InMemorySchema::new().with_entity(
//!     EntityMetadata::new("Product", Table::new("products"))
//!         .with_id("id", "id")
//!         .with_column("name", "name"),
//! );
//! let query = eql::compile("SELECT p.name FROM Product p WHERE p.id = ?1", &schema).unwrap();
//!
//! assert_eq!(query.sql(), "SELECT p.name FROM products p WHERE p.id = ?");
//! assert!(to_json(&query).contains("\"sql_ordinal\":1"));
//! ```

use crate::ast::{ArgSource, Expr, QueryBody, QueryGraph, QueryId};
use crate::compiler::CompileOptions;
use crate::emitter::SqlWriter;
use crate::error::QueryCompileError;
use crate::optimizer::optimize;
use crate::parser::ParsedQuery;
use crate::schema::DEFAULT_CACHE_TIMEOUT;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Which user parameter a `?` marker binds, and its 1-based position in
/// the SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgBinding {
    pub source: ArgSource,
    pub sql_ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Update,
    Delete,
}

/// One result column group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultItem {
    /// A single value.
    Scalar,
    /// A whole entity, materialized from `columns` in this order.
    Entity { entity: String, columns: Vec<String> },
}

/// An eagerly loaded relationship, appended after the result columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchShape {
    /// Alias of the result entity the relationship belongs to.
    pub owner: String,
    pub path: String,
    pub entity: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultShape {
    pub items: Vec<ResultItem>,
    /// Class named by `SELECT NEW`.
    pub constructor: Option<String>,
    pub fetches: Vec<FetchShape>,
    pub distinct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Query {
    source: String,
    kind: StatementKind,
    sql: String,
    arguments: Vec<ArgBinding>,
    parameters: Vec<ArgSource>,
    #[serde(rename = "cache_max_age_ms", with = "crate::schema::millis")]
    cache_max_age: Duration,
    tables_read_only: bool,
    result_shape: ResultShape,
    #[serde(skip)]
    graph: QueryGraph,
}

impl Query {
    /// Optimize and render a parsed statement. This is the only place a
    /// query graph is modified after parsing.
    pub fn init(
        source: &str,
        parsed: ParsedQuery,
        options: &CompileOptions,
    ) -> Result<Query, QueryCompileError> {
        let ParsedQuery { mut graph, root } = parsed;
        optimize(&mut graph).map_err(|reason| QueryCompileError::new(reason, source))?;

        let emitted = SqlWriter::new(&graph, options).write_statement(root);
        let mut arguments = Vec::with_capacity(emitted.markers.len());
        for (position, index) in emitted.markers.iter().enumerate() {
            let sql_ordinal = position + 1;
            if let Some(arg) = graph.arguments.get_mut(*index) {
                arg.sql_ordinals.push(sql_ordinal);
                arguments.push(ArgBinding {
                    source: arg.source.clone(),
                    sql_ordinal,
                });
            }
        }
        let parameters = graph.arguments.iter().map(|a| a.source.clone()).collect();

        let (cache_max_age, tables_read_only) = cache_facts(&graph);
        let kind = match graph.query(root).body {
            QueryBody::Select(_) => StatementKind::Select,
            QueryBody::Update(_) => StatementKind::Update,
            QueryBody::Delete(_) => StatementKind::Delete,
        };
        let result_shape = result_shape(&graph, root);

        debug!(sql = %emitted.sql, arguments = arguments.len(), "compiled query");
        Ok(Query {
            source: source.to_string(),
            kind,
            sql: emitted.sql,
            arguments,
            parameters,
            cache_max_age,
            tables_read_only,
            result_shape,
            graph,
        })
    }

    /// The query text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// One binding per `?` marker, in SQL order.
    pub fn arguments(&self) -> &[ArgBinding] {
        &self.arguments
    }

    /// Distinct user parameters in the order they first appear in the
    /// query text.
    pub fn parameters(&self) -> &[ArgSource] {
        &self.parameters
    }

    /// Shortest cache timeout of any table the statement reads.
    pub fn cache_max_age(&self) -> Duration {
        self.cache_max_age
    }

    pub fn tables_read_only(&self) -> bool {
        self.tables_read_only
    }

    pub fn result_shape(&self) -> &ResultShape {
        &self.result_shape
    }

    /// The optimized from-items and query blocks.
    pub fn graph(&self) -> &QueryGraph {
        &self.graph
    }
}

fn cache_facts(graph: &QueryGraph) -> (Duration, bool) {
    let tables = graph
        .queries
        .iter()
        .flat_map(|q| q.from_list.iter().map(|id| &graph.item(*id).table))
        .chain(graph.correlated_tables.iter());

    let mut max_age: Option<Duration> = None;
    let mut read_only = true;
    for table in tables {
        let timeout = table.cache_timeout();
        max_age = Some(max_age.map_or(timeout, |current| current.min(timeout)));
        read_only &= table.is_read_only();
    }
    (max_age.unwrap_or(DEFAULT_CACHE_TIMEOUT), read_only)
}

fn result_shape(graph: &QueryGraph, root: QueryId) -> ResultShape {
    let Some(select) = graph.query(root).as_select() else {
        return ResultShape::default();
    };
    let items = select
        .results
        .iter()
        .map(|result| match result {
            Expr::LoadEntity { from } => {
                let item = graph.item(*from);
                ResultItem::Entity {
                    entity: item.entity_name().to_string(),
                    columns: item
                        .entity
                        .as_ref()
                        .map(|e| e.load_columns())
                        .unwrap_or_default(),
                }
            }
            _ => ResultItem::Scalar,
        })
        .collect();
    let fetches = select
        .fetches
        .iter()
        .map(|fetch| {
            let target = graph.item(fetch.target);
            FetchShape {
                owner: graph.item(fetch.owner).alias.clone(),
                path: fetch.path.clone(),
                entity: target.entity_name().to_string(),
                columns: target
                    .entity
                    .as_ref()
                    .map(|e| e.load_columns())
                    .unwrap_or_default(),
            }
        })
        .collect();
    ResultShape {
        items,
        constructor: select.constructor.clone(),
        fetches,
        distinct: select.distinct,
    }
}

/// Render a compiled query as compact JSON.
pub fn to_json(query: &Query) -> String {
    serde_json::to_string(query).unwrap_or_default()
}

/// Render a compiled query as JSON with 2-space indentation.
pub fn to_json_pretty(query: &Query) -> String {
    serde_json::to_string_pretty(query).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;

    #[test]
    fn test_cache_facts_fold_over_tables() {
        let mut graph = QueryGraph::default();
        graph.correlated_tables.push(
            Table::new("a")
                .with_cache_timeout(Duration::from_secs(5))
                .with_read_only(true),
        );
        graph
            .correlated_tables
            .push(Table::new("b").with_read_only(true));
        assert_eq!(cache_facts(&graph), (Duration::from_millis(250), true));

        graph.correlated_tables.push(Table::new("c"));
        assert!(!cache_facts(&graph).1);
    }

    #[test]
    fn test_no_tables_uses_default_timeout() {
        let graph = QueryGraph::default();
        assert_eq!(cache_facts(&graph), (DEFAULT_CACHE_TIMEOUT, true));
    }

    #[test]
    fn test_query_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Query>();
    }
}
