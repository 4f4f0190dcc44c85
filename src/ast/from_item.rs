use super::expressions::{ColumnRef, Expr};
use super::operators::BinOp;
use super::query::QueryId;
use crate::schema::{EntityMetadata, Table};
use std::sync::Arc;

/// Index of a from-item in its [`QueryGraph`](super::QueryGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FromId(pub usize);

/// Whether a joined from-item drops rows it cannot match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinSemantics {
    /// Not declared; decided by the optimizer.
    #[default]
    Unknown,
    Inner,
    Outer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// At most one target row per parent row.
    ToOne,
    /// Any number of target rows per parent row.
    ToMany,
}

/// The equi-join linking a from-item (`target`) to the item it was reached
/// from (`parent`).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpr {
    pub parent: FromId,
    pub target: FromId,
    /// `(parent column, target column)` pairs.
    pub link: Vec<(String, String)>,
    pub kind: JoinKind,
    /// Additional filter on the target, e.g. a discriminator test.
    pub extra: Option<Box<Expr>>,
}

impl JoinExpr {
    pub fn parent_columns(&self) -> Vec<String> {
        self.link.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn target_columns(&self) -> Vec<String> {
        self.link.iter().map(|(_, t)| t.clone()).collect()
    }

    /// The parent column matched to `target_column`, if it is a link column.
    pub fn parent_column_for(&self, target_column: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|(_, t)| t == target_column)
            .map(|(p, _)| p.as_str())
    }

    pub fn target_column_for(&self, parent_column: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|(p, _)| p == parent_column)
            .map(|(_, t)| t.as_str())
    }

    /// Equality of each link pair, followed by the extra filter.
    pub fn predicate(&self) -> Expr {
        let mut parts: Vec<Expr> = self
            .link
            .iter()
            .map(|(p, t)| Expr::Binary {
                op: BinOp::Equal,
                left: Box::new(Expr::Column(ColumnRef::new(self.parent, p))),
                right: Box::new(Expr::Column(ColumnRef::new(self.target, t))),
            })
            .collect();
        if let Some(extra) = &self.extra {
            parts.push((**extra).clone());
        }
        Expr::conjunction(parts)
    }
}

/// One table reference in a query's FROM clause.
#[derive(Debug, Clone)]
pub struct FromItem {
    pub id: FromId,
    /// Name the query text uses for this item (declared or generated).
    pub alias: String,
    /// Qualifier used in SQL. Equal to `alias` except for the target of an
    /// UPDATE or DELETE, which is qualified by its table name.
    pub sql_name: String,
    pub table: Table,
    /// `None` for association tables of many-to-many relationships.
    pub entity: Option<Arc<EntityMetadata>>,
    pub owner: QueryId,
    pub join: Option<JoinExpr>,
    pub semantics: JoinSemantics,
    pub fetch: bool,
}

impl FromItem {
    pub fn entity_name(&self) -> &str {
        match &self.entity {
            Some(entity) => &entity.name,
            None => &self.table.name,
        }
    }

    pub fn id_columns(&self) -> Vec<String> {
        self.entity
            .as_ref()
            .map(|e| e.id_columns())
            .unwrap_or_default()
    }

    /// Joined with LEFT OUTER JOIN semantics.
    pub fn is_outer(&self) -> bool {
        self.join.is_some() && self.semantics == JoinSemantics::Outer
    }
}
