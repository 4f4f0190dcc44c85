use super::expressions::{Expr, Usage};
use super::from_item::{FromId, FromItem};
use crate::schema::Table;
use serde::Serialize;

/// Index of a query block (the statement itself or a sub-select) in its
/// [`QueryGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub usize);

/// How the caller refers to a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgSource {
    /// `?n`, 1-based.
    Positional(u32),
    /// `:name`
    Named(String),
}

/// A distinct user parameter and the SQL ordinals it was rendered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgExpr {
    pub source: ArgSource,
    pub sql_ordinals: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: Expr,
    pub descending: bool,
}

/// A `JOIN FETCH` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJoin {
    /// Item the fetched relationship belongs to.
    pub owner: FromId,
    pub target: FromId,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub results: Vec<Expr>,
    /// Class named by `SELECT NEW`.
    pub constructor: Option<String>,
    pub has_from: bool,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderTerm>,
    pub fetches: Vec<FetchJoin>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub columns: Vec<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateQuery {
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteQuery {
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum QueryBody {
    Select(SelectQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

/// One query block: its from-items plus the statement-specific parts.
#[derive(Debug, Clone)]
pub struct AbstractQuery {
    pub id: QueryId,
    pub parent: Option<QueryId>,
    /// Items in FROM order.
    pub from_list: Vec<FromId>,
    /// Predicates added by the compiler (discriminators, eliminated joins).
    pub filters: Vec<Expr>,
    pub body: QueryBody,
}

impl AbstractQuery {
    pub fn new(id: QueryId, parent: Option<QueryId>, body: QueryBody) -> Self {
        AbstractQuery {
            id,
            parent,
            from_list: Vec::new(),
            filters: Vec::new(),
            body,
        }
    }

    pub fn as_select(&self) -> Option<&SelectQuery> {
        match &self.body {
            QueryBody::Select(select) => Some(select),
            _ => None,
        }
    }

    pub fn as_select_mut(&mut self) -> Option<&mut SelectQuery> {
        match &mut self.body {
            QueryBody::Select(select) => Some(select),
            _ => None,
        }
    }

    pub fn where_clause(&self) -> Option<&Expr> {
        match &self.body {
            QueryBody::Select(s) => s.where_clause.as_ref(),
            QueryBody::Update(u) => u.where_clause.as_ref(),
            QueryBody::Delete(d) => d.where_clause.as_ref(),
        }
    }

    pub fn where_clause_mut(&mut self) -> &mut Option<Expr> {
        match &mut self.body {
            QueryBody::Select(s) => &mut s.where_clause,
            QueryBody::Update(u) => &mut u.where_clause,
            QueryBody::Delete(d) => &mut d.where_clause,
        }
    }

    /// Every expression owned by this block, excluding join predicates.
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut all: Vec<&Expr> = self.filters.iter().collect();
        match &self.body {
            QueryBody::Select(s) => {
                all.extend(s.results.iter());
                all.extend(s.where_clause.iter());
                all.extend(s.group_by.iter());
                all.extend(s.having.iter());
                all.extend(s.order_by.iter().map(|t| &t.expr));
            }
            QueryBody::Update(u) => {
                all.extend(u.assignments.iter().map(|a| &a.value));
                all.extend(u.where_clause.iter());
            }
            QueryBody::Delete(d) => all.extend(d.where_clause.iter()),
        }
        all
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expr> {
        let mut all: Vec<&mut Expr> = self.filters.iter_mut().collect();
        match &mut self.body {
            QueryBody::Select(s) => {
                all.extend(s.results.iter_mut());
                all.extend(s.where_clause.iter_mut());
                all.extend(s.group_by.iter_mut());
                all.extend(s.having.iter_mut());
                all.extend(s.order_by.iter_mut().map(|t| &mut t.expr));
            }
            QueryBody::Update(u) => {
                all.extend(u.assignments.iter_mut().map(|a| &mut a.value));
                all.extend(u.where_clause.iter_mut());
            }
            QueryBody::Delete(d) => all.extend(d.where_clause.iter_mut()),
        }
        all
    }
}

/// Everything built while compiling one query text: the from-item arena,
/// every query block, and the distinct parameters in first-use order.
#[derive(Debug, Clone, Default)]
pub struct QueryGraph {
    pub items: Vec<FromItem>,
    pub queries: Vec<AbstractQuery>,
    pub arguments: Vec<ArgExpr>,
    /// Tables read by correlated collection sub-queries.
    pub correlated_tables: Vec<Table>,
}

impl QueryGraph {
    pub fn item(&self, id: FromId) -> &FromItem {
        &self.items[id.0]
    }

    pub fn item_mut(&mut self, id: FromId) -> &mut FromItem {
        &mut self.items[id.0]
    }

    pub fn query(&self, id: QueryId) -> &AbstractQuery {
        &self.queries[id.0]
    }

    pub fn query_mut(&mut self, id: QueryId) -> &mut AbstractQuery {
        &mut self.queries[id.0]
    }

    /// Items currently in the FROM list of `query`.
    pub fn live_items(&self, query: QueryId) -> impl Iterator<Item = &FromItem> + '_ {
        self.query(query)
            .from_list
            .iter()
            .map(move |id| self.item(*id))
    }

    /// `query` followed by every block nested inside it.
    pub fn subtree(&self, query: QueryId) -> Vec<QueryId> {
        let mut found = vec![query];
        let mut i = 0;
        while i < found.len() {
            let current = found[i];
            found.extend(
                self.queries
                    .iter()
                    .filter(|q| q.parent == Some(current))
                    .map(|q| q.id),
            );
            i += 1;
        }
        found
    }

    /// Whether `query` or anything nested in it references `from`, apart
    /// from the `ignoring` columns and the join of `skip`.
    pub fn query_touches_except(
        &self,
        query: QueryId,
        from: FromId,
        ignoring: &[String],
        skip: Option<FromId>,
    ) -> bool {
        let usage = Usage::BeyondColumns(ignoring);
        let block = self.query(query);
        if block
            .expressions()
            .into_iter()
            .any(|e| e.uses_from(from, usage, self))
        {
            return true;
        }
        self.live_items(query)
            .filter(|item| Some(item.id) != skip)
            .filter_map(|item| item.join.as_ref())
            .any(|join| {
                (join.parent == from
                    && join.parent_columns().iter().any(|c| !ignoring.contains(c)))
                    || (join.target == from
                        && join.target_columns().iter().any(|c| !ignoring.contains(c)))
                    || join
                        .extra
                        .as_ref()
                        .is_some_and(|e| e.uses_from(from, usage, self))
            })
    }

    pub fn query_touches(&self, query: QueryId, from: FromId, ignoring: &[String]) -> bool {
        self.query_touches_except(query, from, ignoring, None)
    }
}
