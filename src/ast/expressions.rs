use super::from_item::{FromId, JoinExpr};
use super::operators::{BinOp, UnaryOp};
use super::query::{QueryGraph, QueryId};
use crate::schema::Table;
use rust_decimal::Decimal;

/// A column of one from-item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub from: FromId,
    pub column: String,
}

impl ColumnRef {
    pub fn new(from: FromId, column: &str) -> Self {
        ColumnRef {
            from,
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Long(i64),
    Double(Decimal),
    /// Quoted lexeme, copied to SQL unchanged.
    String(String),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeFn {
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl DateTimeFn {
    pub fn sql(&self) -> &'static str {
        match self {
            DateTimeFn::CurrentDate => "CURRENT_DATE",
            DateTimeFn::CurrentTime => "CURRENT_TIME",
            DateTimeFn::CurrentTimestamp => "CURRENT_TIMESTAMP",
        }
    }
}

/// `ALL`, or `ANY`/`SOME`, in front of a sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
}

impl Quantifier {
    pub fn sql(&self) -> &'static str {
        match self {
            Quantifier::All => "ALL",
            Quantifier::Any => "ANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimSpec {
    Leading,
    Trailing,
    Both,
}

impl TrimSpec {
    pub fn sql(&self) -> &'static str {
        match self {
            TrimSpec::Leading => "LEADING",
            TrimSpec::Trailing => "TRAILING",
            TrimSpec::Both => "BOTH",
        }
    }
}

/// A collection-valued path. It is always evaluated through a correlated
/// sub-query on `table` and never joined into the enclosing query.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRef {
    /// The path as written, for messages.
    pub path: String,
    /// Owner identity columns the link refers to.
    pub owner_keys: Vec<ColumnRef>,
    pub table: Table,
    /// Alias of `table` inside the correlated sub-query.
    pub alias: String,
    /// Columns of `table` matching `owner_keys` pairwise.
    pub link_columns: Vec<String>,
    /// Columns of `table` holding the element's identity.
    pub element_keys: Vec<String>,
    pub element_entity: String,
}

/// A navigation result that has not been lowered to columns yet.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    /// The identity of an entity bound to a from-item.
    Entity(FromId),
    Collection(CollectionRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Null,
    /// Index into the query graph's argument list.
    Argument(usize),
    Column(ColumnRef),
    Path(PathExpr),
    /// All columns of an entity when selected, its identity elsewhere.
    LoadEntity {
        from: FromId,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Concat {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        /// Quoted escape literal.
        escape: Option<String>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    IsEmpty {
        collection: CollectionRef,
        negated: bool,
    },
    MemberOf {
        /// Values compared pairwise with the collection's element keys.
        item: Vec<Expr>,
        collection: CollectionRef,
        negated: bool,
    },
    Size(CollectionRef),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    Trim {
        spec: Option<TrimSpec>,
        character: Option<Box<Expr>>,
        source: Box<Expr>,
    },
    Position {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
    Case {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    DateTime(DateTimeFn),
    Conjunction(Vec<Expr>),
    Disjunction(Vec<Expr>),
    SubSelect(QueryId),
    Exists(QueryId),
    Quantified {
        quantifier: Quantifier,
        query: QueryId,
    },
    Join(JoinExpr),
}

/// What counts as using a from-item in [`Expr::uses_from`].
#[derive(Debug, Clone, Copy)]
pub enum Usage<'a> {
    /// Any reference at all.
    Any,
    /// Any reference except to the listed columns.
    BeyondColumns(&'a [String]),
    /// A reference that makes the expression false or unknown when the
    /// item's columns are all NULL, i.e. one that only holds under an inner
    /// join.
    IsInnerJoin,
}

/// Built-in functions that return NULL for a NULL argument.
const NULL_PROPAGATING: &[&str] = &["LENGTH", "ABS", "SQRT", "MOD", "LOWER", "UPPER", "SUBSTRING"];

impl Expr {
    pub fn column(from: FromId, column: &str) -> Expr {
        Expr::Column(ColumnRef::new(from, column))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(expr),
        }
    }

    /// AND of `parts`, flattening nested conjunctions. A single part is
    /// returned as is.
    pub fn conjunction(parts: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::Conjunction(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Expr::Conjunction(Vec::new()))
        } else {
            Expr::Conjunction(flat)
        }
    }

    /// Like [`Expr::conjunction`], but `None` when there is nothing to AND.
    pub fn and_all(parts: Vec<Expr>) -> Option<Expr> {
        if parts.is_empty() {
            None
        } else {
            Some(Expr::conjunction(parts))
        }
    }

    pub fn disjunction(parts: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::Disjunction(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Expr::Disjunction(Vec::new()))
        } else {
            Expr::Disjunction(flat)
        }
    }

    /// Top-level AND components.
    pub fn into_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::Conjunction(parts) => parts.into_iter().flat_map(Expr::into_conjuncts).collect(),
            other => vec![other],
        }
    }

    /// True for nodes that produce a truth value rather than a scalar.
    pub fn is_predicate(&self) -> bool {
        match self {
            Expr::Binary { op, .. } => op.is_comparison(),
            Expr::Unary { op, .. } => *op == UnaryOp::Not,
            Expr::Between { .. }
            | Expr::Like { .. }
            | Expr::In { .. }
            | Expr::IsNull { .. }
            | Expr::IsEmpty { .. }
            | Expr::MemberOf { .. }
            | Expr::Conjunction(_)
            | Expr::Disjunction(_)
            | Expr::Exists(_)
            | Expr::Join(_) => true,
            _ => false,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Null
            | Expr::Argument(_)
            | Expr::Column(_)
            | Expr::Path(_)
            | Expr::LoadEntity { .. }
            | Expr::IsEmpty { .. }
            | Expr::Size(_)
            | Expr::DateTime(_)
            | Expr::SubSelect(_)
            | Expr::Exists(_)
            | Expr::Quantified { .. } => Vec::new(),
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Binary { left, right, .. } | Expr::Concat { left, right } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expr::Like { expr, pattern, .. } => vec![expr.as_ref(), pattern.as_ref()],
            Expr::In { expr, values, .. } => {
                let mut all: Vec<&Expr> = vec![expr.as_ref()];
                all.extend(values.iter());
                all
            }
            Expr::IsNull { expr, .. } => vec![expr.as_ref()],
            Expr::MemberOf { item, .. } => item.iter().collect(),
            Expr::FunctionCall { args, .. } => args.iter().collect(),
            Expr::Trim {
                character, source, ..
            } => {
                let mut all: Vec<&Expr> = character.iter().map(|c| &**c).collect();
                all.push(source.as_ref());
                all
            }
            Expr::Position { needle, haystack } => vec![needle.as_ref(), haystack.as_ref()],
            Expr::Case {
                condition,
                then,
                otherwise,
            } => vec![condition.as_ref(), then.as_ref(), otherwise.as_ref()],
            Expr::Conjunction(parts) | Expr::Disjunction(parts) => parts.iter().collect(),
            Expr::Join(join) => join.extra.iter().map(|e| &**e).collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Null
            | Expr::Argument(_)
            | Expr::Column(_)
            | Expr::Path(_)
            | Expr::LoadEntity { .. }
            | Expr::IsEmpty { .. }
            | Expr::Size(_)
            | Expr::DateTime(_)
            | Expr::SubSelect(_)
            | Expr::Exists(_)
            | Expr::Quantified { .. } => Vec::new(),
            Expr::Unary { operand, .. } => vec![operand.as_mut()],
            Expr::Binary { left, right, .. } | Expr::Concat { left, right } => {
                vec![left.as_mut(), right.as_mut()]
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
            Expr::Like { expr, pattern, .. } => vec![expr.as_mut(), pattern.as_mut()],
            Expr::In { expr, values, .. } => {
                let mut all: Vec<&mut Expr> = vec![expr.as_mut()];
                all.extend(values.iter_mut());
                all
            }
            Expr::IsNull { expr, .. } => vec![expr.as_mut()],
            Expr::MemberOf { item, .. } => item.iter_mut().collect(),
            Expr::FunctionCall { args, .. } => args.iter_mut().collect(),
            Expr::Trim {
                character, source, ..
            } => {
                let mut all: Vec<&mut Expr> = character.iter_mut().map(|c| &mut **c).collect();
                all.push(source.as_mut());
                all
            }
            Expr::Position { needle, haystack } => vec![needle.as_mut(), haystack.as_mut()],
            Expr::Case {
                condition,
                then,
                otherwise,
            } => vec![condition.as_mut(), then.as_mut(), otherwise.as_mut()],
            Expr::Conjunction(parts) | Expr::Disjunction(parts) => parts.iter_mut().collect(),
            Expr::Join(join) => join.extra.iter_mut().map(|e| &mut **e).collect(),
        }
    }

    /// The collection this node evaluates, if any.
    pub fn collection(&self) -> Option<&CollectionRef> {
        match self {
            Expr::Path(PathExpr::Collection(c))
            | Expr::IsEmpty { collection: c, .. }
            | Expr::MemberOf { collection: c, .. }
            | Expr::Size(c) => Some(c),
            _ => None,
        }
    }

    /// Sub-queries referenced directly by this node.
    pub fn subquery(&self) -> Option<QueryId> {
        match self {
            Expr::SubSelect(q) | Expr::Exists(q) | Expr::Quantified { query: q, .. } => Some(*q),
            _ => None,
        }
    }

    /// Whether this expression (including nested sub-queries) uses `from`.
    pub fn uses_from(&self, from: FromId, usage: Usage<'_>, graph: &QueryGraph) -> bool {
        match usage {
            Usage::Any => self.touches(from, &[], graph),
            Usage::BeyondColumns(columns) => self.touches(from, columns, graph),
            Usage::IsInnerJoin => self.requires(from),
        }
    }

    fn touches(&self, from: FromId, ignoring: &[String], graph: &QueryGraph) -> bool {
        let column_hit = |c: &ColumnRef| c.from == from && !ignoring.contains(&c.column);
        let direct = match self {
            Expr::Column(c) => column_hit(c),
            Expr::Path(PathExpr::Entity(f)) | Expr::LoadEntity { from: f } => *f == from,
            Expr::Join(join) => {
                (join.parent == from
                    && join.parent_columns().iter().any(|c| !ignoring.contains(c)))
                    || (join.target == from
                        && join.target_columns().iter().any(|c| !ignoring.contains(c)))
            }
            _ => self
                .collection()
                .is_some_and(|c| c.owner_keys.iter().any(column_hit)),
        };
        if direct {
            return true;
        }
        if let Some(query) = self.subquery() {
            if graph.query_touches(query, from, ignoring) {
                return true;
            }
        }
        self.children()
            .into_iter()
            .any(|child| child.touches(from, ignoring, graph))
    }

    fn requires(&self, from: FromId) -> bool {
        match self {
            Expr::Column(c) => c.from == from,
            Expr::Literal(_)
            | Expr::Null
            | Expr::Argument(_)
            | Expr::DateTime(_)
            | Expr::Path(_)
            | Expr::LoadEntity { .. } => false,
            Expr::Unary { op, operand } => *op != UnaryOp::Not && operand.requires(from),
            Expr::Binary { left, right, .. } => {
                if matches!(**right, Expr::Quantified { .. }) {
                    // x > ALL (empty) holds even for NULL x
                    return false;
                }
                left.requires(from) || right.requires(from)
            }
            Expr::Concat { left, right } => left.requires(from) || right.requires(from),
            Expr::Position { needle, haystack } => needle.requires(from) || haystack.requires(from),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => !negated && (expr.requires(from) || low.requires(from) || high.requires(from)),
            Expr::Like {
                expr,
                pattern,
                negated,
                ..
            } => !negated && (expr.requires(from) || pattern.requires(from)),
            Expr::In { expr, negated, .. } => !negated && expr.requires(from),
            Expr::IsNull { expr, negated } => *negated && expr.requires(from),
            Expr::FunctionCall { name, args, .. } => {
                NULL_PROPAGATING.contains(&name.as_str()) && args.iter().any(|a| a.requires(from))
            }
            Expr::Trim {
                character, source, ..
            } => source.requires(from) || character.as_ref().is_some_and(|c| c.requires(from)),
            Expr::Conjunction(parts) => parts.iter().any(|p| p.requires(from)),
            Expr::Disjunction(parts) => !parts.is_empty() && parts.iter().all(|p| p.requires(from)),
            Expr::Join(join) => join.parent == from || join.target == from,
            Expr::Case { .. }
            | Expr::IsEmpty { .. }
            | Expr::MemberOf { .. }
            | Expr::Size(_)
            | Expr::SubSelect(_)
            | Expr::Exists(_)
            | Expr::Quantified { .. } => false,
        }
    }

    /// Apply `f` to every column reference, including collection owner keys.
    pub fn rewrite_columns(&mut self, f: &mut dyn FnMut(&mut ColumnRef)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Path(PathExpr::Collection(c))
            | Expr::IsEmpty { collection: c, .. }
            | Expr::MemberOf { collection: c, .. }
            | Expr::Size(c) => c.owner_keys.iter_mut().for_each(|k| f(k)),
            _ => {}
        }
        for child in self.children_mut() {
            child.rewrite_columns(f);
        }
    }

    /// Replace every [`Expr::Join`] node with its equality predicate.
    pub fn replace_joins(&mut self) {
        if let Expr::Join(join) = self {
            *self = join.predicate();
        }
        for child in self.children_mut() {
            child.replace_joins();
        }
    }
}
