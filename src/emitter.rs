//! SQL text generation.
//!
//! [`SqlWriter`] walks an optimized [`QueryGraph`] top-down and renders one
//! SQL statement. Every `?` marker is numbered as it is written, so the
//! binding order always follows the final text, not the order parameters
//! were parsed in.

use crate::ast::{
    CollectionRef, ColumnRef, Expr, FromId, Literal, PathExpr, QueryBody, QueryGraph,
    QueryId, SelectQuery, UnaryOp,
};
use crate::compiler::CompileOptions;
use regex::Regex;
use std::sync::LazyLock;

static PLAIN_IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").ok());

/// Quote an SQL identifier unless it is a plain name. Dotted table names
/// are quoted part by part.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let plain = PLAIN_IDENTIFIER
                .as_ref()
                .is_some_and(|re| re.is_match(part));
            if plain {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Rendered statement plus, for each `?` in order, the index of the
/// argument it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub sql: String,
    pub markers: Vec<usize>,
}

pub struct SqlWriter<'a> {
    graph: &'a QueryGraph,
    options: &'a CompileOptions,
    markers: Vec<usize>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(graph: &'a QueryGraph, options: &'a CompileOptions) -> Self {
        SqlWriter {
            graph,
            options,
            markers: Vec::new(),
        }
    }

    pub fn write_statement(mut self, root: QueryId) -> Emitted {
        let mut out = String::new();
        self.write_query(&mut out, root, false);
        Emitted {
            sql: out,
            markers: self.markers,
        }
    }

    fn write_query(&mut self, out: &mut String, query: QueryId, nested: bool) {
        let graph = self.graph;
        match &graph.query(query).body {
            QueryBody::Select(select) => self.write_select(out, query, select, nested),
            QueryBody::Update(update) => {
                out.push_str("UPDATE ");
                self.write_bulk_target(out, query);
                out.push_str(" SET ");
                let mut first = true;
                for assignment in &update.assignments {
                    for column in &assignment.columns {
                        if !first {
                            out.push_str(", ");
                        }
                        first = false;
                        out.push_str(&quote_identifier(column));
                        out.push_str(" = ");
                        self.write_expr(out, &assignment.value);
                    }
                }
                self.write_where(out, query, update.where_clause.as_ref());
            }
            QueryBody::Delete(delete) => {
                out.push_str("DELETE FROM ");
                self.write_bulk_target(out, query);
                self.write_where(out, query, delete.where_clause.as_ref());
            }
        }
    }

    fn write_bulk_target(&mut self, out: &mut String, query: QueryId) {
        if let Some(id) = self.graph.query(query).from_list.first() {
            out.push_str(&quote_identifier(&self.graph.item(*id).table.name));
        }
    }

    fn write_select(&mut self, out: &mut String, query: QueryId, select: &SelectQuery, nested: bool) {
        out.push_str("SELECT ");
        if select.distinct {
            out.push_str("DISTINCT ");
        }
        for (i, result) in select.results.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match result {
                Expr::LoadEntity { from } if !nested => self.write_columns(out, *from, true),
                other => self.write_expr(out, other),
            }
        }
        if !nested {
            for fetch in &select.fetches {
                out.push_str(", ");
                self.write_columns(out, fetch.target, true);
            }
        }

        if select.has_from {
            self.write_from(out, query);
        }
        self.write_where(out, query, select.where_clause.as_ref());

        if !select.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            self.write_list(out, &select.group_by);
        }
        if let Some(having) = &select.having {
            out.push_str(" HAVING ");
            self.write_expr(out, having);
        }
        if !select.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            for (i, term) in select.order_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.write_expr(out, &term.expr);
                if term.descending {
                    out.push_str(" DESC");
                }
            }
        }
    }

    /// Every stored column of the entity, or its identity only.
    fn write_columns(&mut self, out: &mut String, from: FromId, load: bool) {
        let item = self.graph.item(from);
        let columns = match (&item.entity, load) {
            (Some(entity), true) => entity.load_columns(),
            _ => item.id_columns(),
        };
        let rendered: Vec<String> = columns
            .iter()
            .map(|c| self.column(&ColumnRef::new(from, c)))
            .collect();
        out.push_str(&rendered.join(", "));
    }

    fn write_from(&mut self, out: &mut String, query: QueryId) {
        let graph = self.graph;
        for (i, id) in graph.query(query).from_list.iter().enumerate() {
            let item = graph.item(*id);
            let table = format!(
                "{} {}",
                quote_identifier(&item.table.name),
                quote_identifier(&item.sql_name)
            );
            if i == 0 {
                out.push_str(" FROM ");
                out.push_str(&table);
            } else if item.is_outer() {
                out.push_str(" LEFT OUTER JOIN ");
                out.push_str(&table);
                if let Some(join) = &item.join {
                    out.push_str(" ON ");
                    self.write_expr(out, &join.predicate());
                }
            } else {
                out.push_str(", ");
                out.push_str(&table);
            }
        }
    }

    /// Inner join predicates in FROM order, then compiler filters, then the
    /// query's own condition.
    fn write_where(&mut self, out: &mut String, query: QueryId, condition: Option<&Expr>) {
        let graph = self.graph;
        let block = graph.query(query);
        let mut parts: Vec<Expr> = Vec::new();
        for (i, id) in block.from_list.iter().enumerate() {
            let item = graph.item(*id);
            if let Some(join) = &item.join {
                if i == 0 || !item.is_outer() {
                    parts.push(join.predicate());
                }
            }
        }
        parts.extend(block.filters.iter().cloned());
        parts.extend(condition.cloned());
        if parts.is_empty() {
            return;
        }

        out.push_str(" WHERE ");
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push_str(" AND ");
            }
            self.write_expr(out, part);
        }
    }

    fn write_list(&mut self, out: &mut String, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_expr(out, expr);
        }
    }

    fn column(&self, column: &ColumnRef) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.graph.item(column.from).sql_name),
            quote_identifier(&column.column)
        )
    }

    fn write_literal(&self, out: &mut String, literal: &Literal) {
        match literal {
            Literal::Integer(n) | Literal::Long(n) => out.push_str(&n.to_string()),
            Literal::Double(d) => out.push_str(&d.to_string()),
            Literal::String(s) => out.push_str(s),
            Literal::Boolean(true) => out.push_str(&self.options.true_literal),
            Literal::Boolean(false) => out.push_str(&self.options.false_literal),
        }
    }

    /// A predicate used as an operand is parenthesized.
    fn write_operand(&mut self, out: &mut String, expr: &Expr) {
        if expr.is_predicate() && !matches!(expr, Expr::Disjunction(_)) {
            out.push('(');
            self.write_expr(out, expr);
            out.push(')');
        } else {
            self.write_expr(out, expr);
        }
    }

    fn write_subquery(&mut self, out: &mut String, query: QueryId) {
        out.push('(');
        self.write_query(out, query, true);
        out.push(')');
    }

    /// `FROM table alias WHERE link = owner` of a correlated collection
    /// sub-query.
    fn write_collection_source(&mut self, out: &mut String, collection: &CollectionRef) {
        let alias = quote_identifier(&collection.alias);
        out.push_str(" FROM ");
        out.push_str(&quote_identifier(&collection.table.name));
        out.push(' ');
        out.push_str(&alias);
        out.push_str(" WHERE ");
        for (i, (link, owner)) in collection
            .link_columns
            .iter()
            .zip(&collection.owner_keys)
            .enumerate()
        {
            if i > 0 {
                out.push_str(" AND ");
            }
            out.push_str(&format!(
                "{alias}.{} = {}",
                quote_identifier(link),
                self.column(owner)
            ));
        }
    }

    pub fn write_expr(&mut self, out: &mut String, expr: &Expr) {
        match expr {
            Expr::Literal(literal) => self.write_literal(out, literal),
            Expr::Null => out.push_str("NULL"),
            Expr::Argument(index) => {
                self.markers.push(*index);
                out.push('?');
            }
            Expr::Column(column) => out.push_str(&self.column(column)),
            Expr::Path(PathExpr::Entity(from)) | Expr::LoadEntity { from } => {
                self.write_columns(out, *from, false)
            }
            Expr::Path(PathExpr::Collection(collection)) => {
                let keys: Vec<String> = collection.owner_keys.iter().map(|k| self.column(k)).collect();
                out.push_str(&keys.join(", "));
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    out.push_str("NOT (");
                    self.write_expr(out, operand);
                    out.push(')');
                }
                UnaryOp::Negate => {
                    let simple = matches!(
                        **operand,
                        Expr::Column(_) | Expr::Literal(_) | Expr::Argument(_)
                    );
                    out.push('-');
                    if simple {
                        self.write_expr(out, operand);
                    } else {
                        out.push('(');
                        self.write_expr(out, operand);
                        out.push(')');
                    }
                }
                UnaryOp::Plus => self.write_expr(out, operand),
            },
            Expr::Binary { op, left, right } => {
                if op.is_comparison() {
                    self.write_operand(out, left);
                    out.push_str(&format!(" {} ", op.sql()));
                    self.write_operand(out, right);
                } else {
                    out.push('(');
                    self.write_operand(out, left);
                    out.push_str(&format!(" {} ", op.sql()));
                    self.write_operand(out, right);
                    out.push(')');
                }
            }
            Expr::Concat { left, right } => {
                out.push('(');
                self.write_operand(out, left);
                out.push_str(" || ");
                self.write_operand(out, right);
                out.push(')');
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.write_operand(out, expr);
                out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.write_operand(out, low);
                out.push_str(" AND ");
                self.write_operand(out, high);
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                self.write_operand(out, expr);
                out.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                self.write_operand(out, pattern);
                if let Some(escape) = escape {
                    out.push_str(" ESCAPE ");
                    out.push_str(escape);
                }
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                self.write_operand(out, expr);
                out.push_str(if *negated { " NOT IN " } else { " IN " });
                match values.as_slice() {
                    [Expr::SubSelect(query)] => self.write_subquery(out, *query),
                    _ => {
                        out.push('(');
                        self.write_list(out, values);
                        out.push(')');
                    }
                }
            }
            Expr::IsNull { expr, negated } => {
                self.write_operand(out, expr);
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::IsEmpty {
                collection,
                negated,
            } => {
                out.push_str(if *negated { "EXISTS (SELECT 1" } else { "NOT EXISTS (SELECT 1" });
                self.write_collection_source(out, collection);
                out.push(')');
            }
            Expr::MemberOf {
                item,
                collection,
                negated,
            } => {
                out.push_str(if *negated { "NOT EXISTS (SELECT 1" } else { "EXISTS (SELECT 1" });
                self.write_collection_source(out, collection);
                let alias = quote_identifier(&collection.alias);
                for (key, value) in collection.element_keys.iter().zip(item) {
                    out.push_str(&format!(" AND {alias}.{} = ", quote_identifier(key)));
                    self.write_operand(out, value);
                }
                out.push(')');
            }
            Expr::Size(collection) => {
                out.push_str("(SELECT COUNT(*)");
                self.write_collection_source(out, collection);
                out.push(')');
            }
            Expr::FunctionCall {
                name,
                args,
                distinct,
            } => {
                out.push_str(name);
                out.push('(');
                if *distinct {
                    out.push_str("DISTINCT ");
                }
                if args.is_empty() && name == "COUNT" {
                    out.push('*');
                }
                self.write_list(out, args);
                out.push(')');
            }
            Expr::Trim {
                spec,
                character,
                source,
            } => {
                out.push_str("TRIM(");
                if let Some(spec) = spec {
                    out.push_str(spec.sql());
                    out.push(' ');
                }
                if let Some(character) = character {
                    self.write_expr(out, character);
                    out.push(' ');
                }
                if spec.is_some() || character.is_some() {
                    out.push_str("FROM ");
                }
                self.write_expr(out, source);
                out.push(')');
            }
            Expr::Position { needle, haystack } => {
                out.push_str("POSITION(");
                self.write_operand(out, needle);
                out.push_str(" IN ");
                self.write_operand(out, haystack);
                out.push(')');
            }
            Expr::Case {
                condition,
                then,
                otherwise,
            } => {
                out.push_str("CASE WHEN ");
                self.write_expr(out, condition);
                out.push_str(" THEN ");
                self.write_expr(out, then);
                out.push_str(" ELSE ");
                self.write_expr(out, otherwise);
                out.push_str(" END");
            }
            Expr::DateTime(function) => out.push_str(function.sql()),
            Expr::Conjunction(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" AND ");
                    }
                    self.write_expr(out, part);
                }
            }
            Expr::Disjunction(parts) => {
                out.push('(');
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" OR ");
                    }
                    if matches!(part, Expr::Conjunction(_)) {
                        out.push('(');
                        self.write_expr(out, part);
                        out.push(')');
                    } else {
                        self.write_expr(out, part);
                    }
                }
                out.push(')');
            }
            Expr::SubSelect(query) => self.write_subquery(out, *query),
            Expr::Exists(query) => {
                out.push_str("EXISTS ");
                self.write_subquery(out, *query);
            }
            Expr::Quantified { quantifier, query } => {
                out.push_str(quantifier.sql());
                out.push(' ');
                self.write_subquery(out, *query);
            }
            Expr::Join(join) => self.write_expr(out, &join.predicate()),
        }
    }
}
