use crate::{
    ast::{
        ArgSource, Assignment, BinOp, DateTimeFn, DeleteQuery, Expr, FetchJoin, FromId,
        JoinSemantics, Keyword, Literal, OrderTerm, PathExpr, Quantifier, QueryBody, QueryGraph,
        QueryId, SelectQuery, Token, TrimSpec, UnaryOp, UpdateQuery,
    },
    binder::{Binder, Bound},
    compiler::CompileOptions,
    error::{ErrorReason, QueryCompileError},
    lexer::{Lexer, LexerState},
    schema::{ClassLookup, EntityMetadata, FieldKind, SchemaResolver},
};
use std::sync::Arc;
use tracing::trace;

/// The output of parsing: every query block and from-item, plus the block
/// that is the statement itself.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub graph: QueryGraph,
    pub root: QueryId,
}

/// Parser position, including the pushed-back token.
#[derive(Debug, Clone)]
struct Mark {
    lexer: LexerState,
    token: Option<Token>,
}

/// Where a FROM declaration points.
enum FromSource {
    Root(Arc<EntityMetadata>, String),
    Path(FromId, Vec<String>),
}

type ParseResult<T> = Result<T, QueryCompileError>;

pub struct Parser<'s> {
    lexer: Lexer,
    token: Option<Token>,
    last: String,
    binder: Binder<'s>,
    query: Option<QueryId>,
    join_semantics: JoinSemantics,
    join_fetch: bool,
    pending_fetches: Vec<FetchJoin>,
}

impl<'s> Parser<'s> {
    pub fn new(lexer: Lexer, schema: &'s dyn SchemaResolver) -> Self {
        Self::with_options(lexer, schema, &CompileOptions::default())
    }

    pub fn with_options(
        lexer: Lexer,
        schema: &'s dyn SchemaResolver,
        options: &CompileOptions,
    ) -> Self {
        let mut binder = Binder::new(schema, &options.alias_prefix);
        // lexing errors surface again once parsing reaches them
        if let Ok(tokens) = Lexer::new(lexer.source()).tokenize() {
            binder.reserve_aliases(tokens.into_iter().filter_map(|token| match token {
                Token::Identifier(name) => Some(name),
                _ => None,
            }));
        }
        Parser {
            lexer,
            token: None,
            last: String::new(),
            binder,
            query: None,
            join_semantics: JoinSemantics::Unknown,
            join_fetch: false,
            pending_fetches: Vec::new(),
        }
    }

    /// Parse a complete SELECT, UPDATE, or DELETE statement.
    pub fn parse(mut self) -> ParseResult<ParsedQuery> {
        let root = if self.check_keyword(Keyword::Update)? {
            self.parse_update()?
        } else if self.check_keyword(Keyword::Delete)? {
            self.parse_delete()?
        } else {
            self.parse_select(false)?
        };
        Ok(ParsedQuery {
            graph: self.binder.into_graph(),
            root,
        })
    }

    // ------------------------------------------------------------------
    // Token handling
    // ------------------------------------------------------------------

    fn peek(&mut self) -> ParseResult<&Token> {
        if self.token.is_none() {
            self.token = Some(self.lexer.next_token()?);
        }
        Ok(self.token.get_or_insert(Token::Eof))
    }

    fn next(&mut self) -> ParseResult<Token> {
        let token = match self.token.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        self.last = token.to_string();
        Ok(token)
    }

    fn check(&mut self, token: &Token) -> ParseResult<bool> {
        Ok(self.peek()? == token)
    }

    fn check_keyword(&mut self, keyword: Keyword) -> ParseResult<bool> {
        Ok(self.peek()?.is_keyword(keyword))
    }

    fn eat(&mut self, token: &Token) -> ParseResult<bool> {
        if self.check(token)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> ParseResult<bool> {
        if self.check_keyword(keyword)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        let found = self.next()?;
        if found == expected {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{expected}'"), &found))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<()> {
        let found = self.next()?;
        if found.is_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword.as_str(), &found))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match self.next()? {
            Token::Identifier(name) => Ok(name),
            other => Err(self.unexpected("identifier", &other)),
        }
    }

    /// A name where reserved words are accepted too: field names after `.`
    /// and entity names such as `Order`.
    fn word(&mut self, expected: &str) -> ParseResult<String> {
        match self.next()? {
            Token::Identifier(name) => Ok(name),
            Token::Keyword(_) => Ok(self.lexer.lexeme()),
            other => Err(self.unexpected(expected, &other)),
        }
    }

    fn field_name(&mut self) -> ParseResult<String> {
        self.word("field name")
    }

    fn mark(&self) -> Mark {
        Mark {
            lexer: self.lexer.state(),
            token: self.token.clone(),
        }
    }

    fn reset(&mut self, mark: Mark) {
        self.lexer.restore(mark.lexer);
        self.token = mark.token;
    }

    fn error(&self, reason: ErrorReason) -> QueryCompileError {
        let token = match &self.token {
            Some(token) => token.to_string(),
            None => self.last.clone(),
        };
        QueryCompileError::new(reason, self.lexer.source()).at(token, self.lexer.token_start())
    }

    fn unexpected(&self, expected: &str, found: &Token) -> QueryCompileError {
        self.error(ErrorReason::Expected {
            expected: expected.to_string(),
            found: found.describe(),
        })
    }

    fn current(&self) -> QueryId {
        self.query.unwrap_or(QueryId(0))
    }

    fn scalar(&self, expr: Expr) -> ParseResult<Expr> {
        self.binder.to_scalar(expr).map_err(|r| self.error(r))
    }

    fn values(&self, expr: Expr) -> ParseResult<Vec<Expr>> {
        self.binder.to_values(expr).map_err(|r| self.error(r))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_select(&mut self, inner: bool) -> ParseResult<QueryId> {
        let parent = if inner { self.query } else { None };
        let query = self
            .binder
            .new_query(parent, QueryBody::Select(SelectQuery::default()));
        let saved = (self.query, self.join_semantics, self.join_fetch);
        self.query = Some(query);
        trace!(query = query.0, inner, "parsing select");

        let result = self.parse_select_body(query, inner);

        (self.query, self.join_semantics, self.join_fetch) = saved;
        let select = result?;
        if let Some(slot) = self.binder.graph_mut().query_mut(query).as_select_mut() {
            *slot = select;
        }
        Ok(query)
    }

    /// The select list is parsed after the FROM clause, since binding its
    /// paths needs the from-items.
    fn parse_select_body(&mut self, query: QueryId, inner: bool) -> ParseResult<SelectQuery> {
        let start = self.mark();
        let has_from = self.skip_to_from()?;
        let mut fetches = Vec::new();
        if has_from {
            self.next()?; // FROM
            self.parse_from_list(query)?;
            fetches = std::mem::take(&mut self.pending_fetches);
        }
        let after_from = self.mark();
        self.reset(start);

        let mut select = SelectQuery {
            has_from,
            ..SelectQuery::default()
        };

        if self.eat_keyword(Keyword::Select)? {
            select.distinct = self.eat_keyword(Keyword::Distinct)?;
            if self.eat_keyword(Keyword::New)? {
                select.constructor = Some(self.parse_constructor()?);
            }
            loop {
                let expr = self.parse_expr()?;
                let item = self.result_item(expr, has_from)?;
                select.results.push(item);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            if select.constructor.is_some() {
                self.expect(Token::RParen)?;
            }
            if has_from && !self.check_keyword(Keyword::From)? {
                let found = self.peek()?.clone();
                return Err(self.unexpected("FROM", &found));
            }
        } else if !has_from {
            let found = self.peek()?.clone();
            return Err(self.unexpected("SELECT or FROM", &found));
        }

        if has_from {
            self.reset(after_from);
        }

        if select.results.is_empty() {
            // fetched associations need an explicitly selected owner
            if !fetches.is_empty() {
                return Err(self.error(ErrorReason::JoinFetchNotSelected));
            }
            if let Some(first) = self.binder.first_item(query) {
                select.results.push(Expr::LoadEntity { from: first });
            }
        }

        for fetch in &fetches {
            let loaded = select
                .results
                .iter()
                .any(|r| matches!(r, Expr::LoadEntity { from } if *from == fetch.owner));
            if !loaded {
                return Err(self.error(ErrorReason::JoinFetchNotSelected));
            }
        }
        select.fetches = fetches;

        if self.eat_keyword(Keyword::Where)? {
            select.where_clause = Some(self.parse_condition()?);
        }

        if self.eat_keyword(Keyword::Group)? {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.parse_expr()?;
                let values = self.values(expr)?;
                select.group_by.extend(values);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }

        if self.check_keyword(Keyword::Having)? {
            if select.group_by.is_empty() {
                return Err(self.error(ErrorReason::HavingWithoutGroupBy));
            }
            self.next()?;
            select.having = Some(self.parse_condition()?);
        }

        if self.eat_keyword(Keyword::Order)? {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.parse_expr()?;
                let descending = if self.eat_keyword(Keyword::Desc)? {
                    true
                } else {
                    self.eat_keyword(Keyword::Asc)?;
                    false
                };
                for value in self.values(expr)? {
                    select.order_by.push(OrderTerm {
                        expr: value,
                        descending,
                    });
                }
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }

        if !inner {
            self.expect_end()?;
        }
        Ok(select)
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        let found = self.peek()?.clone();
        if found == Token::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of query", &found))
        }
    }

    /// Advance to the FROM of the current block. Stops without consuming
    /// anything past it; returns false if the block has no FROM.
    fn skip_to_from(&mut self) -> ParseResult<bool> {
        let mut depth = 0usize;
        loop {
            match self.peek()? {
                Token::Keyword(Keyword::From) if depth == 0 => return Ok(true),
                Token::Eof => return Ok(false),
                Token::LParen => depth += 1,
                Token::RParen => {
                    if depth == 0 {
                        return Ok(false);
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.next()?;
        }
    }

    fn parse_constructor(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier()?;
        let mut qualified = false;
        while self.eat(&Token::Dot)? {
            name.push('.');
            name.push_str(&self.field_name()?);
            qualified = true;
        }
        if !qualified {
            return Err(self.error(ErrorReason::ConstructorNotQualified { found: name }));
        }
        self.expect(Token::LParen)?;

        match self.binder.schema().resolve_class(&name) {
            ClassLookup::Found(class) => Ok(class),
            ClassLookup::Ambiguous(candidates) => Err(self.error(ErrorReason::AmbiguousClass {
                name,
                candidates: candidates.join(", "),
            })),
            ClassLookup::Missing => Err(self.error(ErrorReason::UnknownClass { name })),
        }
    }

    fn result_item(&self, expr: Expr, has_from: bool) -> ParseResult<Expr> {
        if !has_from {
            return match expr {
                Expr::DateTime(_) | Expr::Literal(_) => Ok(expr),
                _ => Err(self.error(ErrorReason::MissingFrom)),
            };
        }
        match expr {
            Expr::Path(PathExpr::Entity(from)) => Ok(Expr::LoadEntity { from }),
            Expr::Path(PathExpr::Collection(c)) => {
                Err(self.error(ErrorReason::CollectionNotAllowed { path: c.path }))
            }
            other => Ok(other),
        }
    }

    fn parse_update(&mut self) -> ParseResult<QueryId> {
        self.expect_keyword(Keyword::Update)?;
        let query = self
            .binder
            .new_query(None, QueryBody::Update(UpdateQuery::default()));
        self.query = Some(query);
        let target = self.parse_bulk_target(query)?;
        self.expect_keyword(Keyword::Set)?;

        let (alias, entity) = {
            let item = self.binder.graph().item(target);
            (item.alias.clone(), item.entity.clone())
        };
        let mut update = UpdateQuery::default();
        loop {
            let mut field = self.field_name()?;
            if self.eat(&Token::Dot)? {
                if !field.eq_ignore_ascii_case(&alias) {
                    return Err(self.error(ErrorReason::UnknownIdentifier { name: field }));
                }
                field = self.field_name()?;
            }
            let columns = match entity.as_ref().and_then(|e| e.field(&field)) {
                Some(FieldKind::Column { column }) => vec![column.clone()],
                Some(FieldKind::ManyToOne { columns, .. }) => columns.clone(),
                _ => {
                    let entity_name = self.binder.graph().item(target).entity_name().to_string();
                    return Err(self.error(ErrorReason::UnknownField {
                        entity: entity_name,
                        field,
                    }));
                }
            };
            self.expect(Token::Eq)?;
            let value = self.parse_expr()?;
            if columns.len() > 1 && value != Expr::Null {
                return Err(self.error(ErrorReason::CompositeAssignment { field }));
            }
            let value = self.scalar(value)?;
            update.assignments.push(Assignment {
                field,
                columns,
                value,
            });
            if !self.eat(&Token::Comma)? {
                break;
            }
        }

        if self.eat_keyword(Keyword::Where)? {
            update.where_clause = Some(self.parse_condition()?);
        }
        self.expect_end()?;
        self.binder.graph_mut().query_mut(query).body = QueryBody::Update(update);
        Ok(query)
    }

    fn parse_delete(&mut self) -> ParseResult<QueryId> {
        self.expect_keyword(Keyword::Delete)?;
        let query = self
            .binder
            .new_query(None, QueryBody::Delete(DeleteQuery::default()));
        self.query = Some(query);
        self.eat_keyword(Keyword::From)?;
        self.parse_bulk_target(query)?;

        let mut delete = DeleteQuery::default();
        if self.eat_keyword(Keyword::Where)? {
            delete.where_clause = Some(self.parse_condition()?);
        }
        self.expect_end()?;
        self.binder.graph_mut().query_mut(query).body = QueryBody::Delete(delete);
        Ok(query)
    }

    fn parse_bulk_target(&mut self, query: QueryId) -> ParseResult<FromId> {
        let (entity, tail) = self.parse_entity_name()?;
        let alias = self.parse_alias()?.unwrap_or(tail);
        self.binder
            .declare_root(query, entity, alias, true)
            .map_err(|r| self.error(r))
    }

    /// An entity name, possibly qualified (`com.acme.Order`).
    fn parse_entity_name(&mut self) -> ParseResult<(Arc<EntityMetadata>, String)> {
        let first = self.word("entity name")?;
        let mut name = first.clone();
        let mut tail = first;
        loop {
            if let Some(entity) = self.binder.lookup_entity(&name) {
                return Ok((entity, tail));
            }
            if !self.eat(&Token::Dot)? {
                return Err(self.error(ErrorReason::UnknownEntity { name }));
            }
            tail = self.field_name()?;
            name.push('.');
            name.push_str(&tail);
        }
    }

    fn parse_alias(&mut self) -> ParseResult<Option<String>> {
        if self.eat_keyword(Keyword::As)? {
            return self.expect_identifier().map(Some);
        }
        if matches!(self.peek()?, Token::Identifier(_)) {
            return self.expect_identifier().map(Some);
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // FROM clause
    // ------------------------------------------------------------------

    fn parse_from_list(&mut self, query: QueryId) -> ParseResult<()> {
        self.join_semantics = JoinSemantics::Unknown;
        self.join_fetch = false;
        loop {
            self.parse_from_item(query)?;
            self.join_semantics = JoinSemantics::Unknown;
            self.join_fetch = false;

            if self.eat(&Token::Comma)? {
                continue;
            }
            if self.eat_keyword(Keyword::Inner)? {
                self.expect_keyword(Keyword::Join)?;
                self.join_semantics = JoinSemantics::Inner;
            } else if self.eat_keyword(Keyword::Left)? {
                self.eat_keyword(Keyword::Outer)?;
                self.expect_keyword(Keyword::Join)?;
                self.join_semantics = JoinSemantics::Outer;
            } else if self.eat_keyword(Keyword::Join)? {
                self.join_semantics = JoinSemantics::Inner;
            } else {
                return Ok(());
            }
            self.join_fetch = self.eat_keyword(Keyword::Fetch)?;
        }
    }

    fn parse_from_item(&mut self, query: QueryId) -> ParseResult<FromId> {
        let is_in = self.eat_keyword(Keyword::In)?;
        if is_in {
            self.join_semantics = JoinSemantics::Inner;
            self.expect(Token::LParen)?;
        }

        let source = self.parse_from_source(query, is_in)?;
        if is_in {
            self.expect(Token::RParen)?;
        }
        let alias = self.parse_alias()?;

        match source {
            FromSource::Root(entity, tail) => {
                if self.join_fetch {
                    return Err(self.error(ErrorReason::NotAnEntity {
                        path: entity.name.clone(),
                    }));
                }
                let alias = alias.unwrap_or(tail);
                self.binder
                    .declare_root(query, entity, alias, false)
                    .map_err(|r| self.error(r))
            }
            FromSource::Path(root, segments) => {
                self.declare_path(query, root, &segments, alias)
            }
        }
    }

    fn parse_from_source(&mut self, query: QueryId, is_in: bool) -> ParseResult<FromSource> {
        if !is_in {
            let word = match self.peek()? {
                Token::Identifier(name) => Some(name.clone()),
                Token::Keyword(_) => Some(self.lexer.lexeme()),
                _ => None,
            };
            if let Some(name) = word {
                if self.binder.lookup_alias(query, &name).is_none() {
                    let (entity, tail) = self.parse_entity_name()?;
                    return Ok(FromSource::Root(entity, tail));
                }
            }
        }

        let name = self.expect_identifier()?;
        let root = self
            .binder
            .lookup_alias(query, &name)
            .ok_or_else(|| self.error(ErrorReason::UnknownIdentifier { name: name.clone() }))?;
        let mut segments = Vec::new();
        while self.eat(&Token::Dot)? {
            segments.push(self.field_name()?);
        }
        if segments.is_empty() {
            return Err(self.error(ErrorReason::NotAnEntity { path: name }));
        }
        Ok(FromSource::Path(root, segments))
    }

    fn declare_path(
        &mut self,
        query: QueryId,
        root: FromId,
        segments: &[String],
        alias: Option<String>,
    ) -> ParseResult<FromId> {
        // a path in the FROM list without LEFT JOIN is an inner join
        let semantics = match self.join_semantics {
            JoinSemantics::Unknown => JoinSemantics::Inner,
            declared => declared,
        };
        let mut current = root;
        let Some((last, steps)) = segments.split_last() else {
            return Err(self.error(ErrorReason::NotAnEntity {
                path: self.binder.graph().item(root).alias.clone(),
            }));
        };
        for step in steps {
            let bound = self
                .binder
                .navigate(query, current, step, semantics)
                .map_err(|r| self.error(r))?;
            current = match bound {
                Bound::Entity(from) => from,
                Bound::Collection(c) => {
                    return Err(self.error(ErrorReason::CollectionNotAllowed { path: c.path }));
                }
                Bound::Column(_) => {
                    return Err(self.error(ErrorReason::NotNavigable { path: step.clone() }));
                }
            };
        }

        let alias = match alias {
            Some(alias) => alias,
            None => self.binder.generate_alias(),
        };
        let target = self
            .binder
            .declare_path(query, current, last, alias, semantics)
            .map_err(|r| self.error(r))?;

        if self.join_fetch {
            self.binder.mark_fetch(target);
            let root_alias = self.binder.graph().item(root).alias.clone();
            self.pending_fetches.push(FetchJoin {
                owner: root,
                target,
                path: format!("{}.{}", root_alias, segments.join(".")),
            });
        }
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_condition(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_expr()?;
        self.scalar(expr)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        if self.check_keyword(Keyword::Select)? {
            let query = self.parse_select(true)?;
            return Ok(Expr::SubSelect(query));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let first = self.parse_and()?;
        if !self.check_keyword(Keyword::Or)? {
            return Ok(first);
        }
        let mut parts = vec![self.scalar(first)?];
        while self.eat_keyword(Keyword::Or)? {
            let next = self.parse_and()?;
            parts.push(self.scalar(next)?);
        }
        Ok(Expr::disjunction(parts))
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let first = self.parse_not()?;
        if !self.check_keyword(Keyword::And)? {
            return Ok(first);
        }
        let mut parts = vec![self.scalar(first)?];
        while self.eat_keyword(Keyword::And)? {
            let next = self.parse_not()?;
            parts.push(self.scalar(next)?);
        }
        Ok(Expr::conjunction(parts))
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword(Keyword::Not)? {
            let operand = self.parse_not()?;
            return Ok(Expr::not(self.scalar(operand)?));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> ParseResult<Expr> {
        let left = self.parse_concat()?;

        let negated = self.eat_keyword(Keyword::Not)?;
        let token = self.peek()?.clone();
        match token {
            Token::Keyword(Keyword::Between) => {
                self.next()?;
                let low = self.parse_concat()?;
                self.expect_keyword(Keyword::And)?;
                let high = self.parse_concat()?;
                Ok(Expr::Between {
                    expr: Box::new(self.scalar(left)?),
                    low: Box::new(self.scalar(low)?),
                    high: Box::new(self.scalar(high)?),
                    negated,
                })
            }
            Token::Keyword(Keyword::Like) => {
                self.next()?;
                let pattern = self.parse_concat()?;
                let escape = if self.eat_keyword(Keyword::Escape)? {
                    match self.next()? {
                        Token::String(s) => Some(s),
                        other => {
                            return Err(self.error(ErrorReason::EscapeRequiresString {
                                found: other.describe(),
                            }));
                        }
                    }
                } else {
                    None
                };
                let like = Expr::Like {
                    expr: Box::new(self.scalar(left)?),
                    pattern: Box::new(self.scalar(pattern)?),
                    escape,
                    negated,
                };
                self.parse_is(like)
            }
            Token::Keyword(Keyword::In) => {
                self.next()?;
                self.parse_in(left, negated)
            }
            Token::Keyword(Keyword::Member) => {
                self.next()?;
                self.eat_keyword(Keyword::Of)?;
                let member = self.parse_member_of(left, negated)?;
                self.parse_is(member)
            }
            _ if negated => Err(self.error(ErrorReason::UnexpectedNot)),
            Token::Eq => self.parse_comparison(BinOp::Equal, left),
            Token::NotEq => self.parse_comparison(BinOp::NotEqual, left),
            Token::Lt => self.parse_comparison(BinOp::LessThan, left),
            Token::LtEq => self.parse_comparison(BinOp::LessEqual, left),
            Token::Gt => self.parse_comparison(BinOp::GreaterThan, left),
            Token::GtEq => self.parse_comparison(BinOp::GreaterEqual, left),
            _ => self.parse_is(left),
        }
    }

    fn parse_comparison(&mut self, op: BinOp, left: Expr) -> ParseResult<Expr> {
        self.next()?;
        let right = self.parse_concat()?;
        let compared = self.compare(op, left, right)?;
        self.parse_is(compared)
    }

    /// Entities compare by identity; `path = alias` may express a join.
    fn compare(&mut self, op: BinOp, left: Expr, right: Expr) -> ParseResult<Expr> {
        if let (Expr::Path(PathExpr::Entity(l)), Expr::Path(PathExpr::Entity(r))) = (&left, &right)
        {
            if op == BinOp::Equal {
                let query = self.current();
                if let Some(join) = self.binder.join_for_equality(query, *l, *r) {
                    return Ok(Expr::Join(join));
                }
            }
            let left_keys = self.binder.entity_keys(*l);
            let right_keys = self.binder.entity_keys(*r);
            if left_keys.len() != right_keys.len() {
                let entity = self.binder.graph().item(*l).entity_name().to_string();
                return Err(self.error(ErrorReason::CompositeIdentity { entity }));
            }
            let parts: Vec<Expr> = left_keys
                .into_iter()
                .zip(right_keys)
                .map(|(a, b)| Expr::binary(op, Expr::Column(a), Expr::Column(b)))
                .collect();
            return Ok(if op == BinOp::NotEqual {
                Expr::disjunction(parts)
            } else {
                Expr::conjunction(parts)
            });
        }
        Ok(Expr::binary(op, self.scalar(left)?, self.scalar(right)?))
    }

    fn parse_in(&mut self, left: Expr, negated: bool) -> ParseResult<Expr> {
        self.expect(Token::LParen)?;
        let mut values = Vec::new();
        if self.check_keyword(Keyword::Select)? {
            let query = self.parse_select(true)?;
            values.push(Expr::SubSelect(query));
        } else {
            if self.check(&Token::RParen)? {
                return Err(self.error(ErrorReason::EmptyInList));
            }
            loop {
                let value = self.parse_expr()?;
                values.push(self.scalar(value)?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok(Expr::In {
            expr: Box::new(self.scalar(left)?),
            values,
            negated,
        })
    }

    fn parse_member_of(&mut self, item: Expr, negated: bool) -> ParseResult<Expr> {
        let target = self.parse_concat()?;
        let collection = match target {
            Expr::Path(PathExpr::Collection(c)) => c,
            _ => {
                return Err(self.error(ErrorReason::MemberOfCollection {
                    found: format!("'{}'", self.last),
                }));
            }
        };

        let item = match item {
            Expr::Path(PathExpr::Entity(from)) => {
                let entity = self.binder.graph().item(from).entity_name().to_string();
                if entity != collection.element_entity {
                    return Err(self.error(ErrorReason::MemberOfTypeMismatch {
                        item: entity,
                        collection: collection.element_entity.clone(),
                    }));
                }
                self.binder
                    .entity_keys(from)
                    .into_iter()
                    .map(Expr::Column)
                    .collect::<Vec<_>>()
            }
            Expr::Argument(index) if collection.element_keys.len() == 1 => {
                vec![Expr::Argument(index)]
            }
            Expr::Argument(_) => {
                return Err(self.error(ErrorReason::CompositeIdentity {
                    entity: collection.element_entity.clone(),
                }));
            }
            _ => return Err(self.error(ErrorReason::MemberOfItem)),
        };
        if item.len() != collection.element_keys.len() {
            return Err(self.error(ErrorReason::MemberOfItem));
        }

        Ok(Expr::MemberOf {
            item,
            collection,
            negated,
        })
    }

    fn parse_is(&mut self, expr: Expr) -> ParseResult<Expr> {
        if !self.eat_keyword(Keyword::Is)? {
            return Ok(expr);
        }
        let negated = self.eat_keyword(Keyword::Not)?;
        match self.next()? {
            Token::Null => {
                let parts = self
                    .values(expr)?
                    .into_iter()
                    .map(|value| Expr::IsNull {
                        expr: Box::new(value),
                        negated,
                    })
                    .collect();
                Ok(Expr::conjunction(parts))
            }
            Token::Keyword(Keyword::Empty) => match expr {
                Expr::Path(PathExpr::Collection(collection)) => {
                    Ok(Expr::IsEmpty { collection, negated })
                }
                _ => Err(self.error(ErrorReason::Expected {
                    expected: "collection-valued path".to_string(),
                    found: "IS EMPTY".to_string(),
                })),
            },
            other => Err(self.unexpected("NULL or EMPTY", &other)),
        }
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_add()?;
        while self.eat(&Token::Concat)? {
            let right = self.parse_add()?;
            left = Expr::Concat {
                left: Box::new(self.scalar(left)?),
                right: Box::new(self.scalar(right)?),
            };
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek()? {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Subtract,
                _ => return Ok(left),
            };
            self.next()?;
            let right = self.parse_mul()?;
            left = Expr::binary(op, self.scalar(left)?, self.scalar(right)?);
        }
    }

    fn parse_mul(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek()? {
                Token::Star => BinOp::Multiply,
                Token::Slash => BinOp::Divide,
                _ => return Ok(left),
            };
            self.next()?;
            let right = self.parse_term()?;
            left = Expr::binary(op, self.scalar(left)?, self.scalar(right)?);
        }
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let op = match self.peek()? {
            Token::Minus => UnaryOp::Negate,
            Token::Plus => UnaryOp::Plus,
            Token::Keyword(Keyword::Not) => UnaryOp::Not,
            _ => return self.parse_simple_term(),
        };
        self.next()?;
        let operand = self.parse_term()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(self.scalar(operand)?),
        })
    }

    fn parse_simple_term(&mut self) -> ParseResult<Expr> {
        match self.next()? {
            Token::Identifier(name) => self.parse_identifier_term(name),
            Token::Keyword(keyword) if keyword.is_function() => {
                let name = self.lexer.lexeme();
                if self.check(&Token::LParen)? {
                    self.parse_function(keyword.as_str())
                } else {
                    self.parse_identifier_term(name)
                }
            }
            Token::Keyword(Keyword::CurrentDate) => Ok(Expr::DateTime(DateTimeFn::CurrentDate)),
            Token::Keyword(Keyword::CurrentTime) => Ok(Expr::DateTime(DateTimeFn::CurrentTime)),
            Token::Keyword(Keyword::CurrentTimestamp) => {
                Ok(Expr::DateTime(DateTimeFn::CurrentTimestamp))
            }
            Token::Integer(n) => Ok(Expr::Literal(Literal::Integer(n))),
            Token::Long(n) => Ok(Expr::Literal(Literal::Long(n))),
            Token::Double(d) => Ok(Expr::Literal(Literal::Double(d))),
            Token::String(s) => Ok(Expr::Literal(Literal::String(s))),
            Token::Boolean(b) => Ok(Expr::Literal(Literal::Boolean(b))),
            Token::Null => Ok(Expr::Null),
            Token::Positional(n) => self.parse_argument(ArgSource::Positional(n)),
            Token::Named(name) => self.parse_argument(ArgSource::Named(name)),
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            other => Err(self.unexpected("expression", &other)),
        }
    }

    fn parse_argument(&mut self, source: ArgSource) -> ParseResult<Expr> {
        let index = self
            .binder
            .argument(source)
            .map_err(|r| self.error(r))?;
        Ok(Expr::Argument(index))
    }

    fn parse_identifier_term(&mut self, name: String) -> ParseResult<Expr> {
        if self.check(&Token::LParen)? {
            let lower = name.to_ascii_lowercase();
            return match lower.as_str() {
                "exists" | "all" | "any" | "some" => self.parse_subquery_term(&lower),
                _ => self.parse_function(&name),
            };
        }

        let query = self.current();
        let start = if let Some(from) = self.binder.lookup_alias(query, &name) {
            Bound::Entity(from)
        } else if let Some(first) = self.binder.first_item(query) {
            match self
                .binder
                .navigate(query, first, &name, JoinSemantics::Unknown)
            {
                Ok(bound) => bound,
                Err(ErrorReason::UnknownField { .. }) => {
                    return Err(self.error(ErrorReason::UnknownIdentifier { name }));
                }
                Err(reason) => return Err(self.error(reason)),
            }
        } else {
            return Err(self.error(ErrorReason::UnknownIdentifier { name }));
        };
        self.parse_path(start)
    }

    /// Follow `.field` steps from an entity.
    fn parse_path(&mut self, start: Bound) -> ParseResult<Expr> {
        let mut current = start;
        loop {
            let from = match &current {
                Bound::Entity(from) => *from,
                _ => break,
            };
            if !self.eat(&Token::Dot)? {
                break;
            }
            let field = self.field_name()?;
            let query = self.current();
            current = self
                .binder
                .navigate(query, from, &field, JoinSemantics::Unknown)
                .map_err(|r| self.error(r))?;
        }
        if !matches!(current, Bound::Entity(_)) && self.check(&Token::Dot)? {
            return Err(self.error(ErrorReason::NotNavigable {
                path: self.last.clone(),
            }));
        }
        Ok(current.into_expr())
    }

    fn parse_subquery_term(&mut self, keyword: &str) -> ParseResult<Expr> {
        self.expect(Token::LParen)?;
        if !(self.check_keyword(Keyword::Select)? || self.check_keyword(Keyword::From)?) {
            return Err(self.error(ErrorReason::SubqueryExpected {
                keyword: keyword.to_ascii_uppercase(),
            }));
        }
        let query = self.parse_select(true)?;
        self.expect(Token::RParen)?;
        Ok(match keyword {
            "exists" => Expr::Exists(query),
            "all" => Expr::Quantified {
                quantifier: Quantifier::All,
                query,
            },
            _ => Expr::Quantified {
                quantifier: Quantifier::Any,
                query,
            },
        })
    }

    fn parse_function(&mut self, name: &str) -> ParseResult<Expr> {
        self.expect(Token::LParen)?;
        let upper = name.to_ascii_uppercase();

        match upper.as_str() {
            "OBJECT" => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                return match expr {
                    Expr::Path(PathExpr::Entity(from)) => Ok(Expr::LoadEntity { from }),
                    _ => Err(self.error(ErrorReason::NotAnEntity {
                        path: "OBJECT()".to_string(),
                    })),
                };
            }
            "TRIM" => return self.parse_trim(),
            _ => {}
        }

        let distinct = self.eat_keyword(Keyword::Distinct)?;
        let mut args = Vec::new();
        if self.eat(&Token::Star)? {
            // COUNT(*)
        } else if !self.check(&Token::RParen)? {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.build_function(upper, args, distinct)
    }

    fn parse_trim(&mut self) -> ParseResult<Expr> {
        let spec = match self.peek()? {
            Token::Identifier(word) => match word.to_ascii_lowercase().as_str() {
                "leading" => Some(TrimSpec::Leading),
                "trailing" => Some(TrimSpec::Trailing),
                "both" => Some(TrimSpec::Both),
                _ => None,
            },
            _ => None,
        };
        if spec.is_some() {
            self.next()?;
        }

        let mut character = None;
        let source = if self.eat_keyword(Keyword::From)? {
            self.parse_expr()?
        } else {
            let first = self.parse_expr()?;
            if self.eat_keyword(Keyword::From)? {
                character = Some(Box::new(self.scalar(first)?));
                self.parse_expr()?
            } else if spec.is_some() {
                let found = self.peek()?.clone();
                return Err(self.unexpected("FROM", &found));
            } else {
                first
            }
        };
        self.expect(Token::RParen)?;
        Ok(Expr::Trim {
            spec,
            character,
            source: Box::new(self.scalar(source)?),
        })
    }

    fn check_arity(&self, function: &str, count: usize, min: usize, max: usize) -> ParseResult<()> {
        if count < min || count > max {
            let expected = match (min, max) {
                (min, max) if min == max => min.to_string(),
                (min, usize::MAX) => format!("at least {min}"),
                (min, max) => format!("{min} to {max}"),
            };
            return Err(self.error(ErrorReason::WrongArgumentCount {
                function: function.to_string(),
                expected,
            }));
        }
        Ok(())
    }

    fn build_function(&mut self, name: String, args: Vec<Expr>, distinct: bool) -> ParseResult<Expr> {
        let count = args.len();
        match name.as_str() {
            "SIZE" => {
                self.check_arity(&name, count, 1, 1)?;
                return match args.into_iter().next() {
                    Some(Expr::Path(PathExpr::Collection(c))) => Ok(Expr::Size(c)),
                    _ => Err(self.error(ErrorReason::Expected {
                        expected: "collection-valued path".to_string(),
                        found: "SIZE".to_string(),
                    })),
                };
            }
            "LENGTH" | "ABS" | "SQRT" | "LOWER" | "UPPER" => self.check_arity(&name, count, 1, 1)?,
            "MOD" => self.check_arity(&name, count, 2, 2)?,
            "SUBSTRING" | "LOCATE" => self.check_arity(&name, count, 2, 3)?,
            "CONCAT" => self.check_arity(&name, count, 2, usize::MAX)?,
            _ => {}
        }

        let mut lowered = Vec::with_capacity(count);
        for arg in args {
            lowered.push(self.scalar(arg)?);
        }

        match name.as_str() {
            "LOCATE" => Ok(lower_locate(lowered)),
            "CONCAT" => {
                let mut parts = lowered.into_iter();
                let first = parts.next().unwrap_or(Expr::Null);
                Ok(parts.fold(first, |left, right| Expr::Concat {
                    left: Box::new(left),
                    right: Box::new(right),
                }))
            }
            _ => Ok(Expr::FunctionCall {
                name,
                args: lowered,
                distinct,
            }),
        }
    }
}

/// `LOCATE(needle, haystack [, start])` as a searched CASE over POSITION,
/// returning 0 when not found and a 1-based index into the full string.
fn lower_locate(args: Vec<Expr>) -> Expr {
    let mut args = args.into_iter();
    let needle = args.next().unwrap_or(Expr::Null);
    let haystack = args.next().unwrap_or(Expr::Null);
    let start = args.next();

    let haystack = match &start {
        Some(start) => Expr::FunctionCall {
            name: "SUBSTRING".to_string(),
            args: vec![haystack, start.clone()],
            distinct: false,
        },
        None => haystack,
    };
    let position = Expr::Position {
        needle: Box::new(needle),
        haystack: Box::new(haystack),
    };
    let found = match start {
        Some(start) => Expr::binary(
            BinOp::Add,
            position.clone(),
            Expr::binary(BinOp::Subtract, start, Expr::Literal(Literal::Integer(1))),
        ),
        None => position.clone(),
    };
    Expr::Case {
        condition: Box::new(Expr::binary(
            BinOp::LessEqual,
            position,
            Expr::Literal(Literal::Integer(0)),
        )),
        then: Box::new(Expr::Literal(Literal::Integer(0))),
        otherwise: Box::new(found),
    }
}
