//! # Entity Query Language - Abstract Syntax Tree
//!
//! This module defines the syntax tree and the from-item graph that the parser
//! builds from an entity query, and that the optimizer and SQL emitter consume.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens and reserved words
//! - **[expressions]** - Expression nodes (literals, columns, paths, predicates, sub-queries)
//! - **[operators]** - Binary and unary operators
//! - **[from_item]** - Table references and the joins linking them
//! - **[query]** - Query blocks, parameters, and the arena holding them all
//!
//! ## Core Concepts
//!
//! ### Query Graph
//!
//! Compiling one query text produces one [`QueryGraph`]. Every from-item of
//! every block (the statement and each nested sub-select) lives in a single
//! arena and is addressed by [`FromId`], so a correlated sub-query can refer to
//! an item of its enclosing query directly:
//!
//! ```text
//! SELECT o FROM Order o
//! WHERE EXISTS (SELECT i FROM LineItem i WHERE i.order = o AND i.qty > 10)
//! ```
//!
//! ### Paths
//!
//! A dotted path is resolved step by step. A to-one relationship becomes a
//! joined from-item (reused when the same path appears again), a plain field
//! becomes a [`ColumnRef`], and a collection becomes a [`CollectionRef`]
//! evaluated through a correlated sub-query:
//!
//! ```text
//! o.customer.name      -- join customers, read name
//! o.items IS EMPTY     -- NOT EXISTS (SELECT 1 FROM line_items ...)
//! ```
//!
//! ### Join Semantics
//!
//! Items declared with `INNER JOIN` or `LEFT JOIN` keep that semantics; items
//! reached implicitly start as [`JoinSemantics::Unknown`] and are decided by
//! the optimizer from how the WHERE clause uses them.
pub mod expressions;
pub mod from_item;
pub mod operators;
pub mod query;
pub mod tokens;

pub use expressions::{
    CollectionRef, ColumnRef, DateTimeFn, Expr, Literal, PathExpr, Quantifier, TrimSpec, Usage,
};
pub use from_item::{FromId, FromItem, JoinExpr, JoinKind, JoinSemantics};
pub use operators::{BinOp, UnaryOp};
pub use query::{
    AbstractQuery, ArgExpr, ArgSource, Assignment, DeleteQuery, FetchJoin, OrderTerm, QueryBody,
    QueryGraph, QueryId, SelectQuery, UpdateQuery,
};
pub use tokens::{Keyword, Token};
