pub mod ast;
pub mod binder;
pub mod compiler;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod optimizer;
pub mod output;
pub mod parser;
pub mod schema;

#[cfg(feature = "cli")]
pub mod cli;

pub use ast::{ArgSource, BinOp, Expr, Keyword, Token};
pub use compiler::{compile, CompileOptions, Compiler};
pub use error::{ErrorReason, QueryCompileError};
pub use lexer::Lexer;
pub use output::{to_json, to_json_pretty, ArgBinding, Query, ResultItem, ResultShape, StatementKind};
pub use parser::{ParsedQuery, Parser};
pub use schema::{EntityMetadata, InMemorySchema, SchemaResolver, Table};
