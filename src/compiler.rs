//! Entry points for compiling query text.
//!
//! ```
//! use eql::{Compiler, CompileOptions};
//! use eql::schema::{EntityMetadata, InMemorySchema, Table};
//!
//! let schema = InMemorySchema::new().with_entity(
//!     EntityMetadata::new("Employee", Table::new("employees"))
//!         .with_id("id", "id")
//!         .with_column("active", "active"),
//! );
//! let options = CompileOptions {
//!     true_literal: "1".to_string(),
//!     false_literal: "0".to_string(),
//!     ..CompileOptions::default()
//! };
//! let compiler = Compiler::with_options(&schema, options);
//! let query = compiler.compile("SELECT e FROM Employee e WHERE e.active = TRUE").unwrap();
//! assert_eq!(query.sql(), "SELECT e.id, e.active FROM employees e WHERE e.active = 1");
//! ```

use crate::error::QueryCompileError;
use crate::lexer::Lexer;
use crate::output::Query;
use crate::parser::Parser;
use crate::schema::SchemaResolver;
use tracing::debug;

/// Settings that affect the generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// SQL rendering of `TRUE`.
    pub true_literal: String,
    /// SQL rendering of `FALSE`.
    pub false_literal: String,
    /// Prefix of aliases the compiler generates for implicit joins and
    /// correlated sub-queries.
    pub alias_prefix: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            true_literal: "true".to_string(),
            false_literal: "false".to_string(),
            alias_prefix: "eql".to_string(),
        }
    }
}

/// Compiles query text against one schema. Cheap to create; holds no state
/// between compilations.
pub struct Compiler<S> {
    schema: S,
    options: CompileOptions,
}

impl<S: SchemaResolver> Compiler<S> {
    pub fn new(schema: S) -> Self {
        Self::with_options(schema, CompileOptions::default())
    }

    pub fn with_options(schema: S, options: CompileOptions) -> Self {
        Compiler { schema, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    /// Parse, optimize, and render `text`.
    pub fn compile(&self, text: &str) -> Result<Query, QueryCompileError> {
        debug!(query = text, "compiling");
        let parser = Parser::with_options(Lexer::new(text), &self.schema, &self.options);
        let parsed = parser.parse()?;
        Query::init(text, parsed, &self.options)
    }
}

/// Compile `text` with default options.
pub fn compile(text: &str, schema: &dyn SchemaResolver) -> Result<Query, QueryCompileError> {
    Compiler::new(schema).compile(text)
}
