//! Compile queries against a JSON schema

use super::CliError;
use crate::ast::{ArgSource, Token};
use crate::output::{to_json, to_json_pretty, Query, StatementKind};
use crate::{Compiler, InMemorySchema, Lexer};

/// Options shared by the compile and check commands
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// The query text
    pub query: String,
    /// Schema document, see [`InMemorySchema::from_json`]
    pub schema: String,
    /// Print the compiled query as JSON
    pub json: bool,
    /// Pretty-print JSON output
    pub pretty: bool,
}

/// Result of a check operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Valid {
        kind: StatementKind,
        parameters: usize,
    },
}

fn compile(options: &CommandOptions) -> Result<Query, CliError> {
    let query = options.query.trim();
    if query.is_empty() {
        return Err(CliError::NoInput);
    }
    let schema = InMemorySchema::from_json(&options.schema)?;
    Ok(Compiler::new(&schema).compile(query)?)
}

/// Compile a query and render it for output
pub fn execute_compile(options: &CommandOptions) -> Result<String, CliError> {
    let query = compile(options)?;
    Ok(match (options.json, options.pretty) {
        (true, true) => to_json_pretty(&query),
        (true, false) => to_json(&query),
        (false, _) => format_text(&query),
    })
}

/// Compile a query without printing the SQL
pub fn execute_check(options: &CommandOptions) -> Result<CheckResult, CliError> {
    let query = compile(options)?;
    Ok(CheckResult::Valid {
        kind: query.kind(),
        parameters: query.parameters().len(),
    })
}

/// Scan a query and return its tokens
pub fn execute_tokens(query: &str) -> Result<Vec<Token>, CliError> {
    Ok(Lexer::new(query).tokenize()?)
}

/// SQL followed by one comment line per `?` marker.
pub fn format_text(query: &Query) -> String {
    let mut out = query.sql().to_string();
    for binding in query.arguments() {
        let source = match &binding.source {
            ArgSource::Positional(n) => format!("?{n}"),
            ArgSource::Named(name) => format!(":{name}"),
        };
        out.push_str(&format!("\n-- {} <- {}", binding.sql_ordinal, source));
    }
    out
}
