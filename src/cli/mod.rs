//! CLI support for eql
//!
//! Provides programmatic access to the `eql` commands so other tools can
//! compile queries the same way the binary does.

mod compile;
mod docs;

pub use compile::{
    execute_check, execute_compile, execute_tokens, format_text, CheckResult, CommandOptions,
};
pub use docs::{get_doc_category, get_docs_overview, DocCategory};

use crate::error::QueryCompileError;
use std::io;
use thiserror::Error;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Compile(#[from] QueryCompileError),
    #[error("Invalid schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("No query provided. Pass it as an argument or pipe it to stdin.")]
    NoInput,
    #[error("Unknown category: '{0}'\nRun 'eql docs' to see available categories.")]
    UnknownCategory(String),
}
