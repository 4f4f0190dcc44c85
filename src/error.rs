//! Compile errors.
//!
//! Every failure while turning query text into SQL (lexing, parsing, path
//! binding, optimization) is reported as a single [`QueryCompileError`]. The
//! [`ErrorReason`] inside it is a closed set, so callers can match on the
//! cause or use [`ErrorReason::code`] as a stable identifier.

use thiserror::Error;

/// The cause of a failed compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorReason {
    #[error("unexpected character {found}")]
    UnexpectedCharacter { found: String },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("exponent needs digits at {found}")]
    ExponentNeedsDigits { found: String },
    #[error("numeric literal '{literal}' is out of range")]
    NumberOutOfRange { literal: String },
    #[error("'{text}' must refer to a positive argument")]
    NonPositiveArgument { text: String },

    #[error("expected {expected} at {found}")]
    Expected { expected: String, found: String },
    #[error("'NOT' is not expected here")]
    UnexpectedNot,
    #[error("expected string after ESCAPE at {found}")]
    EscapeRequiresString { found: String },
    #[error("{keyword} must be followed by '(SELECT'")]
    SubqueryExpected { keyword: String },

    #[error("'{name}' is an unknown entity")]
    UnknownEntity { name: String },
    #[error("'{name}' is an unknown table or column")]
    UnknownIdentifier { name: String },
    #[error("'{field}' is an unknown field in entity {entity}")]
    UnknownField { entity: String, field: String },
    #[error("alias '{alias}' is declared more than once")]
    DuplicateAlias { alias: String },
    #[error("'{path}' is not a relationship and cannot be navigated")]
    NotNavigable { path: String },
    #[error("'{path}' does not name an entity")]
    NotAnEntity { path: String },
    #[error("collection-valued path '{path}' cannot be used here")]
    CollectionNotAllowed { path: String },
    #[error("entity {entity} has a composite identity and cannot be used as a single value")]
    CompositeIdentity { entity: String },
    #[error("relationship {entity}.{field} does not match the identity of its target")]
    SchemaMismatch { entity: String, field: String },

    #[error("a query without FROM may only select date/time functions")]
    MissingFrom,
    #[error("HAVING without GROUP BY is not supported")]
    HavingWithoutGroupBy,
    #[error(
        "all associations referenced by JOIN FETCH must belong to an entity returned by the query"
    )]
    JoinFetchNotSelected,
    #[error("MEMBER OF requires an entity-valued item or a parameter")]
    MemberOfItem,
    #[error("MEMBER OF requires an entity-valued collection at {found}")]
    MemberOfCollection { found: String },
    #[error("{item} cannot be a member of a collection of {collection}")]
    MemberOfTypeMismatch { item: String, collection: String },
    #[error("SELECT NEW requires a fully qualified class name at {found}")]
    ConstructorNotQualified { found: String },
    #[error("'{name}' is an unknown class")]
    UnknownClass { name: String },
    #[error("'{name}' is ambiguous, it could be any of {candidates}")]
    AmbiguousClass { name: String, candidates: String },
    #[error("named parameters cannot be mixed with positional parameters")]
    MixedParameters,
    #[error("OBJECT() may only appear in the SELECT clause")]
    ObjectOutsideSelect,
    #[error("{function} expects {expected} argument(s)")]
    WrongArgumentCount { function: String, expected: String },
    #[error("IN requires at least one value")]
    EmptyInList,
    #[error("UPDATE and DELETE can only reach {entity} through an inner join in WHERE")]
    BulkStatementJoin { entity: String },
    #[error("'{field}' maps to several columns and can only be set to NULL")]
    CompositeAssignment { field: String },
}

impl ErrorReason {
    /// Stable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorReason::UnexpectedCharacter { .. } => "UnexpectedCharacter",
            ErrorReason::UnterminatedString => "UnterminatedString",
            ErrorReason::ExponentNeedsDigits { .. } => "ExponentNeedsDigits",
            ErrorReason::NumberOutOfRange { .. } => "NumberOutOfRange",
            ErrorReason::NonPositiveArgument { .. } => "NonPositiveArgument",
            ErrorReason::Expected { .. } => "Expected",
            ErrorReason::UnexpectedNot => "UnexpectedNot",
            ErrorReason::EscapeRequiresString { .. } => "EscapeRequiresString",
            ErrorReason::SubqueryExpected { .. } => "SubqueryExpected",
            ErrorReason::UnknownEntity { .. } => "UnknownEntity",
            ErrorReason::UnknownIdentifier { .. } => "UnknownIdentifier",
            ErrorReason::UnknownField { .. } => "UnknownField",
            ErrorReason::DuplicateAlias { .. } => "DuplicateAlias",
            ErrorReason::NotNavigable { .. } => "NotNavigable",
            ErrorReason::NotAnEntity { .. } => "NotAnEntity",
            ErrorReason::CollectionNotAllowed { .. } => "CollectionNotAllowed",
            ErrorReason::CompositeIdentity { .. } => "CompositeIdentity",
            ErrorReason::SchemaMismatch { .. } => "SchemaMismatch",
            ErrorReason::MissingFrom => "MissingFrom",
            ErrorReason::HavingWithoutGroupBy => "HavingWithoutGroupBy",
            ErrorReason::JoinFetchNotSelected => "JoinFetchNotSelected",
            ErrorReason::MemberOfItem => "MemberOfItem",
            ErrorReason::MemberOfCollection { .. } => "MemberOfCollection",
            ErrorReason::MemberOfTypeMismatch { .. } => "MemberOfTypeMismatch",
            ErrorReason::ConstructorNotQualified { .. } => "ConstructorNotQualified",
            ErrorReason::UnknownClass { .. } => "UnknownClass",
            ErrorReason::AmbiguousClass { .. } => "AmbiguousClass",
            ErrorReason::MixedParameters => "MixedParameters",
            ErrorReason::ObjectOutsideSelect => "ObjectOutsideSelect",
            ErrorReason::WrongArgumentCount { .. } => "WrongArgumentCount",
            ErrorReason::EmptyInList => "EmptyInList",
            ErrorReason::BulkStatementJoin { .. } => "BulkStatementJoin",
            ErrorReason::CompositeAssignment { .. } => "CompositeAssignment",
        }
    }
}

/// A failed compilation: the reason, the offending token (if any), its
/// character offset, and the full query text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}\nin \"{query}\"")]
pub struct QueryCompileError {
    pub reason: ErrorReason,
    pub token: Option<String>,
    pub position: Option<usize>,
    pub query: String,
}

impl QueryCompileError {
    pub fn new(reason: ErrorReason, query: &str) -> Self {
        QueryCompileError {
            reason,
            token: None,
            position: None,
            query: query.to_string(),
        }
    }

    /// Attach the token the error was raised at.
    pub fn at(mut self, token: impl Into<String>, position: usize) -> Self {
        self.token = Some(token.into());
        self.position = Some(position);
        self
    }

    pub fn code(&self) -> &'static str {
        self.reason.code()
    }
}
