// tests/lexer_tests.rs

use eql::lexer::Lexer;
use eql::{Keyword, Token};
use rust_decimal::Decimal;
use std::str::FromStr;

fn tokens(input: &str) -> Vec<Token> {
    Lexer::new(input).tokenize().unwrap()
}

fn error_code(input: &str) -> &'static str {
    Lexer::new(input).tokenize().unwrap_err().code()
}

// ============================================================================
// Words
// ============================================================================

#[test]
fn test_keywords_and_identifiers() {
    assert_eq!(
        tokens("SELECT o FROM Order o"),
        vec![
            Token::Keyword(Keyword::Select),
            Token::Identifier("o".into()),
            Token::Keyword(Keyword::From),
            Token::Keyword(Keyword::Order),
            Token::Identifier("o".into()),
        ]
    );
}

#[test]
fn test_identifier_characters() {
    assert_eq!(
        tokens("_tmp $x a1_b$"),
        vec![
            Token::Identifier("_tmp".into()),
            Token::Identifier("$x".into()),
            Token::Identifier("a1_b$".into()),
        ]
    );
}

#[test]
fn test_boolean_and_null_ignore_case() {
    assert_eq!(
        tokens("True FALSE null"),
        vec![Token::Boolean(true), Token::Boolean(false), Token::Null]
    );
}

#[test]
fn test_at_at_is_transparent() {
    assert_eq!(
        tokens("a@@b"),
        vec![Token::Identifier("a".into()), Token::Identifier("b".into())]
    );
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_integer_and_long() {
    assert_eq!(tokens("42 42L 7l"), vec![Token::Integer(42), Token::Long(42), Token::Long(7)]);
}

#[test]
fn test_doubles() {
    assert_eq!(
        tokens("1.5 3D 2f"),
        vec![
            Token::Double(Decimal::from_str("1.5").unwrap()),
            Token::Double(Decimal::from(3)),
            Token::Double(Decimal::from(2)),
        ]
    );
    assert_eq!(tokens("2e3"), vec![Token::Double(Decimal::from(2000))]);
}

#[test]
fn test_dot_without_digits_is_not_a_fraction() {
    assert_eq!(
        tokens("1.x"),
        vec![Token::Integer(1), Token::Dot, Token::Identifier("x".into())]
    );
}

#[test]
fn test_string_keeps_quotes_and_escapes() {
    assert_eq!(tokens("'O''Brien'"), vec![Token::String("'O''Brien'".into())]);
    assert_eq!(tokens("''"), vec![Token::String("''".into())]);
}

#[test]
fn test_integer_out_of_range() {
    assert_eq!(error_code("99999999999999999999"), "NumberOutOfRange");
}

#[test]
fn test_exponent_needs_digits() {
    assert_eq!(error_code("1e+"), "ExponentNeedsDigits");
}

#[test]
fn test_unterminated_string() {
    assert_eq!(error_code("'abc"), "UnterminatedString");
}

// ============================================================================
// Parameters
// ============================================================================

#[test]
fn test_positional_parameters() {
    assert_eq!(tokens("?3"), vec![Token::Positional(3)]);
    assert_eq!(
        tokens("? ?"),
        vec![Token::Positional(1), Token::Positional(2)]
    );
}

#[test]
fn test_zero_parameter_rejected() {
    assert_eq!(error_code("?0"), "NonPositiveArgument");
}

#[test]
fn test_named_parameter() {
    assert_eq!(tokens(":dept"), vec![Token::Named("dept".into())]);
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_comparison_operators() {
    assert_eq!(
        tokens("= <> != < <= > >="),
        vec![
            Token::Eq,
            Token::NotEq,
            Token::NotEq,
            Token::Lt,
            Token::LtEq,
            Token::Gt,
            Token::GtEq,
        ]
    );
}

#[test]
fn test_punctuation() {
    assert_eq!(
        tokens("( ) . , + - * / || =>"),
        vec![
            Token::LParen,
            Token::RParen,
            Token::Dot,
            Token::Comma,
            Token::Plus,
            Token::Minus,
            Token::Star,
            Token::Slash,
            Token::Concat,
            Token::Eq,
            Token::Gt,
        ]
    );
}

#[test]
fn test_brackets_are_unexpected() {
    let err = Lexer::new("o.tags[0]").tokenize().unwrap_err();
    assert_eq!(err.code(), "UnexpectedCharacter");
    assert_eq!(err.position, Some(6));
}

#[test]
fn test_reserved_only_words_are_keywords() {
    assert_eq!(
        tokens("limit Offset THIS unknown"),
        vec![
            Token::Keyword(Keyword::Limit),
            Token::Keyword(Keyword::Offset),
            Token::Keyword(Keyword::This),
            Token::Keyword(Keyword::Unknown),
        ]
    );
}

#[test]
fn test_unexpected_character() {
    let err = Lexer::new("a = #").tokenize().unwrap_err();
    assert_eq!(err.code(), "UnexpectedCharacter");
    assert_eq!(err.position, Some(4));
    assert_eq!(err.query, "a = #");
}

#[test]
fn test_lexeme_keeps_original_case() {
    let mut lexer = Lexer::new("  Order");
    assert_eq!(lexer.next_token().unwrap(), Token::Keyword(Keyword::Order));
    assert_eq!(lexer.lexeme(), "Order");
    assert_eq!(lexer.token_start(), 2);
}
