use crate::ast::{Keyword, Token};
use crate::error::{ErrorReason, QueryCompileError};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Saved scanner position, used to rewind over a select list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexerState {
    position: usize,
    token_start: usize,
    parameter_count: u32,
}

pub struct Lexer {
    input: Vec<char>,
    source: String,
    position: usize,
    token_start: usize,
    parameter_count: u32,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            source: input.to_string(),
            position: 0,
            token_start: 0,
            parameter_count: 0,
        }
    }

    /// The full query text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Character offset of the most recently scanned token.
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    /// Text of the most recently scanned token, as written.
    pub fn lexeme(&self) -> String {
        self.input[self.token_start..self.position.min(self.input.len())]
            .iter()
            .collect()
    }

    pub fn state(&self) -> LexerState {
        LexerState {
            position: self.position,
            token_start: self.token_start,
            parameter_count: self.parameter_count,
        }
    }

    pub fn restore(&mut self, state: LexerState) {
        self.position = state.position;
        self.token_start = state.token_start;
        self.parameter_count = state.parameter_count;
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn error(&self, reason: ErrorReason) -> QueryCompileError {
        QueryCompileError::new(reason, &self.source).at(self.lexeme(), self.token_start)
    }

    fn describe_current(&self) -> String {
        match self.current_char() {
            Some(ch) => format!("'{ch}'"),
            None => "end of query".to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '@' && self.peek_char(1) == Some('@') {
                // `@@` is transparent
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
    }

    fn is_identifier_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_' || ch == '$'
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    /// Scan a single-quoted string, keeping the quotes and doubled quotes.
    fn read_string(&mut self) -> Result<String, QueryCompileError> {
        let mut result = String::from('\'');
        self.advance(); // Consume opening quote

        while let Some(ch) = self.current_char() {
            self.advance();
            result.push(ch);
            if ch == '\'' {
                if self.current_char() == Some('\'') {
                    result.push('\'');
                    self.advance();
                } else {
                    return Ok(result);
                }
            }
        }

        Err(self.error(ErrorReason::UnterminatedString))
    }

    fn read_digits(&mut self, into: &mut String) {
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                into.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, QueryCompileError> {
        let mut number = String::new();
        let mut is_double = false;

        self.read_digits(&mut number);

        if self.current_char() == Some('.') && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
        {
            is_double = true;
            number.push('.');
            self.advance();
            self.read_digits(&mut number);
        }

        if matches!(self.current_char(), Some('e' | 'E')) {
            is_double = true;
            number.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.current_char() {
                number.push(sign);
                self.advance();
            }
            if !self.current_char().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error(ErrorReason::ExponentNeedsDigits {
                    found: self.describe_current(),
                }));
            }
            self.read_digits(&mut number);
        }

        let mut is_long = false;
        match self.current_char() {
            Some('F' | 'f' | 'D' | 'd') => {
                is_double = true;
                self.advance();
            }
            Some('L' | 'l') if !is_double => {
                is_long = true;
                self.advance();
            }
            _ => {}
        }

        let out_of_range = || ErrorReason::NumberOutOfRange {
            literal: number.clone(),
        };
        if is_double {
            let value = if number.contains('e') {
                Decimal::from_scientific(&number)
            } else {
                Decimal::from_str(&number)
            };
            value.map(Token::Double).map_err(|_| self.error(out_of_range()))
        } else {
            let value = number
                .parse::<i64>()
                .map_err(|_| self.error(out_of_range()))?;
            Ok(if is_long {
                Token::Long(value)
            } else {
                Token::Integer(value)
            })
        }
    }

    fn read_positional(&mut self) -> Result<Token, QueryCompileError> {
        self.advance(); // Consume '?'
        let mut digits = String::new();
        self.read_digits(&mut digits);

        if digits.is_empty() {
            self.parameter_count += 1;
            return Ok(Token::Positional(self.parameter_count));
        }

        let index = digits.parse::<u32>().map_err(|_| {
            self.error(ErrorReason::NumberOutOfRange {
                literal: format!("?{digits}"),
            })
        })?;
        if index == 0 {
            return Err(self.error(ErrorReason::NonPositiveArgument {
                text: format!("?{digits}"),
            }));
        }
        Ok(Token::Positional(index))
    }

    /// Consume `len` characters and return `token`.
    fn symbol(&mut self, len: usize, token: Token) -> Result<Token, QueryCompileError> {
        self.position += len;
        Ok(token)
    }

    pub fn next_token(&mut self) -> Result<Token, QueryCompileError> {
        self.skip_whitespace();
        self.token_start = self.position;

        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };

        match ch {
            '(' => self.symbol(1, Token::LParen),
            ')' => self.symbol(1, Token::RParen),
            '.' => self.symbol(1, Token::Dot),
            ',' => self.symbol(1, Token::Comma),
            '+' => self.symbol(1, Token::Plus),
            '-' => self.symbol(1, Token::Minus),
            '*' => self.symbol(1, Token::Star),
            '/' => self.symbol(1, Token::Slash),
            '=' => self.symbol(1, Token::Eq),
            '<' => match self.peek_char(1) {
                Some('=') => self.symbol(2, Token::LtEq),
                Some('>') => self.symbol(2, Token::NotEq),
                _ => self.symbol(1, Token::Lt),
            },
            '>' => match self.peek_char(1) {
                Some('=') => self.symbol(2, Token::GtEq),
                _ => self.symbol(1, Token::Gt),
            },
            '!' if self.peek_char(1) == Some('=') => self.symbol(2, Token::NotEq),
            '|' if self.peek_char(1) == Some('|') => self.symbol(2, Token::Concat),
            '?' => self.read_positional(),
            ':' if self.peek_char(1).is_some_and(Self::is_identifier_start) => {
                self.advance();
                self.parameter_count += 1;
                Ok(Token::Named(self.read_identifier()))
            }
            '\'' => self.read_string().map(Token::String),
            c if c.is_ascii_digit() => self.read_number(),
            c if Self::is_identifier_start(c) => {
                let ident = self.read_identifier();
                if ident.eq_ignore_ascii_case("true") {
                    Ok(Token::Boolean(true))
                } else if ident.eq_ignore_ascii_case("false") {
                    Ok(Token::Boolean(false))
                } else if ident.eq_ignore_ascii_case("null") {
                    Ok(Token::Null)
                } else if let Some(keyword) = Keyword::lookup(&ident) {
                    Ok(Token::Keyword(keyword))
                } else {
                    Ok(Token::Identifier(ident))
                }
            }
            other => {
                self.advance();
                Err(self.error(ErrorReason::UnexpectedCharacter {
                    found: format!("'{other}'"),
                }))
            }
        }
    }

    /// Scan the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, QueryCompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if token == Token::Eof {
                return Ok(tokens);
            }
            tokens.push(token);
        }
    }
}
