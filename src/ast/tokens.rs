use rust_decimal::Decimal;
use std::fmt;

/// Reserved words, matched case-insensitively.
///
/// `LIMIT`, `OFFSET`, `THIS` and `UNKNOWN` are reserved only: no rule of the
/// grammar accepts them, so they cannot be used as aliases or identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    As,
    From,
    In,
    Select,
    Update,
    Delete,
    Set,
    Distinct,
    Where,
    Order,
    Group,
    By,
    Having,
    Asc,
    Desc,
    Limit,
    Offset,
    Join,
    Inner,
    Left,
    Outer,
    Fetch,
    Or,
    And,
    Not,
    Length,
    Locate,
    Abs,
    Sqrt,
    Mod,
    Size,
    Concat,
    Lower,
    Upper,
    Substring,
    Trim,
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
    Between,
    Like,
    Escape,
    Is,
    New,
    This,
    Unknown,
    Empty,
    Member,
    Of,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("AS", Keyword::As),
    ("FROM", Keyword::From),
    ("IN", Keyword::In),
    ("SELECT", Keyword::Select),
    ("UPDATE", Keyword::Update),
    ("DELETE", Keyword::Delete),
    ("SET", Keyword::Set),
    ("DISTINCT", Keyword::Distinct),
    ("WHERE", Keyword::Where),
    ("ORDER", Keyword::Order),
    ("GROUP", Keyword::Group),
    ("BY", Keyword::By),
    ("HAVING", Keyword::Having),
    ("ASC", Keyword::Asc),
    ("DESC", Keyword::Desc),
    ("LIMIT", Keyword::Limit),
    ("OFFSET", Keyword::Offset),
    ("JOIN", Keyword::Join),
    ("INNER", Keyword::Inner),
    ("LEFT", Keyword::Left),
    ("OUTER", Keyword::Outer),
    ("FETCH", Keyword::Fetch),
    ("OR", Keyword::Or),
    ("AND", Keyword::And),
    ("NOT", Keyword::Not),
    ("LENGTH", Keyword::Length),
    ("LOCATE", Keyword::Locate),
    ("ABS", Keyword::Abs),
    ("SQRT", Keyword::Sqrt),
    ("MOD", Keyword::Mod),
    ("SIZE", Keyword::Size),
    ("CONCAT", Keyword::Concat),
    ("LOWER", Keyword::Lower),
    ("UPPER", Keyword::Upper),
    ("SUBSTRING", Keyword::Substring),
    ("TRIM", Keyword::Trim),
    ("CURRENT_DATE", Keyword::CurrentDate),
    ("CURRENT_TIME", Keyword::CurrentTime),
    ("CURRENT_TIMESTAMP", Keyword::CurrentTimestamp),
    ("BETWEEN", Keyword::Between),
    ("LIKE", Keyword::Like),
    ("ESCAPE", Keyword::Escape),
    ("IS", Keyword::Is),
    ("NEW", Keyword::New),
    ("THIS", Keyword::This),
    ("UNKNOWN", Keyword::Unknown),
    ("EMPTY", Keyword::Empty),
    ("MEMBER", Keyword::Member),
    ("OF", Keyword::Of),
];

impl Keyword {
    /// Look up a reserved word, ignoring case.
    pub fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(word))
            .map(|(_, kw)| *kw)
    }

    pub fn as_str(&self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|(_, kw)| kw == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    /// Reserved words that name a built-in function and are followed by `(`.
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            Keyword::Length
                | Keyword::Locate
                | Keyword::Abs
                | Keyword::Sqrt
                | Keyword::Mod
                | Keyword::Size
                | Keyword::Concat
                | Keyword::Lower
                | Keyword::Upper
                | Keyword::Substring
                | Keyword::Trim
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Integer literal without a suffix
    ///
    /// # Examples
    /// ```text
    /// 42
    /// ```
    Integer(i64),

    /// Integer literal with an `L` suffix
    ///
    /// # Examples
    /// ```text
    /// 42L
    /// ```
    Long(i64),

    /// Literal with a fraction, an exponent, or an `F`/`D` suffix
    ///
    /// # Examples
    /// ```text
    /// 1.5
    /// 2e10
    /// 3D
    /// ```
    Double(Decimal),

    /// Single-quoted string. The lexeme keeps its quotes and any doubled
    /// `''` escapes, exactly as written.
    ///
    /// # Examples
    /// ```text
    /// 'shipped'
    /// 'O''Brien'
    /// ```
    String(String),

    Boolean(bool),
    Null,

    /// Positional parameter, 1-based. A bare `?` is numbered automatically.
    ///
    /// # Examples
    /// ```text
    /// ?1
    /// ?
    /// ```
    Positional(u32),

    /// Named parameter
    ///
    /// # Examples
    /// ```text
    /// :dept
    /// ```
    Named(String),

    // Words
    Identifier(String),
    Keyword(Keyword),

    // Punctuation
    LParen,
    RParen,
    Dot,
    Comma,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// String concatenation `||`
    Concat,

    Eof,
}

impl Token {
    /// How the token is named in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Eof => "end of query".to_string(),
            other => format!("'{other}'"),
        }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self, Token::Keyword(kw) if *kw == keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{n}"),
            Token::Long(n) => write!(f, "{n}L"),
            Token::Double(d) => write!(f, "{d}"),
            Token::String(s) => f.write_str(s),
            Token::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Token::Null => f.write_str("NULL"),
            Token::Positional(n) => write!(f, "?{n}"),
            Token::Named(name) => write!(f, ":{name}"),
            Token::Identifier(name) => f.write_str(name),
            Token::Keyword(kw) => f.write_str(kw.as_str()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Dot => f.write_str("."),
            Token::Comma => f.write_str(","),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Eq => f.write_str("="),
            Token::NotEq => f.write_str("<>"),
            Token::Lt => f.write_str("<"),
            Token::LtEq => f.write_str("<="),
            Token::Gt => f.write_str(">"),
            Token::GtEq => f.write_str(">="),
            Token::Concat => f.write_str("||"),
            Token::Eof => f.write_str("end of query"),
        }
    }
}
