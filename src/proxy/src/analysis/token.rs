/// SQL keywords the grammar recognises. Lookup is case-insensitive; a few
/// keywords double as ordinary identifiers in some positions and are marked
/// by [`Keyword::identifier_fallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    All,
    And,
    As,
    Asc,
    Begin,
    Between,
    By,
    Commit,
    Cross,
    Delayed,
    Delete,
    Desc,
    Describe,
    Distinct,
    Distinctrow,
    Div,
    Duplicate,
    Explain,
    False,
    From,
    Global,
    Group,
    Having,
    HighPriority,
    Ignore,
    In,
    Inner,
    Insert,
    Into,
    Is,
    Join,
    Key,
    Left,
    Like,
    Limit,
    Local,
    Lock,
    LowPriority,
    Mod,
    Names,
    Natural,
    Not,
    Null,
    Offset,
    On,
    Or,
    Order,
    Outer,
    Quick,
    Read,
    Right,
    Rollback,
    Select,
    Session,
    Set,
    Show,
    Sounds,
    Start,
    StraightJoin,
    Tables,
    Transaction,
    True,
    Union,
    Unlock,
    Update,
    Use,
    Using,
    Values,
    Where,
    Work,
    Write,
    Xor,
}

impl Keyword {
    pub fn lookup(word: &str) -> Option<Keyword> {
        let upper = word.to_ascii_uppercase();
        let kw = match upper.as_str() {
            "ALL" => Keyword::All,
            "AND" => Keyword::And,
            "AS" => Keyword::As,
            "ASC" => Keyword::Asc,
            "BEGIN" => Keyword::Begin,
            "BETWEEN" => Keyword::Between,
            "BY" => Keyword::By,
            "COMMIT" => Keyword::Commit,
            "CROSS" => Keyword::Cross,
            "DELAYED" => Keyword::Delayed,
            "DELETE" => Keyword::Delete,
            "DESC" => Keyword::Desc,
            "DESCRIBE" => Keyword::Describe,
            "DISTINCT" => Keyword::Distinct,
            "DISTINCTROW" => Keyword::Distinctrow,
            "DIV" => Keyword::Div,
            "DUPLICATE" => Keyword::Duplicate,
            "EXPLAIN" => Keyword::Explain,
            "FALSE" => Keyword::False,
            "FROM" => Keyword::From,
            "GLOBAL" => Keyword::Global,
            "GROUP" => Keyword::Group,
            "HAVING" => Keyword::Having,
            "HIGH_PRIORITY" => Keyword::HighPriority,
            "IGNORE" => Keyword::Ignore,
            "IN" => Keyword::In,
            "INNER" => Keyword::Inner,
            "INSERT" => Keyword::Insert,
            "INTO" => Keyword::Into,
            "IS" => Keyword::Is,
            "JOIN" => Keyword::Join,
            "KEY" => Keyword::Key,
            "LEFT" => Keyword::Left,
            "LIKE" => Keyword::Like,
            "LIMIT" => Keyword::Limit,
            "LOCAL" => Keyword::Local,
            "LOCK" => Keyword::Lock,
            "LOW_PRIORITY" => Keyword::LowPriority,
            "MOD" => Keyword::Mod,
            "NAMES" => Keyword::Names,
            "NATURAL" => Keyword::Natural,
            "NOT" => Keyword::Not,
            "NULL" => Keyword::Null,
            "OFFSET" => Keyword::Offset,
            "ON" => Keyword::On,
            "OR" => Keyword::Or,
            "ORDER" => Keyword::Order,
            "OUTER" => Keyword::Outer,
            "QUICK" => Keyword::Quick,
            "READ" => Keyword::Read,
            "RIGHT" => Keyword::Right,
            "ROLLBACK" => Keyword::Rollback,
            "SELECT" => Keyword::Select,
            "SESSION" => Keyword::Session,
            "SET" => Keyword::Set,
            "SHOW" => Keyword::Show,
            "SOUNDS" => Keyword::Sounds,
            "START" => Keyword::Start,
            "STRAIGHT_JOIN" => Keyword::StraightJoin,
            "TABLES" => Keyword::Tables,
            "TRANSACTION" => Keyword::Transaction,
            "TRUE" => Keyword::True,
            "UNION" => Keyword::Union,
            "UNLOCK" => Keyword::Unlock,
            "UPDATE" => Keyword::Update,
            "USE" => Keyword::Use,
            "USING" => Keyword::Using,
            "VALUE" | "VALUES" => Keyword::Values,
            "WHERE" => Keyword::Where,
            "WORK" => Keyword::Work,
            "XOR" => Keyword::Xor,
            _ => return None,
        };
        Some(kw)
    }

    /// Keywords that MySQL also accepts as plain identifiers (column or
    /// table names) when the grammar position calls for one.
    pub fn identifier_fallback(&self) -> bool {
        matches!(
            self,
            Keyword::Begin
                | Keyword::Duplicate
                | Keyword::Global
                | Keyword::Key
                | Keyword::Local
                | Keyword::Names
                | Keyword::Offset
                | Keyword::Quick
                | Keyword::Session
                | Keyword::Start
                | Keyword::Tables
                | Keyword::Transaction
                | Keyword::Work
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier,
    Integer,
    Float,
    HexNumber,
    StringLiteral,
    GlobalVariable,
    SessionVariable,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    Bang,
    ShiftLeft,
    ShiftRight,
    Eq,
    Assign,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
}

/// One lexeme. `text` is the raw spelling, except for string literals where
/// it is the decoded value with MySQL's adjacent-literal concatenation
/// already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Token {
            kind,
            text: text.into(),
        }
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.kind {
            TokenKind::Keyword(kw) => Some(kw),
            _ => None,
        }
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }
}
