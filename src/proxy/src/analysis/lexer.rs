use crate::analysis::risk::QueryRisk;
use crate::analysis::token::{Keyword, Token, TokenKind};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),
    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),
    #[error("unterminated quoted identifier starting at byte {0}")]
    UnterminatedIdentifier(usize),
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
}

/// Re-entrant SQL scanner. Each instance owns its cursor, so any number of
/// sessions can tokenize concurrently.
///
/// Beyond producing tokens, the scanner increments the comment-shaped risk
/// counters it alone can observe; everything else in the risk vector is the
/// parser's business.
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    risk: &'a mut QueryRisk,
    /// Inside a `/*! ... */` section, whose contents lex as normal tokens.
    mysql_comment_open: bool,
    mysql_comment_start: usize,
    last_kind: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, risk: &'a mut QueryRisk) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            risk,
            mysql_comment_open: false,
            mysql_comment_start: 0,
            last_kind: None,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            self.last_kind = Some(token.kind);
            tokens.push(token);
        }
        if self.mysql_comment_open {
            return Err(LexError::UnterminatedComment(self.mysql_comment_start));
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skips whitespace and comments; lexical side effects happen here.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    self.note_comment_context();
                    self.risk.hash_comments += 1;
                    self.skip_to_line_end();
                }
                Some(b'-')
                    if self.peek_at(1) == Some(b'-')
                        && matches!(
                            self.peek_at(2),
                            None | Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')
                        ) =>
                {
                    self.note_comment_context();
                    self.risk.dash_dash_comments += 1;
                    self.skip_to_line_end();
                }
                Some(b'*')
                    if self.mysql_comment_open && self.peek_at(1) == Some(b'/') =>
                {
                    self.mysql_comment_open = false;
                    self.pos += 2;
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.note_comment_context();
                    let start = self.pos;
                    self.pos += 2;
                    if self.peek() == Some(b'!') {
                        // MySQL-only section: the body is real SQL for MySQL
                        // servers, so keep lexing it as tokens.
                        self.pos += 1;
                        let mut digits = 0;
                        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                            self.pos += 1;
                            digits += 1;
                        }
                        if digits > 0 {
                            self.risk.mysql_versioned_comments += 1;
                        } else {
                            self.risk.mysql_comments += 1;
                        }
                        self.mysql_comment_open = true;
                        self.mysql_comment_start = start;
                    } else {
                        self.risk.multi_line_comments += 1;
                        loop {
                            match self.peek() {
                                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                    self.pos += 2;
                                    break;
                                }
                                Some(_) => self.pos += 1,
                                None => {
                                    return Err(LexError::UnterminatedComment(start));
                                }
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Attribution for a comment that is about to be consumed: injections
    /// routinely comment out the tail of a query right after a conditional
    /// keyword or a closing quote.
    fn note_comment_context(&mut self) {
        if matches!(
            self.last_kind,
            Some(TokenKind::Keyword(Keyword::And))
                | Some(TokenKind::Keyword(Keyword::Or))
                | Some(TokenKind::Keyword(Keyword::Xor))
        ) {
            self.risk.commented_conditionals += 1;
        }
        if self.pos > 0 {
            let prev = self.src[self.pos - 1];
            if prev == b'\'' || prev == b'"' {
                self.risk.commented_quotes += 1;
            }
        }
    }

    fn skip_to_line_end(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                self.pos += 1;
                return;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_trivia()?;
        let start = self.pos;
        let b = match self.peek() {
            Some(b) => b,
            None => return Ok(None),
        };

        let token = match b {
            b'\'' | b'"' => self.lex_string()?,
            b'`' => self.lex_quoted_identifier()?,
            b'@' => self.lex_variable()?,
            b'0' if matches!(self.peek_at(1), Some(b'x') | Some(b'X')) => self.lex_hex_or_zero(),
            b'0'..=b'9' => self.lex_number(),
            b'.' if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => self.lex_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => self.lex_word(),
            _ => self.lex_operator(start)?,
        };
        Ok(Some(token))
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let mut decoded = String::new();
        loop {
            let start = self.pos;
            let quote = self.bump().unwrap();
            let mut closed = false;
            while let Some(b) = self.bump() {
                if b == b'\\' {
                    match self.bump() {
                        Some(escaped) => decoded.push_str(&decode_escape(escaped)),
                        None => return Err(LexError::UnterminatedString(start)),
                    }
                } else if b == quote {
                    // A doubled quote is a literal quote character.
                    if self.peek() == Some(quote) {
                        self.pos += 1;
                        decoded.push(quote as char);
                    } else {
                        closed = true;
                        break;
                    }
                } else {
                    decoded.push(b as char);
                }
            }
            if !closed {
                return Err(LexError::UnterminatedString(start));
            }

            // MySQL concatenates adjacent string literals into one value.
            let mut lookahead = self.pos;
            while matches!(
                self.src.get(lookahead),
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')
            ) {
                lookahead += 1;
            }
            match self.src.get(lookahead) {
                Some(b'\'') | Some(b'"') => {
                    self.pos = lookahead;
                    self.risk.mysql_string_concat += 1;
                }
                _ => break,
            }
        }
        Ok(Token::new(TokenKind::StringLiteral, decoded))
    }

    fn lex_quoted_identifier(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1; // opening backtick
        let begin = self.pos;
        while let Some(b) = self.peek() {
            if b == b'`' {
                let text = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
                self.pos += 1;
                return Ok(Token::new(TokenKind::Identifier, text));
            }
            self.pos += 1;
        }
        Err(LexError::UnterminatedIdentifier(start))
    }

    fn lex_variable(&mut self) -> Result<Token, LexError> {
        self.pos += 1; // '@'
        if self.peek() == Some(b'@') {
            self.pos += 1;
            let begin = self.pos;
            while matches!(self.peek(), Some(b) if is_ident_byte(b) || b == b'.') {
                self.pos += 1;
            }
            let name = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
            self.risk.global_variables += 1;
            return Ok(Token::new(TokenKind::GlobalVariable, name));
        }
        let begin = self.pos;
        while matches!(self.peek(), Some(b) if is_ident_byte(b) || b == b'.') {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
        Ok(Token::new(TokenKind::SessionVariable, name))
    }

    fn lex_hex_or_zero(&mut self) -> Token {
        // 0x with at least one hex digit is a hex literal; a bare `0x` lexes
        // as integer 0 followed by the identifier `x`.
        let has_digit = matches!(self.peek_at(2), Some(d) if d.is_ascii_hexdigit());
        if !has_digit {
            self.pos += 1;
            return Token::new(TokenKind::Integer, "0");
        }
        let begin = self.pos;
        self.pos += 2;
        while matches!(self.peek(), Some(d) if d.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
        Token::new(TokenKind::HexNumber, text)
    }

    fn lex_number(&mut self) -> Token {
        let begin = self.pos;
        let mut float = false;
        while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut lookahead = self.pos + 1;
            if matches!(self.src.get(lookahead), Some(b'+') | Some(b'-')) {
                lookahead += 1;
            }
            if matches!(self.src.get(lookahead), Some(d) if d.is_ascii_digit()) {
                float = true;
                self.pos = lookahead;
                while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
        let kind = if float {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        Token::new(kind, text)
    }

    fn lex_word(&mut self) -> Token {
        let begin = self.pos;
        while matches!(self.peek(), Some(b) if is_ident_byte(b)) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[begin..self.pos]).into_owned();
        match Keyword::lookup(&text) {
            Some(kw) => Token::new(TokenKind::Keyword(kw), text),
            None => Token::new(TokenKind::Identifier, text),
        }
    }

    fn lex_operator(&mut self, start: usize) -> Result<Token, LexError> {
        let b = self.bump().unwrap();
        let kind = match b {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::Tilde,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b';' => TokenKind::Semicolon,
            b'=' => TokenKind::Eq,
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Keyword(Keyword::And), "&&"));
                }
                TokenKind::Ampersand
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Keyword(Keyword::Or), "||"));
                }
                TokenKind::Pipe
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::NotEq, "!="));
                }
                TokenKind::Bang
            }
            b'<' => match self.peek() {
                Some(b'<') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::ShiftLeft, "<<"));
                }
                Some(b'=') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Le, "<="));
                }
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::NotEq, "<>"));
                }
                _ => TokenKind::Lt,
            },
            b'>' => match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::ShiftRight, ">>"));
                }
                Some(b'=') => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Ge, ">="));
                }
                _ => TokenKind::Gt,
            },
            b':' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Assign, ":="));
                }
                return Err(LexError::UnexpectedChar(':', start));
            }
            other => return Err(LexError::UnexpectedChar(other as char, start)),
        };
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or_default()
            .to_string();
        Ok(Token::new(kind, text))
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn decode_escape(escaped: u8) -> String {
    match escaped {
        b'0' => "\0".to_string(),
        b'b' => "\u{8}".to_string(),
        b'n' => "\n".to_string(),
        b'r' => "\r".to_string(),
        b't' => "\t".to_string(),
        b'Z' => "\u{1a}".to_string(),
        b'\\' => "\\".to_string(),
        // MySQL keeps the backslash for the LIKE wildcards so the pattern
        // matcher can see it.
        b'%' => "\\%".to_string(),
        b'_' => "\\_".to_string(),
        other => (other as char).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(sql: &str) -> (Vec<Token>, QueryRisk) {
        let mut risk = QueryRisk::default();
        let tokens = Lexer::new(sql, &mut risk).tokenize().unwrap();
        (tokens, risk)
    }

    #[test]
    fn counts_comment_styles() {
        let (_, risk) = lex("SELECT 1 /* a */ # b\n-- c\n/*! STRAIGHT_JOIN */ /*!40001 x */");
        assert_eq!(1, risk.multi_line_comments);
        assert_eq!(1, risk.hash_comments);
        assert_eq!(1, risk.dash_dash_comments);
        assert_eq!(1, risk.mysql_comments);
        assert_eq!(1, risk.mysql_versioned_comments);
    }

    #[test]
    fn dash_dash_needs_whitespace() {
        let (tokens, risk) = lex("SELECT 5--1");
        assert_eq!(0, risk.dash_dash_comments);
        // 5 minus minus 1
        assert_eq!(
            vec![
                TokenKind::Keyword(Keyword::Select),
                TokenKind::Integer,
                TokenKind::Minus,
                TokenKind::Minus,
                TokenKind::Integer,
            ],
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>()
        );

        let (_, risk) = lex("SELECT 5 --");
        assert_eq!(1, risk.dash_dash_comments);
    }

    #[test]
    fn mysql_comment_contents_are_lexed() {
        let (tokens, _) = lex("SELECT /*!40001 SQL_NO_CACHE */ 1");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            vec![
                TokenKind::Keyword(Keyword::Select),
                TokenKind::Identifier,
                TokenKind::Integer,
            ],
            kinds
        );
    }

    #[test]
    fn unterminated_comment_fails() {
        let mut risk = QueryRisk::default();
        let rs = Lexer::new("SELECT 1 /* oops", &mut risk).tokenize();
        assert!(matches!(rs, Err(LexError::UnterminatedComment(_))));

        let mut risk = QueryRisk::default();
        let rs = Lexer::new("SELECT /*! 1", &mut risk).tokenize();
        assert!(matches!(rs, Err(LexError::UnterminatedComment(_))));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let (tokens, risk) = lex("SELECT 'abc' 'def'");
        assert_eq!(1, risk.mysql_string_concat);
        assert_eq!(2, tokens.len());
        assert_eq!("abcdef", tokens[1].text);
    }

    #[test]
    fn string_escapes_decode() {
        let (tokens, _) = lex(r"SELECT 'a\'b', 'it''s', '\%'");
        assert_eq!("a'b", tokens[1].text);
        assert_eq!("it's", tokens[3].text);
        assert_eq!("\\%", tokens[5].text);
    }

    #[test]
    fn hex_literals_need_a_digit() {
        let (tokens, _) = lex("SELECT 0x41");
        assert_eq!(TokenKind::HexNumber, tokens[1].kind);
        assert_eq!("0x41", tokens[1].text);

        let (tokens, _) = lex("SELECT 0x");
        assert_eq!(TokenKind::Integer, tokens[1].kind);
        assert_eq!("0", tokens[1].text);
        assert_eq!(TokenKind::Identifier, tokens[2].kind);
        assert_eq!("x", tokens[2].text);
    }

    #[test]
    fn variables_are_counted() {
        let (tokens, risk) = lex("SELECT @@version, @foo");
        assert_eq!(1, risk.global_variables);
        assert_eq!(TokenKind::GlobalVariable, tokens[1].kind);
        assert_eq!("version", tokens[1].text);
        assert_eq!(TokenKind::SessionVariable, tokens[3].kind);
    }

    #[test]
    fn commented_conditionals_and_quotes() {
        let (_, risk) = lex("SELECT * FROM a WHERE b = '' OR -- tail");
        assert_eq!(1, risk.commented_conditionals);

        let (_, risk) = lex("SELECT * FROM a WHERE b = 'x'-- tail");
        assert_eq!(1, risk.commented_quotes);
        assert_eq!(1, risk.dash_dash_comments);
    }

    #[test]
    fn word_operators_map_to_keywords() {
        let (tokens, _) = lex("a && b || c");
        assert_eq!(TokenKind::Keyword(Keyword::And), tokens[1].kind);
        assert_eq!(TokenKind::Keyword(Keyword::Or), tokens[3].kind);
    }
}
