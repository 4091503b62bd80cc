use crate::analysis::token::{Token, TokenKind};

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Structural fingerprint of a query: a hash over the token-kind stream with
/// literal values normalised away, plus the token count to keep hash
/// collisions from producing false whitelist hits.
///
/// Two queries that differ only in string or numeric literals hash equal;
/// changing any keyword, identifier, or operator changes the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHash {
    pub hash: u64,
    pub token_count: u32,
}

impl Default for QueryHash {
    fn default() -> Self {
        QueryHash {
            hash: 0,
            token_count: 0,
        }
    }
}

pub fn structural_hash(tokens: &[Token]) -> QueryHash {
    let mut hasher = XxHash64::with_seed(0);
    for token in tokens {
        match token.kind {
            TokenKind::Keyword(kw) => {
                hasher.write_u8(1);
                hasher.write_u32(kw as u32);
            }
            // Identifiers keep their spelling: `users` and `items` are
            // different query shapes.
            TokenKind::Identifier => {
                hasher.write_u8(2);
                hasher.write(token.text.to_ascii_lowercase().as_bytes());
            }
            // Literals contribute only their kind.
            TokenKind::Integer | TokenKind::Float | TokenKind::HexNumber => {
                hasher.write_u8(3);
            }
            TokenKind::StringLiteral => {
                hasher.write_u8(4);
            }
            TokenKind::GlobalVariable | TokenKind::SessionVariable => {
                hasher.write_u8(5);
                hasher.write(token.text.to_ascii_lowercase().as_bytes());
            }
            other => {
                hasher.write_u8(6);
                hasher.write_u32(discriminant_code(other));
            }
        }
    }
    QueryHash {
        hash: hasher.finish(),
        token_count: tokens.len() as u32,
    }
}

fn discriminant_code(kind: TokenKind) -> u32 {
    match kind {
        TokenKind::Keyword(_) => 0,
        TokenKind::Identifier => 1,
        TokenKind::Integer => 2,
        TokenKind::Float => 3,
        TokenKind::HexNumber => 4,
        TokenKind::StringLiteral => 5,
        TokenKind::GlobalVariable => 6,
        TokenKind::SessionVariable => 7,
        TokenKind::Plus => 8,
        TokenKind::Minus => 9,
        TokenKind::Star => 10,
        TokenKind::Slash => 11,
        TokenKind::Percent => 12,
        TokenKind::Ampersand => 13,
        TokenKind::Pipe => 14,
        TokenKind::Caret => 15,
        TokenKind::Tilde => 16,
        TokenKind::Bang => 17,
        TokenKind::ShiftLeft => 18,
        TokenKind::ShiftRight => 19,
        TokenKind::Eq => 20,
        TokenKind::Assign => 21,
        TokenKind::NotEq => 22,
        TokenKind::Lt => 23,
        TokenKind::Le => 24,
        TokenKind::Gt => 25,
        TokenKind::Ge => 26,
        TokenKind::LParen => 27,
        TokenKind::RParen => 28,
        TokenKind::Comma => 29,
        TokenKind::Dot => 30,
        TokenKind::Semicolon => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lexer::Lexer;
    use crate::analysis::risk::QueryRisk;

    fn hash_of(sql: &str) -> QueryHash {
        let mut risk = QueryRisk::default();
        let tokens = Lexer::new(sql, &mut risk).tokenize().unwrap();
        structural_hash(&tokens)
    }

    #[test]
    fn literals_do_not_change_the_hash() {
        let a = hash_of("SELECT * FROM users WHERE id = 5");
        let b = hash_of("SELECT * FROM users WHERE id = 12345");
        let c = hash_of("SELECT * FROM users WHERE name = 'bob'");
        assert_eq!(a, b);
        assert_ne!(a, c); // different column and literal kind

        let d = hash_of("SELECT * FROM users WHERE name = 'alice'");
        assert_eq!(c, d);
    }

    #[test]
    fn identifiers_do_change_the_hash() {
        let a = hash_of("SELECT * FROM users");
        let b = hash_of("SELECT * FROM items");
        assert_ne!(a, b);
    }

    #[test]
    fn token_count_guards_collisions() {
        let a = hash_of("SELECT 1");
        assert_eq!(2, a.token_count);
    }
}
