pub mod ast;
pub mod hash;
pub mod lexer;
pub mod parser;
pub mod risk;
pub mod text;
pub mod token;

use crate::analysis::hash::{structural_hash, QueryHash};
use crate::analysis::lexer::Lexer;
use crate::analysis::parser::Parser;
use crate::analysis::risk::QueryRisk;
use crate::policy::sensitive::SensitiveNames;

use tracing::debug;

/// The complete result of analysing one query buffer. `risk.valid` is false
/// when the buffer failed to lex or parse; the counters accumulated up to
/// the failure stay in place (the parse-failure whitelist keys on the hash
/// of exactly such queries).
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub risk: QueryRisk,
    pub hash: QueryHash,
}

pub fn analyze_query(sql: &str, sensitive: &SensitiveNames) -> QueryAnalysis {
    let mut risk = QueryRisk::default();

    let tokens = match Lexer::new(sql, &mut risk).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!("query failed to lex: {e}");
            risk.valid = false;
            return QueryAnalysis {
                risk,
                hash: QueryHash::default(),
            };
        }
    };

    let hash = structural_hash(&tokens);

    let mut parser = Parser::new(&tokens, &mut risk, sensitive);
    if let Err(e) = parser.parse_statement_buffer() {
        debug!("query failed to parse: {e}");
        risk.valid = false;
    }

    QueryAnalysis { risk, hash }
}

/// Normalises a query for the log: newlines and tabs become spaces, runs of
/// spaces collapse.
pub fn format_query(query: &str) -> String {
    let mut formatted = String::with_capacity(query.len());
    let mut last_was_space = false;
    for c in query.chars() {
        let c = match c {
            '\n' | '\t' | '\r' => ' ',
            other => other,
        };
        if c == ' ' {
            if !last_was_space {
                formatted.push(' ');
            }
            last_was_space = true;
        } else {
            formatted.push(c);
            last_was_space = false;
        }
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::risk::{EmptyPassword, QueryType};

    fn analyze(sql: &str) -> QueryAnalysis {
        analyze_query(sql, &SensitiveNames::default())
    }

    #[test]
    fn plain_select_is_clean() {
        let a = analyze("SELECT * FROM items WHERE id = 5");
        assert!(a.risk.valid);
        assert_eq!(QueryType::Select, a.risk.query_type);
        assert_eq!(0, a.risk.or_statements);
        assert_eq!(0, a.risk.always_true_conditionals);
        assert!(!a.risk.always_true);
        assert!(!a.risk.user_table);
    }

    #[test]
    fn classic_injection_shape() {
        let a = analyze("SELECT * FROM users WHERE name = '' OR 1=1 -- '");
        assert!(a.risk.valid);
        assert_eq!(1, a.risk.or_statements);
        assert_eq!(1, a.risk.always_true_conditionals);
        assert!(a.risk.always_true);
        assert_eq!(1, a.risk.dash_dash_comments);
        assert!(a.risk.user_table);
    }

    #[test]
    fn empty_password_comparison() {
        let a = analyze("SELECT name FROM users WHERE password = ''");
        assert_eq!(EmptyPassword::Empty, a.risk.empty_password);
        assert!(a.risk.user_table);

        let a = analyze("SELECT name FROM users WHERE password = 'secret'");
        assert_eq!(EmptyPassword::NotEmpty, a.risk.empty_password);
    }

    #[test]
    fn update_set_counts_password() {
        let a = analyze("UPDATE users SET password = '' WHERE id = 3");
        assert_eq!(QueryType::Update, a.risk.query_type);
        assert_eq!(EmptyPassword::Empty, a.risk.empty_password);
    }

    #[test]
    fn multi_statement_is_rejected() {
        let a = analyze("SELECT * FROM items; DROP TABLE items");
        assert!(!a.risk.valid);
        assert!(a.risk.multiple_queries);

        // A trailing semicolon alone is fine.
        let a = analyze("SELECT * FROM items;");
        assert!(a.risk.valid);
        assert!(!a.risk.multiple_queries);
    }

    #[test]
    fn unions_and_joins_are_counted() {
        let a = analyze("SELECT a FROM t1 UNION SELECT a FROM t2 UNION ALL SELECT a FROM t3");
        assert_eq!(1, a.risk.union_statements);
        assert_eq!(1, a.risk.union_all_statements);

        let a = analyze(
            "SELECT * FROM t1 JOIN t2 ON t1.id = t2.id CROSS JOIN t3 LEFT OUTER JOIN t4 ON 1",
        );
        assert_eq!(3, a.risk.join_statements);
        assert_eq!(1, a.risk.cross_join_statements);
    }

    #[test]
    fn benchmark_is_denial_of_service_shaped() {
        let a = analyze("SELECT BENCHMARK(5000000, MD5('x'))");
        assert!(a.risk.valid);
        assert_eq!(1, a.risk.benchmark_statements);
    }

    #[test]
    fn fingerprinting_functions() {
        let a = analyze("SELECT version(), database()");
        assert_eq!(2, a.risk.fingerprinting_statements);

        let a = analyze("SELECT user()");
        assert_eq!(1, a.risk.user_statements);
    }

    #[test]
    fn information_schema_is_flagged() {
        let a = analyze("SELECT table_name FROM information_schema.tables");
        assert!(a.risk.information_schema);
    }

    #[test]
    fn in_list_in_where() {
        let a = analyze("UPDATE accounts SET bal=0 WHERE 1 IN (1)");
        assert!(a.risk.valid);
        assert_eq!(QueryType::Update, a.risk.query_type);
        assert!(a.risk.always_true);
        assert_eq!(1, a.risk.always_true_conditionals);
    }

    #[test]
    fn order_by_number_flags() {
        let a = analyze("SELECT * FROM t ORDER BY 1");
        assert!(a.risk.order_by_number);
        let a = analyze("SELECT * FROM t ORDER BY name");
        assert!(!a.risk.order_by_number);
    }

    #[test]
    fn like_patterns_feed_dos_counters() {
        let a = analyze("SELECT * FROM t WHERE name LIKE '%admin%'");
        assert_eq!(1, a.risk.slow_regexes);
        assert_eq!(7, a.risk.regex_length);

        // Tautological pattern makes the WHERE always true.
        let a = analyze("SELECT * FROM t WHERE name LIKE '%'");
        assert!(a.risk.always_true);
    }

    #[test]
    fn hex_in_string_context() {
        let a = analyze("SELECT * FROM t WHERE name = 0x616263");
        assert_eq!(0, a.risk.hex_strings); // compared with a column, not a string

        let a = analyze("SELECT * FROM t WHERE 'abc' = 0x616263");
        assert_eq!(1, a.risk.hex_strings);

        let a = analyze("SELECT * FROM t WHERE name LIKE 0x25");
        assert_eq!(1, a.risk.hex_strings);
    }

    #[test]
    fn global_variables_count() {
        let a = analyze("SELECT @@version");
        assert_eq!(1, a.risk.global_variables);
    }

    #[test]
    fn transaction_statements() {
        for sql in ["BEGIN", "BEGIN WORK", "COMMIT", "ROLLBACK", "START TRANSACTION"] {
            let a = analyze(sql);
            assert!(a.risk.valid, "{sql}");
            assert_eq!(QueryType::Transaction, a.risk.query_type, "{sql}");
        }
    }

    #[test]
    fn misc_statement_types() {
        assert_eq!(QueryType::Set, analyze("SET NAMES utf8").risk.query_type);
        assert_eq!(QueryType::Set, analyze("SET autocommit = 1").risk.query_type);
        assert_eq!(QueryType::Show, analyze("SHOW TABLES").risk.query_type);
        assert_eq!(
            QueryType::Describe,
            analyze("DESCRIBE items").risk.query_type
        );
        assert_eq!(
            QueryType::Explain,
            analyze("EXPLAIN SELECT * FROM items").risk.query_type
        );
        assert_eq!(
            QueryType::Lock,
            analyze("LOCK TABLES items READ").risk.query_type
        );
        assert_eq!(QueryType::Lock, analyze("UNLOCK TABLES").risk.query_type);
        assert_eq!(QueryType::Use, analyze("USE shop").risk.query_type);
    }

    #[test]
    fn subselects_parse() {
        let a = analyze("SELECT * FROM users WHERE id IN (SELECT user_id FROM banned)");
        assert!(a.risk.valid);
        // Subselect membership is unknowable, so not always true.
        assert!(!a.risk.always_true);
    }

    #[test]
    fn garbage_is_invalid() {
        let a = analyze("DANCE FOR ME MYSQL");
        assert!(!a.risk.valid);
        assert_eq!(QueryType::Unknown, a.risk.query_type);

        let a = analyze("");
        assert!(!a.risk.valid);
    }

    #[test]
    fn lex_failure_keeps_counters() {
        let a = analyze("SELECT /* unterminated FROM users");
        assert!(!a.risk.valid);
        assert_eq!(1, a.risk.multi_line_comments);
    }

    #[test]
    fn format_query_normalises_whitespace() {
        assert_eq!(
            "SELECT * FROM t",
            format_query("SELECT\t*\n   FROM    t")
        );
    }

    #[test]
    fn insert_variants() {
        for sql in [
            "INSERT INTO t VALUES (1, 'a')",
            "INSERT INTO t (a, b) VALUES (1, 'a'), (2, 'b')",
            "INSERT INTO t SET a = 1, b = 'x'",
            "INSERT INTO t (a) SELECT id FROM u",
            "INSERT IGNORE INTO t VALUES (1)",
        ] {
            let a = analyze(sql);
            assert!(a.risk.valid, "{sql}");
            assert_eq!(QueryType::Insert, a.risk.query_type, "{sql}");
        }
    }

    #[test]
    fn sensitive_tables_counted() {
        let a = analyze("SELECT * FROM admin_settings");
        assert_eq!(1, a.risk.sensitive_tables);
    }
}
