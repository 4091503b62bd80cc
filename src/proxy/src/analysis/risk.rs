use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// The statement class a query opens with. Set exactly once per parse and
/// used both for classifier gating and for choosing the shape of a
/// synthetic reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QueryType {
    #[default]
    Unknown = 0,
    Select,
    Insert,
    Update,
    Delete,
    Transaction,
    Set,
    Explain,
    Show,
    Describe,
    Lock,
    Use,
}

impl QueryType {
    pub fn from_u8(value: u8) -> QueryType {
        match value {
            1 => QueryType::Select,
            2 => QueryType::Insert,
            3 => QueryType::Update,
            4 => QueryType::Delete,
            5 => QueryType::Transaction,
            6 => QueryType::Set,
            7 => QueryType::Explain,
            8 => QueryType::Show,
            9 => QueryType::Describe,
            10 => QueryType::Lock,
            11 => QueryType::Use,
            _ => QueryType::Unknown,
        }
    }
}

/// Whether a query compared a password-like field against an empty value.
/// `Empty` outranks `NotEmpty` outranks `NotUsed` when merging observations
/// from different conjuncts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EmptyPassword {
    #[default]
    NotUsed,
    NotEmpty,
    Empty,
}

/// The fixed vector of syntactic risk features accumulated by the lexer and
/// parser for one query. This is the single output of analysis and the
/// single input to classification; equality and hashing are field-by-field
/// (the block whitelist keys on it).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRisk {
    pub query_type: QueryType,
    pub multi_line_comments: u16,
    pub hash_comments: u16,
    pub dash_dash_comments: u16,
    pub mysql_comments: u16,
    pub mysql_versioned_comments: u16,
    pub sensitive_tables: u16,
    pub or_statements: u16,
    pub union_statements: u16,
    pub union_all_statements: u16,
    pub brute_force_commands: u16,
    pub if_statements: u16,
    pub hex_strings: u16,
    pub benchmark_statements: u16,
    pub user_statements: u16,
    pub fingerprinting_statements: u16,
    pub mysql_string_concat: u16,
    pub string_manipulation_statements: u16,
    pub always_true_conditionals: u16,
    pub commented_conditionals: u16,
    pub commented_quotes: u16,
    pub global_variables: u16,
    pub join_statements: u16,
    pub cross_join_statements: u16,
    pub regex_length: u16,
    pub slow_regexes: u16,
    pub empty_password: EmptyPassword,
    pub multiple_queries: bool,
    pub order_by_number: bool,
    pub always_true: bool,
    pub information_schema: bool,
    pub valid: bool,
    pub user_table: bool,
}

impl Default for QueryRisk {
    fn default() -> Self {
        QueryRisk {
            query_type: QueryType::Unknown,
            multi_line_comments: 0,
            hash_comments: 0,
            dash_dash_comments: 0,
            mysql_comments: 0,
            mysql_versioned_comments: 0,
            sensitive_tables: 0,
            or_statements: 0,
            union_statements: 0,
            union_all_statements: 0,
            brute_force_commands: 0,
            if_statements: 0,
            hex_strings: 0,
            benchmark_statements: 0,
            user_statements: 0,
            fingerprinting_statements: 0,
            mysql_string_concat: 0,
            string_manipulation_statements: 0,
            always_true_conditionals: 0,
            commented_conditionals: 0,
            commented_quotes: 0,
            global_variables: 0,
            join_statements: 0,
            cross_join_statements: 0,
            regex_length: 0,
            slow_regexes: 0,
            empty_password: EmptyPassword::NotUsed,
            multiple_queries: false,
            order_by_number: false,
            // A query without a WHERE clause touches every row, which is the
            // "always true" condition as far as the classifier cares.
            always_true: true,
            information_schema: false,
            valid: true,
            user_table: false,
        }
    }
}

// These lists were taken from GreenSQL, the MySQL manual, and "SQL Injection
// Attacks and Defense" by Justin Clarke.
fn sensitive_tables_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("(?i)(customer|member|order|admin|user|permission|session)").unwrap()
    })
}

fn brute_force_commands_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(?i)^(mid|substr|substring|load_file|char)$").unwrap())
}

fn user_statements_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(?i)^(current_user|session_user|system_user|user)$").unwrap())
}

fn fingerprinting_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("(?i)^(schema|database|version|connection_id|last_insert_id|row_count)$")
            .unwrap()
    })
}

fn string_manipulation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("(?i)^(concat|concatws|char|insert|hex|mid|replace|reverse|substr|substring)$")
            .unwrap()
    })
}

fn information_schema_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(?i)^(information_schema|mysql)$").unwrap())
}

fn user_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(?i)(user|customer|member)").unwrap())
}

impl QueryRisk {
    /// Checks a table identifier for risky names.
    pub fn check_table(&mut self, table: &str) {
        if sensitive_tables_regex().is_match(table) {
            self.sensitive_tables += 1;
        }
        if user_table_regex().is_match(table) {
            self.user_table = true;
        }
    }

    /// Checks a database identifier for the schema-description databases.
    pub fn check_database(&mut self, database: &str) {
        if information_schema_regex().is_match(database) {
            self.information_schema = true;
        }
    }

    /// Classifies a called function into the risk buckets. The buckets after
    /// brute force are mutually exclusive; the first match wins.
    pub fn check_function(&mut self, function: &str) {
        if brute_force_commands_regex().is_match(function) {
            self.brute_force_commands += 1;
        }

        if string_manipulation_regex().is_match(function) {
            self.string_manipulation_statements += 1;
        } else if user_statements_regex().is_match(function) {
            self.user_statements += 1;
        } else if fingerprinting_regex().is_match(function) {
            self.fingerprinting_statements += 1;
        } else if function.eq_ignore_ascii_case("benchmark") {
            self.benchmark_statements += 1;
        } else if function.eq_ignore_ascii_case("if") {
            self.if_statements += 1;
        }
    }

    /// Checks a LIKE pattern for denial-of-service shapes.
    pub fn check_like_pattern(&mut self, pattern: &str) {
        if self.regex_length < pattern.len() as u16 {
            self.regex_length = pattern.len() as u16;
        }
        // Empty patterns or a bare '%' are not a problem.
        if pattern.len() > 1 && pattern.starts_with('%') {
            self.slow_regexes += 1;
        }
    }

    /// Merges a password observation; an empty password is the riskiest
    /// state and is never downgraded.
    pub fn update_password_risk(&mut self, observed: EmptyPassword) {
        self.empty_password = match (self.empty_password, observed) {
            (EmptyPassword::Empty, _) => EmptyPassword::Empty,
            (_, EmptyPassword::Empty) => EmptyPassword::Empty,
            (EmptyPassword::NotEmpty, _) => EmptyPassword::NotEmpty,
            (_, EmptyPassword::NotEmpty) => EmptyPassword::NotEmpty,
            _ => EmptyPassword::NotUsed,
        };
    }
}

impl fmt::Display for QueryRisk {
    /// Prints only the fields that carry any risk, for log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = [
            ("multiLineComments", self.multi_line_comments),
            ("hashComments", self.hash_comments),
            ("dashDashComments", self.dash_dash_comments),
            ("mySqlComments", self.mysql_comments),
            ("mySqlVersionedComments", self.mysql_versioned_comments),
            ("sensitiveTables", self.sensitive_tables),
            ("orStatements", self.or_statements),
            ("unionStatements", self.union_statements),
            ("unionAllStatements", self.union_all_statements),
            ("bruteForceCommands", self.brute_force_commands),
            ("ifStatements", self.if_statements),
            ("hexStrings", self.hex_strings),
            ("benchmarkStatements", self.benchmark_statements),
            ("userStatements", self.user_statements),
            ("fingerprintingStatements", self.fingerprinting_statements),
            ("mySqlStringConcat", self.mysql_string_concat),
            (
                "stringManipulationStatements",
                self.string_manipulation_statements,
            ),
            ("alwaysTrueConditionals", self.always_true_conditionals),
            ("commentedConditionals", self.commented_conditionals),
            ("commentedQuotes", self.commented_quotes),
            ("globalVariables", self.global_variables),
            ("joinStatements", self.join_statements),
            ("crossJoinStatements", self.cross_join_statements),
            ("regexLength", self.regex_length),
            ("slowRegexes", self.slow_regexes),
        ];
        for (name, value) in counters {
            if value > 0 {
                writeln!(f, "{name}: {value}")?;
            }
        }

        match self.empty_password {
            EmptyPassword::Empty => writeln!(f, "Password: empty")?,
            EmptyPassword::NotEmpty => writeln!(f, "Password: not empty")?,
            EmptyPassword::NotUsed => {}
        }

        let flags = [
            ("multipleQueries", self.multiple_queries),
            ("orderByNumber", self.order_by_number),
            ("alwaysTrue", self.always_true),
            ("informationSchema", self.information_schema),
            ("userTable", self.user_table),
        ];
        for (name, value) in flags {
            if value {
                writeln!(f, "{name}: true")?;
            }
        }
        if !self.valid {
            writeln!(f, "valid: false")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_buckets_are_exclusive_after_brute_force() {
        // substring is both a brute-force and a string-manipulation command.
        let mut qr = QueryRisk::default();
        qr.check_function("SUBSTRING");
        assert_eq!(1, qr.brute_force_commands);
        assert_eq!(1, qr.string_manipulation_statements);
        assert_eq!(0, qr.user_statements);

        let mut qr = QueryRisk::default();
        qr.check_function("version");
        assert_eq!(1, qr.fingerprinting_statements);
        assert_eq!(0, qr.string_manipulation_statements);

        let mut qr = QueryRisk::default();
        qr.check_function("BENCHMARK");
        assert_eq!(1, qr.benchmark_statements);

        let mut qr = QueryRisk::default();
        qr.check_function("if");
        assert_eq!(1, qr.if_statements);
    }

    #[test]
    fn table_checks() {
        let mut qr = QueryRisk::default();
        qr.check_table("phpbb_users");
        assert_eq!(1, qr.sensitive_tables);
        assert!(qr.user_table);

        let mut qr = QueryRisk::default();
        qr.check_table("items");
        assert_eq!(0, qr.sensitive_tables);
        assert!(!qr.user_table);
    }

    #[test]
    fn database_checks() {
        let mut qr = QueryRisk::default();
        qr.check_database("information_schema");
        assert!(qr.information_schema);
        qr.check_database("shop");
        assert!(qr.information_schema);
    }

    #[test]
    fn like_pattern_checks() {
        let mut qr = QueryRisk::default();
        qr.check_like_pattern("%admin%");
        assert_eq!(7, qr.regex_length);
        assert_eq!(1, qr.slow_regexes);

        // A bare '%' is harmless.
        let mut qr = QueryRisk::default();
        qr.check_like_pattern("%");
        assert_eq!(0, qr.slow_regexes);
    }

    #[test]
    fn password_risk_never_downgrades() {
        let mut qr = QueryRisk::default();
        qr.update_password_risk(EmptyPassword::NotEmpty);
        assert_eq!(EmptyPassword::NotEmpty, qr.empty_password);
        qr.update_password_risk(EmptyPassword::Empty);
        assert_eq!(EmptyPassword::Empty, qr.empty_password);
        qr.update_password_risk(EmptyPassword::NotEmpty);
        assert_eq!(EmptyPassword::Empty, qr.empty_password);
        qr.update_password_risk(EmptyPassword::NotUsed);
        assert_eq!(EmptyPassword::Empty, qr.empty_password);
    }
}
