use crate::analysis::ast::{ArithOp, CompareOp, Expr, LogicOp, TerminalKind};
use crate::analysis::risk::{QueryRisk, QueryType};
use crate::analysis::token::{Keyword, Token, TokenKind};
use crate::policy::sensitive::SensitiveNames;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected token {found:?} at position {at}")]
    UnexpectedToken { found: String, at: usize },
    #[error("unexpected end of query")]
    UnexpectedEnd,
    #[error("multiple statements in one buffer")]
    MultipleStatements,
}

/// Recursive-descent parser over the token stream. One statement per
/// buffer; the parser fills the risk vector as it recognises constructs and
/// reduces the WHERE clause through the expression tree.
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    risk: &'a mut QueryRisk,
    sensitive: &'a SensitiveNames,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: &'a [Token],
        risk: &'a mut QueryRisk,
        sensitive: &'a SensitiveNames,
    ) -> Self {
        Parser {
            tokens,
            pos: 0,
            risk,
            sensitive,
        }
    }

    // ---- token plumbing ----

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::UnexpectedToken {
                found: token.text.clone(),
                at: self.pos,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn accept_keyword(&mut self, kw: Keyword) -> bool {
        self.accept(TokenKind::Keyword(kw))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.accept(kind) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), ParseError> {
        self.expect(TokenKind::Keyword(kw))
    }

    /// An identifier, or a keyword MySQL lets stand in for one.
    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(text)
            }
            Some(token) => match token.keyword() {
                Some(kw) if kw.identifier_fallback() => {
                    let text = token.text.clone();
                    self.pos += 1;
                    Ok(text)
                }
                _ => Err(self.unexpected()),
            },
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn at_identifier(&self) -> bool {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => true,
            Some(token) => token
                .keyword()
                .map(|kw| kw.identifier_fallback())
                .unwrap_or(false),
            None => false,
        }
    }

    fn set_query_type(&mut self, qt: QueryType) {
        if self.risk.query_type == QueryType::Unknown {
            self.risk.query_type = qt;
        }
    }

    // ---- statements ----

    pub fn parse_statement_buffer(&mut self) -> Result<(), ParseError> {
        self.parse_statement()?;

        // A trailing semicolon (or several) is legal; a second non-empty
        // statement is not.
        while self.accept(TokenKind::Semicolon) {}
        if self.peek().is_some() {
            self.risk.multiple_queries = true;
            return Err(ParseError::MultipleStatements);
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), ParseError> {
        let kw = self
            .peek()
            .and_then(|t| t.keyword())
            .ok_or_else(|| self.unexpected())?;
        match kw {
            Keyword::Select => self.parse_select_statement(),
            Keyword::Insert => self.parse_insert_statement(),
            Keyword::Update => self.parse_update_statement(),
            Keyword::Delete => self.parse_delete_statement(),
            Keyword::Begin | Keyword::Commit | Keyword::Rollback | Keyword::Start => {
                self.parse_transaction_statement()
            }
            Keyword::Set => self.parse_set_statement(),
            Keyword::Show => self.parse_show_statement(),
            Keyword::Describe | Keyword::Desc => self.parse_describe_statement(),
            Keyword::Explain => self.parse_explain_statement(),
            Keyword::Lock | Keyword::Unlock => self.parse_lock_statement(),
            Keyword::Use => self.parse_use_statement(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_select_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Select);
        self.parse_select_core()?;
        while self.accept_keyword(Keyword::Union) {
            if self.accept_keyword(Keyword::All) {
                self.risk.union_all_statements += 1;
            } else {
                self.risk.union_statements += 1;
                self.accept_keyword(Keyword::Distinct);
            }
            if self.peek_kind() == Some(TokenKind::LParen) {
                self.expect(TokenKind::LParen)?;
                self.parse_select_core()?;
                self.expect(TokenKind::RParen)?;
            } else {
                self.parse_select_core()?;
            }
        }
        Ok(())
    }

    /// One SELECT body, starting at the SELECT keyword. Used for top-level
    /// selects, UNION branches, and subselects alike; only the top level
    /// sets the query type.
    fn parse_select_core(&mut self) -> Result<(), ParseError> {
        self.expect_keyword(Keyword::Select)?;
        loop {
            let accepted = self.accept_keyword(Keyword::All)
                || self.accept_keyword(Keyword::Distinct)
                || self.accept_keyword(Keyword::Distinctrow);
            if !accepted {
                break;
            }
        }

        self.parse_select_item()?;
        while self.accept(TokenKind::Comma) {
            self.parse_select_item()?;
        }

        if self.accept_keyword(Keyword::From) {
            self.parse_table_references()?;

            if self.accept_keyword(Keyword::Where) {
                self.parse_where_clause()?;
            }
            if self.accept_keyword(Keyword::Group) {
                self.expect_keyword(Keyword::By)?;
                self.parse_expression()?;
                while self.accept(TokenKind::Comma) {
                    self.parse_expression()?;
                }
                if self.accept_keyword(Keyword::Having) {
                    self.parse_expression()?;
                }
            }
            if self.accept_keyword(Keyword::Order) {
                self.expect_keyword(Keyword::By)?;
                self.parse_order_list()?;
            }
            if self.accept_keyword(Keyword::Limit) {
                self.parse_limit_clause()?;
            }
        } else if self.accept_keyword(Keyword::Limit) {
            self.parse_limit_clause()?;
        }
        Ok(())
    }

    fn parse_select_item(&mut self) -> Result<(), ParseError> {
        if self.accept(TokenKind::Star) {
            return Ok(());
        }
        self.parse_expression()?;
        if self.accept_keyword(Keyword::As) {
            self.expect_identifier()?;
        } else if self.at_identifier() {
            self.expect_identifier()?;
        }
        Ok(())
    }

    fn parse_where_clause(&mut self) -> Result<(), ParseError> {
        let tree = self.parse_expression()?;
        self.risk.always_true = tree.is_always_true();
        self.risk.always_true_conditionals += tree.count_always_true_leaves();
        let password = tree.password_risk(self.sensitive);
        self.risk.update_password_risk(password);
        Ok(())
    }

    // ---- table references ----

    fn parse_table_references(&mut self) -> Result<(), ParseError> {
        self.parse_table_reference()?;
        while self.accept(TokenKind::Comma) {
            self.parse_table_reference()?;
        }
        Ok(())
    }

    fn parse_table_reference(&mut self) -> Result<(), ParseError> {
        self.parse_table_factor()?;
        loop {
            let mut cross = false;
            let joined = if self.accept_keyword(Keyword::Join) {
                true
            } else if self.accept_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                true
            } else if self.accept_keyword(Keyword::Cross) {
                self.expect_keyword(Keyword::Join)?;
                cross = true;
                true
            } else if self.accept_keyword(Keyword::StraightJoin) {
                true
            } else if self.accept_keyword(Keyword::Natural) {
                if self.accept_keyword(Keyword::Left) || self.accept_keyword(Keyword::Right) {
                    self.accept_keyword(Keyword::Outer);
                }
                self.expect_keyword(Keyword::Join)?;
                true
            } else if self.accept_keyword(Keyword::Left) || self.accept_keyword(Keyword::Right) {
                self.accept_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                true
            } else {
                false
            };
            if !joined {
                return Ok(());
            }

            self.risk.join_statements += 1;
            if cross {
                self.risk.cross_join_statements += 1;
            }

            self.parse_table_factor()?;
            if self.accept_keyword(Keyword::On) {
                self.parse_expression()?;
            } else if self.accept_keyword(Keyword::Using) {
                self.expect(TokenKind::LParen)?;
                self.expect_identifier()?;
                while self.accept(TokenKind::Comma) {
                    self.expect_identifier()?;
                }
                self.expect(TokenKind::RParen)?;
            }
        }
    }

    fn parse_table_factor(&mut self) -> Result<(), ParseError> {
        if self.accept(TokenKind::LParen) {
            if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Select)) {
                self.parse_select_core()?;
            } else {
                self.parse_table_references()?;
            }
            self.expect(TokenKind::RParen)?;
            self.parse_optional_alias()?;
            return Ok(());
        }
        self.parse_table_name()?;
        self.parse_optional_alias()?;
        Ok(())
    }

    fn parse_table_name(&mut self) -> Result<String, ParseError> {
        let first = self.expect_identifier()?;
        if self.accept(TokenKind::Dot) {
            let table = self.expect_identifier()?;
            self.risk.check_database(&first);
            self.risk.check_table(&table);
            Ok(table)
        } else {
            self.risk.check_table(&first);
            Ok(first)
        }
    }

    fn parse_optional_alias(&mut self) -> Result<(), ParseError> {
        if self.accept_keyword(Keyword::As) {
            self.expect_identifier()?;
        } else if self.at_identifier() {
            self.expect_identifier()?;
        }
        Ok(())
    }

    // ---- other statements ----

    fn parse_insert_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Insert);
        self.expect_keyword(Keyword::Insert)?;
        let _ = self.accept_keyword(Keyword::LowPriority)
            || self.accept_keyword(Keyword::Delayed)
            || self.accept_keyword(Keyword::HighPriority);
        self.accept_keyword(Keyword::Ignore);
        self.accept_keyword(Keyword::Into);
        self.parse_table_name()?;

        // Optional column list, unless the parenthesis opens a subselect.
        if self.peek_kind() == Some(TokenKind::LParen)
            && self.peek_at(1).map(|t| t.kind) != Some(TokenKind::Keyword(Keyword::Select))
        {
            self.expect(TokenKind::LParen)?;
            self.expect_identifier()?;
            while self.accept(TokenKind::Comma) {
                self.expect_identifier()?;
            }
            self.expect(TokenKind::RParen)?;
        }

        if self.accept_keyword(Keyword::Values) {
            self.parse_values_tuple()?;
            while self.accept(TokenKind::Comma) {
                self.parse_values_tuple()?;
            }
        } else if self.accept_keyword(Keyword::Set) {
            self.parse_assignment_list()?;
        } else if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Select)) {
            self.parse_select_core()?;
        } else if self.accept(TokenKind::LParen) {
            self.parse_select_core()?;
            self.expect(TokenKind::RParen)?;
        } else {
            return Err(self.unexpected());
        }

        if self.accept_keyword(Keyword::On) {
            self.expect_keyword(Keyword::Duplicate)?;
            self.expect_keyword(Keyword::Key)?;
            self.expect_keyword(Keyword::Update)?;
            self.parse_assignment_list()?;
        }
        Ok(())
    }

    fn parse_values_tuple(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::LParen)?;
        if !self.accept(TokenKind::RParen) {
            self.parse_expression()?;
            while self.accept(TokenKind::Comma) {
                self.parse_expression()?;
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(())
    }

    /// `col = expr, ...` — each assignment is also fed through the password
    /// check, so `SET password = ''` carries the same weight as the
    /// equivalent WHERE comparison.
    fn parse_assignment_list(&mut self) -> Result<(), ParseError> {
        loop {
            let column = self.parse_column_name()?;
            if !self.accept(TokenKind::Eq) && !self.accept(TokenKind::Assign) {
                return Err(self.unexpected());
            }
            let value = self.parse_expression()?;
            let comparison = Expr::Comparison {
                left: Box::new(Expr::terminal(TerminalKind::Identifier, column)),
                op: CompareOp::Eq,
                right: Box::new(value),
            };
            let password = comparison.password_risk(self.sensitive);
            self.risk.update_password_risk(password);

            if !self.accept(TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_column_name(&mut self) -> Result<String, ParseError> {
        let first = self.expect_identifier()?;
        if self.accept(TokenKind::Dot) {
            let column = self.expect_identifier()?;
            return Ok(column);
        }
        Ok(first)
    }

    fn parse_update_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Update);
        self.expect_keyword(Keyword::Update)?;
        self.accept_keyword(Keyword::LowPriority);
        self.accept_keyword(Keyword::Ignore);
        self.parse_table_references()?;
        self.expect_keyword(Keyword::Set)?;
        self.parse_assignment_list()?;
        if self.accept_keyword(Keyword::Where) {
            self.parse_where_clause()?;
        }
        if self.accept_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            self.parse_order_list()?;
        }
        if self.accept_keyword(Keyword::Limit) {
            self.parse_limit_clause()?;
        }
        Ok(())
    }

    fn parse_delete_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Delete);
        self.expect_keyword(Keyword::Delete)?;
        self.accept_keyword(Keyword::LowPriority);
        self.accept_keyword(Keyword::Quick);
        self.accept_keyword(Keyword::Ignore);
        self.expect_keyword(Keyword::From)?;
        self.parse_table_name()?;
        if self.accept_keyword(Keyword::Where) {
            self.parse_where_clause()?;
        }
        if self.accept_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            self.parse_order_list()?;
        }
        if self.accept_keyword(Keyword::Limit) {
            self.parse_limit_clause()?;
        }
        Ok(())
    }

    fn parse_transaction_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Transaction);
        if self.accept_keyword(Keyword::Begin) {
            self.accept_keyword(Keyword::Work);
        } else if self.accept_keyword(Keyword::Commit) {
            self.accept_keyword(Keyword::Work);
        } else if self.accept_keyword(Keyword::Rollback) {
            self.accept_keyword(Keyword::Work);
        } else if self.accept_keyword(Keyword::Start) {
            self.expect_keyword(Keyword::Transaction)?;
        } else {
            return Err(self.unexpected());
        }
        Ok(())
    }

    fn parse_set_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Set);
        self.expect_keyword(Keyword::Set)?;
        let _ = self.accept_keyword(Keyword::Global) || self.accept_keyword(Keyword::Session);

        if self.accept_keyword(Keyword::Names) {
            match self.peek_kind() {
                Some(TokenKind::Identifier) | Some(TokenKind::StringLiteral) => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => return Err(self.unexpected()),
            }
        }

        loop {
            match self.peek_kind() {
                Some(TokenKind::GlobalVariable) | Some(TokenKind::SessionVariable) => {
                    self.pos += 1;
                }
                _ => {
                    self.expect_identifier()?;
                }
            }
            if !self.accept(TokenKind::Eq) && !self.accept(TokenKind::Assign) {
                return Err(self.unexpected());
            }
            self.parse_expression()?;
            if !self.accept(TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    /// SHOW has dozens of subcommands, none of which carry analyzable
    /// expressions; swallow the remainder of the statement.
    fn parse_show_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Show);
        self.expect_keyword(Keyword::Show)?;
        if self.peek().is_none() {
            return Err(ParseError::UnexpectedEnd);
        }
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Semicolon {
                break;
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn parse_describe_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Describe);
        self.pos += 1; // DESCRIBE or DESC
        self.parse_table_name()?;
        if self.at_identifier() {
            self.expect_identifier()?;
        } else if self.peek_kind() == Some(TokenKind::StringLiteral) {
            self.pos += 1;
        }
        Ok(())
    }

    fn parse_explain_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Explain);
        self.expect_keyword(Keyword::Explain)?;
        match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Select)) => self.parse_select_core(),
            _ => {
                self.parse_table_name()?;
                if self.at_identifier() {
                    self.expect_identifier()?;
                }
                Ok(())
            }
        }
    }

    fn parse_lock_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Lock);
        if self.accept_keyword(Keyword::Unlock) {
            self.expect_keyword(Keyword::Tables)?;
            return Ok(());
        }
        self.expect_keyword(Keyword::Lock)?;
        self.expect_keyword(Keyword::Tables)?;
        loop {
            self.parse_table_name()?;
            self.parse_optional_alias()?;
            if self.accept_keyword(Keyword::Read) {
                self.accept_keyword(Keyword::Local);
            } else {
                self.accept_keyword(Keyword::LowPriority);
                self.expect_keyword(Keyword::Write)?;
            }
            if !self.accept(TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_use_statement(&mut self) -> Result<(), ParseError> {
        self.set_query_type(QueryType::Use);
        self.expect_keyword(Keyword::Use)?;
        let database = self.expect_identifier()?;
        self.risk.check_database(&database);
        Ok(())
    }

    // ---- ORDER BY / LIMIT ----

    fn parse_order_list(&mut self) -> Result<(), ParseError> {
        let mut first = true;
        loop {
            let key = self.parse_expression()?;
            if first {
                if let Expr::Terminal {
                    kind: TerminalKind::Integer,
                    ..
                } = key
                {
                    self.risk.order_by_number = true;
                }
                first = false;
            }
            let _ = self.accept_keyword(Keyword::Asc) || self.accept_keyword(Keyword::Desc);
            if !self.accept(TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_limit_clause(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::Integer)?;
        if self.accept(TokenKind::Comma) {
            self.expect(TokenKind::Integer)?;
        } else if self.accept_keyword(Keyword::Offset) {
            self.expect(TokenKind::Integer)?;
        }
        Ok(())
    }

    // ---- expressions ----

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expression()?;
        loop {
            let op = if self.accept_keyword(Keyword::Or) {
                self.risk.or_statements += 1;
                LogicOp::Or
            } else if self.accept_keyword(Keyword::Xor) {
                LogicOp::Xor
            } else {
                return Ok(left);
            };
            let right = self.parse_and_expression()?;
            left = Expr::BooleanLogic {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_and_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not_expression()?;
        while self.accept_keyword(Keyword::And) {
            let right = self.parse_not_expression()?;
            left = Expr::BooleanLogic {
                left: Box::new(left),
                op: LogicOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Expr, ParseError> {
        if self.accept_keyword(Keyword::Not) || self.accept(TokenKind::Bang) {
            let inner = self.parse_not_expression()?;
            return Ok(Expr::Negation(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_bit_expression()?;

        // Comparison operators.
        let compare_op = match self.peek_kind() {
            Some(TokenKind::Eq) => Some(CompareOp::Eq),
            Some(TokenKind::NotEq) => Some(CompareOp::Ne),
            Some(TokenKind::Lt) => Some(CompareOp::Lt),
            Some(TokenKind::Le) => Some(CompareOp::Le),
            Some(TokenKind::Gt) => Some(CompareOp::Gt),
            Some(TokenKind::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = compare_op {
            self.pos += 1;
            let right = self.parse_bit_expression()?;
            self.note_hex_in_string_context(&left, &right);
            return Ok(Expr::Comparison {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        // IS [NOT] NULL.
        if self.accept_keyword(Keyword::Is) {
            let negated = self.accept_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            // A reducible value is never NULL; anything else is unknowable.
            if left.results_in_value() {
                return Ok(Expr::AlwaysSomething(negated));
            }
            return Ok(Expr::Indeterminate);
        }

        let negated = self.accept_keyword(Keyword::Not);

        if self.accept_keyword(Keyword::In) {
            self.expect(TokenKind::LParen)?;
            if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Select)) {
                self.parse_select_core()?;
                self.expect(TokenKind::RParen)?;
                let subselect = Expr::InSubselect {
                    expr: Box::new(left),
                    negated,
                };
                let password = subselect.password_risk(self.sensitive);
                self.risk.update_password_risk(password);
                return Ok(subselect);
            }
            let mut members = vec![self.parse_expression()?];
            while self.accept(TokenKind::Comma) {
                members.push(self.parse_expression()?);
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                negated,
                members,
            });
        }

        if self.accept_keyword(Keyword::Between) {
            let low = self.parse_bit_expression()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.parse_bit_expression()?;
            // expr BETWEEN low AND high == expr >= low AND expr <= high.
            let range = Expr::BooleanLogic {
                left: Box::new(Expr::Comparison {
                    left: Box::new(left.clone()),
                    op: CompareOp::Ge,
                    right: Box::new(low),
                }),
                op: LogicOp::And,
                right: Box::new(Expr::Comparison {
                    left: Box::new(left),
                    op: CompareOp::Le,
                    right: Box::new(high),
                }),
            };
            if negated {
                return Ok(Expr::Negation(Box::new(range)));
            }
            return Ok(range);
        }

        if self.accept_keyword(Keyword::Like) {
            let pattern = self.parse_bit_expression()?;
            return Ok(self.build_like(left, pattern, negated));
        }

        if negated {
            return Err(self.unexpected());
        }

        if self.accept_keyword(Keyword::Sounds) {
            self.expect_keyword(Keyword::Like)?;
            let right = self.parse_bit_expression()?;
            return Ok(Expr::Comparison {
                left: Box::new(left),
                op: CompareOp::SoundsLike,
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn build_like(&mut self, subject: Expr, pattern: Expr, negated: bool) -> Expr {
        if matches!(
            subject,
            Expr::Terminal {
                kind: TerminalKind::Hex,
                ..
            }
        ) || matches!(
            pattern,
            Expr::Terminal {
                kind: TerminalKind::Hex,
                ..
            }
        ) {
            self.risk.hex_strings += 1;
        }

        if let Some(text) = pattern.value() {
            self.risk.check_like_pattern(&text);
            if crate::analysis::text::is_tautological_pattern(&text) {
                // `x LIKE '%'` holds no matter what x is.
                return Expr::AlwaysSomething(!negated);
            }
        }
        let op = if negated {
            CompareOp::NotLike
        } else {
            CompareOp::Like
        };
        Expr::Comparison {
            left: Box::new(subject),
            op,
            right: Box::new(pattern),
        }
    }

    fn note_hex_in_string_context(&mut self, left: &Expr, right: &Expr) {
        let hex = |e: &Expr| {
            matches!(
                e,
                Expr::Terminal {
                    kind: TerminalKind::Hex,
                    ..
                }
            )
        };
        let string = |e: &Expr| {
            matches!(
                e,
                Expr::Terminal {
                    kind: TerminalKind::String,
                    ..
                }
            )
        };
        if (hex(left) && string(right)) || (hex(right) && string(left)) {
            self.risk.hex_strings += 1;
        }
    }

    fn parse_bit_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bit_and()?;
        while self.accept(TokenKind::Pipe) {
            let right = self.parse_bit_and()?;
            left = binary(left, ArithOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift()?;
        while self.accept(TokenKind::Ampersand) {
            let right = self.parse_shift()?;
            left = binary(left, ArithOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::ShiftLeft) => ArithOp::ShiftLeft,
                Some(TokenKind::ShiftRight) => ArithOp::ShiftRight,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(left, op, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = binary(left, op, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bit_xor()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                Some(TokenKind::Percent) => ArithOp::Mod,
                Some(TokenKind::Keyword(Keyword::Div)) => ArithOp::IntDiv,
                Some(TokenKind::Keyword(Keyword::Mod)) => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_bit_xor()?;
            left = binary(left, op, right);
        }
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.accept(TokenKind::Caret) {
            let right = self.parse_unary()?;
            left = binary(left, ArithOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.accept(TokenKind::Minus) {
            let inner = self.parse_unary()?;
            return Ok(binary(
                Expr::terminal(TerminalKind::Integer, "0"),
                ArithOp::Sub,
                inner,
            ));
        }
        if self.accept(TokenKind::Plus) {
            return self.parse_unary();
        }
        if self.accept(TokenKind::Tilde) {
            // Bitwise complement never decides a conditional here.
            self.parse_unary()?;
            return Ok(Expr::Indeterminate);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::UnexpectedEnd);
        };
        match token.kind {
            TokenKind::Integer => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::Integer, text))
            }
            TokenKind::Float => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::Float, text))
            }
            TokenKind::HexNumber => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::Hex, text))
            }
            TokenKind::StringLiteral => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::String, text))
            }
            TokenKind::GlobalVariable => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::GlobalVariable, text))
            }
            TokenKind::SessionVariable => {
                let text = token.text.clone();
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::SessionVariable, text))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::Integer, "1"))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                Ok(Expr::terminal(TerminalKind::Integer, "0"))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.pos += 1;
                Ok(Expr::Null)
            }
            TokenKind::LParen => {
                self.pos += 1;
                if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Select)) {
                    // Scalar subselect: nothing to reduce locally.
                    self.parse_select_core()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::Indeterminate);
                }
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ if self.at_identifier() => self.parse_identifier_expression(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_identifier_expression(&mut self) -> Result<Expr, ParseError> {
        let name = self.expect_identifier()?;

        if self.accept(TokenKind::LParen) {
            self.risk.check_function(&name);
            let mut args = Vec::new();
            if !self.accept(TokenKind::RParen) {
                self.accept_keyword(Keyword::Distinct);
                loop {
                    if self.accept(TokenKind::Star) {
                        args.push(Expr::Indeterminate);
                    } else {
                        args.push(self.parse_expression()?);
                    }
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
            return Ok(Expr::Function { name, args });
        }

        // Qualified column reference: keep the column part, the password
        // check matches on the field name.
        let mut column = name;
        while self.accept(TokenKind::Dot) {
            // `t.*` in a select list.
            if self.accept(TokenKind::Star) {
                return Ok(Expr::Indeterminate);
            }
            column = self.expect_identifier()?;
        }
        Ok(Expr::terminal(TerminalKind::Identifier, column))
    }
}

fn binary(left: Expr, op: ArithOp, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}
