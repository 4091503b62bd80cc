pub mod blocker;
pub mod guard;
pub mod login_check;
pub mod proxy_cli_args;
pub mod session;

use crate::analysis::risk::QueryType;
use crate::analysis::{analyze_query, format_query};
use crate::classify::{ClassifierVerdict, QueryClassifier};
use crate::policy::login::LoginFilter;
use crate::policy::sensitive::SensitiveNames;
use crate::policy::whitelist::QueryWhitelist;

use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Where the firewall accepts client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(u16),
    Unix(PathBuf),
}

/// Where the protected MySQL server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAddr {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens a fresh connection to the protected server for one session.
pub async fn connect_to_server(addr: &ConnectAddr) -> io::Result<(BoxedReader, BoxedWriter)> {
    match addr {
        ConnectAddr::Tcp { host, port } => {
            let stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
        ConnectAddr::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
    }
}

/// What the guard half should do with a fully assembled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAction {
    Forward,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDecision {
    pub action: QueryAction,
    pub query_type: QueryType,
}

/// Everything a session needs that outlives any one session: the loaded
/// classifier, the whitelists, the naming policy, and the login filter.
/// All of it is read-only once built.
pub struct FirewallContext {
    pub classifier: QueryClassifier,
    pub whitelist: QueryWhitelist,
    pub sensitive: SensitiveNames,
    pub login_filter: LoginFilter,
}

impl FirewallContext {
    /// Parse, score, and classify one query; the result says whether to
    /// forward it and what reply shape a block should take.
    ///
    /// Any internal failure comes back as a block: the forward path must
    /// never leak a query nobody understood.
    pub fn analyze(&self, sql: &str) -> QueryDecision {
        let analysis = analyze_query(sql, &self.sensitive);

        if self.whitelist.is_parse_whitelisted(&analysis.hash)
            || self
                .whitelist
                .is_block_whitelisted(&analysis.hash, &analysis.risk)
        {
            return QueryDecision {
                action: QueryAction::Forward,
                query_type: QueryType::Unknown,
            };
        }

        if !analysis.risk.valid {
            warn!("blocked invalid query '{}'", format_query(sql));
            return QueryDecision {
                action: QueryAction::Block,
                query_type: analysis.risk.query_type,
            };
        }

        let verdict = self.classifier.assess(&analysis.risk);
        self.log_suspicious(sql, &verdict);

        let action = if verdict.blocked {
            QueryAction::Block
        } else {
            QueryAction::Forward
        };
        QueryDecision {
            action,
            query_type: analysis.risk.query_type,
        }
    }

    fn log_suspicious(&self, sql: &str, verdict: &ClassifierVerdict) {
        let mut formatted: Option<String> = None;
        for assessment in &verdict.assessments {
            if assessment.probability >= self.classifier.log_threshold() {
                let query = formatted.get_or_insert_with(|| format_query(sql));
                warn!(
                    probability = assessment.probability,
                    attack = assessment.attack.as_ref(),
                    "suspicious query '{query}'"
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classify::test_support::engine_with_attack_prior;

    pub(crate) fn context_with_prior(prior: f64) -> FirewallContext {
        FirewallContext {
            classifier: QueryClassifier::new(engine_with_attack_prior(prior)),
            whitelist: QueryWhitelist::empty(),
            sensitive: SensitiveNames::default(),
            login_filter: LoginFilter::empty(),
        }
    }

    #[test]
    fn clean_select_forwards_under_permissive_networks() {
        let ctx = context_with_prior(0.05);
        let decision = ctx.analyze("SELECT * FROM items WHERE id = 5");
        assert_eq!(QueryAction::Forward, decision.action);
        assert_eq!(QueryType::Select, decision.query_type);
    }

    #[test]
    fn everything_blocks_under_paranoid_networks() {
        let ctx = context_with_prior(0.95);
        let decision = ctx.analyze("SELECT * FROM items WHERE id = 5");
        assert_eq!(QueryAction::Block, decision.action);
    }

    #[test]
    fn invalid_queries_block_regardless() {
        let ctx = context_with_prior(0.05);
        let decision = ctx.analyze("SELECT * FROM items; DROP TABLE items");
        assert_eq!(QueryAction::Block, decision.action);
        // Failed parse never resolves a type, so the reply shape is the
        // generic error.
        assert_eq!(QueryType::Unknown, decision.query_type);
    }

    #[test]
    fn statements_with_no_networks_forward() {
        // SHOW evaluates no networks, so even paranoid networks don't fire.
        let ctx = context_with_prior(0.95);
        let decision = ctx.analyze("SHOW TABLES");
        assert_eq!(QueryAction::Forward, decision.action);
        assert_eq!(QueryType::Show, decision.query_type);
    }
}
