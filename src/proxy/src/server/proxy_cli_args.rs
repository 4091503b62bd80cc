use crate::server::{ConnectAddr, ListenAddr};

use clap::Parser;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("exactly one of --listen-port and --listen-socket must be given")]
    AmbiguousListen,
    #[error("exactly one of --connect-port and --connect-socket must be given")]
    AmbiguousConnect,
    #[error("port {0} is out of range")]
    BadPort(u32),
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("config file line {line}: {message}")]
    BadLine { line: usize, message: String },
}

/// Command-line surface of the firewall binary. Options may equally come
/// from a `key = value` config file; values given on the command line win.
#[derive(Parser, Debug, Clone, Default)]
#[clap(
    name = "sqlshield",
    version = "0.1.0",
    about = "Transparent MySQL firewall that detects and blocks SQL injection attacks."
)]
pub struct FirewallArgs {
    /// TCP port to listen on for client connections.
    #[clap(short = 'l', long, value_name = "PORT")]
    pub listen_port: Option<u16>,
    /// Unix domain socket to listen on instead of a TCP port.
    #[clap(long, value_name = "PATH")]
    pub listen_socket: Option<PathBuf>,
    /// TCP port of the MySQL server to protect.
    #[clap(short = 'c', long, value_name = "PORT")]
    pub connect_port: Option<u16>,
    /// Unix domain socket of the MySQL server to protect.
    #[clap(short = 's', long, value_name = "PATH")]
    pub connect_socket: Option<PathBuf>,
    /// Host of the MySQL server, used with --connect-port.
    #[clap(long, value_name = "HOST")]
    pub host: Option<String>,
    /// Username for reading the server's login permissions at startup.
    #[clap(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,
    /// Password for reading the server's login permissions at startup.
    #[clap(short = 'p', long, value_name = "PASSWORD")]
    pub password: Option<String>,
    /// Additional options, one `key = value` per line.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Queries that are known not to parse but should be forwarded anyway.
    #[clap(long, value_name = "FILE")]
    pub parse_whitelist: Option<PathBuf>,
    /// Queries that trip the classifier but should be forwarded anyway.
    #[clap(long, value_name = "FILE")]
    pub block_whitelist: Option<PathBuf>,
    /// Directory holding the six Bayesian network files.
    #[clap(long, value_name = "DIR")]
    pub network_dir: Option<PathBuf>,
    /// Field names matching this regex are treated as password fields.
    #[clap(long, value_name = "REGEX")]
    pub password_regex: Option<String>,
    /// Field names containing this word are treated as password fields.
    #[clap(long, value_name = "WORD")]
    pub password_substring: Option<String>,
    /// Table names matching this regex are treated as user tables.
    #[clap(long, value_name = "REGEX")]
    pub user_regex: Option<String>,
    /// Table names containing this word are treated as user tables.
    #[clap(long, value_name = "WORD")]
    pub user_substring: Option<String>,
    /// Raise the log level; may be repeated.
    #[clap(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Log only fatal problems.
    #[clap(short = 'q', long)]
    pub quiet: bool,
}

/// The validated pair of endpoints the proxy runs between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub listen: ListenAddr,
    pub connect: ConnectAddr,
}

impl FirewallArgs {
    /// Folds config-file entries underneath whatever the command line
    /// already set.
    pub fn merge_config_file(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.config.clone() else {
            return Ok(());
        };
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        for (index, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::BadLine {
                    line: index + 1,
                    message: format!("expected key = value, found {line:?}"),
                });
            };
            let key = key.trim();
            let value = value.trim().to_string();
            self.apply_config_entry(key, value, index + 1)?;
        }
        Ok(())
    }

    fn apply_config_entry(
        &mut self,
        key: &str,
        value: String,
        line: usize,
    ) -> Result<(), ConfigError> {
        let bad = |message: String| ConfigError::BadLine { line, message };
        let parse_port = |value: &str| -> Result<u16, ConfigError> {
            let number: u32 = value
                .parse()
                .map_err(|_| bad(format!("bad port {value:?}")))?;
            if number == 0 || number > u16::MAX as u32 {
                return Err(ConfigError::BadPort(number));
            }
            Ok(number as u16)
        };

        match key {
            "listen-port" => {
                if self.listen_port.is_none() {
                    self.listen_port = Some(parse_port(&value)?);
                }
            }
            "listen-socket" => {
                if self.listen_socket.is_none() {
                    self.listen_socket = Some(PathBuf::from(value));
                }
            }
            "connect-port" => {
                if self.connect_port.is_none() {
                    self.connect_port = Some(parse_port(&value)?);
                }
            }
            "connect-socket" => {
                if self.connect_socket.is_none() {
                    self.connect_socket = Some(PathBuf::from(value));
                }
            }
            "host" => {
                if self.host.is_none() {
                    self.host = Some(value);
                }
            }
            "user" => {
                if self.user.is_none() {
                    self.user = Some(value);
                }
            }
            "password" => {
                if self.password.is_none() {
                    self.password = Some(value);
                }
            }
            "parse-whitelist" => {
                if self.parse_whitelist.is_none() {
                    self.parse_whitelist = Some(PathBuf::from(value));
                }
            }
            "block-whitelist" => {
                if self.block_whitelist.is_none() {
                    self.block_whitelist = Some(PathBuf::from(value));
                }
            }
            "network-dir" => {
                if self.network_dir.is_none() {
                    self.network_dir = Some(PathBuf::from(value));
                }
            }
            "password-regex" => {
                if self.password_regex.is_none() {
                    self.password_regex = Some(value);
                }
            }
            "password-substring" => {
                if self.password_substring.is_none() {
                    self.password_substring = Some(value);
                }
            }
            "user-regex" => {
                if self.user_regex.is_none() {
                    self.user_regex = Some(value);
                }
            }
            "user-substring" => {
                if self.user_substring.is_none() {
                    self.user_substring = Some(value);
                }
            }
            "quiet" => {
                self.quiet = self.quiet || value == "true" || value == "1";
            }
            other => {
                return Err(bad(format!("unknown option {other:?}")));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<Endpoints, ConfigError> {
        let listen = match (self.listen_port, &self.listen_socket) {
            (Some(port), None) => {
                if port == 0 {
                    return Err(ConfigError::BadPort(0));
                }
                ListenAddr::Tcp(port)
            }
            (None, Some(path)) => ListenAddr::Unix(path.clone()),
            _ => return Err(ConfigError::AmbiguousListen),
        };
        let connect = match (self.connect_port, &self.connect_socket) {
            (Some(port), None) => {
                if port == 0 {
                    return Err(ConfigError::BadPort(0));
                }
                ConnectAddr::Tcp {
                    host: self
                        .host
                        .clone()
                        .unwrap_or_else(|| "127.0.0.1".to_string()),
                    port,
                }
            }
            (None, Some(path)) => ConnectAddr::Unix(path.clone()),
            _ => return Err(ConfigError::AmbiguousConnect),
        };
        Ok(Endpoints { listen, connect })
    }

    pub fn network_dir(&self) -> &Path {
        self.network_dir
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
    }
}
