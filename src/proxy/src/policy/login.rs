use crate::analysis::text::mysql_pattern_to_regex;

use hashbrown::HashMap;
use regex::Regex;
use tracing::warn;

/// The username/host pairs the protected server itself would accept,
/// read once at startup from its `mysql.user` table. Host columns are
/// MySQL patterns (`%.example.com`) and become anchored regexes.
///
/// An empty filter permits every login: if the permission probe failed, the
/// server's own authentication is still behind us.
#[derive(Debug, Default)]
pub struct LoginFilter {
    user_hosts: HashMap<String, Vec<Regex>>,
}

impl LoginFilter {
    pub fn empty() -> Self {
        LoginFilter::default()
    }

    pub fn is_empty(&self) -> bool {
        self.user_hosts.is_empty()
    }

    pub fn insert(&mut self, user: &str, host_pattern: &str) {
        let Some(regex) = mysql_pattern_to_regex(host_pattern) else {
            warn!("ignoring unusable host pattern {host_pattern:?} for user {user:?}");
            return;
        };
        let hosts = self.user_hosts.entry(user.to_string()).or_default();
        hosts.push(regex);

        // MySQL treats localhost and 127.0.0.1 as distinct rows; a grant
        // for one should admit the other here and let the server sort it
        // out.
        if host_pattern == "localhost" {
            if let Some(loopback) = mysql_pattern_to_regex("127.0.0.1") {
                hosts.push(loopback);
            }
        }
    }

    pub fn permits(&self, user: &str, host: &str) -> bool {
        if self.user_hosts.is_empty() {
            return true;
        }
        let Some(hosts) = self.user_hosts.get(user) else {
            return false;
        };
        hosts.iter().any(|pattern| pattern.is_match(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_permits_everyone() {
        let filter = LoginFilter::empty();
        assert!(filter.permits("anyone", "anywhere.example.com"));
    }

    #[test]
    fn exact_and_wildcard_hosts() {
        let mut filter = LoginFilter::empty();
        filter.insert("app", "10.0.0.5");
        filter.insert("admin", "%.corp.example.com");

        assert!(filter.permits("app", "10.0.0.5"));
        assert!(!filter.permits("app", "10.0.0.6"));
        assert!(filter.permits("admin", "jump.corp.example.com"));
        assert!(!filter.permits("admin", "evil.example.org"));
        assert!(!filter.permits("nobody", "10.0.0.5"));
    }

    #[test]
    fn localhost_also_admits_loopback() {
        let mut filter = LoginFilter::empty();
        filter.insert("root", "localhost");
        assert!(filter.permits("root", "localhost"));
        assert!(filter.permits("root", "127.0.0.1"));
        assert!(!filter.permits("root", "192.168.0.1"));
    }

    #[test]
    fn host_pattern_dots_are_literal() {
        let mut filter = LoginFilter::empty();
        filter.insert("app", "10.0.0.5");
        // The dot must not act as a regex wildcard.
        assert!(!filter.permits("app", "10a0b0c5"));
    }
}
