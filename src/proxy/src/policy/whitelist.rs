use crate::analysis::analyze_query;
use crate::analysis::hash::QueryHash;
use crate::analysis::risk::QueryRisk;
use crate::policy::sensitive::SensitiveNames;
use crate::policy::PolicyError;

use hashbrown::HashSet;
use std::path::Path;
use tracing::warn;

/// Two exact-match exemption sets, loaded once at startup.
///
/// The parse whitelist lists queries the grammar is known not to handle but
/// which should be forwarded anyway; the block whitelist lists queries that
/// trip the classifier but are legitimate. Both key on the structural hash,
/// and the block list additionally on the full risk vector so that a
/// colliding-but-riskier variant of a whitelisted query is still caught.
#[derive(Debug, Default)]
pub struct QueryWhitelist {
    parse_exempt: HashSet<QueryHash>,
    block_exempt: HashSet<(QueryHash, QueryRisk)>,
}

impl QueryWhitelist {
    pub fn empty() -> Self {
        QueryWhitelist::default()
    }

    pub fn load(
        parse_file: Option<&Path>,
        block_file: Option<&Path>,
        sensitive: &SensitiveNames,
    ) -> Result<Self, PolicyError> {
        let mut whitelist = QueryWhitelist::default();

        if let Some(path) = parse_file {
            for (query, line) in read_queries(path)? {
                let analysis = analyze_query(&query, sensitive);
                if analysis.risk.valid {
                    warn!(
                        "query in fail-to-parse whitelist {} on line {line} was \
                         successfully parsed",
                        path.display()
                    );
                }
                whitelist.parse_exempt.insert(analysis.hash);
            }
        }

        if let Some(path) = block_file {
            for (query, line) in read_queries(path)? {
                let analysis = analyze_query(&query, sensitive);
                if !analysis.risk.valid {
                    warn!(
                        "query in allowed whitelist {} on line {line} could not be parsed",
                        path.display()
                    );
                    continue;
                }
                whitelist
                    .block_exempt
                    .insert((analysis.hash, analysis.risk));
            }
        }

        Ok(whitelist)
    }

    pub fn is_parse_whitelisted(&self, hash: &QueryHash) -> bool {
        self.parse_exempt.contains(hash)
    }

    pub fn is_block_whitelisted(&self, hash: &QueryHash, risk: &QueryRisk) -> bool {
        // Equality on the pair is field-by-field on the risk vector and on
        // (hash value, token count).
        self.block_exempt.contains(&(*hash, risk.clone()))
    }
}

/// Line-oriented whitelist file: one complete query per line, blank lines
/// and `#` comments skipped. Returns (query, line number) pairs.
fn read_queries(path: &Path) -> Result<Vec<(String, usize)>, PolicyError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut queries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        queries.push((line.to_string(), index + 1));
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_of(sql: &str) -> (QueryHash, QueryRisk) {
        let a = analyze_query(sql, &SensitiveNames::default());
        (a.hash, a.risk)
    }

    #[test]
    fn block_whitelist_matches_literal_variants() {
        let dir = std::env::temp_dir().join("sqlshield-wl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("allowed.txt");
        std::fs::write(
            &path,
            "# legitimate admin query\n\nSELECT * FROM users WHERE name = 'x' OR 1=1\n",
        )
        .unwrap();

        let whitelist =
            QueryWhitelist::load(None, Some(&path), &SensitiveNames::default()).unwrap();

        // Same structure, different literals: still whitelisted.
        let (hash, risk) = analysis_of("SELECT * FROM users WHERE name = 'other' OR 1=1");
        assert!(whitelist.is_block_whitelisted(&hash, &risk));

        // Different structure: not whitelisted.
        let (hash, risk) = analysis_of("SELECT * FROM users WHERE name = 'x' OR 1=1 OR 2=2");
        assert!(!whitelist.is_block_whitelisted(&hash, &risk));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn parse_whitelist_matches_unparseable_queries() {
        let dir = std::env::temp_dir().join("sqlshield-wl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("failed.txt");
        std::fs::write(&path, "GRANT ALL ON shop TO admin\n").unwrap();

        let whitelist =
            QueryWhitelist::load(Some(&path), None, &SensitiveNames::default()).unwrap();

        let (hash, _) = analysis_of("GRANT ALL ON shop TO admin");
        assert!(whitelist.is_parse_whitelisted(&hash));

        let (hash, _) = analysis_of("REVOKE ALL ON shop FROM admin");
        assert!(!whitelist.is_parse_whitelisted(&hash));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/whitelist.txt");
        assert!(QueryWhitelist::load(Some(missing), None, &SensitiveNames::default()).is_err());
    }

    #[test]
    fn empty_whitelist_matches_nothing() {
        let whitelist = QueryWhitelist::empty();
        let (hash, risk) = analysis_of("SELECT 1");
        assert!(!whitelist.is_parse_whitelisted(&hash));
        assert!(!whitelist.is_block_whitelisted(&hash, &risk));
    }
}
