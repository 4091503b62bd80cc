use crate::bayes::cache::{encode_evidence, EvidenceCache};
use crate::bayes::hugin::parse_net;
use crate::bayes::join_tree::JoinTree;
use crate::bayes::network::BayesNet;
use crate::bayes::BayesError;

use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum_macros::AsRefStr;

pub const NUM_ATTACK_TYPES: usize = 6;

/// Network files are looked up under the configured directory by these
/// fixed names.
pub const NET_FILE_NAMES: [&str; NUM_ATTACK_TYPES] = [
    "dataAccess.net",
    "bypassAuthentication.net",
    "dataModification.net",
    "fingerprinting.net",
    "schema.net",
    "denialOfService.net",
];

/// Node counts the shipped network files are known to have; a mismatch
/// means the file does not agree with the classifier's evidence tables and
/// startup must fail.
const EXPECTED_NODE_COUNTS: [usize; NUM_ATTACK_TYPES] = [19, 15, 14, 24, 21, 7];

pub const EVIDENCE_CACHE_SIZE: usize = 5;

const MAX_POOL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
pub enum AttackType {
    #[strum(serialize = "data access")]
    DataAccess,
    #[strum(serialize = "authentication bypass")]
    BypassAuthentication,
    #[strum(serialize = "data modification")]
    DataModification,
    #[strum(serialize = "fingerprinting")]
    Fingerprinting,
    #[strum(serialize = "schema discovery")]
    Schema,
    #[strum(serialize = "denial of service")]
    DenialOfService,
}

impl AttackType {
    pub const ALL: [AttackType; NUM_ATTACK_TYPES] = [
        AttackType::DataAccess,
        AttackType::BypassAuthentication,
        AttackType::DataModification,
        AttackType::Fingerprinting,
        AttackType::Schema,
        AttackType::DenialOfService,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// A fully explicit inference request: the node and state whose posterior
/// is wanted, and every observation as (node index, state index). There are
/// no other inputs; the cache key is derived from the evidence states alone
/// because the evidence node order per attack type is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceQuery {
    pub target_node: usize,
    pub target_state: usize,
    pub evidence: Vec<(usize, usize)>,
}

/// One interchangeable set of join trees, one per loaded network.
/// Inference mutates the tree's scratch potentials, so a set is only ever
/// used under its pool mutex.
struct NetworkSet {
    trees: Vec<JoinTree>,
}

/// Loads the attack networks and answers posterior queries with caching.
///
/// A pool of identical [`NetworkSet`] copies (one per hardware thread, at
/// most 256) provides the evaluator's only parallelism: callers take the
/// first free copy, or block on a round-robin-chosen one when all are held.
pub struct ProbabilityEngine {
    pool: Vec<Mutex<NetworkSet>>,
    caches: Vec<Mutex<EvidenceCache>>,
    round_robin: AtomicUsize,
    inference_count: AtomicUsize,
}

impl ProbabilityEngine {
    /// Reads the six fixed-name Hugin files from `dir`, validates their
    /// node counts, and builds the join-tree pool.
    pub fn load_from_dir(dir: &Path) -> Result<Self, BayesError> {
        let mut trees = Vec::with_capacity(NUM_ATTACK_TYPES);
        for (index, file_name) in NET_FILE_NAMES.iter().enumerate() {
            let path = dir.join(file_name);
            let text = std::fs::read_to_string(&path).map_err(|source| BayesError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let net = BayesNet::from_hugin(parse_net(&text)?)?;
            if net.node_count() != EXPECTED_NODE_COUNTS[index] {
                return Err(BayesError::WrongNodeCount {
                    file: file_name.to_string(),
                    found: net.node_count(),
                    expected: EXPECTED_NODE_COUNTS[index],
                });
            }
            trees.push(JoinTree::build(net)?);
        }
        Ok(Self::from_join_trees(trees, default_pool_size()))
    }

    /// Builds an engine over arbitrary pre-built trees. Used by tests and
    /// by callers that assemble networks some other way.
    pub fn from_join_trees(trees: Vec<JoinTree>, pool_size: usize) -> Self {
        let pool_size = pool_size.clamp(1, MAX_POOL_SIZE);
        let caches = trees
            .iter()
            .map(|_| Mutex::new(EvidenceCache::new(EVIDENCE_CACHE_SIZE)))
            .collect();
        let pool = (0..pool_size)
            .map(|_| {
                Mutex::new(NetworkSet {
                    trees: trees.clone(),
                })
            })
            .collect();
        ProbabilityEngine {
            pool,
            caches,
            round_robin: AtomicUsize::new(0),
            inference_count: AtomicUsize::new(0),
        }
    }

    /// P(target_node = target_state | evidence) for the given attack
    /// network, served from the per-attack LRU when the same evidence was
    /// seen recently.
    pub fn posterior(&self, attack: AttackType, query: &EvidenceQuery) -> Result<f64, BayesError> {
        let index = attack.index();
        let cache = self.caches.get(index).ok_or_else(|| {
            BayesError::Inference(format!("no network loaded for {}", attack.as_ref()))
        })?;

        let states: Vec<usize> = query.evidence.iter().map(|&(_, state)| state).collect();
        let fingerprint = encode_evidence(&states);

        if let Some(hit) = cache.lock().get(fingerprint) {
            return Ok(hit);
        }

        let posterior = {
            let mut set = self.acquire();
            self.inference_count.fetch_add(1, Ordering::Relaxed);
            set.trees[index].marginal(query.target_node, query.target_state, &query.evidence)?
        };
        cache.lock().insert(fingerprint, posterior);
        Ok(posterior)
    }

    /// First unlocked pool entry, else block on one picked round-robin so
    /// that waiting sessions spread over the copies.
    fn acquire(&self) -> MutexGuard<'_, NetworkSet> {
        for entry in &self.pool {
            if let Some(guard) = entry.try_lock() {
                return guard;
            }
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[index].lock()
    }

    /// How many real inference runs have happened (cache misses).
    pub fn inference_count(&self) -> usize {
        self.inference_count.load(Ordering::Relaxed)
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_POOL_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_network_engine() -> ProbabilityEngine {
        let text = r#"
node A { states = ("t" "f"); }
node B { states = ("t" "f"); }
potential (A) { data = (0.3 0.7); }
potential (B | A) { data = ((0.9 0.1) (0.2 0.8)); }
"#;
        let net = BayesNet::from_hugin(parse_net(text).unwrap()).unwrap();
        let tree = JoinTree::build(net).unwrap();
        ProbabilityEngine::from_join_trees(vec![tree], 2)
    }

    #[test]
    fn caches_by_evidence_fingerprint() {
        let engine = single_network_engine();
        let query = EvidenceQuery {
            target_node: 1,
            target_state: 0,
            evidence: vec![(0, 0)],
        };

        let first = engine
            .posterior(AttackType::DataAccess, &query)
            .unwrap();
        assert!((first - 0.9).abs() < 1e-9);
        assert_eq!(1, engine.inference_count());

        // Identical evidence: answered from cache, no new inference.
        let second = engine
            .posterior(AttackType::DataAccess, &query)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(1, engine.inference_count());

        // Different evidence state misses.
        let other = EvidenceQuery {
            target_node: 1,
            target_state: 0,
            evidence: vec![(0, 1)],
        };
        let third = engine.posterior(AttackType::DataAccess, &other).unwrap();
        assert!((third - 0.2).abs() < 1e-9);
        assert_eq!(2, engine.inference_count());
    }

    #[test]
    fn unknown_attack_index_errors() {
        let engine = single_network_engine();
        let query = EvidenceQuery {
            target_node: 0,
            target_state: 0,
            evidence: vec![],
        };
        assert!(engine.posterior(AttackType::Schema, &query).is_err());
    }

    #[test]
    fn pool_size_is_clamped() {
        let engine = single_network_engine();
        assert_eq!(2, engine.pool_size());
    }
}
