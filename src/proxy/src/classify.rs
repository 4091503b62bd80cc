use crate::analysis::risk::{EmptyPassword, QueryRisk, QueryType};
use crate::bayes::evaluator::{AttackType, EvidenceQuery, ProbabilityEngine};

use tracing::error;

pub const PROBABILITY_BLOCK_LEVEL: f64 = 0.75;
pub const PROBABILITY_LOG_LEVEL: f64 = 0.5;

/// Evidence state for a present/absent feature: the networks put the
/// "attack-ish" observation in state 0.
fn flag(present: bool) -> usize {
    if present {
        0
    } else {
        1
    }
}

fn bucket_string_manipulation(count: u16) -> usize {
    if count <= 3 {
        count as usize
    } else {
        4
    }
}

/// Builds the evidence vector for one attack network. The node indices are
/// positional: they follow the declaration order inside the corresponding
/// Hugin file, which is fixed by convention.
pub fn evidence_query(attack: AttackType, qr: &QueryRisk) -> EvidenceQuery {
    match attack {
        AttackType::DataAccess => {
            // File node order: GlobalVariables, IfStmts, StringManipulation,
            // HexStrings, OrAlwaysTrue, ConditionalModification*,
            // CommentedConditionals, DetectionEvasion*, StringStmts,
            // BruteForce, ConditionalStmts*, UnionStmts, BenchmarkStmts,
            // CommentedQuotes, AlwaysTrueConditional, DataAccess*,
            // SensitiveTables, UnionAllStmts, OrStmts. (* = queried, not
            // observed.)
            let or_always_true = qr.or_statements > 0
                && qr.always_true
                && qr.always_true_conditionals > 0;
            let string_stmts = qr.user_statements > 0
                || qr.fingerprinting_statements > 0
                || qr.global_variables > 0;
            EvidenceQuery {
                target_node: 15,
                target_state: 0,
                evidence: vec![
                    (0, flag(qr.global_variables > 0)),
                    (1, flag(qr.if_statements > 0)),
                    (2, bucket_string_manipulation(qr.string_manipulation_statements)),
                    (3, flag(qr.hex_strings > 0)),
                    (4, flag(or_always_true)),
                    (6, flag(qr.commented_conditionals > 0)),
                    (8, flag(string_stmts)),
                    (9, flag(qr.brute_force_commands > 0)),
                    (11, flag(qr.union_statements > 0)),
                    (12, flag(qr.benchmark_statements > 0)),
                    (13, flag(qr.commented_quotes > 0)),
                    (14, flag(qr.always_true_conditionals > 0)),
                    (16, flag(qr.sensitive_tables > 0)),
                    (17, flag(qr.union_all_statements > 0)),
                    (18, flag(qr.or_statements > 0)),
                ],
            }
        }
        AttackType::BypassAuthentication => {
            // File node order: OrAlwaysTrue, BypassAuthentication*,
            // HexStrings, BruteForce, DetectionEvasion*, CommentedQuotes,
            // StringStmts, GlobalVariables, UnionStmts,
            // AlwaysTrueConditional, OrStmts, StringManipulation,
            // EmptyPassword, ConditionalModification*, CommentedConditionals.
            let string_stmts = qr.user_statements > 0
                || qr.fingerprinting_statements > 0
                || qr.global_variables > 0;
            let mut evidence = vec![
                (2, flag(qr.hex_strings > 0)),
                (3, flag(qr.brute_force_commands > 0)),
                (5, flag(qr.commented_quotes > 0)),
                (6, flag(string_stmts)),
                (7, flag(qr.global_variables > 0)),
                (8, flag(qr.union_statements > 0 || qr.union_all_statements > 0)),
                (9, flag(qr.always_true_conditionals > 0)),
                (10, flag(qr.or_statements > 0)),
                (11, bucket_string_manipulation(qr.string_manipulation_statements)),
            ];
            // A query that never touches a password contributes no
            // observation for the EmptyPassword node at all.
            match qr.empty_password {
                EmptyPassword::Empty => evidence.push((12, 0)),
                EmptyPassword::NotEmpty => evidence.push((12, 1)),
                EmptyPassword::NotUsed => {}
            }
            evidence.push((14, flag(qr.commented_conditionals > 0)));
            EvidenceQuery {
                target_node: 1,
                target_state: 0,
                evidence,
            }
        }
        AttackType::DataModification => {
            // File node order: DetectionEvasion*, HexStrings, StringStmts,
            // DataModification*, Insert, ConditionalModification*,
            // GlobalVariables, BruteForce, OrStmts, AlwaysTrue,
            // StringManipulation, CommentedConditionals, CommentedQuotes,
            // SensitiveTables.
            let string_stmts = qr.user_statements > 0
                || qr.fingerprinting_statements > 0
                || qr.global_variables > 0;
            EvidenceQuery {
                target_node: 3,
                target_state: 0,
                evidence: vec![
                    (1, flag(qr.hex_strings > 0)),
                    (2, flag(string_stmts)),
                    (4, flag(qr.query_type == QueryType::Insert)),
                    (6, flag(qr.global_variables > 0)),
                    (7, flag(qr.brute_force_commands > 0)),
                    (8, flag(qr.or_statements > 0)),
                    (9, flag(qr.always_true)),
                    (10, bucket_string_manipulation(qr.string_manipulation_statements)),
                    (11, flag(qr.commented_conditionals > 0)),
                    (12, flag(qr.commented_quotes > 0)),
                    (13, flag(qr.sensitive_tables > 0)),
                ],
            }
        }
        AttackType::Fingerprinting => {
            // File node order: MySqlComments, MySqlStringConcat,
            // DataAccess*, GlobalVariables, Select, StringManipulation,
            // OrStmts, ConditionalModification*, IfStmts, CommentedQuotes,
            // Fingerprinting*, BruteForce, CommentedConditionals,
            // ConditionalStmts*, HexStrings, UnionStmts,
            // MySqlVersionComments, DetectionEvasion*, FingerprintingStmts,
            // UserStmts, AlwaysTrueConditional, BenchmarkStmts, StringStmts,
            // OrAlwaysTrue.
            let or_always_true = qr.always_true
                && qr.or_statements > 0
                && qr.always_true_conditionals > 0;
            let string_stmts = qr.user_statements > 0
                || qr.fingerprinting_statements > 0
                || qr.global_variables > 0;
            EvidenceQuery {
                target_node: 10,
                target_state: 0,
                evidence: vec![
                    (0, flag(qr.mysql_comments > 0)),
                    (1, flag(qr.mysql_string_concat > 0)),
                    (3, flag(qr.global_variables > 0)),
                    (4, flag(qr.query_type == QueryType::Select)),
                    (5, bucket_string_manipulation(qr.string_manipulation_statements)),
                    (6, flag(qr.or_statements > 0)),
                    (8, flag(qr.if_statements > 0)),
                    (9, flag(qr.commented_quotes > 0)),
                    (11, flag(qr.brute_force_commands > 0)),
                    (12, flag(qr.commented_conditionals > 0)),
                    (14, flag(qr.hex_strings > 0)),
                    (15, flag(qr.union_statements > 0 || qr.union_all_statements > 0)),
                    (16, flag(qr.mysql_versioned_comments > 0)),
                    (18, flag(qr.fingerprinting_statements > 0)),
                    (19, flag(qr.user_statements > 0)),
                    (20, flag(qr.always_true_conditionals > 0)),
                    (21, flag(qr.benchmark_statements > 0)),
                    (22, flag(string_stmts)),
                    (23, flag(or_always_true)),
                ],
            }
        }
        AttackType::Schema => {
            // File node order: OrStmts, OrderByNumber, GlobalVariables,
            // BruteForce, CommentedQuotes, IfStmts, StringStmts,
            // DataAccess*, InformationSchema, HexStrings,
            // ConditionalModification*, DetectionEvasion*, Schema*,
            // UnionStmts, CommentedConditionals, ConditionalStmts*,
            // BenchmarkStmts, OrAlwaysTrue, AlwaysTrueConditional,
            // StringManipulation, Select.
            let or_always_true = qr.always_true
                && qr.or_statements > 0
                && qr.always_true_conditionals > 0;
            let string_stmts = qr.user_statements > 0
                || qr.fingerprinting_statements > 0
                || qr.global_variables > 0;
            EvidenceQuery {
                target_node: 12,
                target_state: 0,
                evidence: vec![
                    (0, flag(qr.or_statements > 0)),
                    (1, flag(qr.order_by_number)),
                    (2, flag(qr.global_variables > 0)),
                    (3, flag(qr.brute_force_commands > 0)),
                    (4, flag(qr.commented_quotes > 0)),
                    (5, flag(qr.if_statements > 0)),
                    (6, flag(string_stmts)),
                    (8, flag(qr.information_schema)),
                    (9, flag(qr.hex_strings > 0)),
                    (13, flag(qr.union_statements > 0 || qr.union_all_statements > 0)),
                    (14, flag(qr.commented_conditionals > 0)),
                    (16, flag(qr.benchmark_statements > 0)),
                    (17, flag(or_always_true)),
                    (18, flag(qr.always_true_conditionals > 0)),
                    (19, bucket_string_manipulation(qr.string_manipulation_statements)),
                    (20, flag(qr.query_type == QueryType::Select)),
                ],
            }
        }
        AttackType::DenialOfService => {
            // File node order: AlwaysTrue, SlowRegex, Benchmark, Joins,
            // DenialOfService*, CrossJoin, RegexLength.
            let joins = if qr.join_statements <= 4 {
                qr.join_statements as usize
            } else {
                5
            };
            let regex_bucket = {
                let scaled = (qr.regex_length / 5) as usize;
                if scaled < 5 {
                    scaled
                } else {
                    5
                }
            };
            EvidenceQuery {
                target_node: 4,
                target_state: 0,
                evidence: vec![
                    (0, flag(qr.always_true)),
                    (1, flag(qr.slow_regexes > 0)),
                    (2, flag(qr.benchmark_statements > 0)),
                    (3, joins),
                    (5, flag(qr.cross_join_statements > 0)),
                    (6, regex_bucket),
                ],
            }
        }
    }
}

/// Which attack networks apply to a query, by its statement class.
pub fn attacks_for(qr: &QueryRisk) -> Vec<AttackType> {
    match qr.query_type {
        QueryType::Select => {
            let mut attacks = vec![AttackType::DataAccess];
            if qr.user_table {
                attacks.push(AttackType::BypassAuthentication);
            }
            attacks.push(AttackType::Fingerprinting);
            attacks.push(AttackType::Schema);
            attacks.push(AttackType::DenialOfService);
            attacks
        }
        QueryType::Insert | QueryType::Update | QueryType::Delete => vec![
            AttackType::DataModification,
            AttackType::Fingerprinting,
            AttackType::Schema,
        ],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackAssessment {
    pub attack: AttackType,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassifierVerdict {
    pub blocked: bool,
    /// Every evaluated attack with its posterior, for logging.
    pub assessments: Vec<AttackAssessment>,
}

/// Turns a risk vector into a block/forward verdict by querying the
/// applicable attack networks.
pub struct QueryClassifier {
    engine: ProbabilityEngine,
    block_threshold: f64,
    log_threshold: f64,
}

impl QueryClassifier {
    pub fn new(engine: ProbabilityEngine) -> Self {
        Self::with_thresholds(engine, PROBABILITY_BLOCK_LEVEL, PROBABILITY_LOG_LEVEL)
    }

    pub fn with_thresholds(engine: ProbabilityEngine, block: f64, log: f64) -> Self {
        QueryClassifier {
            engine,
            block_threshold: block,
            log_threshold: log,
        }
    }

    pub fn log_threshold(&self) -> f64 {
        self.log_threshold
    }

    pub fn assess(&self, qr: &QueryRisk) -> ClassifierVerdict {
        let mut verdict = ClassifierVerdict::default();
        for attack in attacks_for(qr) {
            let query = evidence_query(attack, qr);
            match self.engine.posterior(attack, &query) {
                Ok(probability) => {
                    verdict.blocked |= probability >= self.block_threshold;
                    verdict.assessments.push(AttackAssessment {
                        attack,
                        probability,
                    });
                }
                Err(e) => {
                    // An unclassifiable query must never slip through.
                    error!("inference failed for {}: {e}", attack.as_ref());
                    verdict.blocked = true;
                }
            }
        }
        verdict
    }
}

/// Synthetic networks with the production node counts and cardinalities,
/// where every node is independent and the attack nodes carry a chosen
/// prior. With independent nodes the posterior equals the prior whatever
/// the evidence, which makes block/forward behaviour a test parameter.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bayes::hugin::parse_net;
    use crate::bayes::join_tree::JoinTree;
    use crate::bayes::network::BayesNet;

    struct NetShape {
        node_count: usize,
        target: usize,
        wide_nodes: &'static [(usize, usize)],
    }

    const SHAPES: [NetShape; 6] = [
        NetShape {
            node_count: 19,
            target: 15,
            wide_nodes: &[(2, 5)],
        },
        NetShape {
            node_count: 15,
            target: 1,
            wide_nodes: &[(11, 5)],
        },
        NetShape {
            node_count: 14,
            target: 3,
            wide_nodes: &[(10, 5)],
        },
        NetShape {
            node_count: 24,
            target: 10,
            wide_nodes: &[(5, 5)],
        },
        NetShape {
            node_count: 21,
            target: 12,
            wide_nodes: &[(19, 5)],
        },
        NetShape {
            node_count: 7,
            target: 4,
            wide_nodes: &[(3, 6), (6, 6)],
        },
    ];

    fn hugin_text(shape: &NetShape, attack_prior: f64) -> String {
        let mut text = String::from("net { }\n");
        for node in 0..shape.node_count {
            let card = shape
                .wide_nodes
                .iter()
                .find(|&&(n, _)| n == node)
                .map(|&(_, c)| c)
                .unwrap_or(2);
            let states: Vec<String> = (0..card).map(|s| format!("\"s{s}\"")).collect();
            text.push_str(&format!(
                "node N{node} {{ states = ({}); }}\n",
                states.join(" ")
            ));
        }
        for node in 0..shape.node_count {
            let card = shape
                .wide_nodes
                .iter()
                .find(|&&(n, _)| n == node)
                .map(|&(_, c)| c)
                .unwrap_or(2);
            let row: Vec<String> = if node == shape.target {
                vec![format!("{attack_prior}"), format!("{}", 1.0 - attack_prior)]
            } else {
                (0..card).map(|_| format!("{}", 1.0 / card as f64)).collect()
            };
            text.push_str(&format!(
                "potential (N{node}) {{ data = ({}); }}\n",
                row.join(" ")
            ));
        }
        text
    }

    pub fn engine_with_attack_prior(attack_prior: f64) -> ProbabilityEngine {
        let trees: Vec<JoinTree> = SHAPES
            .iter()
            .map(|shape| {
                let net = BayesNet::from_hugin(
                    parse_net(&hugin_text(shape, attack_prior))
                        .expect("synthetic hugin text must parse"),
                )
                .expect("synthetic network must be valid");
                JoinTree::build(net).expect("synthetic join tree must build")
            })
            .collect();
        ProbabilityEngine::from_join_trees(trees, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_query;
    use crate::policy::sensitive::SensitiveNames;

    fn risk_of(sql: &str) -> QueryRisk {
        analyze_query(sql, &SensitiveNames::default()).risk
    }

    #[test]
    fn select_evaluates_four_or_five_networks() {
        let qr = risk_of("SELECT * FROM items WHERE id = 5");
        assert_eq!(
            vec![
                AttackType::DataAccess,
                AttackType::Fingerprinting,
                AttackType::Schema,
                AttackType::DenialOfService,
            ],
            attacks_for(&qr)
        );

        let qr = risk_of("SELECT * FROM users WHERE id = 5");
        assert!(attacks_for(&qr).contains(&AttackType::BypassAuthentication));
    }

    #[test]
    fn modification_statements_evaluate_three() {
        let qr = risk_of("UPDATE accounts SET bal = 0 WHERE id = 1");
        assert_eq!(
            vec![
                AttackType::DataModification,
                AttackType::Fingerprinting,
                AttackType::Schema,
            ],
            attacks_for(&qr)
        );
    }

    #[test]
    fn other_statements_evaluate_none() {
        let qr = risk_of("SHOW TABLES");
        assert!(attacks_for(&qr).is_empty());
        let qr = risk_of("USE shop");
        assert!(attacks_for(&qr).is_empty());
    }

    #[test]
    fn access_evidence_shape() {
        let qr = risk_of("SELECT * FROM users WHERE name = '' OR 1=1");
        let query = evidence_query(AttackType::DataAccess, &qr);
        assert_eq!(15, query.target_node);
        assert_eq!(0, query.target_state);
        assert_eq!(15, query.evidence.len());
        // OrStmts observed present.
        assert!(query.evidence.contains(&(18, 0)));
        // OrAlwaysTrue present: or + always true + true conditional.
        assert!(query.evidence.contains(&(4, 0)));
        // No union statements.
        assert!(query.evidence.contains(&(11, 1)));
    }

    #[test]
    fn bypass_evidence_omits_unused_password() {
        let qr = risk_of("SELECT * FROM users WHERE id = 1");
        let query = evidence_query(AttackType::BypassAuthentication, &qr);
        assert_eq!(10, query.evidence.len());
        assert!(!query.evidence.iter().any(|&(node, _)| node == 12));

        let qr = risk_of("SELECT * FROM users WHERE password = ''");
        let query = evidence_query(AttackType::BypassAuthentication, &qr);
        assert_eq!(11, query.evidence.len());
        assert!(query.evidence.contains(&(12, 0)));

        let qr = risk_of("SELECT * FROM users WHERE password = 'x'");
        let query = evidence_query(AttackType::BypassAuthentication, &qr);
        assert!(query.evidence.contains(&(12, 1)));
    }

    #[test]
    fn string_manipulation_clamps_at_four() {
        let qr = risk_of(
            "SELECT CONCAT(a, CHAR(65), REPLACE(b, 'x', 'y'), REVERSE(c), HEX(d), MID(e, 1)) \
             FROM t",
        );
        assert!(qr.string_manipulation_statements > 4);
        let query = evidence_query(AttackType::DataAccess, &qr);
        assert!(query.evidence.contains(&(2, 4)));
    }

    #[test]
    fn denial_of_service_buckets() {
        let mut qr = risk_of("SELECT * FROM a");
        qr.join_statements = 9;
        qr.regex_length = 13;
        qr.cross_join_statements = 1;
        let query = evidence_query(AttackType::DenialOfService, &qr);
        assert!(query.evidence.contains(&(3, 5))); // joins clamped
        assert!(query.evidence.contains(&(6, 2))); // 13 / 5
        assert!(query.evidence.contains(&(5, 0))); // cross join present

        qr.regex_length = 60;
        let query = evidence_query(AttackType::DenialOfService, &qr);
        assert!(query.evidence.contains(&(6, 5))); // capped
    }

    #[test]
    fn high_prior_engine_blocks_low_prior_engine_forwards() {
        let qr = risk_of("SELECT * FROM items WHERE id = 5");

        let blocking = QueryClassifier::new(test_support::engine_with_attack_prior(0.95));
        let verdict = blocking.assess(&qr);
        assert!(verdict.blocked);
        assert_eq!(4, verdict.assessments.len());

        let permissive = QueryClassifier::new(test_support::engine_with_attack_prior(0.05));
        let verdict = permissive.assess(&qr);
        assert!(!verdict.blocked);
        assert!(verdict.assessments.iter().all(|a| a.probability < 0.5));
    }
}
