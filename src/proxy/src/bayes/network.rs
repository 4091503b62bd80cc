use crate::bayes::hugin::HuginNet;
use crate::bayes::BayesError;

/// One node of a loaded network: state space, parents by index, and the
/// conditional probability table. The CPT is flattened with parent states
/// varying slowest (in parent-list order) and the node's own states
/// fastest, matching the Hugin data layout.
#[derive(Debug, Clone)]
pub struct BayesNode {
    pub name: String,
    pub states: Vec<String>,
    pub parents: Vec<usize>,
    pub cpt: Vec<f64>,
}

/// An immutable discrete Bayesian network. Node indices follow declaration
/// order in the source file, which is also the order the classifier's
/// evidence tables are written against.
#[derive(Debug, Clone)]
pub struct BayesNet {
    pub nodes: Vec<BayesNode>,
}

impl BayesNet {
    pub fn from_hugin(hugin: HuginNet) -> Result<BayesNet, BayesError> {
        let index_of = |name: &str| -> Result<usize, BayesError> {
            hugin
                .nodes
                .iter()
                .position(|n| n.name == name)
                .ok_or_else(|| BayesError::BadNetwork(format!("unknown node {name:?}")))
        };

        let mut nodes: Vec<BayesNode> = hugin
            .nodes
            .iter()
            .map(|n| BayesNode {
                name: n.name.clone(),
                states: n.states.clone(),
                parents: Vec::new(),
                cpt: Vec::new(),
            })
            .collect();

        for potential in &hugin.potentials {
            let node = index_of(&potential.node)?;
            let parents: Vec<usize> = potential
                .parents
                .iter()
                .map(|p| index_of(p))
                .collect::<Result<_, _>>()?;

            let expected_len: usize = parents
                .iter()
                .map(|&p| hugin.nodes[p].states.len())
                .product::<usize>()
                * hugin.nodes[node].states.len();
            if potential.data.len() != expected_len {
                return Err(BayesError::BadNetwork(format!(
                    "potential for {} has {} entries, expected {}",
                    potential.node,
                    potential.data.len(),
                    expected_len
                )));
            }

            // Every CPT row must be a distribution.
            let card = hugin.nodes[node].states.len();
            for row in potential.data.chunks(card) {
                let sum: f64 = row.iter().sum();
                if !(0.99..=1.01).contains(&sum) {
                    return Err(BayesError::BadNetwork(format!(
                        "CPT row for {} sums to {sum}",
                        potential.node
                    )));
                }
            }

            let entry = &mut nodes[node];
            if !entry.cpt.is_empty() {
                return Err(BayesError::BadNetwork(format!(
                    "node {} has two potentials",
                    potential.node
                )));
            }
            entry.parents = parents;
            entry.cpt = potential.data.clone();
        }

        for node in &nodes {
            if node.cpt.is_empty() {
                return Err(BayesError::BadNetwork(format!(
                    "node {} has no potential",
                    node.name
                )));
            }
        }

        Ok(BayesNet { nodes })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cardinality(&self, node: usize) -> usize {
        self.nodes[node].states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::hugin::parse_net;

    #[test]
    fn builds_from_hugin() {
        let text = r#"
node A { states = ("t" "f"); }
node B { states = ("t" "f"); }
potential (A) { data = (0.3 0.7); }
potential (B | A) { data = ((0.9 0.1) (0.2 0.8)); }
"#;
        let net = BayesNet::from_hugin(parse_net(text).unwrap()).unwrap();
        assert_eq!(2, net.node_count());
        assert_eq!(vec![0], net.nodes[1].parents);
        assert_eq!(vec![0.9, 0.1, 0.2, 0.8], net.nodes[1].cpt);
    }

    #[test]
    fn rejects_bad_cpt_shape() {
        let text = r#"
node A { states = ("t" "f"); }
potential (A) { data = (0.3 0.7 0.1); }
"#;
        assert!(BayesNet::from_hugin(parse_net(text).unwrap()).is_err());
    }

    #[test]
    fn rejects_non_distribution_rows() {
        let text = r#"
node A { states = ("t" "f"); }
potential (A) { data = (0.3 0.3); }
"#;
        assert!(BayesNet::from_hugin(parse_net(text).unwrap()).is_err());
    }

    #[test]
    fn rejects_missing_potential() {
        let text = r#"
node A { states = ("t" "f"); }
node B { states = ("t" "f"); }
potential (A) { data = (0.3 0.7); }
"#;
        assert!(BayesNet::from_hugin(parse_net(text).unwrap()).is_err());
    }
}
