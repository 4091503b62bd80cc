use crate::bayes::network::BayesNet;
use crate::bayes::BayesError;

/// A discrete potential over a sorted list of variables. Data is laid out
/// row-major with the last variable fastest.
#[derive(Debug, Clone)]
pub struct Factor {
    vars: Vec<usize>,
    card: Vec<usize>,
    data: Vec<f64>,
}

impl Factor {
    fn identity(vars: Vec<usize>, net: &BayesNet) -> Factor {
        let card: Vec<usize> = vars.iter().map(|&v| net.cardinality(v)).collect();
        let size = card.iter().product();
        Factor {
            vars,
            card,
            data: vec![1.0; size],
        }
    }

    /// Builds the factor for one network node's CPT over the sorted family
    /// variable set.
    fn from_cpt(node: usize, net: &BayesNet) -> Factor {
        let def = &net.nodes[node];
        let mut vars: Vec<usize> = def.parents.clone();
        vars.push(node);
        vars.sort_unstable();
        vars.dedup();

        let mut factor = Factor::identity(vars, net);
        let size = factor.data.len();
        let mut assignment = vec![0usize; factor.vars.len()];
        for (index, slot) in factor.data.iter_mut().enumerate().take(size) {
            factor_decode(&factor.card, index, &mut assignment);
            // CPT index: parents in declared order vary slowest, the node's
            // own state fastest.
            let mut cpt_index = 0usize;
            for &parent in &def.parents {
                let pos = factor.vars.iter().position(|&v| v == parent).unwrap();
                cpt_index = cpt_index * net.cardinality(parent) + assignment[pos];
            }
            let own_pos = factor.vars.iter().position(|&v| v == node).unwrap();
            cpt_index = cpt_index * net.cardinality(node) + assignment[own_pos];
            *slot = def.cpt[cpt_index];
        }
        factor
    }

    fn multiply(&self, other: &Factor, net: &BayesNet) -> Factor {
        let mut vars: Vec<usize> = self
            .vars
            .iter()
            .chain(other.vars.iter())
            .copied()
            .collect();
        vars.sort_unstable();
        vars.dedup();

        let mut result = Factor::identity(vars, net);
        let mut assignment = vec![0usize; result.vars.len()];
        for index in 0..result.data.len() {
            factor_decode(&result.card, index, &mut assignment);
            let a = self.project_index(&result.vars, &assignment);
            let b = other.project_index(&result.vars, &assignment);
            result.data[index] = self.data[a] * other.data[b];
        }
        result
    }

    /// Index into this factor for a joint assignment expressed over a
    /// superset of its variables.
    fn project_index(&self, joint_vars: &[usize], joint_assignment: &[usize]) -> usize {
        let mut index = 0usize;
        for (pos, &var) in self.vars.iter().enumerate() {
            let joint_pos = joint_vars.iter().position(|&v| v == var).unwrap();
            index = index * self.card[pos] + joint_assignment[joint_pos];
        }
        index
    }

    fn marginalize_to(&self, keep: &[usize], net: &BayesNet) -> Factor {
        let vars: Vec<usize> = self
            .vars
            .iter()
            .copied()
            .filter(|v| keep.contains(v))
            .collect();
        let mut result = Factor::identity(vars, net);
        for value in result.data.iter_mut() {
            *value = 0.0;
        }
        let mut assignment = vec![0usize; self.vars.len()];
        for index in 0..self.data.len() {
            factor_decode(&self.card, index, &mut assignment);
            let target = result.project_index(&self.vars, &assignment);
            result.data[target] += self.data[index];
        }
        result
    }

    /// Multiplies in an evidence indicator: entries disagreeing with the
    /// observation become zero.
    fn condition(&mut self, var: usize, state: usize) {
        let Some(pos) = self.vars.iter().position(|&v| v == var) else {
            return;
        };
        let mut assignment = vec![0usize; self.vars.len()];
        for index in 0..self.data.len() {
            factor_decode(&self.card, index, &mut assignment);
            if assignment[pos] != state {
                self.data[index] = 0.0;
            }
        }
    }
}

fn factor_decode(card: &[usize], mut index: usize, assignment: &mut [usize]) {
    for pos in (0..card.len()).rev() {
        assignment[pos] = index % card[pos];
        index /= card[pos];
    }
}

/// The secondary structure sum-product inference runs on: moralise the
/// directed network, triangulate the moral graph, collect the maximal
/// cliques, and connect them by a maximum-weight spanning tree over
/// separator sizes.
///
/// Inference reuses per-instance scratch potentials, so a `JoinTree` must
/// not be shared between sessions without exclusive access; the evaluator
/// keeps a pool of copies for exactly that reason.
#[derive(Debug, Clone)]
pub struct JoinTree {
    net: BayesNet,
    cliques: Vec<Vec<usize>>,
    /// `(a, b, separator)` tree edges.
    edges: Vec<(usize, usize, Vec<usize>)>,
    clique_potentials: Vec<Factor>,
    scratch: Vec<Factor>,
}

impl JoinTree {
    pub fn build(net: BayesNet) -> Result<JoinTree, BayesError> {
        let n = net.node_count();
        if n == 0 {
            return Err(BayesError::BadNetwork("empty network".to_string()));
        }

        // Moral graph: connect every node to its parents and marry parents.
        let mut adjacent = vec![vec![false; n]; n];
        for (child, def) in net.nodes.iter().enumerate() {
            for &parent in &def.parents {
                adjacent[child][parent] = true;
                adjacent[parent][child] = true;
            }
            for (i, &a) in def.parents.iter().enumerate() {
                for &b in def.parents.iter().skip(i + 1) {
                    adjacent[a][b] = true;
                    adjacent[b][a] = true;
                }
            }
        }

        // Min-fill triangulation; each elimination records a clique.
        let mut work = adjacent.clone();
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut raw_cliques: Vec<Vec<usize>> = Vec::new();
        while !remaining.is_empty() {
            let best = remaining
                .iter()
                .copied()
                .min_by_key(|&v| fill_in_cost(v, &remaining, &work))
                .unwrap();

            let neighbors: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&u| u != best && work[best][u])
                .collect();
            let mut clique = neighbors.clone();
            clique.push(best);
            clique.sort_unstable();
            raw_cliques.push(clique);

            for (i, &a) in neighbors.iter().enumerate() {
                for &b in neighbors.iter().skip(i + 1) {
                    work[a][b] = true;
                    work[b][a] = true;
                }
            }
            remaining.retain(|&v| v != best);
        }

        // Keep only maximal cliques.
        let mut cliques: Vec<Vec<usize>> = Vec::new();
        for candidate in raw_cliques {
            if !cliques
                .iter()
                .any(|existing| candidate.iter().all(|v| existing.contains(v)))
            {
                cliques.retain(|existing| !existing.iter().all(|v| candidate.contains(v)));
                cliques.push(candidate);
            }
        }

        // Maximum-weight spanning tree over separator sizes (Kruskal).
        let mut candidates: Vec<(usize, usize, usize, Vec<usize>)> = Vec::new();
        for i in 0..cliques.len() {
            for j in i + 1..cliques.len() {
                let separator: Vec<usize> = cliques[i]
                    .iter()
                    .copied()
                    .filter(|v| cliques[j].contains(v))
                    .collect();
                if !separator.is_empty() {
                    candidates.push((separator.len(), i, j, separator));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut parent: Vec<usize> = (0..cliques.len()).collect();
        fn find(parent: &mut Vec<usize>, x: usize) -> usize {
            if parent[x] != x {
                let root = find(parent, parent[x]);
                parent[x] = root;
            }
            parent[x]
        }
        let mut edges = Vec::new();
        for (_, i, j, separator) in candidates {
            let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
            if ri != rj {
                parent[ri] = rj;
                edges.push((i, j, separator));
            }
        }

        // Multiply every CPT into one clique that covers its family.
        let mut clique_potentials: Vec<Factor> = cliques
            .iter()
            .map(|clique| Factor::identity(clique.clone(), &net))
            .collect();
        for node in 0..n {
            let mut family: Vec<usize> = net.nodes[node].parents.clone();
            family.push(node);
            let home = cliques
                .iter()
                .position(|clique| family.iter().all(|v| clique.contains(v)))
                .ok_or_else(|| {
                    BayesError::BadNetwork(format!(
                        "no clique covers the family of node {}",
                        net.nodes[node].name
                    ))
                })?;
            let cpt = Factor::from_cpt(node, &net);
            let combined = clique_potentials[home].multiply(&cpt, &net);
            clique_potentials[home] = combined;
        }

        Ok(JoinTree {
            scratch: clique_potentials.clone(),
            net,
            cliques,
            edges,
            clique_potentials,
        })
    }

    pub fn clique_count(&self) -> usize {
        self.cliques.len()
    }

    /// P(node = state | evidence) by collect-to-root message passing.
    pub fn marginal(
        &mut self,
        node: usize,
        state: usize,
        evidence: &[(usize, usize)],
    ) -> Result<f64, BayesError> {
        if node >= self.net.node_count() || state >= self.net.cardinality(node) {
            return Err(BayesError::Inference(format!(
                "query out of range: node {node} state {state}"
            )));
        }

        // Reset scratch potentials and absorb the evidence.
        self.scratch.clone_from(&self.clique_potentials);
        for &(var, observed) in evidence {
            let Some(home) = self.cliques.iter().position(|c| c.contains(&var)) else {
                return Err(BayesError::Inference(format!(
                    "evidence variable {var} not in any clique"
                )));
            };
            self.scratch[home].condition(var, observed);
        }

        let root = self
            .cliques
            .iter()
            .position(|c| c.contains(&node))
            .ok_or_else(|| BayesError::Inference(format!("node {node} not in any clique")))?;

        // BFS tree over the root's component.
        let count = self.cliques.len();
        let mut tree_parent: Vec<Option<usize>> = vec![None; count];
        let mut visited = vec![false; count];
        let mut order = vec![root];
        visited[root] = true;
        let mut head = 0;
        while head < order.len() {
            let current = order[head];
            head += 1;
            for (a, b, _) in &self.edges {
                let neighbor = if *a == current {
                    *b
                } else if *b == current {
                    *a
                } else {
                    continue;
                };
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    tree_parent[neighbor] = Some(current);
                    order.push(neighbor);
                }
            }
        }

        // Collect phase: children push messages toward the root.
        let mut inbox: Vec<Vec<Factor>> = vec![Vec::new(); count];
        for &clique in order.iter().rev() {
            let Some(up) = tree_parent[clique] else {
                continue;
            };
            let mut belief = self.scratch[clique].clone();
            for message in inbox[clique].drain(..) {
                belief = belief.multiply(&message, &self.net);
            }
            let separator = self
                .edges
                .iter()
                .find(|(a, b, _)| {
                    (*a == clique && *b == up) || (*a == up && *b == clique)
                })
                .map(|(_, _, sep)| sep.clone())
                .unwrap_or_default();
            inbox[up].push(belief.marginalize_to(&separator, &self.net));
        }

        let mut belief = self.scratch[root].clone();
        for message in inbox[root].drain(..) {
            belief = belief.multiply(&message, &self.net);
        }
        let marginal = belief.marginalize_to(&[node], &self.net);
        let total: f64 = marginal.data.iter().sum();
        if total <= 0.0 {
            return Err(BayesError::Inference(
                "evidence has zero probability".to_string(),
            ));
        }
        Ok(marginal.data[state] / total)
    }
}

fn fill_in_cost(v: usize, remaining: &[usize], adjacent: &[Vec<bool>]) -> usize {
    let neighbors: Vec<usize> = remaining
        .iter()
        .copied()
        .filter(|&u| u != v && adjacent[v][u])
        .collect();
    let mut cost = 0;
    for (i, &a) in neighbors.iter().enumerate() {
        for &b in neighbors.iter().skip(i + 1) {
            if !adjacent[a][b] {
                cost += 1;
            }
        }
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::hugin::parse_net;

    fn sprinkler_tree() -> JoinTree {
        // The classic rain/sprinkler/grass network with hand-checkable
        // numbers.
        let text = r#"
node Rain { states = ("yes" "no"); }
node Sprinkler { states = ("on" "off"); }
node Grass { states = ("wet" "dry"); }
potential (Rain) { data = (0.2 0.8); }
potential (Sprinkler | Rain) { data = ((0.01 0.99) (0.4 0.6)); }
potential (Grass | Sprinkler Rain)
{
    data = ((( 0.99 0.01 ) ( 0.9 0.1 ))
            (( 0.8 0.2 ) ( 0.0 1.0 )));
}
"#;
        let net = BayesNet::from_hugin(parse_net(text).unwrap()).unwrap();
        JoinTree::build(net).unwrap()
    }

    #[test]
    fn prior_marginals() {
        let mut tree = sprinkler_tree();
        let p_rain = tree.marginal(0, 0, &[]).unwrap();
        assert!((p_rain - 0.2).abs() < 1e-9, "P(rain) = {p_rain}");

        // P(sprinkler=on) = 0.2*0.01 + 0.8*0.4 = 0.322
        let p_sprinkler = tree.marginal(1, 0, &[]).unwrap();
        assert!((p_sprinkler - 0.322).abs() < 1e-9);

        // P(grass wet) = sum over joint:
        // rain,on: .2*.01*.99 + rain,off: .2*.99*.8 + norain,on: .8*.4*.9
        // + norain,off: .8*.6*0 = 0.44838
        let p_wet = tree.marginal(2, 0, &[]).unwrap();
        assert!((p_wet - 0.44838).abs() < 1e-9, "P(wet) = {p_wet}");
    }

    #[test]
    fn posterior_with_evidence() {
        let mut tree = sprinkler_tree();
        // P(rain | grass wet) = P(rain, wet)/P(wet)
        // P(rain, wet) = .2*(.01*.99 + .99*.8) = 0.16038
        let p = tree.marginal(0, 0, &[(2, 0)]).unwrap();
        let expected = 0.16038 / 0.44838;
        assert!((p - expected).abs() < 1e-9, "got {p}, expected {expected}");
    }

    #[test]
    fn multiple_evidence_nodes() {
        let mut tree = sprinkler_tree();
        // P(grass wet | rain yes, sprinkler on) reads the CPT directly.
        let p = tree.marginal(2, 0, &[(0, 0), (1, 0)]).unwrap();
        assert!((p - 0.99).abs() < 1e-9);
    }

    #[test]
    fn contradictory_evidence_is_an_error() {
        let text = r#"
node A { states = ("t" "f"); }
node B { states = ("t" "f"); }
potential (A) { data = (1.0 0.0); }
potential (B | A) { data = ((1.0 0.0) (0.5 0.5)); }
"#;
        let net = BayesNet::from_hugin(parse_net(text).unwrap()).unwrap();
        let mut tree = JoinTree::build(net).unwrap();
        // A is deterministically true; conditioning on A=false is impossible.
        assert!(tree.marginal(1, 0, &[(0, 1)]).is_err());
    }

    #[test]
    fn chain_network_marginals() {
        // A -> B -> C chain, check an end-to-end posterior.
        let text = r#"
node A { states = ("t" "f"); }
node B { states = ("t" "f"); }
node C { states = ("t" "f"); }
potential (A) { data = (0.5 0.5); }
potential (B | A) { data = ((0.9 0.1) (0.2 0.8)); }
potential (C | B) { data = ((0.7 0.3) (0.1 0.9)); }
"#;
        let net = BayesNet::from_hugin(parse_net(text).unwrap()).unwrap();
        let mut tree = JoinTree::build(net).unwrap();

        // P(B=t) = .5*.9 + .5*.2 = 0.55
        let p_b = tree.marginal(1, 0, &[]).unwrap();
        assert!((p_b - 0.55).abs() < 1e-9);

        // P(C=t) = .55*.7 + .45*.1 = 0.43
        let p_c = tree.marginal(2, 0, &[]).unwrap();
        assert!((p_c - 0.43).abs() < 1e-9);

        // P(A=t | C=t) = P(A,C)/P(C); P(C|A=t) = .9*.7+.1*.1 = .64
        // P(A=t,C=t) = .5*.64 = .32 ; /.43
        let p = tree.marginal(0, 0, &[(2, 0)]).unwrap();
        assert!((p - 0.32 / 0.43).abs() < 1e-9);
    }
}
