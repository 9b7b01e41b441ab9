//! Expected quartet concordance factors under the network multispecies coalescent.
//!
//! The four sampled lineages are traced from the leaves to the root. A state
//! records the node each lineage currently sits at; states are processed
//! node by node in postorder, so every lineage that can ever reach a node has
//! arrived before the node is left. Along an edge of length `t` carrying `k`
//! lineages, no coalescence occurs with probability `exp(-C(k,2) t)`; the first
//! coalescence between two of the four sampled lineages fixes the unrooted
//! quartet topology, so that probability mass is absorbed into the matching
//! split. At a hybrid node each lineage independently follows a parent edge
//! with probability γ. Lineages that reach the root uncoalesced give each
//! split probability 1/3.

use std::collections::HashMap;

use crate::dataset::QuartetDataset;
use crate::error::{Error, Result};
use crate::network::{Network, resolution_of_pair};

/// Expected CFs `[CF12_34, CF13_24, CF14_23]` for four leaves given by node index.
pub fn expected_cf(net: &Network, taxa: [usize; 4]) -> Result<[f64; 3]> {
    let mut absorbed = [0.0_f64; 3];
    let mut states: HashMap<[usize; 4], f64> = HashMap::new();
    states.insert(taxa, 1.0);

    for v in net.postorder() {
        if v == net.root() {
            continue;
        }
        let mut next: HashMap<[usize; 4], f64> = HashMap::with_capacity(states.len());
        for (state, prob) in states {
            let here: Vec<usize> = (0..4).filter(|&i| state[i] == v).collect();
            if here.is_empty() {
                *next.entry(state).or_insert(0.0) += prob;
                continue;
            }
            leave_node(net, v, &state, &here, prob, &mut next, &mut absorbed)?;
        }
        states = next;
    }

    let root = net.root();
    for (state, prob) in states {
        if state.iter().any(|&loc| loc != root) {
            return Err(Error::InvalidInput(
                "lineage did not reach the root; network is disconnected".into(),
            ));
        }
        for slot in absorbed.iter_mut() {
            *slot += prob / 3.0;
        }
    }
    Ok(absorbed)
}

/// Move the lineages at `v` through its parent edge(s), coalescing along the way.
fn leave_node(
    net: &Network,
    v: usize,
    state: &[usize; 4],
    here: &[usize],
    prob: f64,
    next: &mut HashMap<[usize; 4], f64>,
    absorbed: &mut [f64; 3],
) -> Result<()> {
    let parents = net.parent_edges(v);
    let k = here.len();
    // each assignment of the k lineages to parent edges; tree nodes have one
    let assignments = parents.len().pow(k as u32);
    for code in 0..assignments {
        let mut choice = Vec::with_capacity(k);
        let mut rest = code;
        let mut weight = prob;
        for _ in 0..k {
            let which = rest % parents.len();
            rest /= parents.len();
            weight *= net.edge(parents[which]).gamma;
            choice.push(which);
        }
        if weight == 0.0 {
            continue;
        }

        let mut remaining = weight;
        let mut moved = *state;
        for (which, &e) in parents.iter().enumerate() {
            let group: Vec<usize> = here
                .iter()
                .zip(&choice)
                .filter(|&(_, &c)| c == which)
                .map(|(&i, _)| i)
                .collect();
            for &i in &group {
                moved[i] = net.edge(e).parent;
            }
            if group.len() < 2 {
                continue;
            }
            let length = net
                .edge(e)
                .length
                .ok_or(Error::MissingBranchLength { edge: e })?
                .max(0.0);
            let pairs = (group.len() * (group.len() - 1) / 2) as f64;
            let coalesce = 1.0 - (-pairs * length).exp();
            let per_pair = remaining * coalesce / pairs;
            for (a, &i) in group.iter().enumerate() {
                for &j in &group[a + 1..] {
                    absorbed[resolution_of_pair(i, j)] += per_pair;
                }
            }
            remaining *= 1.0 - coalesce;
        }
        if remaining > 0.0 {
            *next.entry(moved).or_insert(0.0) += remaining;
        }
    }
    Ok(())
}

/// Expected CFs for four leaves given by label.
pub fn expected_cf_by_label(net: &Network, labels: [&str; 4]) -> Result<[f64; 3]> {
    let mut taxa = [0usize; 4];
    for (slot, label) in taxa.iter_mut().zip(labels) {
        *slot = net
            .leaf(label)
            .ok_or_else(|| Error::TaxonMismatch(format!("taxon '{label}' not in network")))?;
    }
    expected_cf(net, taxa)
}

/// Fill the expected CFs of every record from the network.
pub fn update_expected_cfs(net: &Network, dataset: &mut QuartetDataset) -> Result<()> {
    for record in dataset.records_mut() {
        let labels = [
            record.taxa[0].as_str(),
            record.taxa[1].as_str(),
            record.taxa[2].as_str(),
            record.taxa[3].as_str(),
        ];
        record.exp_cf = Some(expected_cf_by_label(net, labels)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_network;

    fn assert_close(a: [f64; 3], b: [f64; 3], tol: f64) {
        for j in 0..3 {
            assert!((a[j] - b[j]).abs() < tol, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_tree_quartet_formula() {
        // internal edge length 1.0 split across the root
        let net = parse_network("((A:1,B:1):0.4,(C:1,D:1):0.6);").unwrap();
        let cf = expected_cf_by_label(&net, ["A", "B", "C", "D"]).unwrap();
        let minor = (-1.0_f64).exp() / 3.0;
        assert_close(cf, [1.0 - 2.0 * minor, minor, minor], 1e-12);
    }

    #[test]
    fn test_taxon_order_permutes_cfs() {
        let net = parse_network("((A:1,B:1):0.5,(C:1,D:1):0.5);").unwrap();
        let cf = expected_cf_by_label(&net, ["A", "C", "B", "D"]).unwrap();
        let minor = (-1.0_f64).exp() / 3.0;
        assert_close(cf, [minor, 1.0 - 2.0 * minor, minor], 1e-12);
    }

    #[test]
    fn test_cfs_sum_to_one() {
        let net = parse_network(
            "((((D:1.1,C:1.1):1.1,((A:0.4,B:0.4):1.1)#H1:1.1::0.7):1.1,(#H1:0.0::0.3,E:2.2):1.1):1.1,O:4.4);",
        )
        .unwrap();
        let labels = net.leaf_labels();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        for a in 0..refs.len() {
            for b in a + 1..refs.len() {
                for c in b + 1..refs.len() {
                    for d in c + 1..refs.len() {
                        let cf = expected_cf_by_label(&net, [refs[a], refs[b], refs[c], refs[d]])
                            .unwrap();
                        let total: f64 = cf.iter().sum();
                        assert!((total - 1.0).abs() < 1e-12);
                        assert!(cf.iter().all(|&p| p >= 0.0));
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_length_star() {
        let net = parse_network("((A:1,B:1):0,(C:1,D:1):0);").unwrap();
        let cf = expected_cf_by_label(&net, ["A", "B", "C", "D"]).unwrap();
        assert_close(cf, [1.0 / 3.0; 3], 1e-12);
    }

    #[test]
    fn test_hybrid_mixture_with_long_edges() {
        // B is inherited from the (A,B) side with γ 0.6 or the (C,B) side with 0.4;
        // long edges make each displayed tree's quartet nearly certain
        let net = parse_network(
            "((A:1,#H1:0::0.4):20,((B:1)#H1:0::0.6,C:1):20,D:1);",
        )
        .unwrap();
        let cf = expected_cf_by_label(&net, ["A", "B", "C", "D"]).unwrap();
        assert_close(cf, [0.4, 0.0, 0.6], 1e-6);
    }

    #[test]
    fn test_missing_length_is_error() {
        let net = parse_network("((A,B),(C,D));").unwrap();
        let err = expected_cf_by_label(&net, ["A", "B", "C", "D"]).unwrap_err();
        assert!(matches!(err, Error::MissingBranchLength { .. }));
        // leaf edges carry a single lineage and may stay unset
        let net = parse_network("((A,B):1,(C,D):1);").unwrap();
        assert!(expected_cf_by_label(&net, ["A", "B", "C", "D"]).is_ok());
    }

    #[test]
    fn test_unknown_taxon() {
        let net = parse_network("((A,B):1,(C,D):1);").unwrap();
        let err = expected_cf_by_label(&net, ["A", "B", "C", "Z"]).unwrap_err();
        assert!(matches!(err, Error::TaxonMismatch(_)));
    }
}
