//! Rerooting and hardwired cluster comparison.
//!
//! A network can be rerooted at any internal node reachable from the current
//! root through tree edges only; the edges on that path are reversed, and an
//! old root left with a single child is suppressed. The best rooting is the
//! one whose hardwired clusters are closest to a reference network.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::network::{Edge, Network, Node};

/// Hardwired cluster of an internal edge: the taxa below it, tagged with
/// whether the edge is a hybrid edge.
type Cluster = (bool, Vec<String>);

/// Hardwired clusters of every edge leading to an internal node.
pub fn hardwired_clusters(net: &Network) -> BTreeSet<Cluster> {
    let below = net.descendant_leaves();
    net.edges()
        .iter()
        .filter(|edge| !net.is_leaf(edge.child))
        .map(|edge| {
            let mut taxa: Vec<String> = below[edge.child]
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b)
                .filter_map(|(v, _)| net.node(v).label.clone())
                .collect();
            taxa.sort();
            (edge.hybrid, taxa)
        })
        .collect()
}

/// Size of the symmetric difference between the hardwired cluster sets.
pub fn hardwired_cluster_distance(a: &Network, b: &Network) -> usize {
    let ca = hardwired_clusters(a);
    let cb = hardwired_clusters(b);
    ca.symmetric_difference(&cb).count()
}

/// Internal nodes reachable from the root through tree edges, root first.
pub fn root_candidates(net: &Network) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![net.root()];
    while let Some(v) = stack.pop() {
        if net.is_leaf(v) {
            continue;
        }
        out.push(v);
        for &e in net.child_edges(v).iter().rev() {
            if !net.edge(e).hybrid {
                stack.push(net.edge(e).child);
            }
        }
    }
    out
}

/// Copy of `net` rooted at node `v`.
pub fn reroot_at(net: &Network, v: usize) -> Result<Network> {
    if v == net.root() {
        return Ok(net.clone());
    }
    if !root_candidates(net).contains(&v) {
        return Err(Error::InvalidInput(format!(
            "node {v} is not reachable from the root through tree edges"
        )));
    }

    let mut path = Vec::new();
    let mut w = v;
    while w != net.root() {
        let e = net.parent_edges(w)[0];
        path.push(e);
        w = net.edge(e).parent;
    }

    let mut edges: Vec<Edge> = net.edges().to_vec();
    for &e in &path {
        let edge = &mut edges[e];
        std::mem::swap(&mut edge.parent, &mut edge.child);
    }

    let old_root = net.root();
    let into_old_root = path[path.len() - 1];
    let remaining: Vec<usize> = net
        .child_edges(old_root)
        .iter()
        .copied()
        .filter(|&e| e != into_old_root)
        .collect();

    let mut drop_edge = None;
    let mut drop_node = None;
    match remaining.as_slice() {
        [] => {
            drop_edge = Some(into_old_root);
            drop_node = Some(old_root);
        }
        [only] => {
            let upper = edges[into_old_root].clone();
            let lower = &mut edges[*only];
            lower.parent = upper.parent;
            lower.length = match (upper.length, lower.length) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
            drop_edge = Some(into_old_root);
            drop_node = Some(old_root);
        }
        _ => {}
    }

    let mut rerooted = compact(net.nodes(), edges, v, drop_node, drop_edge)?;
    rerooted.loglik = net.loglik;
    Ok(rerooted)
}

/// Rebuild a network without one node and one edge.
fn compact(
    nodes: &[Node],
    edges: Vec<Edge>,
    root: usize,
    drop_node: Option<usize>,
    drop_edge: Option<usize>,
) -> Result<Network> {
    let mut index = vec![usize::MAX; nodes.len()];
    let mut kept_nodes = Vec::with_capacity(nodes.len());
    for (v, node) in nodes.iter().enumerate() {
        if Some(v) != drop_node {
            index[v] = kept_nodes.len();
            kept_nodes.push(node.clone());
        }
    }
    let kept_edges = edges
        .into_iter()
        .enumerate()
        .filter(|&(e, _)| Some(e) != drop_edge)
        .map(|(_, mut edge)| {
            edge.parent = index[edge.parent];
            edge.child = index[edge.child];
            edge
        })
        .collect();
    Network::new(kept_nodes, kept_edges, index[root])
}

/// Reroot `net` at the candidate node whose hardwired clusters best match
/// `reference`. Ties keep the current root. Returns the achieved distance.
pub fn reroot(net: &mut Network, reference: &Network) -> Result<usize> {
    let mut best_distance = hardwired_cluster_distance(net, reference);
    let mut best: Option<Network> = None;
    for v in root_candidates(net).into_iter().skip(1) {
        if best_distance == 0 {
            break;
        }
        let candidate = reroot_at(net, v)?;
        let d = hardwired_cluster_distance(&candidate, reference);
        if d < best_distance {
            best_distance = d;
            best = Some(candidate);
        }
    }
    if let Some(better) = best {
        log::debug!("rerooted network, cluster distance {best_distance}");
        *net = better;
    }
    Ok(best_distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::{parse_network, write_newick};

    #[test]
    fn test_self_distance_zero() {
        let net = parse_network("((((D,C),((A,B))#H1),(#H1,E)),O);").unwrap();
        assert_eq!(hardwired_cluster_distance(&net, &net), 0);
        let mut copy = net.clone();
        assert_eq!(reroot(&mut copy, &net).unwrap(), 0);
        assert_eq!(write_newick(&copy), write_newick(&net));
    }

    #[test]
    fn test_hybrid_clusters_tagged() {
        let net = parse_network("((A,(B)#H1),(#H1,C));").unwrap();
        let clusters = hardwired_clusters(&net);
        assert!(clusters.contains(&(true, vec!["B".to_string()])));
        assert!(clusters.contains(&(false, vec!["A".to_string(), "B".to_string()])));
    }

    #[test]
    fn test_reroot_at_suppresses_old_root() {
        let net = parse_network("((A:1,B:1):0.5,(C:1,D:1):0.25);").unwrap();
        let x = net.edge(net.parent_edges(net.leaf("A").unwrap())[0]).parent;
        let rerooted = reroot_at(&net, x).unwrap();
        assert_eq!(rerooted.num_nodes(), net.num_nodes() - 1);
        assert_eq!(write_newick(&rerooted), "(A:1,B:1,(C:1,D:1):0.75);");
    }

    #[test]
    fn test_reroot_at_rejects_leaf_and_hybrid_side() {
        let net = parse_network("((A,(B,E)#H1),(#H1,C));").unwrap();
        assert!(reroot_at(&net, net.leaf("A").unwrap()).is_err());
        let h = net.hybrid_nodes()[0];
        assert!(reroot_at(&net, h).is_err());
    }

    #[test]
    fn test_reroot_matches_reference() {
        let reference = parse_network("((A,B),C,(D,E));").unwrap();
        let mut net = parse_network("((A,B),(C,(D,E)));").unwrap();
        assert_eq!(hardwired_cluster_distance(&net, &reference), 1);
        assert_eq!(reroot(&mut net, &reference).unwrap(), 0);
        assert_eq!(hardwired_cluster_distance(&net, &reference), 0);
        assert_eq!(net.child_edges(net.root()).len(), 3);
    }
}
