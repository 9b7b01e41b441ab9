//! Rooted phylogenetic network with branch lengths and inheritance proportions.
//!
//! Nodes and edges live in flat vectors and are addressed by index, as in
//! array-based tree representations. Each edge points from parent to child.
//! A hybrid (reticulation) node has exactly two parent edges, both flagged
//! `hybrid`, whose γ values sum to 1; the one with the larger γ is the major
//! edge. Every other non-root node has a single tree parent edge.
//!
//! The only mutations offered are on branch lengths, γ and the loglik score.
//! Rerooting builds a new network (see [`crate::prepare::reroot`]).

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A network node. Leaves carry a taxon label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub label: Option<String>,
    pub hybrid: bool,
}

/// A directed edge from `parent` to `child`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub parent: usize,
    pub child: usize,
    /// Length in coalescent units; `None` when unknown.
    pub length: Option<f64>,
    /// Inheritance proportion; 1.0 for tree edges.
    pub gamma: f64,
    pub hybrid: bool,
    /// Tree edges and the major parent edge of each hybrid node.
    pub major: bool,
}

impl Edge {
    /// Tree edge with an optional length.
    pub fn tree(parent: usize, child: usize, length: Option<f64>) -> Self {
        Self {
            parent,
            child,
            length,
            gamma: 1.0,
            hybrid: false,
            major: true,
        }
    }

    /// Minor hybrid edges are the only non-major edges.
    pub fn is_minor(&self) -> bool {
        !self.major
    }
}

/// Rooted, possibly reticulate network.
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    root: usize,
    /// Pseudo-deviance score of the network against quartet data, once computed.
    pub loglik: Option<f64>,
    #[serde(skip)]
    parent_edges: Vec<Vec<usize>>,
    #[serde(skip)]
    child_edges: Vec<Vec<usize>>,
    #[serde(skip)]
    leaf_index: HashMap<String, usize>,
}

impl Network {
    /// Build a network from its parts, checking structural validity.
    ///
    /// Requirements: the root has no parent; hybrid nodes have exactly two
    /// hybrid parent edges; other nodes have one tree parent edge; the graph
    /// is acyclic; leaves carry unique labels.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, root: usize) -> Result<Self> {
        if root >= nodes.len() {
            return Err(Error::InvalidInput(format!(
                "root index {root} out of range for {} nodes",
                nodes.len()
            )));
        }
        let mut parent_edges = vec![Vec::new(); nodes.len()];
        let mut child_edges = vec![Vec::new(); nodes.len()];
        for (e, edge) in edges.iter().enumerate() {
            if edge.parent >= nodes.len() || edge.child >= nodes.len() {
                return Err(Error::InvalidInput(format!("edge {e} points outside the network")));
            }
            parent_edges[edge.child].push(e);
            child_edges[edge.parent].push(e);
        }

        for (v, node) in nodes.iter().enumerate() {
            let parents = &parent_edges[v];
            if v == root {
                if !parents.is_empty() {
                    return Err(Error::InvalidInput("root has a parent edge".into()));
                }
                continue;
            }
            let expected = if node.hybrid { 2 } else { 1 };
            if parents.len() != expected {
                return Err(Error::InvalidInput(format!(
                    "node {v} has {} parent edges, expected {expected}",
                    parents.len()
                )));
            }
            if parents.iter().any(|&e| edges[e].hybrid != node.hybrid) {
                return Err(Error::InvalidInput(format!(
                    "node {v}: parent edge type does not match node type"
                )));
            }
        }

        let mut leaf_index = HashMap::new();
        for (v, node) in nodes.iter().enumerate() {
            if child_edges[v].is_empty() {
                let label = node.label.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("leaf node {v} has no label"))
                })?;
                if leaf_index.insert(label.clone(), v).is_some() {
                    return Err(Error::InvalidInput(format!("duplicate leaf label '{label}'")));
                }
            }
        }

        let net = Self {
            nodes,
            edges,
            root,
            loglik: None,
            parent_edges,
            child_edges,
            leaf_index,
        };
        if net.topological_order().len() != net.nodes.len() {
            return Err(Error::InvalidInput(
                "network has a directed cycle or unreachable nodes".into(),
            ));
        }
        Ok(net)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, v: usize) -> &Node {
        &self.nodes[v]
    }

    pub fn edge(&self, e: usize) -> &Edge {
        &self.edges[e]
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn parent_edges(&self, v: usize) -> &[usize] {
        &self.parent_edges[v]
    }

    pub fn child_edges(&self, v: usize) -> &[usize] {
        &self.child_edges[v]
    }

    pub fn is_leaf(&self, v: usize) -> bool {
        self.child_edges[v].is_empty()
    }

    /// Node index of the leaf with this label.
    pub fn leaf(&self, label: &str) -> Option<usize> {
        self.leaf_index.get(label).copied()
    }

    /// Leaf node indices in node order.
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&v| self.is_leaf(v)).collect()
    }

    /// Sorted leaf labels.
    pub fn leaf_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.leaf_index.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn num_leaves(&self) -> usize {
        self.leaf_index.len()
    }

    pub fn hybrid_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&v| self.nodes[v].hybrid).collect()
    }

    pub fn num_hybrids(&self) -> usize {
        self.nodes.iter().filter(|n| n.hybrid).count()
    }

    /// The other parent edge of the same hybrid node.
    pub fn partner(&self, e: usize) -> Option<usize> {
        let edge = &self.edges[e];
        if !edge.hybrid {
            return None;
        }
        self.parent_edges[edge.child].iter().copied().find(|&f| f != e)
    }

    /// Major parent edge of a non-root node.
    pub fn major_parent_edge(&self, v: usize) -> Option<usize> {
        self.parent_edges[v]
            .iter()
            .copied()
            .find(|&e| self.edges[e].major)
    }

    /// Nodes ordered so that every parent precedes its children.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.parent_edges.iter().map(Vec::len).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        if indegree[self.root] != 0 {
            return order;
        }
        while let Some(v) = stack.pop() {
            order.push(v);
            for &e in self.child_edges[v].iter().rev() {
                let c = self.edges[e].child;
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    stack.push(c);
                }
            }
        }
        order
    }

    /// Nodes ordered so that every child precedes its parents.
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Number of leaves below each node, following all edges.
    pub fn descendant_leaf_counts(&self) -> Vec<usize> {
        self.descendant_leaves()
            .iter()
            .map(|set| set.iter().filter(|&&b| b).count())
            .collect()
    }

    /// Leaf membership below each node, as a per-node boolean vector over node indices.
    pub fn descendant_leaves(&self) -> Vec<Vec<bool>> {
        let n = self.nodes.len();
        let mut below = vec![vec![false; n]; n];
        for v in self.postorder() {
            if self.is_leaf(v) {
                below[v][v] = true;
                continue;
            }
            let mut acc = vec![false; n];
            for &e in &self.child_edges[v] {
                let c = self.edges[e].child;
                for (slot, &b) in acc.iter_mut().zip(&below[c]) {
                    *slot |= b;
                }
            }
            below[v] = acc;
        }
        below
    }

    // -----------------------------------------------------------------------
    // Mutation (lengths, γ, score)
    // -----------------------------------------------------------------------

    pub fn set_length(&mut self, e: usize, length: Option<f64>) {
        self.edges[e].length = length;
    }

    /// Set γ on a hybrid edge; its partner receives `1 − γ` and the major
    /// flags follow the larger value (ties keep `e` major).
    pub fn set_gamma(&mut self, e: usize, gamma: f64) -> Result<()> {
        let partner = self
            .partner(e)
            .ok_or_else(|| Error::InvalidInput(format!("edge {e} is not a hybrid edge")))?;
        if !(0.0..=1.0).contains(&gamma) {
            return Err(Error::InvalidInput(format!("γ = {gamma} outside [0, 1]")));
        }
        self.edges[e].gamma = gamma;
        self.edges[partner].gamma = 1.0 - gamma;
        self.edges[e].major = gamma >= 0.5;
        self.edges[partner].major = gamma < 0.5;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Topology queries
    // -----------------------------------------------------------------------

    /// Resolution of a four-taxon set in the major tree.
    ///
    /// `taxa` are leaf node indices. Returns the index of the split in the
    /// order (12|34, 13|24, 14|23), or `None` if the major tree leaves the
    /// set unresolved.
    pub fn major_resolution(&self, taxa: [usize; 4]) -> Option<usize> {
        self.quartet_resolution(taxa, true)
    }

    /// Resolution of a four-taxon set in a tree (or in the major tree of a network).
    pub(crate) fn quartet_resolution(&self, taxa: [usize; 4], major_only: bool) -> Option<usize> {
        let mut mask = vec![0u8; self.nodes.len()];
        for (bit, &leaf) in taxa.iter().enumerate() {
            mask[leaf] |= 1 << bit;
        }
        for v in self.postorder() {
            for &e in &self.child_edges[v] {
                let edge = &self.edges[e];
                if major_only && !edge.major {
                    continue;
                }
                mask[v] |= mask[edge.child];
            }
            if v != self.root && mask[v].count_ones() == 2 {
                return Some(resolution_of_mask(mask[v]));
            }
        }
        None
    }

    /// Check that every biconnected component of the underlying undirected
    /// graph holds at most one hybrid node.
    pub fn check_level1(&self) -> Result<()> {
        for component in self.biconnected_components() {
            let hybrid_edges = component.iter().filter(|&&e| self.edges[e].hybrid).count();
            if hybrid_edges > 2 {
                let hybrids: Vec<usize> = component
                    .iter()
                    .filter(|&&e| self.edges[e].hybrid)
                    .map(|&e| self.edges[e].child)
                    .collect();
                return Err(Error::NotLevel1(format!(
                    "{} reticulations share a cycle (hybrid nodes {:?})",
                    hybrid_edges / 2,
                    dedup(hybrids)
                )));
            }
        }
        Ok(())
    }

    pub fn is_level1(&self) -> bool {
        self.check_level1().is_ok()
    }

    /// Edge sets of the biconnected components (Hopcroft-Tarjan).
    fn biconnected_components(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (e, edge) in self.edges.iter().enumerate() {
            adjacency[edge.parent].push((e, edge.child));
            adjacency[edge.child].push((e, edge.parent));
        }
        let mut state = Bicomponents {
            adjacency,
            disc: vec![usize::MAX; n],
            low: vec![0; n],
            time: 0,
            stack: Vec::new(),
            components: Vec::new(),
        };
        state.visit(self.root, None);
        state.components
    }
}

struct Bicomponents {
    adjacency: Vec<Vec<(usize, usize)>>,
    disc: Vec<usize>,
    low: Vec<usize>,
    time: usize,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl Bicomponents {
    fn visit(&mut self, u: usize, via: Option<usize>) {
        self.disc[u] = self.time;
        self.low[u] = self.time;
        self.time += 1;
        for i in 0..self.adjacency[u].len() {
            let (e, w) = self.adjacency[u][i];
            if Some(e) == via {
                continue;
            }
            if self.disc[w] == usize::MAX {
                self.stack.push(e);
                self.visit(w, Some(e));
                self.low[u] = self.low[u].min(self.low[w]);
                if self.low[w] >= self.disc[u] {
                    let mut component = Vec::new();
                    while let Some(f) = self.stack.pop() {
                        component.push(f);
                        if f == e {
                            break;
                        }
                    }
                    self.components.push(component);
                }
            } else if self.disc[w] < self.disc[u] {
                self.stack.push(e);
                self.low[u] = self.low[u].min(self.disc[w]);
            }
        }
    }
}

fn dedup(mut v: Vec<usize>) -> Vec<usize> {
    v.sort_unstable();
    v.dedup();
    v
}

/// Split index of a pair of quartet positions, in the order (12|34, 13|24, 14|23).
pub fn resolution_of_pair(i: usize, j: usize) -> usize {
    let (a, b) = if i < j { (i, j) } else { (j, i) };
    match (a, b) {
        (0, 1) | (2, 3) => 0,
        (0, 2) | (1, 3) => 1,
        _ => 2,
    }
}

/// Split index of a 4-bit mask with two bits set.
fn resolution_of_mask(mask: u8) -> usize {
    let bits: Vec<usize> = (0..4).filter(|&b| mask & (1 << b) != 0).collect();
    resolution_of_pair(bits[0], bits[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_network;

    #[test]
    fn test_resolution_of_pair_table() {
        assert_eq!(resolution_of_pair(0, 1), 0);
        assert_eq!(resolution_of_pair(3, 2), 0);
        assert_eq!(resolution_of_pair(0, 2), 1);
        assert_eq!(resolution_of_pair(1, 3), 1);
        assert_eq!(resolution_of_pair(0, 3), 2);
        assert_eq!(resolution_of_pair(2, 1), 2);
    }

    #[test]
    fn test_leaves_and_labels() {
        let net = parse_network("((A:1,B:1):1,(C:1,D:1):1);").unwrap();
        assert_eq!(net.num_leaves(), 4);
        assert_eq!(net.leaf_labels(), vec!["A", "B", "C", "D"]);
        assert!(net.leaf("C").is_some());
        assert!(net.leaf("E").is_none());
        assert_eq!(net.num_hybrids(), 0);
    }

    #[test]
    fn test_topological_order_parents_first() {
        let net = parse_network("((((D,C),((A,B))#H1),(#H1,E)),O);").unwrap();
        let order = net.topological_order();
        assert_eq!(order.len(), net.num_nodes());
        let pos: HashMap<usize, usize> = order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        for edge in net.edges() {
            assert!(pos[&edge.parent] < pos[&edge.child]);
        }
    }

    #[test]
    fn test_major_resolution_tree() {
        let net = parse_network("(((A,B),C),D);").unwrap();
        let taxa = ["A", "B", "C", "D"].map(|l| net.leaf(l).unwrap());
        assert_eq!(net.major_resolution(taxa), Some(0));
        let taxa = ["A", "C", "B", "D"].map(|l| net.leaf(l).unwrap());
        assert_eq!(net.major_resolution(taxa), Some(1));
    }

    #[test]
    fn test_major_resolution_polytomy_unresolved() {
        let net = parse_network("(A,B,C,D);").unwrap();
        let taxa = ["A", "B", "C", "D"].map(|l| net.leaf(l).unwrap());
        assert_eq!(net.major_resolution(taxa), None);
    }

    #[test]
    fn test_major_resolution_follows_major_edge() {
        // H1 is major under (C,H1): B groups with C in the major tree
        let net = parse_network("((A,#H1:1::0.2),(C,(B)#H1:1::0.8),D);").unwrap();
        let taxa = ["A", "B", "C", "D"].map(|l| net.leaf(l).unwrap());
        assert_eq!(net.major_resolution(taxa), Some(2));
    }

    #[test]
    fn test_set_gamma_swaps_major() {
        let mut net = parse_network("((A,#H1:1::0.2),(C,(B)#H1:1::0.8),D);").unwrap();
        let minor = net
            .edges()
            .iter()
            .position(|e| e.hybrid && !e.major)
            .unwrap();
        net.set_gamma(minor, 0.7).unwrap();
        assert!(net.edge(minor).major);
        let partner = net.partner(minor).unwrap();
        assert!(!net.edge(partner).major);
        assert!((net.edge(partner).gamma - 0.3).abs() < 1e-12);
        assert!(net.set_gamma(minor, 1.5).is_err());
    }

    #[test]
    fn test_level1_detection() {
        let tree = parse_network("((A,B),(C,D));").unwrap();
        assert!(tree.is_level1());
        let level1 = parse_network("((((D,C),((A,B))#H1),(#H1,E)),O);").unwrap();
        assert!(level1.is_level1());
        let two_separate =
            parse_network("(((A,(B)#H1),(#H1,C)),((D,(E)#H2),(#H2,F)));").unwrap();
        assert!(two_separate.is_level1());
        // the cycles of H1 and H2 share an edge
        let level2 = parse_network("((((A)#H2,B),(#H2,(C)#H1)),(#H1,D));").unwrap();
        let err = level2.check_level1().unwrap_err();
        assert!(matches!(err, Error::NotLevel1(_)));
    }

    #[test]
    fn test_invalid_structure_rejected() {
        let nodes = vec![
            Node { label: None, hybrid: false },
            Node { label: Some("A".into()), hybrid: false },
            Node { label: Some("A".into()), hybrid: false },
        ];
        let edges = vec![Edge::tree(0, 1, None), Edge::tree(0, 2, None)];
        assert!(Network::new(nodes, edges, 0).is_err());
    }

    #[test]
    fn test_descendant_leaf_counts() {
        let net = parse_network("((A,B),(C,(D,E)));").unwrap();
        let counts = net.descendant_leaf_counts();
        assert_eq!(counts[net.root()], 5);
        assert_eq!(counts[net.leaf("A").unwrap()], 1);
    }
}
