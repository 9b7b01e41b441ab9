//! Extended Newick reading and writing.
//!
//! Reticulations use the `#H1` tag convention: a hybrid node appears once
//! with its subtree and once more as a bare `#H1` leaf, and the two
//! occurrences are merged into a single node with two parent edges. Edge
//! annotations follow `:length:support:gamma`, where any field may be empty.
//!
//! Writers produce the same extended Newick dialect and the tagged format
//! expected by the hybrid-Lambda simulator.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::network::{Edge, Network, Node};

/// γ given to the occurrence carrying the subtree when no γ is annotated.
pub const DEFAULT_MAJOR_GAMMA: f64 = 0.9;

const LABEL_DELIMITERS: &[u8] = b",():;[";

// ============================================================================
// Reading
// ============================================================================

/// Parse a single network (or tree) terminated by `;`.
pub fn parse_network(text: &str) -> Result<Network> {
    let mut reader = NewickReader::new(text);
    let net = reader.next_network()?.ok_or_else(|| Error::Newick("empty input".into()))?;
    reader.skip_blank()?;
    if !reader.at_end() {
        return Err(reader.error("trailing characters after ';'"));
    }
    Ok(net)
}

/// Parse every `;`-terminated tree in `text`, e.g. a file of gene trees.
pub fn parse_tree_list(text: &str) -> Result<Vec<Network>> {
    let mut reader = NewickReader::new(text);
    let mut trees = Vec::new();
    while let Some(tree) = reader.next_network()? {
        trees.push(tree);
    }
    Ok(trees)
}

pub fn read_network_file(path: &Path) -> Result<Network> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_network(text.trim())
}

pub fn read_tree_file(path: &Path) -> Result<Vec<Network>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_tree_list(&text)
}

struct RawNode {
    label: Option<String>,
    tag: Option<String>,
    has_subtree: bool,
}

struct RawEdge {
    parent: usize,
    child: usize,
    length: Option<f64>,
    gamma: Option<f64>,
    /// The child occurrence on this edge carried the subtree.
    carries_subtree: bool,
}

#[derive(Default)]
struct EdgeFields {
    length: Option<f64>,
    gamma: Option<f64>,
}

struct NewickReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    nodes: Vec<RawNode>,
    edges: Vec<RawEdge>,
    tags: HashMap<String, usize>,
}

impl<'a> NewickReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            tags: HashMap::new(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, msg: &str) -> Error {
        Error::Newick(format!("{msg} at byte {}", self.pos))
    }

    /// Skip whitespace and `[...]` comments.
    fn skip_blank(&mut self) -> Result<()> {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'[' {
                match self.bytes[self.pos..].iter().position(|&c| c == b']') {
                    Some(offset) => self.pos += offset + 1,
                    None => return Err(self.error("unterminated comment")),
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn next_network(&mut self) -> Result<Option<Network>> {
        self.skip_blank()?;
        if self.at_end() {
            return Ok(None);
        }
        self.nodes.clear();
        self.edges.clear();
        self.tags.clear();

        let (root, _) = self.subtree()?;
        // root edge annotations are accepted and dropped
        self.edge_fields()?;
        self.skip_blank()?;
        if self.peek() != Some(b';') {
            return Err(self.error("expected ';'"));
        }
        self.pos += 1;
        self.finish(root).map(Some)
    }

    fn subtree(&mut self) -> Result<(usize, bool)> {
        self.skip_blank()?;
        let mut children = Vec::new();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let (child, carries) = self.subtree()?;
                let fields = self.edge_fields()?;
                children.push((child, carries, fields));
                self.skip_blank()?;
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }

        let text = self.label()?;
        let (name, tag) = match text.find('#') {
            Some(i) => (text[..i].to_string(), Some(text[i + 1..].to_string())),
            None => (text, None),
        };
        let name = (!name.is_empty()).then_some(name);

        let id = match tag {
            Some(tag) if tag.is_empty() => return Err(self.error("empty hybrid tag")),
            Some(tag) => match self.tags.get(&tag) {
                Some(&id) => {
                    if name.is_some() {
                        self.nodes[id].label = name;
                    }
                    id
                }
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(RawNode {
                        label: name,
                        tag: Some(tag.clone()),
                        has_subtree: false,
                    });
                    self.tags.insert(tag, id);
                    id
                }
            },
            None => {
                self.nodes.push(RawNode {
                    label: name,
                    tag: None,
                    has_subtree: false,
                });
                self.nodes.len() - 1
            }
        };

        let carries = !children.is_empty();
        if carries {
            if self.nodes[id].has_subtree {
                return Err(self.error("hybrid node has two subtrees"));
            }
            self.nodes[id].has_subtree = true;
        }
        for (child, carries_subtree, fields) in children {
            self.edges.push(RawEdge {
                parent: id,
                child,
                length: fields.length,
                gamma: fields.gamma,
                carries_subtree,
            });
        }
        Ok((id, carries))
    }

    fn label(&mut self) -> Result<String> {
        self.skip_blank()?;
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            let mut out = Vec::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted label")),
                    Some(b'\'') if self.bytes.get(self.pos + 1) == Some(&b'\'') => {
                        out.push(b'\'');
                        self.pos += 2;
                    }
                    Some(b'\'') => {
                        self.pos += 1;
                        break;
                    }
                    Some(b) => {
                        out.push(b);
                        self.pos += 1;
                    }
                }
            }
            return String::from_utf8(out).map_err(|_| self.error("label is not UTF-8"));
        }
        let start = self.pos;
        while let Some(b) = self.peek() {
            if LABEL_DELIMITERS.contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8(self.bytes[start..self.pos].to_vec())
            .map_err(|_| self.error("label is not UTF-8"))
    }

    fn edge_fields(&mut self) -> Result<EdgeFields> {
        let mut fields = EdgeFields::default();
        self.skip_blank()?;
        for slot in 0..3 {
            if self.peek() != Some(b':') {
                break;
            }
            self.pos += 1;
            let value = self.number()?;
            match slot {
                0 => fields.length = value,
                2 => fields.gamma = value,
                _ => {}
            }
        }
        Ok(fields)
    }

    fn number(&mut self) -> Result<Option<f64>> {
        self.skip_blank()?;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if LABEL_DELIMITERS.contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("number is not UTF-8"))?;
        text.parse::<f64>()
            .map(Some)
            .map_err(|_| self.error(&format!("invalid number '{text}'")))
    }

    /// Assign γ and major flags to hybrid edges and build the network.
    fn finish(&mut self, root: usize) -> Result<Network> {
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (e, edge) in self.edges.iter().enumerate() {
            parents[edge.child].push(e);
        }

        let mut edges: Vec<Edge> = self
            .edges
            .iter()
            .map(|raw| Edge::tree(raw.parent, raw.child, raw.length))
            .collect();

        for (v, node) in self.nodes.iter().enumerate() {
            let Some(tag) = &node.tag else { continue };
            if parents[v].len() != 2 {
                return Err(Error::Newick(format!(
                    "hybrid #{tag} has {} parent edges, expected 2",
                    parents[v].len()
                )));
            }
            if !node.has_subtree {
                return Err(Error::Newick(format!("hybrid #{tag} has no subtree")));
            }
            let (a, b) = (parents[v][0], parents[v][1]);
            let (ga, gb) = match (self.edges[a].gamma, self.edges[b].gamma) {
                (Some(ga), Some(gb)) => {
                    let total = ga + gb;
                    if (total - 1.0).abs() > 1e-6 {
                        log::warn!("γ of hybrid #{tag} sum to {total}; rescaling to 1");
                        (ga / total, gb / total)
                    } else {
                        (ga, gb)
                    }
                }
                (Some(ga), None) => (ga, 1.0 - ga),
                (None, Some(gb)) => (1.0 - gb, gb),
                (None, None) if self.edges[a].carries_subtree => {
                    (DEFAULT_MAJOR_GAMMA, 1.0 - DEFAULT_MAJOR_GAMMA)
                }
                (None, None) => (1.0 - DEFAULT_MAJOR_GAMMA, DEFAULT_MAJOR_GAMMA),
            };
            if !(0.0..=1.0).contains(&ga) || !(0.0..=1.0).contains(&gb) {
                return Err(Error::Newick(format!("γ of hybrid #{tag} outside [0, 1]")));
            }
            let a_major = ga > gb || (ga == gb && self.edges[a].carries_subtree);
            for (e, gamma, major) in [(a, ga, a_major), (b, gb, !a_major)] {
                edges[e].hybrid = true;
                edges[e].gamma = gamma;
                edges[e].major = major;
            }
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (v, raw) in self.nodes.iter().enumerate() {
            let leaf = !self.edges.iter().any(|e| e.parent == v);
            if leaf && raw.label.is_none() {
                return Err(Error::Newick(format!("unlabelled leaf (node {v})")));
            }
            nodes.push(Node {
                label: raw.label.clone(),
                hybrid: raw.tag.is_some(),
            });
        }
        Network::new(nodes, edges, root).map_err(|e| Error::Newick(e.to_string()))
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Extended Newick text of a network. Hybrid nodes are written as `#H<k>`,
/// with the subtree under the major occurrence and `:length::gamma` on both
/// hybrid edges.
pub fn write_newick(net: &Network) -> String {
    let tags = hybrid_tags(net);
    let mut out = String::new();
    write_extended(net, net.root(), None, &tags, &mut out);
    out.push(';');
    out
}

fn write_extended(
    net: &Network,
    v: usize,
    via: Option<usize>,
    tags: &HashMap<usize, usize>,
    out: &mut String,
) {
    let node = net.node(v);
    let minor_occurrence = via.is_some_and(|e| net.edge(e).is_minor());
    if !minor_occurrence && !net.is_leaf(v) {
        out.push('(');
        for (i, &e) in net.child_edges(v).iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_extended(net, net.edge(e).child, Some(e), tags, out);
        }
        out.push(')');
    }
    if let Some(label) = &node.label {
        out.push_str(&quote_label(label));
    }
    if let Some(k) = tags.get(&v) {
        let _ = write!(out, "#H{k}");
    }
    if let Some(e) = via {
        let edge = net.edge(e);
        if edge.hybrid {
            out.push(':');
            if let Some(len) = edge.length {
                let _ = write!(out, "{len}");
            }
            let _ = write!(out, "::{}", edge.gamma);
        } else if let Some(len) = edge.length {
            let _ = write!(out, ":{len}");
        }
    }
}

/// Network in the tagged format read by hybrid-Lambda: internal tree nodes
/// are named `I1, I2, ...` in postorder, hybrid occurrences are written
/// `H<k>#<major γ>`, and every non-root edge must have a length.
pub fn write_hybrid_lambda(net: &Network) -> Result<String> {
    let tags = hybrid_tags(net);
    let mut out = String::new();
    let mut counter = 0;
    write_tagged(net, net.root(), None, &tags, &mut counter, &mut out)?;
    out.push(';');
    Ok(out)
}

fn write_tagged(
    net: &Network,
    v: usize,
    via: Option<usize>,
    tags: &HashMap<usize, usize>,
    counter: &mut usize,
    out: &mut String,
) -> Result<()> {
    let minor_occurrence = via.is_some_and(|e| net.edge(e).is_minor());
    if !minor_occurrence && !net.is_leaf(v) {
        out.push('(');
        for (i, &e) in net.child_edges(v).iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_tagged(net, net.edge(e).child, Some(e), tags, counter, out)?;
        }
        out.push(')');
    }

    if let Some(k) = tags.get(&v) {
        let major_gamma = net
            .parent_edges(v)
            .iter()
            .map(|&e| net.edge(e).gamma)
            .fold(0.0_f64, f64::max);
        let _ = write!(out, "H{k}#{major_gamma}");
    } else if net.is_leaf(v) {
        if let Some(label) = &net.node(v).label {
            out.push_str(label);
        }
    } else {
        *counter += 1;
        let _ = write!(out, "I{counter}");
    }

    if let Some(e) = via {
        let len = net
            .edge(e)
            .length
            .ok_or(Error::MissingBranchLength { edge: e })?;
        let _ = write!(out, ":{len}");
    }
    Ok(())
}

/// Hybrid node index -> tag number (1-based, in node order).
fn hybrid_tags(net: &Network) -> HashMap<usize, usize> {
    net.hybrid_nodes()
        .into_iter()
        .enumerate()
        .map(|(i, v)| (v, i + 1))
        .collect()
}

fn quote_label(label: &str) -> String {
    let needs_quotes = label
        .bytes()
        .any(|b| LABEL_DELIMITERS.contains(&b) || b == b'\'' || b == b'#' || b.is_ascii_whitespace());
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}
