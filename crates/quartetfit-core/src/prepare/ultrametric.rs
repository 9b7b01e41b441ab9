//! Fill missing branch lengths so the major tree is time-consistent.

use crate::network::Network;

const TOLERANCE: f64 = 1e-8;

/// Outcome of [`ultrametrize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UltrametricReport {
    /// Number of edges whose missing length was assigned.
    pub assigned: usize,
    /// Whether all leaves end at the same depth in the major tree.
    pub ultrametric: bool,
}

/// Assign every missing branch length, making the major tree ultrametric
/// when possible.
///
/// * missing internal tree and major hybrid lengths become 0;
/// * missing external lengths bring their leaf to the common leaf depth,
///   the smallest one compatible with the known lengths;
/// * missing minor hybrid lengths match the hybrid node's depth, or 0 when
///   the minor parent is already deeper.
///
/// Known lengths are never changed. If the result is still not ultrametric
/// a warning is logged (when `verbose`) and the network is used as is.
/// Applying it twice changes nothing the second time.
pub fn ultrametrize(net: &mut Network, verbose: bool) -> UltrametricReport {
    let mut assigned = 0;

    for e in 0..net.num_edges() {
        let edge = net.edge(e);
        if edge.length.is_none() && edge.major && !net.is_leaf(edge.child) {
            net.set_length(e, Some(0.0));
            assigned += 1;
        }
    }

    let depth = major_depths(net);
    let mut height: f64 = 0.0;
    for v in net.leaves() {
        let Some(e) = net.major_parent_edge(v) else { continue };
        let edge = net.edge(e);
        height = height.max(match edge.length {
            Some(len) => depth[edge.parent] + len,
            None => depth[edge.parent],
        });
    }

    for v in net.leaves() {
        let Some(e) = net.major_parent_edge(v) else { continue };
        if net.edge(e).length.is_none() {
            let parent = net.edge(e).parent;
            net.set_length(e, Some(height - depth[parent]));
            assigned += 1;
        }
    }

    let depth = major_depths(net);
    let mut ultrametric = true;
    for v in net.leaves() {
        if (depth[v] - height).abs() > TOLERANCE * height.max(1.0) {
            ultrametric = false;
        }
    }
    if !ultrametric {
        report(
            verbose,
            "major tree is not ultrametric after filling missing lengths; using it as is",
        );
    }

    for e in 0..net.num_edges() {
        let edge = net.edge(e);
        if !edge.is_minor() {
            continue;
        }
        let gap = depth[edge.child] - depth[edge.parent];
        let length = edge.length;
        match length {
            None if gap < -TOLERANCE => {
                report(
                    verbose,
                    &format!("minor edge {e} starts below its hybrid node; length set to 0"),
                );
                net.set_length(e, Some(0.0));
                assigned += 1;
            }
            None => {
                net.set_length(e, Some(gap.max(0.0)));
                assigned += 1;
            }
            Some(len) if (len - gap).abs() > TOLERANCE * height.max(1.0) => {
                log::debug!("minor edge {e} has length {len}, time-consistent value {gap}");
            }
            Some(_) => {}
        }
    }

    UltrametricReport {
        assigned,
        ultrametric,
    }
}

fn report(verbose: bool, msg: &str) {
    if verbose {
        log::warn!("{msg}");
    } else {
        log::debug!("{msg}");
    }
}

/// Depth of each node from the root along major edges; unknown lengths count as 0.
fn major_depths(net: &Network) -> Vec<f64> {
    let mut depth = vec![0.0; net.num_nodes()];
    for v in net.topological_order() {
        if let Some(e) = net.major_parent_edge(v) {
            let edge = net.edge(e);
            depth[v] = depth[edge.parent] + edge.length.unwrap_or(0.0);
        }
    }
    depth
}
