//! Network preparation before expected-CF computation and simulation.

mod reroot;
mod ultrametric;

pub use reroot::{
    hardwired_cluster_distance, hardwired_clusters, reroot, reroot_at, root_candidates,
};
pub use ultrametric::{UltrametricReport, ultrametrize};
