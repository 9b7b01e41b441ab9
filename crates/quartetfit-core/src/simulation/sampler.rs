//! Gene-tree samplers: the seam between the engine and a coalescent simulator.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::newick::write_hybrid_lambda;

/// Environment variable naming the hybrid-Lambda executable.
pub const HYBRID_LAMBDA_ENV: &str = "QUARTETFIT_HYBRID_LAMBDA";

/// Default executable name looked up on `PATH`.
pub const HYBRID_LAMBDA_PROGRAM: &str = "hybrid-Lambda";

/// Simulates gene trees along a network under the coalescent.
///
/// Implementations must be deterministic for a given seed and safe to call
/// from several worker threads at once.
pub trait GeneTreeSampler: Sync {
    /// Simulate `ngenes` gene trees with one individual per taxon, write them
    /// to a file under `dir` whose name starts with `stem`, and return its path.
    fn simulate(
        &self,
        network: &Network,
        ngenes: usize,
        seed: u64,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf>;

    /// Suffix the sampler appends to tip labels (stripped before counting).
    fn tip_suffix(&self) -> &str {
        ""
    }

    fn name(&self) -> &str;
}

/// Runs the external hybrid-Lambda program.
#[derive(Debug, Clone)]
pub struct HybridLambda {
    pub program: PathBuf,
}

impl HybridLambda {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Executable from `QUARTETFIT_HYBRID_LAMBDA`, else `hybrid-Lambda` on `PATH`.
    pub fn from_env() -> Option<Self> {
        if let Some(path) = std::env::var_os(HYBRID_LAMBDA_ENV) {
            return Some(Self::new(path));
        }
        command_exists(HYBRID_LAMBDA_PROGRAM).then(|| Self::new(HYBRID_LAMBDA_PROGRAM))
    }
}

impl GeneTreeSampler for HybridLambda {
    fn simulate(
        &self,
        network: &Network,
        ngenes: usize,
        seed: u64,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        let tagged = write_hybrid_lambda(network)?;
        let output = Command::new(&self.program)
            .arg("-spcu")
            .arg(&tagged)
            .arg("-num")
            .arg(ngenes.to_string())
            .arg("-seed")
            .arg(seed.to_string())
            .arg("-o")
            .arg(dir.join(stem))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::io(&self.program, e))?;

        log::trace!("hybrid-Lambda stdout: {}", String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            return Err(Error::InvalidInput(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path = dir.join(format!("{stem}_coal_unit"));
        if !path.is_file() {
            return Err(Error::InvalidInput(format!(
                "{} produced no gene-tree file {}",
                self.program.display(),
                path.display()
            )));
        }
        Ok(path)
    }

    fn tip_suffix(&self) -> &str {
        "_1"
    }

    fn name(&self) -> &str {
        "hybrid-Lambda"
    }
}

/// Check if a command exists by running `which`.
pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
