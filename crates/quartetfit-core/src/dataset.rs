//! Quartet concordance-factor table.
//!
//! One record per four-taxon set: the taxa, the observed CFs of the three
//! resolutions (12|34, 13|24, 14|23), the number of informative genes, and,
//! once computed, the expected CFs and the outlier p-value. The JSON form is
//! an array of flat rows with columns `t1..t4`, `CF12_34`, `CF13_24`,
//! `CF14_23`, `ngenes`, and optionally `expCF12_34..` and `p_value`.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::Network;

/// Tolerance on `CF12_34 + CF13_24 + CF14_23 = 1`.
pub const CF_SUM_TOLERANCE: f64 = 1e-6;

/// Observed and expected concordance factors of one four-taxon set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QuartetRow", into = "QuartetRow")]
pub struct QuartetRecord {
    pub taxa: [String; 4],
    pub obs_cf: [f64; 3],
    /// Number of genes informative about this set (possibly fractional).
    pub ngenes: f64,
    pub exp_cf: Option<[f64; 3]>,
    pub p_value: Option<f64>,
}

impl QuartetRecord {
    pub fn new(taxa: [&str; 4], obs_cf: [f64; 3], ngenes: f64) -> Self {
        Self {
            taxa: taxa.map(str::to_string),
            obs_cf,
            ngenes,
            exp_cf: None,
            p_value: None,
        }
    }

    fn describe(&self) -> String {
        self.taxa.join(",")
    }
}

#[derive(Serialize, Deserialize)]
struct QuartetRow {
    t1: String,
    t2: String,
    t3: String,
    t4: String,
    #[serde(rename = "CF12_34")]
    cf12_34: f64,
    #[serde(rename = "CF13_24")]
    cf13_24: f64,
    #[serde(rename = "CF14_23")]
    cf14_23: f64,
    ngenes: f64,
    #[serde(rename = "expCF12_34", default, skip_serializing_if = "Option::is_none")]
    exp12_34: Option<f64>,
    #[serde(rename = "expCF13_24", default, skip_serializing_if = "Option::is_none")]
    exp13_24: Option<f64>,
    #[serde(rename = "expCF14_23", default, skip_serializing_if = "Option::is_none")]
    exp14_23: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p_value: Option<f64>,
}

impl From<QuartetRow> for QuartetRecord {
    fn from(row: QuartetRow) -> Self {
        let exp_cf = match (row.exp12_34, row.exp13_24, row.exp14_23) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };
        Self {
            taxa: [row.t1, row.t2, row.t3, row.t4],
            obs_cf: [row.cf12_34, row.cf13_24, row.cf14_23],
            ngenes: row.ngenes,
            exp_cf,
            p_value: row.p_value,
        }
    }
}

impl From<QuartetRecord> for QuartetRow {
    fn from(record: QuartetRecord) -> Self {
        let [t1, t2, t3, t4] = record.taxa;
        let exp = record.exp_cf.map(|e| e.map(Some)).unwrap_or([None; 3]);
        Self {
            t1,
            t2,
            t3,
            t4,
            cf12_34: record.obs_cf[0],
            cf13_24: record.obs_cf[1],
            cf14_23: record.obs_cf[2],
            ngenes: record.ngenes,
            exp12_34: exp[0],
            exp13_24: exp[1],
            exp14_23: exp[2],
            p_value: record.p_value,
        }
    }
}

/// Table of quartet records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuartetDataset {
    records: Vec<QuartetRecord>,
}

impl QuartetDataset {
    pub fn new(records: Vec<QuartetRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[QuartetRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [QuartetRecord] {
        &mut self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QuartetRecord> {
        self.records.iter()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Every observed CF lies in [0, 1] and each row sums to 1.
    pub fn validate(&self) -> Result<()> {
        if self.records.is_empty() {
            return Err(Error::InvalidData("no four-taxon sets".into()));
        }
        for record in &self.records {
            if record.obs_cf.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                return Err(Error::InvalidData(format!(
                    "CFs of {} outside [0, 1]",
                    record.describe()
                )));
            }
            let total: f64 = record.obs_cf.iter().sum();
            if (total - 1.0).abs() > CF_SUM_TOLERANCE {
                return Err(Error::InvalidData(format!(
                    "CFs of {} sum to {total}, not 1",
                    record.describe()
                )));
            }
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus a positive, finite gene count per row.
    pub fn validate_multinomial(&self) -> Result<()> {
        self.validate()?;
        for record in &self.records {
            if !(record.ngenes.is_finite() && record.ngenes > 0.0) {
                return Err(Error::InvalidData(format!(
                    "{} has {} informative genes",
                    record.describe(),
                    record.ngenes
                )));
            }
        }
        Ok(())
    }

    /// All taxa named in the table.
    pub fn taxa(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .flat_map(|r| r.taxa.iter().cloned())
            .collect()
    }

    /// Every taxon of the table is a leaf of `net`.
    pub fn check_taxa(&self, net: &Network) -> Result<()> {
        let missing: Vec<String> = self
            .taxa()
            .into_iter()
            .filter(|t| net.leaf(t).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::TaxonMismatch(format!(
                "taxa not in network: {}",
                missing.join(", ")
            )))
        }
    }

    /// Median informative-gene count, used as the number of simulated genes.
    pub fn median_ngenes(&self) -> f64 {
        let mut counts = self.gene_counts();
        if counts.is_empty() {
            return 0.0;
        }
        counts.sort_by(|a, b| a.total_cmp(b));
        let mid = counts.len() / 2;
        if counts.len() % 2 == 1 {
            counts[mid]
        } else {
            (counts[mid - 1] + counts[mid]) / 2.0
        }
    }

    // -----------------------------------------------------------------------
    // Column access
    // -----------------------------------------------------------------------

    pub fn observed(&self) -> Vec<[f64; 3]> {
        self.records.iter().map(|r| r.obs_cf).collect()
    }

    pub fn gene_counts(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ngenes).collect()
    }

    /// Expected CFs of every record; fails if any is missing.
    pub fn expected(&self) -> Result<Vec<[f64; 3]>> {
        self.records
            .iter()
            .map(|r| {
                r.exp_cf.ok_or_else(|| {
                    Error::InvalidInput(format!("expected CFs of {} not computed", r.describe()))
                })
            })
            .collect()
    }

    pub fn p_values(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.p_value).collect()
    }

    pub fn set_p_values(&mut self, p_values: &[f64]) -> Result<()> {
        if p_values.len() != self.records.len() {
            return Err(Error::InvalidInput(format!(
                "{} p-values for {} records",
                p_values.len(),
                self.records.len()
            )));
        }
        for (record, &p) in self.records.iter_mut().zip(p_values) {
            record.p_value = Some(p);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // JSON I/O
    // -----------------------------------------------------------------------

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_reader(BufReader::new(file))
    }

    pub fn to_json_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.to_json_writer(&mut writer)?;
        writer.flush().map_err(|e| Error::io(path, e))
    }
}

impl<'a> IntoIterator for &'a QuartetDataset {
    type Item = &'a QuartetRecord;
    type IntoIter = std::slice::Iter<'a, QuartetRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Gene-tree counting
// ---------------------------------------------------------------------------

/// Observed CFs and informative-gene counts of each record's four taxa,
/// counted over a set of gene trees.
///
/// `tip_suffix` is stripped from gene-tree tip labels before matching (the
/// simulator may append one). A gene tree counts for a four-taxon set only if
/// it carries all four taxa and resolves them; CFs of a set with no
/// informative gene are `[0, 0, 0]` with a count of 0.
pub fn observed_from_gene_trees(
    dataset: &QuartetDataset,
    trees: &[Network],
    tip_suffix: &str,
) -> Vec<([f64; 3], f64)> {
    let lookups: Vec<HashMap<String, usize>> = trees
        .iter()
        .map(|tree| {
            tree.leaves()
                .into_iter()
                .filter_map(|v| {
                    let label = tree.node(v).label.as_deref()?;
                    let taxon = label.strip_suffix(tip_suffix).unwrap_or(label);
                    Some((taxon.to_string(), v))
                })
                .collect()
        })
        .collect();

    dataset
        .iter()
        .map(|record| {
            let mut counts = [0.0_f64; 3];
            for (tree, lookup) in trees.iter().zip(&lookups) {
                let mut leaves = [0usize; 4];
                let found = record.taxa.iter().zip(leaves.iter_mut()).all(|(t, slot)| {
                    match lookup.get(t) {
                        Some(&v) => {
                            *slot = v;
                            true
                        }
                        None => false,
                    }
                });
                if !found {
                    continue;
                }
                if let Some(split) = tree.quartet_resolution(leaves, false) {
                    counts[split] += 1.0;
                }
            }
            let n: f64 = counts.iter().sum();
            if n > 0.0 {
                (counts.map(|c| c / n), n)
            } else {
                ([0.0; 3], 0.0)
            }
        })
        .collect()
}
