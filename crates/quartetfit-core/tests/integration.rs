//! End-to-end tests of the goodness-of-fit engine with an in-process gene-tree sampler.

use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use quartetfit_core::{
    Correction, Error, GeneTreeSampler, GofConfig, Network, OutlierStatistic, QuartetDataset,
    QuartetRecord, Result, TicrConfig, expected_cf_by_label, hardwired_cluster_distance,
    parse_network, quartet_gof_test, reroot, ticr_test, ultrametrize, write_newick,
};

const NETWORK: &str = "((((D:0.7,C:0.7):0.8,(A:0.5,B:0.5):1.0):0.6,E:2.1):1.0,O:3.1);";

/// Writes caterpillar gene trees over shuffled taxa; deterministic per seed.
struct ShuffledCaterpillars;

impl GeneTreeSampler for ShuffledCaterpillars {
    fn simulate(
        &self,
        network: &Network,
        ngenes: usize,
        seed: u64,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut labels = network.leaf_labels();
        let mut text = String::new();
        for _ in 0..ngenes {
            labels.shuffle(&mut rng);
            let mut tree = format!("{}_1", labels[0]);
            for label in &labels[1..] {
                tree = format!("({tree},{label}_1)");
            }
            text.push_str(&tree);
            text.push_str(";\n");
        }
        let path = dir.join(format!("{stem}_coal_unit"));
        fs::write(&path, text).map_err(|e| Error::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    fn tip_suffix(&self) -> &str {
        "_1"
    }

    fn name(&self) -> &str {
        "shuffled caterpillars"
    }
}

/// Always fails, as a crashed simulator would.
struct BrokenSampler;

impl GeneTreeSampler for BrokenSampler {
    fn simulate(&self, _: &Network, _: usize, _: u64, _: &Path, _: &str) -> Result<PathBuf> {
        Err(Error::InvalidInput("simulator exited with status 1".into()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn five_taxon_sets() -> Vec<[&'static str; 4]> {
    vec![
        ["A", "B", "C", "D"],
        ["A", "B", "C", "E"],
        ["A", "B", "D", "E"],
        ["A", "C", "D", "E"],
        ["B", "C", "D", "E"],
    ]
}

/// Dataset on five taxa: the first set matches the network exactly, the
/// others are perturbed.
fn dataset(net: &Network) -> QuartetDataset {
    let records = five_taxon_sets()
        .into_iter()
        .enumerate()
        .map(|(i, taxa)| {
            let exp = expected_cf_by_label(net, taxa).unwrap();
            let obs = if i == 0 {
                exp
            } else {
                let shift = 0.04 * i as f64;
                let major = (0..3).fold(0, |b, j| if exp[j] > exp[b] { j } else { b });
                let mut obs = exp;
                let take = shift.min(obs[major] - 0.01);
                obs[major] -= take;
                obs[(major + 1) % 3] += take;
                obs
            };
            QuartetRecord::new(taxa, obs, 60.0 + 10.0 * i as f64)
        })
        .collect();
    QuartetDataset::new(records)
}

fn simulation_config(parent: &Path, nsim: usize, workers: usize) -> GofConfig {
    GofConfig {
        nsim,
        seed: 4321,
        workers: Some(workers),
        temp_parent: Some(parent.to_path_buf()),
        ..GofConfig::default()
    }
}

#[test]
fn exact_quartet_has_p_value_one() {
    let net = parse_network(NETWORK).unwrap();
    let mut data = dataset(&net);
    let config = GofConfig {
        correction: Correction::None,
        ..GofConfig::default()
    };
    let result = quartet_gof_test(&net, &mut data, false, &config, None).unwrap();
    assert!((result.outlier_p_values[0] - 1.0).abs() < 1e-12);
    assert_eq!(data.records()[0].p_value, Some(result.outlier_p_values[0]));
    assert!(result.outlier_p_values.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(result.sigma, 1.0);
}

#[test]
fn uncorrected_test_is_bit_identical_across_runs() {
    let net = parse_network(NETWORK).unwrap();
    for statistic in [
        OutlierStatistic::Lrt,
        OutlierStatistic::Qlog,
        OutlierStatistic::Pearson,
    ] {
        let config = GofConfig {
            statistic,
            correction: Correction::None,
            ..GofConfig::default()
        };
        let mut first_data = dataset(&net);
        let mut second_data = dataset(&net);
        let first = quartet_gof_test(&net, &mut first_data, true, &config, None).unwrap();
        let second = quartet_gof_test(&net, &mut second_data, true, &config, None).unwrap();
        assert_eq!(first.z.to_bits(), second.z.to_bits());
        assert_eq!(first.p_value.to_bits(), second.p_value.to_bits());
        for (a, b) in first.outlier_p_values.iter().zip(&second.outlier_p_values) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(write_newick(&first.network), write_newick(&second.network));
    }
}

#[test]
fn simulation_is_seed_deterministic_and_worker_independent() {
    let net = parse_network(NETWORK).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut data = dataset(&net);
    let one = quartet_gof_test(
        &net,
        &mut data,
        false,
        &simulation_config(dir.path(), 12, 1),
        Some(&ShuffledCaterpillars),
    )
    .unwrap();
    let mut data = dataset(&net);
    let three = quartet_gof_test(
        &net,
        &mut data,
        false,
        &simulation_config(dir.path(), 12, 3),
        Some(&ShuffledCaterpillars),
    )
    .unwrap();

    assert_eq!(one.sigma.to_bits(), three.sigma.to_bits());
    let (a, b) = (one.simulated_z.unwrap(), three.simulated_z.unwrap());
    assert_eq!(a.len(), 12);
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    let mean_sq = a.iter().map(|z| z * z).sum::<f64>() / a.len() as f64;
    assert!((one.sigma - mean_sq.sqrt()).abs() < 1e-12);

    // temporary directories are gone
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn single_replicate_sigma_is_abs_z() {
    let net = parse_network(NETWORK).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut data = dataset(&net);
    let result = quartet_gof_test(
        &net,
        &mut data,
        false,
        &simulation_config(dir.path(), 1, 4),
        Some(&ShuffledCaterpillars),
    )
    .unwrap();
    let z = result.simulated_z.as_ref().unwrap()[0];
    assert_eq!(result.sigma, z.abs());
    assert!(result.empirical_p_value().is_some());
}

#[test]
fn kept_files_are_named_per_replicate() {
    let net = parse_network(NETWORK).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut data = dataset(&net);
    let config = GofConfig {
        keep_files: true,
        ..simulation_config(dir.path(), 3, 2)
    };
    let result =
        quartet_gof_test(&net, &mut data, false, &config, Some(&ShuffledCaterpillars)).unwrap();
    let kept = result.kept_dir.expect("kept directory");
    let name = kept.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("qgof_"));
    for i in 1..=3 {
        assert!(kept.join(format!("genetrees_rep{i}_coal_unit")).is_file());
    }
}

#[test]
fn failed_replicate_is_fatal_and_cleans_up() {
    let net = parse_network(NETWORK).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut data = dataset(&net);
    let err = quartet_gof_test(
        &net,
        &mut data,
        false,
        &simulation_config(dir.path(), 5, 2),
        Some(&BrokenSampler),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Simulator { .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn ticr_on_five_taxa() {
    let net = parse_network(NETWORK).unwrap();
    let mut data = dataset(&net);
    let result = ticr_test(&net, &mut data, false, &TicrConfig::default()).unwrap();
    assert_eq!(result.bins.total(), 5);
    assert_eq!(result.outlier_p_values.len(), 5);
    assert!((result.outlier_p_values[0] - 1.0).abs() < 1e-12);
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"bins\""));
}

#[test]
fn preparation_properties() {
    let mut net = parse_network("((((D,C),((A,B))#H1),(#H1,E)),O);").unwrap();
    let reference = net.clone();
    assert_eq!(reroot(&mut net, &reference).unwrap(), 0);
    assert_eq!(hardwired_cluster_distance(&net, &reference), 0);

    ultrametrize(&mut net, true);
    let once = write_newick(&net);
    let second = ultrametrize(&mut net, true);
    assert_eq!(second.assigned, 0);
    assert_eq!(write_newick(&net), once);
}

#[test]
fn result_serializes_network_as_newick() {
    let net = parse_network(NETWORK).unwrap();
    let mut data = dataset(&net);
    let config = GofConfig {
        correction: Correction::None,
        ..GofConfig::default()
    };
    let result = quartet_gof_test(&net, &mut data, false, &config, None).unwrap();
    let value: serde_json::Value = serde_json::to_value(&result).unwrap();
    let newick = value["network"].as_str().unwrap();
    assert!(newick.ends_with(';'));
    assert_eq!(value["correction"], "none");
    assert_eq!(value["statistic"], "lrt");
}
