use std::io::Write;
use std::path::Path;

use quartetfit_core::{
    Error, QuartetDataset, Result, expected_cf_by_label, ultrametrize, update_expected_cfs,
};

pub fn run(
    network: &str,
    data: Option<&Path>,
    quartets: &[String],
    fill_lengths: bool,
    output: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let mut net = super::load_network(network)?;
    if fill_lengths {
        let report = ultrametrize(&mut net, verbose);
        log::info!(
            "assigned {} branch lengths; ultrametric: {}",
            report.assigned,
            report.ultrametric
        );
    }

    for quartet in quartets {
        let labels = parse_quartet(quartet)?;
        let cf = expected_cf_by_label(&net, labels)?;
        println!(
            "{}|{}  {:.6}  {}|{}  {:.6}  {}|{}  {:.6}",
            labels[0], labels[1], cf[0], labels[0], labels[2], cf[1], labels[0], labels[3], cf[2]
        );
    }

    let Some(data) = data else {
        return Ok(());
    };
    let mut dataset = QuartetDataset::from_json_file(data)?;
    dataset.check_taxa(&net)?;
    update_expected_cfs(&net, &mut dataset)?;
    match output {
        Some(path) => {
            dataset.to_json_file(path)?;
            println!("Expected CFs for {} sets saved to: {}", dataset.len(), path.display());
            Ok(())
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            dataset.to_json_writer(&mut lock)?;
            writeln!(lock).map_err(|e| Error::Io {
                path: "<stdout>".into(),
                source: e,
            })
        }
    }
}

/// Four comma-separated taxon labels.
fn parse_quartet(text: &str) -> Result<[&str; 4]> {
    let labels: Vec<&str> = text.split(',').map(str::trim).collect();
    match labels.as_slice() {
        &[a, b, c, d] if labels.iter().all(|l| !l.is_empty()) => Ok([a, b, c, d]),
        _ => Err(Error::InvalidInput(format!(
            "expected four comma-separated taxa, got '{text}'"
        ))),
    }
}
