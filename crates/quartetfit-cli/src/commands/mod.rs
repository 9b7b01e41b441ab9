pub mod expected;
pub mod gof;
pub mod ticr;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use quartetfit_core::{
    Error, Network, QuartetDataset, QuartetRecord, Result, parse_network, read_network_file,
};

/// Network from a file when `arg` names one, otherwise parsed as Newick.
pub fn load_network(arg: &str) -> Result<Network> {
    let path = Path::new(arg);
    if path.is_file() {
        log::info!("reading network from {}", path.display());
        read_network_file(path)
    } else {
        parse_network(arg.trim())
    }
}

/// Serialize `value` as pretty JSON to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n").map_err(io)?;
    writer.flush().map_err(io)
}

/// Save the dataset and tell the user where it went.
pub fn save_dataset(dataset: &QuartetDataset, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        dataset.to_json_file(path)?;
        println!("CF table saved to: {}", path.display());
    }
    Ok(())
}

/// Records sorted by p-value, smallest first, at most `n`.
pub fn most_extreme(dataset: &QuartetDataset, n: usize) -> Vec<&QuartetRecord> {
    let mut tested: Vec<&QuartetRecord> =
        dataset.iter().filter(|r| r.p_value.is_some()).collect();
    tested.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(std::cmp::Ordering::Equal));
    tested.truncate(n);
    tested
}

pub fn print_extreme(dataset: &QuartetDataset) {
    let extreme = most_extreme(dataset, 5);
    if extreme.is_empty() {
        return;
    }
    println!("\nMost extreme four-taxon sets:");
    println!(
        "  {:<32} {:>22} {:>22} {:>10}",
        "Taxa", "Observed CF", "Expected CF", "p-value"
    );
    for r in extreme {
        println!(
            "  {:<32} {:>22} {:>22} {:>10.3e}",
            r.taxa.join(","),
            format_cf(&r.obs_cf),
            r.exp_cf.as_ref().map(format_cf).unwrap_or_default(),
            r.p_value.unwrap_or(f64::NAN)
        );
    }
}

pub fn format_cf(cf: &[f64; 3]) -> String {
    format!("{:.3}/{:.3}/{:.3}", cf[0], cf[1], cf[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_network_inline_and_file() {
        let newick = "((A:1,B:1):1,(C:1,D:1):1);";
        let inline = load_network(newick).unwrap();
        assert_eq!(inline.num_leaves(), 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.tre");
        std::fs::write(&path, format!("{newick}\n")).unwrap();
        let from_file = load_network(path.to_str().unwrap()).unwrap();
        assert_eq!(from_file.leaf_labels(), inline.leaf_labels());
    }

    #[test]
    fn test_load_network_rejects_garbage() {
        assert!(load_network("not a network").is_err());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &serde_json::json!({"p_value": 0.5})).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["p_value"], 0.5);
    }

    #[test]
    fn test_most_extreme_orders_by_p_value() {
        let mut data = QuartetDataset::new(vec![
            QuartetRecord::new(["A", "B", "C", "D"], [0.8, 0.1, 0.1], 10.0),
            QuartetRecord::new(["A", "B", "C", "E"], [0.8, 0.1, 0.1], 10.0),
            QuartetRecord::new(["A", "B", "D", "E"], [0.8, 0.1, 0.1], 10.0),
        ]);
        data.set_p_values(&[0.3, 0.01, 0.2]).unwrap();
        let top = most_extreme(&data, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].p_value, Some(0.01));
        assert_eq!(top[1].p_value, Some(0.2));
    }

    #[test]
    fn test_format_cf() {
        assert_eq!(format_cf(&[0.5, 0.25, 0.25]), "0.500/0.250/0.250");
    }
}
