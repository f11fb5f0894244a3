//! Writing merged search results to disk.

use std::path::{Path, PathBuf};

use medsearch_common::ResultRecord;

/// `results_<unix-seconds>.json` inside `dir`.
pub fn default_path(dir: &Path) -> PathBuf {
    dir.join(format!("results_{}.json", chrono::Utc::now().timestamp()))
}

/// Write `records` as pretty-printed JSON, creating parent directories as needed.
pub fn write_results(path: &Path, records: &[ResultRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_path_shape() {
        let path = default_path(Path::new("out"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("results_") && name.ends_with(".json"));
        assert!(name["results_".len()..name.len() - 5].parse::<i64>().is_ok());
        assert_eq!(path.parent(), Some(Path::new("out")));
    }

    #[test]
    fn test_write_results_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run/results.json");
        let records = vec![
            ResultRecord::new("pmid-1", "Paracetamol dosing", "https://pubmed.ncbi.nlm.nih.gov/1/", "PubMed")
                .with_relevance(0.8),
        ];

        write_results(&path, &records).unwrap();

        let back: Vec<ResultRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_write_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        write_results(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
