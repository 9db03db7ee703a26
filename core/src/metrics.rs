//! Offline evaluation metrics exported next to the model artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ServingConfig;
use crate::error::{ServingError, ServingResult};

pub const METRIC_FILE_NOT_FOUND: &str = "Metric file not found";
const RANKING_METRIC: &str = "roc_auc";
// Row identifiers, not measurements.
const KEY_COLUMNS: [&str; 2] = ["model", "fold"];

#[derive(Debug, Clone, Serialize)]
pub struct MetricFile {
    pub file: String,
    pub rows: usize,
    pub data: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStat {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: String,
    pub folds: usize,
    pub metrics: BTreeMap<String, MetricStat>,
}

pub struct MetricsCatalog {
    dir: PathBuf,
}

impl MetricsCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &ServingConfig) -> Self {
        Self::new(config.artifacts_dir.join("metrics"))
    }

    /// Sorted JSON file names; a missing directory simply has no files.
    pub fn list_files(&self) -> ServingResult<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|err| {
            ServingError::artifact(format!("metrics dir read error {}: {err}", self.dir.display()))
        })?;
        let mut files = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_json(path))
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()).map(str::to_string))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    pub fn read_file(&self, name: &str) -> ServingResult<MetricFile> {
        let path = self.resolve(name)?;
        let data = read_rows(&path)?;
        Ok(MetricFile {
            file: name.to_string(),
            rows: data.len(),
            data,
        })
    }

    /// Mean and sample standard deviation of every numeric metric, per model, across all
    /// files. Best `roc_auc` first.
    pub fn summary(&self) -> ServingResult<Vec<ModelSummary>> {
        let mut samples: BTreeMap<String, (usize, BTreeMap<String, Vec<f64>>)> = BTreeMap::new();
        for name in self.list_files()? {
            for row in read_rows(&self.dir.join(&name))? {
                let Some(model) = row.get("model").and_then(Value::as_str) else {
                    continue;
                };
                let entry = samples.entry(model.to_string()).or_default();
                entry.0 += 1;
                for (metric, value) in &row {
                    if KEY_COLUMNS.contains(&metric.as_str()) {
                        continue;
                    }
                    if let Some(number) = value.as_f64() {
                        entry.1.entry(metric.clone()).or_default().push(number);
                    }
                }
            }
        }

        let mut summaries = samples
            .into_iter()
            .map(|(model, (folds, metrics))| ModelSummary {
                model,
                folds,
                metrics: metrics
                    .into_iter()
                    .map(|(metric, values)| (metric, describe(&values)))
                    .collect(),
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| {
            ranking(b)
                .total_cmp(&ranking(a))
                .then_with(|| a.model.cmp(&b.model))
        });
        Ok(summaries)
    }

    fn resolve(&self, name: &str) -> ServingResult<PathBuf> {
        let plain = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        let path = self.dir.join(name);
        if !plain || !is_json(&path) || !path.is_file() {
            return Err(ServingError::not_found(METRIC_FILE_NOT_FOUND));
        }
        Ok(path)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn read_rows(path: &Path) -> ServingResult<Vec<Map<String, Value>>> {
    let data = std::fs::read(path).map_err(|err| {
        ServingError::artifact(format!("metric file read error {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&data).map_err(|err| {
        ServingError::artifact(format!("metric file parse error {}: {err}", path.display()))
    })
}

fn ranking(summary: &ModelSummary) -> f64 {
    summary
        .metrics
        .get(RANKING_METRIC)
        .map(|stat| stat.mean)
        .unwrap_or(f64::NEG_INFINITY)
}

fn describe(values: &[f64]) -> MetricStat {
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let std = if values.len() > 1 {
        let squares = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>();
        (squares / (count - 1.0)).sqrt()
    } else {
        0.0
    };
    MetricStat { mean, std }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(files: &[(&str, &str)]) -> (tempfile::TempDir, MetricsCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        let catalog = MetricsCatalog::new(dir.path());
        (dir, catalog)
    }

    #[test]
    fn describe_uses_sample_std() {
        let stat = describe(&[0.7, 0.8, 0.9]);
        assert!((stat.mean - 0.8).abs() < 1e-12);
        assert!((stat.std - 0.1).abs() < 1e-12);
        assert_eq!(describe(&[0.5]).std, 0.0);
    }

    #[test]
    fn lists_only_json_files_sorted() {
        let (_dir, catalog) = catalog_with(&[("b.json", "[]"), ("a.json", "[]"), ("notes.txt", "x")]);
        assert_eq!(catalog.list_files().unwrap(), vec!["a.json", "b.json"]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let catalog = MetricsCatalog::new("/definitely/not/here");
        assert!(catalog.list_files().unwrap().is_empty());
    }

    #[test]
    fn read_file_rejects_traversal_and_unknown_names() {
        let (_dir, catalog) = catalog_with(&[("cv.json", "[]")]);
        for name in ["../cv.json", "missing.json", "..", "cv.txt"] {
            let err = catalog.read_file(name).unwrap_err();
            assert_eq!(err.to_string(), METRIC_FILE_NOT_FOUND);
        }
    }

    #[test]
    fn read_file_returns_rows() {
        let (_dir, catalog) =
            catalog_with(&[("cv.json", r#"[{"model":"logistic","fold":1,"roc_auc":0.8}]"#)]);
        let file = catalog.read_file("cv.json").unwrap();
        assert_eq!(file.rows, 1);
        assert_eq!(file.data[0]["model"], "logistic");
    }

    #[test]
    fn summary_ranks_by_roc_auc() {
        let (_dir, catalog) = catalog_with(&[(
            "cv.json",
            r#"[
                {"model":"dummy","fold":1,"roc_auc":0.5,"f1":0.0},
                {"model":"logistic","fold":1,"roc_auc":0.78,"f1":0.45},
                {"model":"logistic","fold":2,"roc_auc":0.82,"f1":0.47},
                {"note":"no model field"}
            ]"#,
        )]);
        let summary = catalog.summary().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].model, "logistic");
        assert_eq!(summary[0].folds, 2);
        assert!((summary[0].metrics["roc_auc"].mean - 0.8).abs() < 1e-12);
        assert_eq!(summary[1].model, "dummy");
        assert_eq!(summary[1].metrics["f1"].std, 0.0);
    }

    #[test]
    fn summary_skips_fold_index() {
        let (_dir, catalog) = catalog_with(&[(
            "cv.json",
            r#"[
                {"model":"logistic","fold":1,"roc_auc":0.78},
                {"model":"logistic","fold":2,"roc_auc":0.82}
            ]"#,
        )]);
        let summary = catalog.summary().unwrap();
        assert!(!summary[0].metrics.contains_key("fold"));
        assert_eq!(
            summary[0].metrics.keys().collect::<Vec<_>>(),
            vec!["roc_auc"]
        );
    }
}
