//! Metrics summaries and per-role dashboards from collected CSV series.
//!
//! Entities export metrics as CSV files (header row, then numeric rows) into
//! `logs/<role>-<id>/metrics/`. Graph rendering reduces every series to
//! column statistics; dashboards group those summaries by role.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::environment::CaseEnv;
use crate::errors::HarnessResult;

pub const METRICS_SUBDIR: &str = "metrics";
pub const SUMMARY_FILE: &str = "metrics_summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// Owning entity directory name, `<role>-<id>`.
    pub entity: String,
    pub role: String,
    pub file: String,
    pub rows: usize,
    pub columns: Vec<ColumnStats>,
}

/// Column statistics of one CSV body. Non-numeric cells are ignored.
pub fn summarize_csv(content: &str) -> (usize, Vec<ColumnStats>) {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return (0, Vec::new());
    };
    let names: Vec<String> = header
        .split(',')
        .map(|h| h.trim().trim_start_matches('#').trim().to_string())
        .collect();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    let mut rows = 0;

    for line in lines {
        rows += 1;
        for (index, cell) in line.split(',').enumerate().take(names.len()) {
            if let Ok(v) = cell.trim().parse::<f64>() {
                values[index].push(v);
            }
        }
    }

    let columns = names
        .into_iter()
        .zip(values)
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(name, samples)| {
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            ColumnStats {
                name,
                samples: samples.len(),
                min,
                max,
                mean,
            }
        })
        .collect();
    (rows, columns)
}

/// Every CSV series below `logs_dir/<role>-<id>/metrics/`.
pub fn collect_series(logs_dir: &Path) -> HarnessResult<Vec<MetricSeries>> {
    let mut series = Vec::new();
    if !logs_dir.is_dir() {
        return Ok(series);
    }
    let mut entity_dirs: Vec<PathBuf> = std::fs::read_dir(logs_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.join(METRICS_SUBDIR).is_dir())
        .collect();
    entity_dirs.sort();

    for entity_dir in entity_dirs {
        let entity = entity_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let role = entity
            .rsplit_once('-')
            .map(|(role, _)| role.to_string())
            .unwrap_or_else(|| entity.clone());

        let mut files: Vec<PathBuf> = std::fs::read_dir(entity_dir.join(METRICS_SUBDIR))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();

        for file in files {
            let content = std::fs::read_to_string(&file)?;
            let (rows, columns) = summarize_csv(&content);
            series.push(MetricSeries {
                entity: entity.clone(),
                role: role.clone(),
                file: file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                rows,
                columns,
            });
        }
    }
    Ok(series)
}

/// Write `dashboards/metrics_summary.json`. Returns the number of series.
pub fn render_graphs(case: &CaseEnv) -> HarnessResult<usize> {
    let series = collect_series(&case.logs_dir)?;
    std::fs::create_dir_all(&case.dashboards_dir)?;
    let path = case.dashboards_dir.join(SUMMARY_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&series)?)?;
    tracing::info!(
        component = "Metrics",
        testcase = %case.name(),
        series = series.len(),
        path = %path.display(),
        "Rendered metrics summary"
    );
    Ok(series.len())
}

/// Write one `dashboard_<role>.json` per role from the summary. Returns the roles written.
pub fn render_dashboards(case: &CaseEnv) -> HarnessResult<Vec<String>> {
    let summary = case.dashboards_dir.join(SUMMARY_FILE);
    let series: Vec<MetricSeries> = if summary.is_file() {
        serde_json::from_str(&std::fs::read_to_string(&summary)?)?
    } else {
        collect_series(&case.logs_dir)?
    };

    let mut by_role: BTreeMap<String, Vec<MetricSeries>> = BTreeMap::new();
    for s in series {
        by_role.entry(s.role.clone()).or_default().push(s);
    }

    std::fs::create_dir_all(&case.dashboards_dir)?;
    for (role, series) in &by_role {
        let path = case.dashboards_dir.join(format!("dashboard_{role}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(series)?)?;
    }
    Ok(by_role.into_keys().collect())
}
