//! Data and checksum equivalence checks over collected logs.
//!
//! Both checks run locally after `collect_remote_logs`, so the same code
//! serves every environment that lays logs out the way [`CaseEnv`] does.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::environment::{CaseEnv, ValidationCheck};
use crate::errors::HarnessResult;
use crate::types::Role;

pub const DATA_CHECK: &str = "data_matched";
pub const CHECKSUM_CHECK: &str = "log_segment_checksum";

/// Subdirectory of a broker's log directory holding its collected data files.
pub const BROKER_DATA_SUBDIR: &str = "data";

fn message_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"MessageID:(\d+)").expect("static regex"))
}

/// Message ids mentioned anywhere in `content`.
pub fn extract_message_ids(content: &str) -> BTreeSet<u64> {
    message_id_pattern()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Every produced id must have been consumed. Extra consumed ids are tolerated.
pub fn compare_message_ids(produced: &BTreeSet<u64>, consumed: &BTreeSet<u64>) -> ValidationCheck {
    if produced.is_empty() {
        return ValidationCheck::failed(DATA_CHECK, "no produced messages found in producer logs");
    }
    let missing: Vec<u64> = produced.difference(consumed).copied().collect();
    if missing.is_empty() {
        ValidationCheck::passed(
            DATA_CHECK,
            format!("{} produced, {} consumed", produced.len(), consumed.len()),
        )
    } else {
        let sample: Vec<String> = missing.iter().take(10).map(u64::to_string).collect();
        ValidationCheck::failed(
            DATA_CHECK,
            format!(
                "{} of {} produced messages missing (first: {})",
                missing.len(),
                produced.len(),
                sample.join(",")
            ),
        )
    }
}

/// Files below `dir`, recursively, sorted.
fn files_under(dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn role_log_dirs(logs_dir: &Path, role: Role) -> HarnessResult<Vec<PathBuf>> {
    let prefix = format!("{role}-");
    let mut dirs = Vec::new();
    if !logs_dir.is_dir() {
        return Ok(dirs);
    }
    for entry in std::fs::read_dir(logs_dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        if matches && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn ids_in_role_logs(logs_dir: &Path, role: Role) -> HarnessResult<BTreeSet<u64>> {
    let mut ids = BTreeSet::new();
    for dir in role_log_dirs(logs_dir, role)? {
        for file in files_under(&dir)? {
            let bytes = std::fs::read(&file)?;
            ids.extend(extract_message_ids(&String::from_utf8_lossy(&bytes)));
        }
    }
    Ok(ids)
}

/// Compare producer log message ids against console consumer logs under `logs_dir`.
pub fn validate_message_logs(logs_dir: &Path) -> HarnessResult<ValidationCheck> {
    let produced = ids_in_role_logs(logs_dir, Role::ProducerPerformance)?;
    let consumed = ids_in_role_logs(logs_dir, Role::ConsoleConsumer)?;
    Ok(compare_message_ids(&produced, &consumed))
}

/// blake3 of every file below `dir`, keyed by path relative to `dir`.
pub fn segment_checksums(dir: &Path) -> HarnessResult<BTreeMap<PathBuf, String>> {
    let mut sums = BTreeMap::new();
    for file in files_under(dir)? {
        let bytes = std::fs::read(&file)?;
        let relative = file.strip_prefix(dir).unwrap_or(&file).to_path_buf();
        sums.insert(relative, blake3::hash(&bytes).to_hex().to_string());
    }
    Ok(sums)
}

/// Within each cluster, every broker holding a segment must hold identical bytes.
///
/// `brokers` maps `(cluster_name, broker label)` to that broker's collected data directory.
pub fn compare_segment_checksums(
    brokers: &BTreeMap<(String, String), BTreeMap<PathBuf, String>>,
) -> ValidationCheck {
    let mut mismatched: Vec<String> = Vec::new();
    let mut compared = 0usize;

    let mut by_cluster: BTreeMap<&str, BTreeMap<&Path, BTreeSet<&str>>> = BTreeMap::new();
    for ((cluster, _broker), sums) in brokers {
        let segments = by_cluster.entry(cluster.as_str()).or_default();
        for (path, sum) in sums {
            segments.entry(path.as_path()).or_default().insert(sum.as_str());
        }
    }
    for (cluster, segments) in &by_cluster {
        for (path, sums) in segments {
            compared += 1;
            if sums.len() > 1 {
                mismatched.push(format!("{cluster}:{}", path.display()));
            }
        }
    }

    if mismatched.is_empty() {
        ValidationCheck::passed(CHECKSUM_CHECK, format!("{compared} segments consistent"))
    } else {
        ValidationCheck::failed(
            CHECKSUM_CHECK,
            format!("checksum mismatch: {}", mismatched.join(", ")),
        )
    }
}

/// Checksum comparison over the broker data collected for `case`.
pub fn validate_broker_segments(case: &CaseEnv) -> HarnessResult<ValidationCheck> {
    let mut brokers = BTreeMap::new();
    for broker in case.cluster.of_role(Role::Broker) {
        let data_dir = case
            .logs_dir
            .join(format!("{}-{}", Role::Broker, broker.entity_id))
            .join(BROKER_DATA_SUBDIR);
        brokers.insert(
            (broker.cluster_name.clone(), broker.entity_id.clone()),
            segment_checksums(&data_dir)?,
        );
    }
    Ok(compare_segment_checksums(&brokers))
}
