//! Build reports written by the project's cmake scripts.
//!
//! A successful local build may leave `<project>/build/<product>.json` behind,
//! listing the applications it produced and where to run them from.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppEntry {
    /// Application kind, used to name the run node (`graphics`, `audio`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Binary path relative to `bin_dir`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildReport {
    #[serde(default)]
    pub apps: Vec<AppEntry>,
    #[serde(default)]
    pub bin_dir: String,
    #[serde(default)]
    pub root_dir: String,
}

impl BuildReport {
    /// Command line that runs `app`.
    pub fn app_command(&self, app: &AppEntry) -> String {
        format!("{}{}", self.bin_dir, app.path)
    }
}

pub fn report_path(project_dir: &str, product: &str) -> PathBuf {
    Path::new(project_dir)
        .join("build")
        .join(format!("{}.json", product))
}

/// Reads the report for `product`. Returns `Ok(None)` when the build left none.
pub fn load_report(project_dir: &str, product: &str) -> Result<Option<BuildReport>> {
    let path = report_path(project_dir, product);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read build report {}", path.display()))?;
    let report = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse build report {}", path.display()))?;
    Ok(Some(report))
}
