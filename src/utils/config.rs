use crate::error::{ReporterError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Launch attribute shown as a tag on the report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchAttribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

/// Reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReporterConfig {
    /// API base, e.g. `https://reports.example.com/api/v1`
    pub endpoint: String,

    /// Bearer token for the API
    pub token: String,

    pub project_name: String,

    pub launch_name: String,
    pub launch_description: String,
    pub launch_attributes: Vec<LaunchAttribute>,

    /// Verbose diagnostics
    pub debug: bool,

    /// Merge results into `rerun_of` instead of starting a fresh launch
    pub rerun: bool,
    pub rerun_of: Option<String>,

    pub enabled: bool,

    /// Directory the video recorder writes into
    pub video_path: PathBuf,
    pub video_upload: bool,
    /// File name of the recording inside `video_path`
    pub video_name: Option<String>,

    /// Create the launch in DEBUG mode instead of DEFAULT
    pub debug_mode: bool,

    pub full_page_screenshots: bool,

    /// Shell command producing a screenshot. `{file}` is replaced with the
    /// target path, `{full_page}` with `true` or `false`.
    pub screenshot_command: Option<String>,

    /// Scratch directory for captured artifacts
    pub output_dir: PathBuf,

    /// Directory holding the LAUNCH_ID / LAUNCH_URL hand-off files
    pub handoff_dir: PathBuf,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            project_name: String::new(),
            launch_name: String::new(),
            launch_description: String::new(),
            launch_attributes: Vec::new(),
            debug: false,
            rerun: false,
            rerun_of: None,
            enabled: false,
            video_path: PathBuf::from("./output/video"),
            video_upload: false,
            video_name: None,
            debug_mode: false,
            full_page_screenshots: false,
            screenshot_command: None,
            output_dir: PathBuf::from("./output"),
            handoff_dir: PathBuf::from("."),
        }
    }
}

const REQUIRED_FIELDS: [&str; 3] = ["projectName", "token", "endpoint"];

impl ReporterConfig {
    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(config)
    }

    /// Override connection settings from `RP_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("RP_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = get("RP_TOKEN") {
            self.token = v;
        }
        if let Some(v) = get("RP_PROJECT") {
            self.project_name = v;
        }
        if let Some(v) = get("RP_LAUNCH") {
            self.launch_name = v;
        }
    }

    /// Check the fields a launch cannot start without
    pub fn validate(&self) -> Result<()> {
        let values = [&self.project_name, &self.token, &self.endpoint];
        for (field, value) in REQUIRED_FIELDS.iter().zip(values) {
            if value.trim().is_empty() {
                return Err(ReporterError::Config(format!(
                    "Key {} is missing in config.\nRequired fields: {}",
                    field,
                    REQUIRED_FIELDS.join(",")
                )));
            }
        }

        if self.video_upload && self.video_name.is_none() {
            return Err(ReporterError::Config(
                "No video name defined. Set videoName when videoUpload is enabled".into(),
            ));
        }

        if self.rerun && self.rerun_of.is_none() {
            log::warn!(
                "rerun is enabled without rerunOf; the service will pick the launch by name"
            );
        }

        Ok(())
    }

    /// Launch name, falling back to the given default
    pub fn launch_name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.launch_name.is_empty() {
            fallback
        } else {
            &self.launch_name
        }
    }
}
