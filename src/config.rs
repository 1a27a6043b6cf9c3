//! Course configuration: `course.yaml` at the course root, merged with
//! environment variables for credentials (the YAML file never carries
//! secrets).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

/// Static, non-secret fields of `course.yaml`.
#[derive(Debug, Deserialize)]
struct StaticConfig {
    course_id: i64,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    course_code: Option<String>,
    #[serde(default = "default_template")]
    template: String,
}

fn default_template() -> String {
    "default".to_string()
}

/// A fully merged course configuration.
#[derive(Debug, Clone)]
pub struct CourseConfig {
    pub course_root: PathBuf,
    pub course_id: i64,
    pub course_name: Option<String>,
    pub course_code: Option<String>,
    /// Template set name under `templates/`.
    pub template: String,
}

impl CourseConfig {
    pub fn trace_loaded(&self) {
        info!(
            course_id = self.course_id,
            course_root = %self.course_root.display(),
            template = %self.template,
            "Loaded CourseConfig"
        );
    }
}

/// Load `course.yaml` from the given course root.
pub fn load_config<P: AsRef<Path>>(course_root: P) -> Result<CourseConfig> {
    let course_root = course_root.as_ref();
    let path = course_root.join("course.yaml");
    info!(config_path = ?path, "Loading course configuration");

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read course config {:?}", path))?;
    let static_conf: StaticConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = %e, config_path = ?path, "Failed to parse course.yaml");
        anyhow::anyhow!("Failed to parse course config YAML: {e}")
    })?;

    let config = CourseConfig {
        course_root: course_root.to_path_buf(),
        course_id: static_conf.course_id,
        course_name: static_conf.course_name,
        course_code: static_conf.course_code,
        template: static_conf.template,
    };
    config.trace_loaded();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("course.yaml"), "course_id: 4217\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.course_id, 4217);
        assert_eq!(config.template, "default");
        assert!(config.course_name.is_none());
    }

    #[test]
    fn missing_course_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("course.yaml"), "course_name: Biology\n").unwrap();
        assert!(load_config(dir.path()).is_err());
    }
}
