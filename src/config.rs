use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_HISTORY_PATH: &str = "scan_history.jsonl";
pub const DEFAULT_OVERRIDE_FLAG: &str = "-Pn";

/// A text pattern that marks a failure as "target did not answer discovery".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "pattern", rename_all = "lowercase")]
pub enum UnreachablePattern {
    Substring(String),
    Regex(String),
}

impl UnreachablePattern {
    pub fn defaults() -> Vec<Self> {
        vec![
            UnreachablePattern::Substring("0 hosts up".into()),
            UnreachablePattern::Substring("Failed to resolve".into()),
            UnreachablePattern::Regex(r"(?i)\bhost\b[^<\n]*\bdown\b".into()),
        ]
    }
}

/// Process-wide pipeline settings. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub history_path: PathBuf,
    pub override_flag: String,
    pub unreachable_patterns: Vec<UnreachablePattern>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            override_flag: DEFAULT_OVERRIDE_FLAG.to_string(),
            unreachable_patterns: UnreachablePattern::defaults(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.override_flag, "-Pn");
        assert_eq!(cfg.history_path, PathBuf::from("scan_history.jsonl"));
        assert_eq!(cfg.unreachable_patterns.len(), 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"historyPath":"/tmp/h.jsonl","unreachablePatterns":[{{"kind":"regex","pattern":"(?i)no route"}}]}}"#
        )
        .unwrap();
        let cfg = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(cfg.history_path, PathBuf::from("/tmp/h.jsonl"));
        assert_eq!(cfg.override_flag, "-Pn");
        assert_eq!(
            cfg.unreachable_patterns,
            vec![UnreachablePattern::Regex("(?i)no route".into())]
        );
    }

    #[test]
    fn missing_and_malformed_files_error() {
        let err = PipelineConfig::load("/nonexistent/relay.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
