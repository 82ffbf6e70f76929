use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Named preset selecting which scanner flags get derived.
///
/// Serialized internally tagged under `scanMode`, so a request reads
/// `{"scanMode": "scriptSet", "scripts": ["http-title"]}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "scanMode", rename_all = "camelCase")]
pub enum ScanMode {
    Quick,
    Full,
    VersionDetect,
    OsDetect,
    ScriptSet {
        #[serde(default)]
        scripts: Vec<String>,
    },
    CustomFlags {
        #[serde(default, rename = "customFlags")]
        custom_flags: String,
    },
}

impl ScanMode {
    /// Resolve a mode by name, attaching the mode-specific parameters.
    ///
    /// Parameters not used by the selected mode are ignored.
    pub fn from_name(name: &str, scripts: Vec<String>, custom_flags: String) -> Result<Self, ConfigError> {
        match name.trim() {
            "quick" => Ok(ScanMode::Quick),
            "full" => Ok(ScanMode::Full),
            "versionDetect" | "version-detect" | "version" => Ok(ScanMode::VersionDetect),
            "osDetect" | "os-detect" | "os" => Ok(ScanMode::OsDetect),
            "scriptSet" | "script-set" | "nse" => Ok(ScanMode::ScriptSet { scripts }),
            "customFlags" | "custom-flags" | "custom" => Ok(ScanMode::CustomFlags { custom_flags }),
            other => Err(ConfigError::UnknownScanMode(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Full => "full",
            ScanMode::VersionDetect => "versionDetect",
            ScanMode::OsDetect => "osDetect",
            ScanMode::ScriptSet { .. } => "scriptSet",
            ScanMode::CustomFlags { .. } => "customFlags",
        }
    }
}

/// Output encoding requested from the scanner.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    #[serde(alias = "xmlLike")]
    Xml,
    Greppable,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Xml => "xml",
            OutputFormat::Greppable => "greppable",
        }
    }

    /// Only the XML encoding can be parsed into a summary.
    pub fn is_machine_readable(&self) -> bool {
        matches!(self, OutputFormat::Xml)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "normal" => Ok(OutputFormat::Text),
            "xml" | "xmllike" => Ok(OutputFormat::Xml),
            "greppable" | "grep" => Ok(OutputFormat::Greppable),
            other => Err(ConfigError::UnknownOutputFormat(other.to_string())),
        }
    }
}

/// One input item as supplied by the host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub target: String,
    #[serde(flatten)]
    pub mode: ScanMode,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_binary_path")]
    pub binary_path: String,
    #[serde(default)]
    pub auto_summarize: bool,
    #[serde(default = "default_persist_history")]
    pub persist_history: bool,
}

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_BINARY_PATH: &str = "nmap";

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_binary_path() -> String {
    DEFAULT_BINARY_PATH.to_string()
}

fn default_persist_history() -> bool {
    true
}

impl ScanRequest {
    /// Request with defaults for everything except target and mode.
    pub fn new(target: impl Into<String>, mode: ScanMode) -> Self {
        Self {
            target: target.into(),
            mode,
            output_format: OutputFormat::default(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            binary_path: default_binary_path(),
            auto_summarize: false,
            persist_history: default_persist_history(),
        }
    }
}

/// A finished scanner run that exited with status zero in time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSuccess {
    pub target: String,
    pub command: String,
    pub output: String,
    pub format: OutputFormat,
    pub flags: String,
}

/// What distinguished a failed invocation, kept for diagnostics only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureCause {
    Exit { code: i32 },
    Signal,
    Timeout { millis: u64 },
    Spawn,
    Wait,
}

/// Any run that did not exit cleanly before its deadline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct InvocationFailure {
    pub message: String,
    pub details: String,
    pub cause: FailureCause,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Success(ScanSuccess),
    Failure(InvocationFailure),
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Success(_))
    }

    pub fn failure(&self) -> Option<&InvocationFailure> {
        match self {
            ScanOutcome::Failure(f) => Some(f),
            ScanOutcome::Success(_) => None,
        }
    }
}

/// Attached to the final outcome when the unreachable-host retry fired.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResiliencyNote {
    pub triggered: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<InvocationFailure>,
}

impl ResiliencyNote {
    pub fn triggered(reason: impl Into<String>, first_failure: InvocationFailure) -> Self {
        Self {
            triggered: true,
            reason: reason.into(),
            first_failure: Some(first_failure),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl HostStatus {
    pub fn from_state(state: &str) -> Self {
        match state {
            "up" => HostStatus::Up,
            "down" => HostStatus::Down,
            _ => HostStatus::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenPort {
    pub port: String,
    pub protocol: String,
    pub service: String,
    pub product: String,
    pub version: String,
    pub extrainfo: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFinding {
    pub port: String,
    pub script_id: String,
    pub output: String,
}

/// Host-level digest of an XML scan document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub address: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
    pub status: HostStatus,
    pub open_ports: Vec<OpenPort>,
    pub total_open: usize,
    pub script_findings: Vec<ScriptFinding>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SummaryError {
    pub error: bool,
    pub details: String,
}

/// Either a summary or the marker emitted when the payload failed to parse.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum SummaryReport {
    Summary(ScanSummary),
    Error(SummaryError),
}

impl SummaryReport {
    pub fn error(details: impl Into<String>) -> Self {
        SummaryReport::Error(SummaryError {
            error: true,
            details: details.into(),
        })
    }

    pub fn summary(&self) -> Option<&ScanSummary> {
        match self {
            SummaryReport::Summary(s) => Some(s),
            SummaryReport::Error(_) => None,
        }
    }
}

/// One line of the append-only history file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: String,
    pub target: String,
    pub flags_used: String,
    pub format: OutputFormat,
    pub summary: Option<SummaryReport>,
    pub failure: Option<InvocationFailure>,
    pub resiliency_note: Option<ResiliencyNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_fill_missing_fields() {
        let req: ScanRequest =
            serde_json::from_str(r#"{"target":"scanme.nmap.org","scanMode":"quick"}"#).unwrap();
        assert_eq!(req.mode, ScanMode::Quick);
        assert_eq!(req.output_format, OutputFormat::Text);
        assert_eq!(req.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(req.binary_path, "nmap");
        assert!(!req.auto_summarize);
        assert!(req.persist_history);
    }

    #[test]
    fn request_reads_mode_params() {
        let req: ScanRequest = serde_json::from_str(
            r#"{"target":"10.0.0.1","scanMode":"scriptSet","scripts":["http-title"],"outputFormat":"xml"}"#,
        )
        .unwrap();
        assert_eq!(
            req.mode,
            ScanMode::ScriptSet {
                scripts: vec!["http-title".into()]
            }
        );
        assert_eq!(req.output_format, OutputFormat::Xml);

        let req: ScanRequest = serde_json::from_str(
            r#"{"target":"10.0.0.1","scanMode":"customFlags","customFlags":"-sS -p 22"}"#,
        )
        .unwrap();
        assert_eq!(
            req.mode,
            ScanMode::CustomFlags {
                custom_flags: "-sS -p 22".into()
            }
        );
    }

    #[test]
    fn unknown_mode_is_configuration_error() {
        let err = ScanMode::from_name("stealth", vec![], String::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownScanMode(ref m) if m == "stealth"));
        assert!(serde_json::from_str::<ScanRequest>(r#"{"target":"x","scanMode":"stealth"}"#).is_err());
    }

    #[test]
    fn summary_error_marker_shape() {
        let v = serde_json::to_value(SummaryReport::error("bad xml")).unwrap();
        assert_eq!(v, serde_json::json!({"error": true, "details": "bad xml"}));
    }

    #[test]
    fn output_format_parse() {
        assert_eq!("XML".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        assert_eq!("grep".parse::<OutputFormat>().unwrap(), OutputFormat::Greppable);
        assert!("json".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn xml_like_format_is_xml() {
        assert_eq!("xmlLike".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        let req: ScanRequest = serde_json::from_str(
            r#"{"target":"10.0.0.1","scanMode":"quick","outputFormat":"xmlLike"}"#,
        )
        .unwrap();
        assert_eq!(req.output_format, OutputFormat::Xml);
        assert_eq!(serde_json::to_value(req.output_format).unwrap(), "xml");
    }

    #[test]
    fn failure_cause_shape() {
        let timeout = serde_json::to_value(FailureCause::Timeout { millis: 1000 }).unwrap();
        assert_eq!(timeout, serde_json::json!({"kind": "timeout", "millis": 1000}));
        let exit = serde_json::to_value(FailureCause::Exit { code: 1 }).unwrap();
        assert_eq!(exit, serde_json::json!({"kind": "exit", "code": 1}));
        let wait = serde_json::to_value(FailureCause::Wait).unwrap();
        assert_eq!(wait, serde_json::json!({"kind": "wait"}));
    }
}
