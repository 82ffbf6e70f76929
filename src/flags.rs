use crate::types::{OutputFormat, ScanMode};

/// Flag that selects NSE scripts.
pub const SCRIPT_FLAG: &str = "--script";

/// Derive the ordered flag tokens for a scan mode.
///
/// - `quick`: `-T4 -F`
/// - `full`: `-T4 -p1-65535`
/// - `versionDetect`: `-sV`
/// - `osDetect`: `-O`
/// - `scriptSet`: `--script a,b,c`, or nothing when no script names remain
/// - `customFlags`: the user string split into argv tokens, unvalidated
pub fn derive_flags(mode: &ScanMode) -> Vec<String> {
    match mode {
        ScanMode::Quick => owned(&["-T4", "-F"]),
        ScanMode::Full => owned(&["-T4", "-p1-65535"]),
        ScanMode::VersionDetect => owned(&["-sV"]),
        ScanMode::OsDetect => owned(&["-O"]),
        ScanMode::ScriptSet { scripts } => {
            let names: Vec<&str> = scripts
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect();
            if names.is_empty() {
                Vec::new()
            } else {
                vec![SCRIPT_FLAG.to_string(), names.join(",")]
            }
        }
        ScanMode::CustomFlags { custom_flags } => split_custom_flags(custom_flags),
    }
}

/// Split a raw flag string the way a POSIX shell would.
///
/// Unbalanced quotes fall back to plain whitespace splitting; the scanner is
/// left to reject whatever it does not understand.
pub fn split_custom_flags(raw: &str) -> Vec<String> {
    shlex::split(raw).unwrap_or_else(|| raw.split_whitespace().map(str::to_owned).collect())
}

/// Flags that send the requested encoding to stdout.
pub fn format_flags(format: OutputFormat) -> &'static [&'static str] {
    match format {
        OutputFormat::Text => &[],
        OutputFormat::Xml => &["-oX", "-"],
        OutputFormat::Greppable => &["-oG", "-"],
    }
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}
