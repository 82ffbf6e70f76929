use std::fmt;

use crate::flags::{derive_flags, format_flags};
use crate::types::{OutputFormat, ScanRequest};

/// A single scanner invocation: binary, scan flags, format flags, target.
///
/// Executed as an argv vector, so neither the binary path nor the target
/// passes through a shell. `Display` renders the quoted form used in logs,
/// results and history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    binary: String,
    flags: Vec<String>,
    format: OutputFormat,
    target: String,
}

impl CommandLine {
    pub fn new(
        binary: impl Into<String>,
        flags: Vec<String>,
        format: OutputFormat,
        target: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            flags,
            format,
            target: target.into(),
        }
    }

    /// Build the first-attempt command for a request.
    pub fn build(request: &ScanRequest) -> Self {
        Self::new(
            request.binary_path.clone(),
            derive_flags(&request.mode),
            request.output_format,
            request.target.clone(),
        )
    }

    /// Same command with one extra scan flag appended after the existing ones.
    pub fn with_flag(&self, flag: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.flags.push(flag.into());
        next
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn program(&self) -> &str {
        &self.binary
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Scan flags as a shell-quoted string, excluding format flags.
    pub fn flags_used(&self) -> String {
        shlex::try_join(self.flags.iter().map(String::as_str)).unwrap_or_else(|_| self.flags.join(" "))
    }

    /// Arguments passed after the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.flags.clone();
        args.extend(format_flags(self.format).iter().map(|f| f.to_string()));
        args.push(self.target.clone());
        args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", double_quote(&self.binary))?;
        for flag in &self.flags {
            let quoted = shlex::try_quote(flag).map_or_else(|_| flag.clone(), |q| q.into_owned());
            write!(f, " {quoted}")?;
        }
        for flag in format_flags(self.format) {
            write!(f, " {flag}")?;
        }
        write!(f, " {}", double_quote(&self.target))
    }
}

fn double_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
