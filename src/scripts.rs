use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Parse a script list into deduplicated NSE script names.
///
/// Supported formats:
/// - comma and/or newline separated names: `http-title, ssl-cert`
/// - comments: everything after `#` is ignored
/// - whitespace and blank entries are ignored
pub fn parse_scripts_str(s: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        for name in line.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            validate_script_name(name)
                .with_context(|| format!("line {line_no}: invalid script name: {name}"))?;
            if seen.insert(name.to_string()) {
                out.push(name.to_string());
            }
        }
    }

    Ok(out)
}

/// Load a script list from a file path.
pub fn load_scripts_from_path(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read scripts file: {}", path.as_ref().display()))?;
    parse_scripts_str(&content)
}

// Names, categories and globs (`http-*`) are fine; anything that would need
// quoting is not.
fn validate_script_name(name: &str) -> Result<()> {
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '$' | '`' | '"' | '\'' | '<' | '>'))
    {
        bail!("unexpected character {c:?}");
    }
    Ok(())
}
