use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::fsutil::atomic_write_bytes;

/// Parse YAML text through `serde_json::Value` so every consumer sees the
/// same tree shape, map order included.
pub fn parse_yaml<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    Ok(serde_json::from_value(json_value)?)
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read {}: {}", path.display(), e))?;
    parse_yaml(&raw).map_err(|e| anyhow!("invalid YAML in {}: {}", path.display(), e))
}

/// Render `value` as YAML, forcing clock-like scalars (`12:00:00`) into quotes
/// so YAML 1.1 consumers do not read them as sexagesimal integers.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String> {
    let raw = serde_yaml::to_string(value)?;
    Ok(quote_clock_scalars(&raw))
}

pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = to_yaml_string(value)?;
    atomic_write_bytes(path, rendered.as_bytes())
}

/// Quotes clock-like plain scalars line by line. Lines inside a block scalar
/// (`|` / `>`) are string content and are left alone.
pub fn quote_clock_scalars(yaml: &str) -> String {
    let mut out = String::with_capacity(yaml.len());
    let mut block_parent: Option<usize> = None;
    for line in yaml.lines() {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if let Some(parent) = block_parent {
            if line.trim().is_empty() || indent > parent {
                out.push_str(line);
                out.push('\n');
                continue;
            }
            block_parent = None;
        }
        match split_plain_scalar(line) {
            Some((head, scalar)) if looks_like_clock(scalar) => {
                out.push_str(head);
                out.push('"');
                out.push_str(scalar);
                out.push('"');
            }
            Some((_, scalar)) if is_block_header(scalar) => {
                block_parent = Some(indent);
                out.push_str(line);
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

/// `|`, `>-`, `|2+` and friends.
fn is_block_header(scalar: &str) -> bool {
    let mut chars = scalar.chars();
    matches!(chars.next(), Some('|') | Some('>'))
        && chars.all(|c| c == '+' || c == '-' || c.is_ascii_digit())
}

fn split_plain_scalar(line: &str) -> Option<(&str, &str)> {
    if let Some(idx) = line.rfind(": ") {
        return Some(line.split_at(idx + 2));
    }
    let trimmed = line.trim_start();
    let item = trimmed.strip_prefix("- ")?;
    Some(line.split_at(line.len() - item.len()))
}

/// `H:MM:SS` / `HH:MM:SS`.
pub fn looks_like_clock(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return false;
    }
    let widths_ok = matches!(parts[0].len(), 1 | 2) && parts[1].len() == 2 && parts[2].len() == 2;
    widths_ok && parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit()))
}
