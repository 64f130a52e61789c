use std::io::{self, Write};

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Leading `len` hex characters of the SHA-256 of `bytes`.
pub fn short_digest(bytes: &[u8], len: usize) -> String {
    let mut digest = sha256_bytes(bytes);
    digest.truncate(len);
    digest
}

/// Deterministic JSON text for `value`.
///
/// Object keys are sorted recursively, items are separated by `", "` and keys
/// by `": "`, and every character outside printable ASCII is written as a
/// `\uXXXX` escape. Two values with the same content serialize identically no
/// matter the order their maps were built in.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    let sorted = sorted_keys(value);
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    sorted.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|lhs, rhs| lhs.0.cmp(rhs.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(key, val)| (key.clone(), sorted_keys(val)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(fragment[start..idx].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_and_spaces_separators() {
        let value = json!({
            "run": {"resume": "none", "max_epochs": 400},
            "datasets": [1, true, null],
        });
        assert_eq!(
            canonical_json(&value).expect("serialize"),
            r#"{"datasets": [1, true, null], "run": {"max_epochs": 400, "resume": "none"}}"#
        );
    }

    #[test]
    fn canonical_json_is_independent_of_insertion_order() {
        let mut first = Map::new();
        first.insert("b".to_string(), json!(2));
        first.insert("a".to_string(), json!(1));
        let mut second = Map::new();
        second.insert("a".to_string(), json!(1));
        second.insert("b".to_string(), json!(2));
        assert_eq!(
            canonical_json(&Value::Object(first)).expect("first"),
            canonical_json(&Value::Object(second)).expect("second")
        );
    }

    #[test]
    fn canonical_json_escapes_non_ascii() {
        let value = json!({"name": "caf\u{e9} \u{1f600}\u{7f}", "q": "a\"b\n"});
        assert_eq!(
            canonical_json(&value).expect("serialize"),
            r#"{"name": "caf\u00e9 \ud83d\ude00\u007f", "q": "a\"b\n"}"#
        );
    }

    #[test]
    fn short_digest_truncates_sha256_hex() {
        let full = sha256_bytes(b"abc");
        assert_eq!(
            full,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(short_digest(b"abc", 12), "ba7816bf8f01");
    }
}
