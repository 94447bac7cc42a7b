//! JSON Bridge - Parsing JSON Text into Runtime Values
//!
//! Parsing sits on `serde_json`; a small pre-pass rewrites the legacy
//! `\xHH` escape (accepted by the wire format but not by standard JSON)
//! into `\u00HH`. Parsed documents become runtime values: arrays turn
//! into lists, objects into dicts with string keys.

use std::borrow::Cow;

use crate::containers::{Dict, List};
use crate::error::Result;
use crate::value::Any;

/// Rewrite `\xHH` into `\u00HH` inside string literals.
fn normalize_legacy_escapes(text: &str) -> Cow<'_, str> {
    if !text.contains("\\x") {
        return Cow::Borrowed(text);
    }
    let bytes = text.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len() + 8);
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string && c == b'\\' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'x' {
                out.extend_from_slice(b"\\u00");
                i += 2;
                continue;
            }
            // Copy the escape pair verbatim so a quote stays escaped.
            out.push(c);
            out.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        if c == b'"' {
            in_string = !in_string;
        }
        out.push(c);
        i += 1;
    }
    // Only ASCII sequences were rewritten, so the text stays UTF-8.
    Cow::Owned(String::from_utf8(out).expect("escape rewrite preserves UTF-8"))
}

pub(crate) fn value_to_any(value: &serde_json::Value) -> Result<Any> {
    Ok(match value {
        serde_json::Value::Null => Any::none(),
        serde_json::Value::Bool(v) => Any::from(*v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Any::from(v)
            } else if let Some(v) = n.as_f64() {
                Any::from(v)
            } else {
                crate::throw!(ValueError, "JSON number out of range: {}", n)
            }
        }
        serde_json::Value::String(s) => Any::from(s.as_str()),
        serde_json::Value::Array(items) => {
            let list = List::with_capacity(items.len());
            for item in items {
                list.push(value_to_any(item)?);
            }
            Any::from(list)
        }
        serde_json::Value::Object(map) => {
            let dict = Dict::with_capacity(map.len() as u64 * 2);
            for (key, value) in map {
                dict.insert(Any::from(key.as_str()), value_to_any(value)?);
            }
            Any::from(dict)
        }
    })
}

/// Parse JSON text into runtime values.
pub fn json_loads(text: &str) -> Result<Any> {
    let normalized = normalize_legacy_escapes(text);
    let parsed: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|e| crate::rt_err!(ValueError, "JSON parsing failure: {}", e))?;
    value_to_any(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AnyView;

    #[test]
    fn test_scalars() {
        assert!(json_loads("null").unwrap().is_none());
        assert!(json_loads("true").unwrap().cast::<bool>().unwrap());
        assert_eq!(json_loads("-42").unwrap().cast::<i64>().unwrap(), -42);
        assert_eq!(json_loads("2.5").unwrap().cast::<f64>().unwrap(), 2.5);
        assert_eq!(json_loads("\"hi\"").unwrap().cast::<String>().unwrap(), "hi");
    }

    #[test]
    fn test_nested_containers() {
        let v = json_loads(r#"{"a": [1, 2.5, "x"], "b": null}"#).unwrap();
        let dict = v.cast::<Dict>().unwrap();
        assert_eq!(dict.len(), 2);
        let a = dict.at(AnyView::from("a")).unwrap().cast::<List>().unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(0).unwrap().cast::<i64>().unwrap(), 1);
        assert!(dict.at(AnyView::from("b")).unwrap().is_none());
    }

    #[test]
    fn test_legacy_hex_escape() {
        let v = json_loads(r#""a\x41b""#).unwrap();
        assert_eq!(v.cast::<String>().unwrap(), "aAb");
    }

    #[test]
    fn test_unicode_escape() {
        let v = json_loads(r#""Aé""#).unwrap();
        assert_eq!(v.cast::<String>().unwrap(), "Aé");
    }

    #[test]
    fn test_malformed_is_value_error() {
        let err = json_loads("{oops").unwrap_err();
        assert_eq!(err.kind, "ValueError");
        assert!(err.message.contains("JSON parsing failure"));
    }

    #[test]
    fn test_escape_normalizer_leaves_structure_alone() {
        // \x outside a string stays untouched (it will fail parsing, as
        // it should)
        assert!(json_loads(r#"[\x41]"#).is_err());
    }
}
