//! Canonical JSON encoding.
//!
//! Saves must round-trip byte-identically: `serialize(hydrate(s)) == s`.
//! That requires one canonical byte stream per logical value, so the
//! encoder sorts object keys, normalizes `-0` to `0`, collapses
//! integral floats to integer form, and rejects anything JSON cannot
//! represent losslessly. It is a rejecting encoder, never a
//! language-specific structured clone.

use std::error::Error;
use std::fmt;

use serde_json::Value;

/// Largest integer exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Errors from canonical encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalError {
    /// A number was NaN or infinite.
    ///
    /// `serde_json::Value` cannot hold these, but the encoder re-checks
    /// so a future representation change cannot silently emit garbage.
    NonFiniteNumber,
    /// An object key contained an unpaired surrogate or other sequence
    /// that does not survive a JSON round-trip.
    UnencodableString,
}

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteNumber => write!(f, "non-finite number in canonical encoding"),
            Self::UnencodableString => write!(f, "unencodable string in canonical encoding"),
        }
    }
}

impl Error for CanonicalError {}

/// Encode a value as canonical JSON.
///
/// Object keys are emitted in sorted (byte-order) sequence regardless
/// of the underlying map's iteration order.
pub fn to_canonical_json(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), CanonicalError> {
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
        return Ok(());
    }
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
        return Ok(());
    }
    let Some(f) = n.as_f64() else {
        return Err(CanonicalError::NonFiniteNumber);
    };
    if !f.is_finite() {
        return Err(CanonicalError::NonFiniteNumber);
    }
    // -0 normalizes to 0; integral floats collapse to integer form so a
    // value that round-trips through f64 re-encodes identically.
    if f == 0.0 {
        out.push('0');
    } else if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
        out.push_str(&(f as i64).to_string());
    } else {
        // Shortest round-trippable representation (ryu, via serde_json).
        match serde_json::Number::from_f64(f) {
            Some(n) => out.push_str(&n.to_string()),
            None => return Err(CanonicalError::NonFiniteNumber),
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let value = json!({ "zebra": 1, "apple": 2, "mid": { "b": 1, "a": 2 } });
        let canonical = to_canonical_json(&value).unwrap();
        assert_eq!(canonical, r#"{"apple":2,"mid":{"a":2,"b":1},"zebra":1}"#);
    }

    #[test]
    fn negative_zero_normalizes() {
        let value = json!({ "v": -0.0 });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"v":0}"#);
    }

    #[test]
    fn integral_floats_collapse() {
        let value = json!({ "v": 42.0 });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"v":42}"#);
    }

    #[test]
    fn fractional_floats_keep_precision() {
        let value = json!({ "v": 55.5 });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"v":55.5}"#);
        let value = json!({ "v": 0.1 });
        let canonical = to_canonical_json(&value).unwrap();
        let back: Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(back["v"].as_f64(), Some(0.1));
    }

    #[test]
    fn strings_escape_control_characters() {
        let value = json!("line\nbreak\t\"quoted\"");
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#""line\nbreak\t\"quoted\"""#
        );
        let value = json!({ "k": "\u{0001}" });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"k":""}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(to_canonical_json(&value).unwrap(), "[3,1,2]");
    }

    #[test]
    fn encoding_is_idempotent() {
        let value = json!({
            "b": [1.0, 2.5, -0.0],
            "a": { "nested": null, "flag": true },
        });
        let once = to_canonical_json(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = to_canonical_json(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_json() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i32>().prop_map(Value::from),
                (-1e12f64..1e12).prop_map(|f| serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)),
                "[a-z]{0,8}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 32, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn canonical_encoding_round_trips_and_is_stable(value in arb_json()) {
                let once = to_canonical_json(&value).unwrap();
                let reparsed: Value = serde_json::from_str(&once).unwrap();
                let twice = to_canonical_json(&reparsed).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
