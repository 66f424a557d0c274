use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::Value;

/// Canonical JSON bytes for hashing: object keys sorted, no whitespace,
/// integer numbers only.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let v = normalize(serde_json::to_value(value)?)?;
    Ok(serde_json::to_string(&v)?.into_bytes())
}

fn normalize(v: Value) -> CoreResult<Value> {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, vv) in entries {
                out.insert(k, normalize(vv)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(arr) => Ok(Value::Array(
            arr.into_iter().map(normalize).collect::<CoreResult<_>>()?,
        )),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => Err(CoreError::InvalidInput(
            "canonical JSON forbids non-integer numbers".to_string(),
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::to_canonical_bytes;

    #[test]
    fn key_order_does_not_matter() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = serde_json::json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(to_canonical_bytes(&a).unwrap(), to_canonical_bytes(&b).unwrap());
    }

    #[test]
    fn floats_are_rejected() {
        assert!(to_canonical_bytes(&serde_json::json!({"x": 0.5})).is_err());
    }
}
