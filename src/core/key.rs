use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::HostError;

/// Largest integer a host number represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A record key.
///
/// Keys of different kinds are totally ordered:
/// `Number < Date < String < Binary < Array`.
/// Arrays compare element by element, then by length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Key::Number(_) => "number",
            Key::Date(_) => "date",
            Key::String(_) => "string",
            Key::Binary(_) => "binary",
            Key::Array(_) => "array",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a JSON value into a key. Only numbers, strings and arrays of
    /// valid keys are keys; anything else is a `DataError`.
    pub fn from_value(value: &Value) -> Result<Key, HostError> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) if !f.is_nan() => Ok(Key::Number(f)),
                _ => Err(HostError::data("The parameter is not a valid key.")),
            },
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Key::Array),
            _ => Err(HostError::data("The parameter is not a valid key.")),
        }
    }

    /// Converts the key back into a JSON value. Integral numbers become JSON
    /// integers, dates become numbers and binary keys become arrays of bytes.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                Value::from(*n as i64)
            }
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::Date(ms) => Value::from(*ms),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Resolves a dotted key path (`"a.b.c"`) against a value.
    /// Returns `None` when a segment is missing.
    pub fn extract(value: &Value, key_path: &str) -> Option<Result<Key, HostError>> {
        let mut current = value;
        if !key_path.is_empty() {
            for segment in key_path.split('.') {
                current = current.as_object()?.get(segment)?;
            }
        }
        Some(Key::from_value(current))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp(y) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "Date({})", ms),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cross_type_ordering() {
        let mut keys = vec![
            Key::Array(vec![Key::from(1)]),
            Key::Binary(vec![1, 2]),
            Key::from("a"),
            Key::Date(5),
            Key::from(10),
        ];
        keys.sort();
        let names: Vec<_> = keys.iter().map(Key::type_name).collect();
        assert_eq!(names, vec!["number", "date", "string", "binary", "array"]);
    }

    #[test]
    fn test_array_ordering_is_lexicographic() {
        let short = Key::Array(vec![Key::from(1)]);
        let long = Key::Array(vec![Key::from(1), Key::from(0)]);
        let bigger = Key::Array(vec![Key::from(2)]);
        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(Key::from(2) < Key::from(10));
        assert_eq!(Key::from(3), Key::Number(3.0));
    }

    #[test]
    fn test_to_value_keeps_integers_integral() {
        assert_eq!(Key::from(7).to_value(), json!(7));
        assert_eq!(Key::Number(1.5).to_value(), json!(1.5));
        assert_eq!(
            Key::Array(vec![Key::from("a"), Key::from(2)]).to_value(),
            json!(["a", 2])
        );
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Key::from_value(&json!("x")).unwrap(), Key::from("x"));
        assert_eq!(
            Key::from_value(&json!([1, "b"])).unwrap(),
            Key::Array(vec![Key::from(1), Key::from("b")])
        );
        assert!(Key::from_value(&json!({"a": 1})).is_err());
        assert!(Key::from_value(&json!(null)).is_err());
        assert!(Key::from_value(&json!(true)).is_err());
    }

    #[test]
    fn test_extract_key_path() {
        let value = json!({"user": {"id": "u1"}, "n": 4});
        assert_eq!(
            Key::extract(&value, "user.id").unwrap().unwrap(),
            Key::from("u1")
        );
        assert_eq!(Key::extract(&value, "n").unwrap().unwrap(), Key::from(4));
        assert!(Key::extract(&value, "missing").is_none());
        assert!(Key::extract(&value, "user").unwrap().is_err());
    }
}
