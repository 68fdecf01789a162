// ============================================================================
// Key Ranges
// ============================================================================
//
// Continuous intervals over keys, used by ranged counts, key listings and
// cursors. A `KeyQuery` is either a single key or a range.
//
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::core::{HostError, Key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// Creates a range with both bounds.
    ///
    /// Fails with `DataError` if `lower > upper`, or if the bounds are equal
    /// and either side is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, HostError> {
        let lower = lower.into();
        let upper = upper.into();
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            return Err(HostError::data(
                "Failed to execute 'bound' on 'IDBKeyRange': The lower key is greater than the upper key.",
            ));
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: true,
        }
    }

    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_open: true,
            upper_open: open,
        }
    }

    /// Range containing exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above_lower && below_upper
    }
}

/// The selector accepted by keyed and ranged operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyQuery {
    Key(Key),
    Range(KeyRange),
}

impl KeyQuery {
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            KeyQuery::Key(k) => k == key,
            KeyQuery::Range(range) => range.includes(key),
        }
    }
}

impl From<Key> for KeyQuery {
    fn from(key: Key) -> Self {
        KeyQuery::Key(key)
    }
}

impl From<KeyRange> for KeyQuery {
    fn from(range: KeyRange) -> Self {
        KeyQuery::Range(range)
    }
}

impl From<&str> for KeyQuery {
    fn from(key: &str) -> Self {
        KeyQuery::Key(Key::from(key))
    }
}

macro_rules! key_query_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyQuery {
                fn from(key: $ty) -> Self {
                    KeyQuery::Key(Key::from(key))
                }
            }
        )*
    };
}

key_query_from!(String, f64, i64, i32, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_rejects_inverted_bounds() {
        assert!(KeyRange::bound("b", "a", false, false).is_err());
        assert!(KeyRange::bound("a", "a", true, false).is_err());
        assert!(KeyRange::bound("a", "a", false, false).is_ok());
    }

    #[test]
    fn test_includes_respects_open_bounds() {
        let range = KeyRange::bound(1, 5, true, false).unwrap();
        assert!(!range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(2)));
        assert!(range.includes(&Key::from(5)));
        assert!(!range.includes(&Key::from(6)));
    }

    #[test]
    fn test_half_open_ranges() {
        let lower = KeyRange::lower_bound("m", false);
        assert!(lower.includes(&Key::from("m")));
        assert!(lower.includes(&Key::from("z")));
        assert!(!lower.includes(&Key::from("a")));

        let upper = KeyRange::upper_bound("m", true);
        assert!(!upper.includes(&Key::from("m")));
        assert!(upper.includes(&Key::from("a")));
    }

    #[test]
    fn test_only() {
        let only = KeyRange::only("k");
        assert!(only.includes(&Key::from("k")));
        assert!(!only.includes(&Key::from("j")));
        assert_eq!(only.lower(), only.upper());
    }
}
