//! Byte-sortable index keys.
//!
//! Every index stores its entries under keys whose lexicographic byte order
//! matches the natural order of the indexed values:
//!
//! | Type | Encoding |
//! |------|----------|
//! | unsigned integers | big-endian |
//! | signed integers | big-endian, sign bit flipped |
//! | `bool` | one byte |
//! | strings | UTF-8 bytes followed by `0x00` |
//! | timestamps | 8-byte seconds since 0001-01-01, 4-byte nanoseconds |
//!
//! Types outside this table implement [`IndexKey`] themselves: writing their
//! own bytes and reporting whether they are empty.

use chrono::{DateTime, Utc};

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
///
/// Timestamps are offset by this amount so that year one encodes as all-zero
/// bytes and every later instant sorts after it.
pub const YEAR_ONE_OFFSET: i64 = 62_135_596_800;

/// A value that can be written into a byte-sortable index key.
pub trait IndexKey {
    /// Append this value's key bytes to `out`.
    ///
    /// `fold_case` asks text values to encode case-insensitively; other
    /// values ignore it.
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool);

    /// Returns `true` if this is the type's zero (empty) value.
    fn is_zero(&self) -> bool;
}

impl<V: IndexKey + ?Sized> IndexKey for &V {
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool) {
        (**self).write_key(out, fold_case);
    }

    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }
}

macro_rules! unsigned_key {
    ($($ty:ty),*) => {
        $(
            impl IndexKey for $ty {
                fn write_key(&self, out: &mut Vec<u8>, _fold_case: bool) {
                    out.extend_from_slice(&self.to_be_bytes());
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

macro_rules! signed_key {
    ($($ty:ty => $unsigned:ty),*) => {
        $(
            impl IndexKey for $ty {
                fn write_key(&self, out: &mut Vec<u8>, _fold_case: bool) {
                    let flipped = (*self as $unsigned) ^ (1 << (<$unsigned>::BITS - 1));
                    out.extend_from_slice(&flipped.to_be_bytes());
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

unsigned_key!(u8, u16, u32, u64);
signed_key!(i8 => u8, i16 => u16, i32 => u32, i64 => u64);

impl IndexKey for usize {
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool) {
        (*self as u64).write_key(out, fold_case);
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl IndexKey for bool {
    fn write_key(&self, out: &mut Vec<u8>, _fold_case: bool) {
        out.push(u8::from(*self));
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl IndexKey for str {
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool) {
        if fold_case {
            out.extend_from_slice(self.to_lowercase().as_bytes());
        } else {
            out.extend_from_slice(self.as_bytes());
        }
        out.push(0);
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl IndexKey for String {
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool) {
        self.as_str().write_key(out, fold_case);
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl IndexKey for DateTime<Utc> {
    fn write_key(&self, out: &mut Vec<u8>, _fold_case: bool) {
        let secs = self.timestamp().wrapping_add(YEAR_ONE_OFFSET) as u64;
        out.extend_from_slice(&secs.to_be_bytes());
        out.extend_from_slice(&self.timestamp_subsec_nanos().to_be_bytes());
    }

    fn is_zero(&self) -> bool {
        *self == DateTime::<Utc>::default()
    }
}

impl IndexKey for Option<DateTime<Utc>> {
    fn write_key(&self, out: &mut Vec<u8>, fold_case: bool) {
        match self {
            Some(ts) => ts.write_key(out, fold_case),
            None => out.extend_from_slice(&[0; 12]),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

/// A key assembled from an ordered list of components.
///
/// Custom indices return a `Key` per entity; search arguments for those
/// indices are encoded component by component the same way, so a prefix of
/// the components matches every key that starts with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    bytes: Vec<u8>,
    parts: usize,
}

impl Key {
    /// Create an empty key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component.
    #[must_use]
    pub fn with(mut self, part: &dyn IndexKey) -> Self {
        self.push(part);
        self
    }

    /// Append a component in place.
    pub fn push(&mut self, part: &dyn IndexKey) {
        part.write_key(&mut self.bytes, false);
        self.parts += 1;
    }

    /// Number of components written so far.
    #[must_use]
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the key, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode a single value as a standalone key.
#[must_use]
pub fn encode_key(value: &dyn IndexKey, fold_case: bool) -> Vec<u8> {
    let mut out = Vec::new();
    value.write_key(&mut out, fold_case);
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn key(v: &dyn IndexKey) -> Vec<u8> {
        encode_key(v, false)
    }

    #[test]
    fn test_unsigned_is_big_endian() {
        assert_eq!(key(&0x0102u16), vec![0x01, 0x02]);
        assert!(key(&1u32) < key(&256u32));
    }

    #[test]
    fn test_signed_negative_sorts_first() {
        let mut values = vec![5i64, -3, 0, i64::MIN, i64::MAX, -1];
        let mut keys: Vec<(Vec<u8>, i64)> = values.iter().map(|v| (key(v), *v)).collect();
        keys.sort();
        values.sort();
        assert_eq!(keys.into_iter().map(|(_, v)| v).collect::<Vec<_>>(), values);
        assert_eq!(key(&0i32), vec![0x80, 0, 0, 0]);
    }

    #[test]
    fn test_string_is_null_terminated() {
        assert_eq!(key(&"ab"), vec![b'a', b'b', 0]);
        // The terminator keeps "a" < "ab" and "a" a non-prefix of "ab\0".
        assert!(key(&"a") < key(&"ab"));
        assert!(!key(&"ab").starts_with(&key(&"a")));
    }

    #[test]
    fn test_fold_case() {
        assert_eq!(encode_key(&"HeLLo", true), encode_key(&"hello", false));
        assert_ne!(encode_key(&"HeLLo", false), encode_key(&"hello", false));
    }

    #[test]
    fn test_bool_one_byte() {
        assert_eq!(key(&false), vec![0]);
        assert_eq!(key(&true), vec![1]);
        assert!(false.is_zero());
    }

    #[test]
    fn test_year_one_is_all_zero() {
        let year_one = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(key(&year_one), vec![0; 12]);
        assert_eq!(key(&None::<DateTime<Utc>>), vec![0; 12]);
    }

    #[test]
    fn test_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 0).unwrap();
        let epoch = DateTime::<Utc>::default();
        let late = Utc.timestamp_opt(1_700_000_000, 5).unwrap();
        assert!(key(&early) < key(&epoch));
        assert!(key(&epoch) < key(&late));
        assert!(epoch.is_zero());
        assert!(!late.is_zero());
    }

    #[test]
    fn test_key_builder_counts_parts() {
        let k = Key::new().with(&"x").with(&7u8);
        assert_eq!(k.parts(), 2);
        assert_eq!(k.as_bytes(), &[b'x', 0, 7]);
    }
}
