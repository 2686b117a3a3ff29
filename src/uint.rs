//! Exact serde representation for unsigned integers.
//!
//! Stake amounts and block numbers exceed the 2^53 range that JSON numbers
//! carry safely in most clients, so `UInt` values are written as decimal
//! strings. Deserialization accepts a decimal string of any size, or a JSON
//! integer up to `u64::MAX`. Larger JSON numbers reach the visitor as floats
//! and are rejected rather than rounded.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

/// Unsigned integer domain used by expressions and facts.
pub type UInt = u128;

/// Serialize a `UInt` as a decimal string.
pub fn serialize<S>(value: &UInt, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

/// Deserialize a `UInt` from a decimal string or an integer.
pub fn deserialize<'de, D>(deserializer: D) -> Result<UInt, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(UIntVisitor)
}

struct UIntVisitor;

impl<'de> Visitor<'de> for UIntVisitor {
    type Value = UInt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an unsigned integer or a decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<UInt, E> {
        Ok(UInt::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<UInt, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<UInt, E> {
        UInt::try_from(v).map_err(|_| E::custom(format!("negative integer {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<UInt, E> {
        Err(E::custom(format!(
            "number {v} is not an exact unsigned integer; write values above u64::MAX as decimal strings"
        )))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<UInt, E> {
        let trimmed = v.trim();
        let digits = trimmed.strip_suffix('n').unwrap_or(trimmed);
        digits
            .parse::<UInt>()
            .map_err(|e| E::custom(format!("invalid unsigned integer '{v}': {e}")))
    }
}

/// Same encoding for `Option<UInt>`; `None` is `null`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::UInt;

    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "super")] UInt);

    /// Serialize an optional `UInt`.
    pub fn serialize<S>(value: &Option<UInt>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional `UInt`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<UInt>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(v)| v))
    }
}
