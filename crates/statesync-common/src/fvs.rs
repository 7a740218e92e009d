//! Attribute sets: ordered field-value pairs with map-equality semantics.
//!
//! An entry's attributes are carried as an ordered `Vec` because downstream
//! encodings can be order-sensitive, but two attribute sets are *equal* iff
//! their name→value mappings are identical. Duplicate field names resolve to
//! the last occurrence.

use std::collections::BTreeMap;

/// A single (name, value) attribute pair.
pub type FieldValue = (String, String);

/// An entity's attribute set.
pub type FieldValues = Vec<FieldValue>;

/// Builds a `FieldValues` from string slices.
pub fn fvs(pairs: &[(&str, &str)]) -> FieldValues {
    pairs
        .iter()
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

/// Returns the value for `field`, if present (last occurrence wins).
pub fn fvs_get<'a>(fvs: &'a [FieldValue], field: &str) -> Option<&'a str> {
    fvs.iter()
        .rev()
        .find(|(f, _)| f == field)
        .map(|(_, v)| v.as_str())
}

/// Returns true if the attribute set contains `field`.
pub fn fvs_has(fvs: &[FieldValue], field: &str) -> bool {
    fvs.iter().any(|(f, _)| f == field)
}

/// Collapses an attribute set into its name→value mapping.
pub fn fvs_map(fvs: &[FieldValue]) -> BTreeMap<&str, &str> {
    fvs.iter().map(|(f, v)| (f.as_str(), v.as_str())).collect()
}

/// Attribute-set equality: identical name→value mappings, ordering ignored.
pub fn fvs_eq(a: &[FieldValue], b: &[FieldValue]) -> bool {
    fvs_map(a) == fvs_map(b)
}
