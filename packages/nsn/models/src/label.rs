//! Label derivation from NSN feature properties.
//!
//! The 2023 LBK/BKNSN dumps are not consistent about which property
//! carries the human-readable subtype name, so a fixed list of candidate
//! keys is tried in order. Features for which no candidate yields a
//! non-empty value are excluded from the index entirely.

use serde_json::{Map, Value};

/// Candidate property keys, most specific first. Matched against
/// trimmed, lowercased property names.
pub const LABEL_KEYS: &[&str] = &[
    "subtype_na",
    "subtype",
    "subtype_naam",
    "nsn_naam",
    "naam",
    "natuurlijk_systeem",
    "bknsn_code",
];

/// Derives a display label from a feature's property bag.
///
/// Property keys are normalized (trimmed, lowercased; the first
/// occurrence of a normalized key wins) and the candidates in
/// [`LABEL_KEYS`] are tried in order. The first candidate whose value
/// stringifies to something non-empty after trimming is returned.
#[must_use]
pub fn label_from_properties(properties: &Map<String, Value>) -> Option<String> {
    let mut normalized: std::collections::HashMap<String, &Value> =
        std::collections::HashMap::with_capacity(properties.len());
    for (key, value) in properties {
        let norm = key.trim().to_lowercase();
        if !norm.is_empty() {
            normalized.entry(norm).or_insert(value);
        }
    }

    for key in LABEL_KEYS {
        if let Some(label) = normalized.get(*key).and_then(|v| scalar_to_label(v)) {
            return Some(label);
        }
    }
    None
}

/// Renders a scalar property value as a trimmed, non-empty label.
fn scalar_to_label(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn prefers_subtype_over_fallback_keys() {
        let p = props(&[
            ("naam", json!("Algemeen")),
            ("subtype_na", json!("Duinvallei")),
        ]);
        assert_eq!(label_from_properties(&p), Some("Duinvallei".to_string()));
    }

    #[test]
    fn keys_match_case_insensitively() {
        let p = props(&[("SUBTYPE_NA", json!("  Beekdal  "))]);
        assert_eq!(label_from_properties(&p), Some("Beekdal".to_string()));
    }

    #[test]
    fn empty_values_fall_through_to_next_key() {
        let p = props(&[("subtype_na", json!("   ")), ("naam", json!("Kwelder"))]);
        assert_eq!(label_from_properties(&p), Some("Kwelder".to_string()));
    }

    #[test]
    fn numeric_code_is_rendered() {
        let p = props(&[("bknsn_code", json!(42))]);
        assert_eq!(label_from_properties(&p), Some("42".to_string()));
    }

    #[test]
    fn no_candidate_yields_none() {
        let p = props(&[("oppervlakte", json!(12.5)), ("opmerking", json!(null))]);
        assert_eq!(label_from_properties(&p), None);
    }
}
