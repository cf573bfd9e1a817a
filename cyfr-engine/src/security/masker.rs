//! Secret masking for execution outputs.
//!
//! Every string leaf of an output tree is scrubbed: any occurrence of a
//! resolved secret value is replaced with [`REDACTION_TOKEN`]. Values
//! shorter than [`MIN_MASK_LEN`] are skipped so that short secrets (`"a"`,
//! `"42"`) do not collapse unrelated text. Masking is deterministic and
//! idempotent; the token itself contains no maskable material.

// Layer 3: Internal module imports
use crate::security::secrets::ResolvedSecrets;

/// Fixed string substituted for secret material in outputs.
pub const REDACTION_TOKEN: &str = "[REDACTED]";

/// Secret values shorter than this are not masked.
pub const MIN_MASK_LEN: usize = 4;

/// Replace every occurrence of every resolved secret value in `output`.
pub fn mask_output(output: serde_json::Value, secrets: &ResolvedSecrets) -> serde_json::Value {
    let values: Vec<&str> = secrets.values().collect();
    mask_values(output, &values)
}

/// Replace every occurrence of each value in `values` inside `output`.
///
/// Longer values are applied first so a secret that contains another
/// secret as a substring is scrubbed whole.
pub fn mask_values(output: serde_json::Value, values: &[&str]) -> serde_json::Value {
    let mut maskable: Vec<&str> = values
        .iter()
        .copied()
        .filter(|v| v.len() >= MIN_MASK_LEN)
        .collect();
    maskable.sort_by_key(|v| std::cmp::Reverse(v.len()));
    maskable.dedup();

    if maskable.is_empty() {
        return output;
    }
    walk(output, &maskable)
}

fn walk(value: serde_json::Value, maskable: &[&str]) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(mask_str(s, maskable)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(|v| walk(v, maskable)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, walk(v, maskable))).collect(),
        ),
        other => other,
    }
}

fn mask_str(mut s: String, maskable: &[&str]) -> String {
    for secret in maskable {
        if s.contains(secret) {
            s = s.replace(secret, REDACTION_TOKEN);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use serde_json::json;

    use super::*;

    #[test]
    fn test_masks_string_leaves_everywhere() {
        let output = json!({
            "token": "sk_livexyzxyz",
            "nested": {"echo": "value is sk_livexyzxyz!"},
            "list": ["sk_livexyzxyz", 42, null],
        });
        let masked = mask_values(output, &["sk_livexyzxyz"]);
        let text = masked.to_string();
        assert!(!text.contains("sk_livexyzxyz"));
        assert_eq!(masked["token"], REDACTION_TOKEN);
        assert_eq!(masked["nested"]["echo"], format!("value is {REDACTION_TOKEN}!"));
        assert_eq!(masked["list"][0], REDACTION_TOKEN);
        assert_eq!(masked["list"][1], 42);
    }

    #[test]
    fn test_short_values_are_not_masked() {
        let output = json!({"msg": "a1b"});
        let masked = mask_values(output.clone(), &["a1b"]);
        assert_eq!(masked, output);
    }

    #[test]
    fn test_threshold_boundary() {
        let output = json!({"msg": "abcd"});
        let masked = mask_values(output, &["abcd"]);
        assert_eq!(masked["msg"], REDACTION_TOKEN);
    }

    #[test]
    fn test_longer_values_mask_first() {
        // One secret embeds another; the longer one must be scrubbed whole.
        let output = json!({"msg": "prefix-secret-suffix"});
        let masked = mask_values(output, &["secret", "prefix-secret-suffix"]);
        assert_eq!(masked["msg"], REDACTION_TOKEN);
    }

    #[test]
    fn test_masking_is_idempotent() {
        let output = json!({"echo": "key sk_livexyzxyz and again sk_livexyzxyz"});
        let values = ["sk_livexyzxyz"];
        let once = mask_values(output, &values);
        let twice = mask_values(once.clone(), &values);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_string_leaves_untouched() {
        let output = json!({"n": 1234, "b": true, "x": null});
        let masked = mask_values(output.clone(), &["1234"]);
        assert_eq!(masked, output);
    }

    #[test]
    fn test_mask_output_uses_resolved_secrets() {
        use std::collections::HashMap;

        let secrets = crate::security::secrets::ResolvedSecrets::from_map(HashMap::from([(
            "API_KEY".to_string(),
            "sk_livexyzxyz".to_string(),
        )]));
        let masked = mask_output(json!({"echo": "sk_livexyzxyz"}), &secrets);
        assert_eq!(masked["echo"], REDACTION_TOKEN);
    }
}
