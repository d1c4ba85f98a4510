//! Masking transforms applied to rows bound for storage or output.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use hubd_catalog::model::Rule;
use hubd_core::{HubError, HubResult, Row};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};

fn field_of(rule: &Rule) -> HubResult<String> {
    rule.logic
        .get("field")
        .and_then(|v| v.as_str())
        .map(Into::into)
        .ok_or_else(|| HubError::invalid_input("logic.field", "required"))
}

/// Apply one masking rule to one row in place. Missing or null fields
/// are left untouched.
pub fn apply(rule: &Rule, row: &mut Row) -> HubResult<()> {
    let field = field_of(rule)?;
    let Some(value) = row.get(&field) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let masked = match rule.rule_type.as_str() {
        "mask" => {
            let keep_prefix = rule.logic.get("keep_prefix").and_then(|v| v.as_u64()).unwrap_or(1)
                as usize;
            let keep_suffix = rule.logic.get("keep_suffix").and_then(|v| v.as_u64()).unwrap_or(1)
                as usize;
            let mask_char = rule
                .logic
                .get("mask_char")
                .and_then(|v| v.as_str())
                .and_then(|s| s.chars().next())
                .unwrap_or('*');
            mask_middle(&text, keep_prefix, keep_suffix, mask_char)
        }
        "replace" => rule
            .logic
            .get("replacement")
            .and_then(|v| v.as_str())
            .unwrap_or("***")
            .to_string(),
        "encrypt" => {
            let key_b64 = rule
                .logic
                .get("key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HubError::invalid_input("logic.key", "required"))?;
            encrypt(&text, key_b64)?
        }
        "pseudonymize" => {
            let salt = rule.logic.get("salt").and_then(|v| v.as_str()).unwrap_or("");
            pseudonymize(&text, salt)
        }
        other => {
            return Err(HubError::invalid_input(
                "rule_type",
                format!("unknown masking rule {other:?}"),
            ))
        }
    };
    row.insert(field, Value::String(masked));
    Ok(())
}

/// Keep a prefix and suffix, star the middle. Short values are fully
/// starred so nothing leaks.
pub fn mask_middle(text: &str, keep_prefix: usize, keep_suffix: usize, mask_char: char) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= keep_prefix + keep_suffix {
        return mask_char.to_string().repeat(chars.len().max(3));
    }
    let mut out = String::with_capacity(chars.len());
    out.extend(&chars[..keep_prefix]);
    out.extend(std::iter::repeat(mask_char).take(chars.len() - keep_prefix - keep_suffix));
    out.extend(&chars[chars.len() - keep_suffix..]);
    out
}

/// AES-256-GCM with a random nonce, output `base64(nonce || ciphertext)`.
fn encrypt(text: &str, key_b64: &str) -> HubResult<String> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .map_err(|e| HubError::invalid_input("logic.key", e))?;
    if key_bytes.len() != 32 {
        return Err(HubError::invalid_input(
            "logic.key",
            "must decode to 32 bytes",
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| HubError::internal(e.to_string()))?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, text.as_bytes())
        .map_err(|e| HubError::internal(e.to_string()))?;
    let mut payload = nonce_bytes.to_vec();
    payload.extend(ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(payload))
}

/// Deterministic salted digest, truncated for readability. Equal inputs
/// map to equal tokens, which keeps joins possible.
fn pseudonymize(text: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{salt}:{text}").as_bytes());
    format!("anon_{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{masking_rule, row};

    #[test]
    fn mask_keeps_edges() {
        assert_eq!(mask_middle("13912345678", 3, 2, '*'), "139******78");
        assert_eq!(mask_middle("ab", 3, 2, '*'), "***");
    }

    #[test]
    fn replace_overwrites() {
        let rule = masking_rule(
            "replace",
            serde_json::json!({"field": "ssn", "replacement": "[redacted]"}),
        );
        let mut r = row(serde_json::json!({"ssn": "123-45-6789"}));
        apply(&rule, &mut r).unwrap();
        assert_eq!(r["ssn"], "[redacted]");
    }

    #[test]
    fn pseudonymize_is_deterministic() {
        assert_eq!(pseudonymize("ada", "s1"), pseudonymize("ada", "s1"));
        assert_ne!(pseudonymize("ada", "s1"), pseudonymize("ada", "s2"));
        assert_ne!(pseudonymize("ada", "s1"), pseudonymize("bob", "s1"));
    }

    #[test]
    fn encrypt_round_trips_nothing_in_clear() {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let rule = masking_rule("encrypt", serde_json::json!({"field": "email", "key": key}));
        let mut r = row(serde_json::json!({"email": "ada@example.com"}));
        apply(&rule, &mut r).unwrap();
        let out = r["email"].as_str().unwrap();
        assert!(!out.contains("ada"));
        assert!(out.len() > 24);
    }

    #[test]
    fn missing_field_untouched() {
        let rule = masking_rule("mask", serde_json::json!({"field": "phone"}));
        let mut r = row(serde_json::json!({"id": 1}));
        apply(&rule, &mut r).unwrap();
        assert!(r.get("phone").is_none());
    }
}
