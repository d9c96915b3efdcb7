//! Identifier generation and normalization utilities.

use chrono::Utc;
use uuid::Uuid;

/// Generate a fresh row id. Local creations get a v4 UUID; the `origin`
/// column, not the id shape, is what distinguishes them from remote rows.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in integer milliseconds since the epoch.
/// Every timestamp column in the store uses this representation.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// True when `id` parses as a canonical UUID. Only the one-time origin
/// backfill still relies on this; new rows carry an explicit origin tag.
pub fn is_uuid_shaped(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// Lowercase and trim an email address. Returns `None` for blank input.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim().to_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Collapse a display name to a comparison key: lowercase, alphanumerics
/// only. Used for the global organization-name uniqueness check.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalize a slug candidate: lowercase, spaces and underscores to hyphens,
/// anything else non-alphanumeric dropped, runs of hyphens collapsed.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_hyphen = true;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_hyphen = false;
        } else if matches!(c, ' ' | '_' | '-') && !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Clamp a computed percentage into the 0..=100 range.
pub fn clamp_percent(value: i64) -> i64 {
    value.clamp(0, 100)
}

/// Coerce an optional string so that blank and whitespace-only values
/// become `None`. Remote snapshots are full of empty-string placeholders.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    match value {
        Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_and_uuid_shaped() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(is_uuid_shaped(&a));
        assert!(!is_uuid_shaped("local-1700000000-abc"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Alice@Example.COM "),
            Some("alice@example.com".to_string())
        );
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn test_normalize_name_ignores_case_and_punctuation() {
        assert_eq!(normalize_name("Acme, Inc."), normalize_name("ACME INC"));
        assert_ne!(normalize_name("Acme"), normalize_name("Acme Co"));
    }

    #[test]
    fn test_normalize_slug() {
        assert_eq!(
            normalize_slug("  North Tower_Phase 2 "),
            Some("north-tower-phase-2".to_string())
        );
        assert_eq!(normalize_slug("Résumé!"), Some("résumé".to_string()));
        assert_eq!(normalize_slug("!!!"), None);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-5), 0);
        assert_eq!(clamp_percent(55), 55);
        assert_eq!(clamp_percent(140), 100);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some(" x ")), Some("x".to_string()));
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(None), None);
    }
}
