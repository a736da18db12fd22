//! Surface-form normalization (§4.4 point 2): casefold, strip punctuation,
//! collapse whitespace, plus type-specific canonicalization. Two mentions
//! with the same `(entity_type, normalized_name)` resolve to the same node,
//! so this is the single place that decides entity identity.

use nexus_types::EntityType;

const ORG_SUFFIXES: &[&str] = &["inc.", "inc", "llc", "corp.", "corp", "corporation", "ltd.", "ltd", "co.", "group", "plc"];

fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '\'')
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Organization-suffix normalization: "Acme Corp." and "Acme Corporation"
/// both collapse to "acme".
fn strip_org_suffix(name: &str) -> String {
    let mut out = name.to_string();
    loop {
        let trimmed_len = out.len();
        for suffix in ORG_SUFFIXES {
            if let Some(rest) = out.strip_suffix(suffix) {
                let rest = rest.trim_end();
                if rest.len() < out.len() {
                    out = rest.to_string();
                }
            }
        }
        if out.len() == trimmed_len {
            break;
        }
    }
    out
}

/// Normalize a raw surface form into the identity key used for node UPSERT.
/// Casefold, strip punctuation and collapse whitespace unconditionally;
/// apply organization-suffix stripping only for `EntityType::Organization`.
pub fn normalize_entity_name(entity_type: &EntityType, surface_form: &str) -> String {
    let lower = surface_form.trim().to_lowercase();
    let cleaned = collapse_whitespace(&strip_punctuation(&lower));
    match entity_type {
        EntityType::Organization => collapse_whitespace(&strip_org_suffix(&cleaned)),
        _ => cleaned,
    }
}

/// Type-agnostic counterpart of `normalize_entity_name`, for lookups
/// (`explore`, `path`, relation-endpoint resolution) where the caller
/// doesn't know which `EntityType` a name was stored under. Applies the
/// same punctuation-strip, casefold and org-suffix-strip pipeline so a
/// query for "Acme Corp." resolves to the same key a node named
/// `EntityType::Organization` was UPSERTed under ("acme").
pub fn normalize_name_loose(surface_form: &str) -> String {
    let lower = surface_form.trim().to_lowercase();
    let cleaned = collapse_whitespace(&strip_punctuation(&lower));
    collapse_whitespace(&strip_org_suffix(&cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_suffixes_collapse_to_same_name() {
        let a = normalize_entity_name(&EntityType::Organization, "Acme Corp.");
        let b = normalize_entity_name(&EntityType::Organization, "Acme Corporation");
        let c = normalize_entity_name(&EntityType::Organization, "  acme   ");
        assert_eq!(a, "acme");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn non_organization_types_are_not_suffix_stripped() {
        let name = normalize_entity_name(&EntityType::Person, "Ada Lovelace");
        assert_eq!(name, "ada lovelace");
    }

    #[test]
    fn punctuation_and_case_are_normalized() {
        let a = normalize_entity_name(&EntityType::Technology, "Rust!");
        let b = normalize_entity_name(&EntityType::Technology, "rust");
        assert_eq!(a, b);
    }

    #[test]
    fn loose_normalize_matches_organization_key() {
        let stored = normalize_entity_name(&EntityType::Organization, "Acme Corp.");
        let looked_up = normalize_name_loose("Acme Corp.");
        assert_eq!(stored, looked_up);
    }
}
