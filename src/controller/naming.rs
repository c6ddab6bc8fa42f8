//! # Naming
//!
//! Deterministic names for derived RBAC bindings.
//!
//! A binding name is `access-{user}-{role}-{hash}` where `hash` is the first
//! eight hex characters of the MD5 of `user/namespace/clusterRole/role`. The
//! hash covers every field, so a Role and a ClusterRole of the same name in the
//! same namespace, or the same role in two namespaces, never share a name.

use crate::constants::{BINDING_NAME_PREFIX, MAX_NAME_LENGTH, NAME_HASH_LENGTH};

/// Name of the binding granting `role` (or `cluster_role` when `role` is empty)
/// to `user` within `namespace` (empty for cluster-wide bindings)
#[must_use]
pub fn binding_name(user: &str, namespace: &str, cluster_role: &str, role: &str) -> String {
    let digest = md5::compute(format!("{user}/{namespace}/{cluster_role}/{role}"));
    let hex = format!("{digest:x}");
    let label = if role.is_empty() { cluster_role } else { role };
    safe_concat_name(&[BINDING_NAME_PREFIX, user, label, &hex[..NAME_HASH_LENGTH]])
}

/// Join `parts` with `-`, clipped to a valid object name length
///
/// The last part is kept whole; only the leading parts are truncated, and a
/// trailing `-` or `.` left by truncation is stripped.
#[must_use]
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let Some((suffix, head)) = parts.split_last() else {
        return full;
    };
    let budget = MAX_NAME_LENGTH.saturating_sub(suffix.len() + 1);
    let head = head.join("-");
    let mut cut = budget.min(head.len());
    while !head.is_char_boundary(cut) {
        cut -= 1;
    }
    let clipped = head[..cut].trim_end_matches(['-', '.']);
    format!("{clipped}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_name_layout() {
        let name = binding_name("alice", "", "view", "");
        assert!(name.starts_with("access-alice-view-"));
        assert_eq!(name.len(), "access-alice-view-".len() + NAME_HASH_LENGTH);
    }

    #[test]
    fn test_role_preferred_over_cluster_role_as_label() {
        let name = binding_name("alice", "ns", "edit", "deployer");
        assert!(name.starts_with("access-alice-deployer-"));
    }

    #[test]
    fn test_short_names_are_untouched() {
        assert_eq!(safe_concat_name(&["a", "b", "c"]), "a-b-c");
    }

    #[test]
    fn test_long_names_keep_suffix() {
        let long = "x".repeat(80);
        let name = safe_concat_name(&["access", &long, "deadbeef"]);
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.ends_with("-deadbeef"));
    }

    #[test]
    fn test_truncation_strips_dangling_separator() {
        // cut lands right after the `-` inside the user name
        let user = format!("{}-{}", "u".repeat(46), "v".repeat(20));
        let name = safe_concat_name(&["access", &user, "deadbeef"]);
        assert!(!name.contains("--"));
        assert!(name.ends_with("-deadbeef"));
        assert!(name.len() <= MAX_NAME_LENGTH);
    }
}
