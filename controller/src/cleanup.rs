//! Cleanup classification for custom resources the bundle executor created.
//!
//! The executor marks what it creates with annotations in the
//! `bundleproject.org/` space; a downstream cleanup pass lists candidate
//! resources and asks this module what, if anything, should happen to each.
//! Classification is pure: the clock is an argument, and nothing here talks
//! to the API.

use chrono::{DateTime, Utc};
use kube::core::DynamicObject;
use tracing::trace;

use crate::{
    CREATED_BY_ANNOTATION, ONE_SHOT_ANNOTATION, PATCH_EXPIRES_ANNOTATION,
    PATCH_ORIGINAL_STATE_ANNOTATION, PURPOSE_ANNOTATION,
};

/// CleanupSelection selects which categories of resource are eligible.
#[derive(Clone, Copy, Debug)]
pub struct CleanupSelection {
    /// Consider one-shot executions.
    pub one_shot: bool,
    /// Consider expired temporary patches.
    pub expired: bool,
    /// Consider diagnostic resources.
    pub diagnostic: bool,
}

impl Default for CleanupSelection {
    fn default() -> Self {
        Self {
            one_shot: true,
            expired: true,
            diagnostic: true,
        }
    }
}

/// CleanupAction is what should be done with an eligible resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum CleanupAction {
    /// Delete the resource.
    Delete,
    /// Restore the resource to its recorded previous state.
    Restore,
}

/// CleanupReason is why a resource is eligible.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum CleanupReason {
    /// The resource was a one-shot execution.
    #[strum(serialize = "one-shot")]
    OneShot,
    /// A temporary patch reached its expiry.
    #[strum(serialize = "expired TTL")]
    ExpiredTtl,
    /// The resource was created for diagnostics.
    #[strum(serialize = "diagnostic")]
    Diagnostic,
}

/// CleanupTarget identifies an eligible resource and the action to take.
#[derive(Clone, Debug, PartialEq)]
pub struct CleanupTarget {
    /// Kind of the resource.
    pub kind: String,
    /// Name of the resource.
    pub name: String,
    /// Namespace of the resource.
    pub namespace: String,
    /// Why the resource is eligible.
    pub reason: CleanupReason,
    /// What to do with it.
    pub action: CleanupAction,
    /// Recorded previous state, for [CleanupAction::Restore].
    pub original_state: Option<String>,
}

/// Classify_for_cleanup decides whether `obj` is eligible under `sel` as of
/// `now`, and if so what to do with it.
///
/// One-shot wins over expiry, which wins over the diagnostic markers; a
/// resource matches at most one category per call.
pub fn classify_for_cleanup(
    obj: &DynamicObject,
    kind: &str,
    sel: &CleanupSelection,
    now: DateTime<Utc>,
) -> Option<CleanupTarget> {
    let name = obj.metadata.name.clone()?;
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let annotations = obj.metadata.annotations.as_ref()?;
    let target = |reason, action, original_state| CleanupTarget {
        kind: kind.to_string(),
        name: name.clone(),
        namespace: namespace.clone(),
        reason,
        action,
        original_state,
    };

    if sel.one_shot
        && annotations.get(ONE_SHOT_ANNOTATION.as_str()).map(String::as_str) == Some("true")
    {
        return Some(target(CleanupReason::OneShot, CleanupAction::Delete, None));
    }

    if sel.expired
        && let Some(expires) = annotations.get(PATCH_EXPIRES_ANNOTATION.as_str())
    {
        match DateTime::parse_from_rfc3339(expires) {
            Ok(expiry) if now >= expiry => {
                return Some(target(
                    CleanupReason::ExpiredTtl,
                    CleanupAction::Restore,
                    annotations
                        .get(PATCH_ORIGINAL_STATE_ANNOTATION.as_str())
                        .cloned(),
                ));
            }
            Ok(_) => trace!(name, expires, "patch not expired yet"),
            Err(err) => trace!(name, expires, %err, "unparseable expiry, leaving alone"),
        }
    }

    if sel.diagnostic
        && (annotations.get(PURPOSE_ANNOTATION.as_str()).map(String::as_str)
            == Some("diagnostic")
            || annotations.contains_key(CREATED_BY_ANNOTATION.as_str()))
    {
        return Some(target(CleanupReason::Diagnostic, CleanupAction::Delete, None));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kube::core::ObjectMeta;

    fn obj(annotations: &[(&str, &str)]) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("probe".into()),
                namespace: Some("default".into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn one_shot_deleted() {
        let o = obj(&[("bundleproject.org/one-shot", "true")]);
        let t = classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()).unwrap();
        assert_eq!(t.reason, CleanupReason::OneShot);
        assert_eq!(t.action, CleanupAction::Delete);
        assert_eq!(t.kind, "Probe");
        assert_eq!(t.name, "probe");
        assert_eq!(t.namespace, "default");
    }

    #[test]
    fn one_shot_requires_true() {
        let o = obj(&[("bundleproject.org/one-shot", "false")]);
        assert_eq!(
            classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()),
            None,
        );
    }

    #[test]
    fn expired_patch_restored() {
        let o = obj(&[
            ("bundleproject.org/patch-expires", "2026-05-31T00:00:00Z"),
            ("bundleproject.org/patch-original-state", "{\"replicas\":3}"),
        ]);
        let t = classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()).unwrap();
        assert_eq!(t.reason, CleanupReason::ExpiredTtl);
        assert_eq!(t.action, CleanupAction::Restore);
        assert_eq!(t.original_state.as_deref(), Some("{\"replicas\":3}"));
    }

    #[test]
    fn unexpired_patch_left_alone() {
        let o = obj(&[("bundleproject.org/patch-expires", "2027-01-01T00:00:00Z")]);
        assert_eq!(
            classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()),
            None,
        );
    }

    #[test]
    fn unparseable_expiry_left_alone() {
        let o = obj(&[("bundleproject.org/patch-expires", "soon")]);
        assert_eq!(
            classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()),
            None,
        );
    }

    #[test]
    fn diagnostic_markers() {
        let purpose = obj(&[("bundleproject.org/purpose", "diagnostic")]);
        let created = obj(&[("bundleproject.org/created-by", "bundle-controller")]);
        for o in [purpose, created] {
            let t =
                classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()).unwrap();
            assert_eq!(t.reason, CleanupReason::Diagnostic);
            assert_eq!(t.action, CleanupAction::Delete);
        }
    }

    #[test]
    fn selection_gates_categories() {
        let o = obj(&[("bundleproject.org/one-shot", "true")]);
        let sel = CleanupSelection {
            one_shot: false,
            ..Default::default()
        };
        assert_eq!(classify_for_cleanup(&o, "Probe", &sel, now()), None);
    }

    #[test]
    fn one_shot_wins_over_diagnostic() {
        let o = obj(&[
            ("bundleproject.org/one-shot", "true"),
            ("bundleproject.org/purpose", "diagnostic"),
        ]);
        let t = classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()).unwrap();
        assert_eq!(t.reason, CleanupReason::OneShot);
    }

    #[test]
    fn unmarked_resources_ignored() {
        let o = obj(&[("some/other", "annotation")]);
        assert_eq!(
            classify_for_cleanup(&o, "Probe", &CleanupSelection::default(), now()),
            None,
        );
    }

    #[test]
    fn reason_display() {
        assert_eq!(CleanupReason::OneShot.to_string(), "one-shot");
        assert_eq!(CleanupReason::ExpiredTtl.to_string(), "expired TTL");
        assert_eq!(CleanupReason::Diagnostic.to_string(), "diagnostic");
    }
}
