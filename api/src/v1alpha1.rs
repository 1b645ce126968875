//! Module `v1alpha1` implements the v1alpha1 Bundle CRD API.
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use validator::Validate;

/// VERSION is the kubernetes API group's version.
pub static VERSION: &str = "v1alpha1";

/// BundleSpec describes the desired state of a Bundle.
///
/// A Bundle is an ordered collection of resource declarations with
/// inter-dependencies. The declared order is irrelevant; execution order is
/// derived from the dependency graph.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "bundleproject.org",
    version = "v1alpha1",
    kind = "Bundle",
    namespaced,
    status = "BundleStatus",
    shortname = "bnd",
    category = "apps",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='bundleproject.org/Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Resources declares the resources this bundle manages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
}

/// ResourceSpec is a single author-declared resource inside a Bundle.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Id names this resource within the bundle.
    ///
    /// Must be non-empty, start with a lowercase letter, and contain only
    /// lowercase letters, digits, and hyphens. Other resources refer to this
    /// one by id, either explicitly via `dependsOn` or embedded in
    /// expressions as `resources.<id>…`.
    #[validate(length(min = 1))]
    pub id: String,
    /// Kind names the target custom-resource kind to create for this
    /// resource.
    #[validate(length(min = 1))]
    pub kind: String,
    /// Spec is the desired state handed to the target resource.
    ///
    /// String values may embed `${resources.<id>.<path>}` expressions, which
    /// are resolved against the live status of dependencies before apply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spec: BTreeMap<String, Value>,
    /// DependsOn lists explicit dependency edges in addition to the implicit
    /// ones discovered from expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// ReadyWhen holds expressions that must all hold before the resource is
    /// considered ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready_when: Vec<String>,
    /// SkipWhen holds expressions; if any holds the resource is skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_when: Vec<String>,
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Bundle({})",
            self.metadata.uid.as_deref().unwrap_or("<>"),
        ))
    }
}

/// BundleStatus describes the observed state of a Bundle.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    /// Conditions reports k8s-style conditions for various parts of the
    /// system.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<meta::v1::Condition>,
    /// Resources reports per-resource observed state, keyed by id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
    /// ObservedGeneration is the generation most recently acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl BundleStatus {
    /// Add_condition inserts `cnd`, replacing any existing condition of the
    /// same type.
    pub fn add_condition(&mut self, cnd: meta::v1::Condition) {
        if let Some(prev) = self.conditions.iter_mut().find(|c| c.type_ == cnd.type_) {
            *prev = cnd;
        } else {
            self.conditions.push(cnd);
        }
    }

    /// Condition returns the condition of the requested type, if present.
    pub fn condition(&self, type_: &str) -> Option<&meta::v1::Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Resource returns the status entry for the given resource id, if
    /// present.
    pub fn resource(&self, id: &str) -> Option<&ResourceStatus> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Status_map projects every resource status for expression resolution.
    pub fn status_map(&self) -> StatusMap {
        status_map(&self.resources)
    }
}

/// ResourceState is the lifecycle state of a single bundle resource.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum ResourceState {
    /// Pending means the resource has not been acted on yet.
    #[default]
    Pending,
    /// InProgress means a create or update has been issued and has not
    /// settled.
    InProgress,
    /// Synced means the observed state matches the declared spec.
    Synced,
    /// Failed means the last operation against the resource failed.
    Failed,
    /// Queried means the resource is read-only and has been fetched.
    Queried,
    /// Skipped means a skipWhen expression held and the resource was not
    /// applied.
    Skipped,
    /// Deleted means the resource was removed from the external API.
    Deleted,
}

/// ResourceStatus is the runtime-observed counterpart of a [ResourceSpec].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Id of the resource this status reports on.
    pub id: String,
    /// Kind of the created custom resource.
    pub kind: String,
    /// Name of the created custom resource.
    #[serde(default)]
    pub name: String,
    /// Namespace of the created custom resource.
    #[serde(default)]
    pub namespace: String,
    /// State is the lifecycle state.
    #[serde(default)]
    pub state: ResourceState,
    /// ExternalID is the identifier assigned by the external API, if the
    /// resource is a CRUD resource.
    #[serde(rename = "externalID", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Message is a human-readable note about the current state.
    #[serde(default)]
    pub message: String,
    /// Ready reports whether every readyWhen expression holds.
    #[serde(default)]
    pub ready: bool,
    /// Skipped reports whether a skipWhen expression held.
    #[serde(default)]
    pub skipped: bool,
    /// Extra carries additional fields surfaced by the executor, merged into
    /// the status projection at the root.
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

impl ResourceStatus {
    /// Projection renders this status as the value tree expression
    /// resolution navigates.
    ///
    /// The tree is rooted at the key `"status"`; `extra` keys merge at the
    /// root level and never shadow `"status"` itself.
    pub fn projection(&self) -> Value {
        let mut status = Map::new();
        status.insert("state".into(), json!(self.state));
        status.insert(
            "externalID".into(),
            self.external_id.clone().map_or(Value::Null, Value::String),
        );
        status.insert("message".into(), Value::String(self.message.clone()));
        status.insert("ready".into(), Value::Bool(self.ready));
        status.insert("skipped".into(), Value::Bool(self.skipped));
        status.insert("name".into(), Value::String(self.name.clone()));
        status.insert("namespace".into(), Value::String(self.namespace.clone()));
        status.insert("kind".into(), Value::String(self.kind.clone()));

        let mut root = Map::new();
        root.insert("status".into(), Value::Object(status));
        for (k, v) in &self.extra {
            root.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(root)
    }
}

/// StatusMap maps resource ids to their status projections. It is the
/// authoritative input to expression resolution.
pub type StatusMap = BTreeMap<String, Value>;

/// Status_map builds a [StatusMap] from observed resource statuses.
pub fn status_map(statuses: &[ResourceStatus]) -> StatusMap {
    statuses
        .iter()
        .map(|s| (s.id.clone(), s.projection()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> ResourceStatus {
        ResourceStatus {
            id: "db".into(),
            kind: "Database".into(),
            name: "db-1".into(),
            namespace: "default".into(),
            state: ResourceState::Synced,
            external_id: Some("1234".into()),
            message: "created".into(),
            ready: true,
            skipped: false,
            extra: BTreeMap::from([("endpoint".to_string(), json!("10.0.0.1:5432"))]),
        }
    }

    #[test]
    fn projection_shape() {
        let p = status().projection();
        assert_eq!(p["status"]["state"], json!("Synced"));
        assert_eq!(p["status"]["externalID"], json!("1234"));
        assert_eq!(p["status"]["ready"], json!(true));
        assert_eq!(p["status"]["skipped"], json!(false));
        assert_eq!(p["status"]["message"], json!("created"));
        // Extra keys land at the projection root.
        assert_eq!(p["endpoint"], json!("10.0.0.1:5432"));
    }

    #[test]
    fn projection_extra_never_shadows_status() {
        let mut s = status();
        s.extra.insert("status".into(), json!("sneaky"));
        let p = s.projection();
        assert_eq!(p["status"]["state"], json!("Synced"));
    }

    #[test]
    fn projection_absent_external_id() {
        let mut s = status();
        s.external_id = None;
        assert_eq!(s.projection()["status"]["externalID"], Value::Null);
    }

    #[test]
    fn status_map_keys() {
        let mut other = status();
        other.id = "cache".into();
        let m = status_map(&[status(), other]);
        assert_eq!(m.keys().cloned().collect::<Vec<_>>(), vec!["cache", "db"]);
    }

    #[test]
    fn conditions_replace_by_type() {
        let mut st = BundleStatus::default();
        let mk = |status: &str| meta::v1::Condition {
            last_transition_time: meta::v1::Time(k8s_openapi::jiff::Timestamp::UNIX_EPOCH),
            message: "".into(),
            observed_generation: None,
            reason: "Test".into(),
            status: status.into(),
            type_: "bundleproject.org/Ready".into(),
        };
        st.add_condition(mk("False"));
        st.add_condition(mk("True"));
        assert_eq!(st.conditions.len(), 1);
        assert_eq!(st.condition("bundleproject.org/Ready").unwrap().status, "True");
    }
}
