#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Controller implements the cluster-facing half of the bundle tools: the
//! workload discovery pipeline, the node-model output, and the cleanup
//! classification for resources the bundle executor created.

use lazy_static::lazy_static;

pub mod cleanup;
pub mod discovery;

/// Error enumerates the failures reported by this crate.
// NB The docs are unclear, but backtraces are unsupported on stable.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// TracingConfig indicates the error came from the tracing setup.
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    /// Tracing indicates the error came from installing the tracing subscriber.
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to find a kubeconfig.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Io indicates some OS-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON indicates a JSON serialization failed.
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    /// YAML indicates a YAML serialization failed.
    #[error("yaml error: {0}")]
    YAML(#[from] serde_yaml::Error),
    /// Tokio indicates an error starting tasks.
    #[error("tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
    /// Core is an error from the bundle kernel, surfaced verbatim.
    #[error(transparent)]
    Core(#[from] bundle_core::Error),

    /// InvalidSelector indicates a label selector failed to parse.
    #[error("invalid label selector {0:?}")]
    InvalidSelector(String),
    /// Pattern indicates a glob pattern failed to compile.
    #[error("glob pattern error: {0}")]
    Pattern(#[from] globset::Error),
    /// UnknownFormat indicates an unrecognized output format was requested.
    #[error("unknown output format {0:?}")]
    UnknownFormat(String),
    /// Cancelled indicates the operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// Other is a catch-all error.
    #[error("some other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result typedef for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Keyify sanitizes the key for use in k8s metadata.
fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c.to_ascii_lowercase(),
        })
        .for_each(|c| out.push(c));
    out
}

/// Bundle_label returns the provided argument as a name in the
/// bundle-controller's space, suitable for use as an annotation or label.
pub fn bundle_label<S: AsRef<str>>(s: S) -> String {
    keyify(format!("{}/", api::GROUP), s)
}

/// K8s_label returns the provided argument as a name in the
/// "app.kubernetes.io" space, suitable for use as an annotation or label.
pub fn k8s_label<S: AsRef<str>>(s: S) -> String {
    keyify("app.kubernetes.io/", s)
}

lazy_static! {
    /// INSTANCE_LABEL is the well-known label naming the helm release a
    /// workload belongs to.
    pub static ref INSTANCE_LABEL: String = k8s_label("instance");
    /// COMPONENT_LABEL is the well-known "component" label.
    pub static ref COMPONENT_LABEL: String = k8s_label("component");

    /// ONE_SHOT_ANNOTATION marks a resource as a one-shot execution,
    /// eligible for deletion once it has run.
    pub static ref ONE_SHOT_ANNOTATION: String = bundle_label("one-shot");
    /// PATCH_EXPIRES_ANNOTATION holds the RFC 3339 expiry of a temporary
    /// patch.
    pub static ref PATCH_EXPIRES_ANNOTATION: String = bundle_label("patch-expires");
    /// PATCH_ORIGINAL_STATE_ANNOTATION holds the pre-patch state used to
    /// restore an expired patch.
    pub static ref PATCH_ORIGINAL_STATE_ANNOTATION: String = bundle_label("patch-original-state");
    /// PURPOSE_ANNOTATION declares why a resource was created.
    pub static ref PURPOSE_ANNOTATION: String = bundle_label("purpose");
    /// TAGS_ANNOTATION lets a workload contribute extra node tags.
    pub static ref TAGS_ANNOTATION: String = bundle_label("tags");
    /// CREATED_BY_ANNOTATION names the tool that created a resource.
    pub static ref CREATED_BY_ANNOTATION: String = bundle_label("created-by");
}

/// CONTROLLER_NAME is the name the controller uses whenever it needs a
/// human-readable name.
pub const CONTROLLER_NAME: &str = "bundle-controller";
