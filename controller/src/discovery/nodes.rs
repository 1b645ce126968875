//! The external node model emitted by discovery, and its serialization.
//!
//! The node map is keyed by `[<cluster>/]<shortType>:<name>@<namespace>` and
//! always serializes its keys in lexicographic order, so two runs over
//! identical inputs produce byte-identical output.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// TargetType is the kind of object a node points at.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum TargetType {
    /// A StatefulSet workload.
    #[serde(rename = "statefulset")]
    #[strum(serialize = "sts", serialize = "statefulset")]
    StatefulSet,
    /// A Deployment workload.
    #[serde(rename = "deployment")]
    #[strum(serialize = "deploy", serialize = "deployment")]
    Deployment,
    /// An aggregate of the workloads sharing one helm release.
    #[serde(rename = "helm-release")]
    #[strum(serialize = "helm", serialize = "helm-release")]
    HelmRelease,
    /// A single pod.
    #[serde(rename = "pod")]
    #[strum(serialize = "pod")]
    Pod,
}

impl TargetType {
    /// Short returns the abbreviated form used in node keys.
    pub fn short(&self) -> &'static str {
        match self {
            TargetType::StatefulSet => "sts",
            TargetType::Deployment => "deploy",
            TargetType::HelmRelease => "helm",
            TargetType::Pod => "pod",
        }
    }
}

/// Node_key builds the stable map key for a node.
pub fn node_key(cluster: Option<&str>, tt: TargetType, name: &str, namespace: &str) -> String {
    match cluster {
        Some(c) => format!("{c}/{}:{name}@{namespace}", tt.short()),
        None => format!("{}:{name}@{namespace}", tt.short()),
    }
}

/// PodInfo carries the pod-specific fields of a pod node, inlined at the top
/// level of the node record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    /// IP assigned to the pod.
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    /// IP of the host the pod runs on.
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    /// Name of the kubernetes node hosting the pod.
    pub k8s_node_name: String,
    /// Lifecycle phase.
    pub phase: String,
    /// Ready means every container reports ready.
    pub ready: bool,
    /// Total container restarts.
    pub restarts: u32,
    /// Declared container count.
    pub container_count: usize,
    /// Containers currently reporting ready.
    pub ready_containers: usize,
    /// Kind of the owning workload.
    pub parent_type: String,
    /// Name of the owning workload.
    pub parent_name: String,
    /// Node key of the owning workload.
    pub parent_nodename: String,
}

/// WorkloadNode is one entry of the discovery output.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadNode {
    /// Unique node name; equal to the map key.
    pub node_name: String,
    /// Hostname attributed to the node.
    pub hostname: String,
    /// Comma-separated tags.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    /// Operating system family.
    pub os_family: String,
    /// Executor attribution.
    pub executor: String,
    /// File-copier attribution.
    pub copier: String,
    /// Cluster name, when attributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Cluster API URL, when attributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_url: Option<String>,
    /// Suffix of the cluster credential in use, when attributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_token_suffix: Option<String>,
    /// What the node points at.
    pub target_type: TargetType,
    /// Name of the target object.
    pub target_value: String,
    /// Namespace of the target object.
    pub target_namespace: String,
    /// Kind of the underlying workload.
    pub workload_kind: String,
    /// Name of the underlying workload.
    pub workload_name: String,
    /// Pods currently backing the workload.
    pub pod_count: usize,
    /// Pods in the Running phase.
    pub healthy_pods: usize,
    /// Healthy means every backing pod is Running.
    pub healthy: bool,
    /// Pod fields, present on pod nodes only.
    #[serde(default, flatten)]
    pub pod: Option<PodInfo>,
    /// Free-form attributes passed through from the options.
    #[serde(default, flatten)]
    pub extra_attributes: BTreeMap<String, String>,
}

/// OutputFormat selects the node-map serialization.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// Indented JSON.
    #[default]
    Json,
    /// YAML with the same field projection as JSON.
    Yaml,
    /// A fixed-column text table.
    Table,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "table" => Ok(OutputFormat::Table),
            _ => Err(Error::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Table => "table",
        })
    }
}

/// Render serializes the node map in the requested format.
pub fn render(nodes: &BTreeMap<String, WorkloadNode>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(nodes)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(nodes)?),
        OutputFormat::Table => Ok(render_table(nodes)),
    }
}

fn render_table(nodes: &BTreeMap<String, WorkloadNode>) -> String {
    let with_pods = nodes.values().any(|n| n.pod.is_some());
    let headers: &[&str] = if with_pods {
        &["NODE", "TYPE", "PARENT", "NAMESPACE", "STATUS", "CLUSTER"]
    } else {
        &["NODE", "TYPE", "WORKLOAD", "NAMESPACE", "PODS", "CLUSTER"]
    };

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(nodes.len());
    for (key, n) in nodes {
        let cluster = n.cluster.clone().unwrap_or_else(|| "-".into());
        let row = if with_pods {
            let (parent, status) = match &n.pod {
                Some(p) => (p.parent_name.clone(), p.phase.clone()),
                None => (
                    "-".into(),
                    if n.healthy { "healthy" } else { "degraded" }.into(),
                ),
            };
            vec![
                key.clone(),
                n.target_type.to_string(),
                parent,
                n.target_namespace.clone(),
                status,
                cluster,
            ]
        } else {
            vec![
                key.clone(),
                n.target_type.to_string(),
                n.workload_name.clone(),
                n.target_namespace.clone(),
                format!("{}/{}", n.healthy_pods, n.pod_count),
                cluster,
            ]
        };
        rows.push(row);
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    let push_row = |cells: &[String], out: &mut String| {
        let line = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c:<w$}", w = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    };
    push_row(
        &headers.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
        &mut out,
    );
    for row in &rows {
        push_row(row, &mut out);
    }
    out
}
