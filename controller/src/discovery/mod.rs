//! Discovery enumerates orchestrator workloads, composes the filter chain,
//! aggregates helm releases, optionally expands pods, and produces the
//! stable node map.
//!
//! Each call is self-contained: enumeration lists the selected workload
//! kinds (plus one pod list per workload for health), and everything after
//! that is pure computation over the collected records. There is no
//! cross-call state; repeated invocations re-enumerate and the determinism
//! of the filters and serialization makes re-emission idempotent.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client, Resource,
    api::ListParams,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{Error, INSTANCE_LABEL, Result, TAGS_ANNOTATION};

mod filters;
pub mod nodes;

pub use filters::{FilterSubject, Filters, Selector};
pub use nodes::{OutputFormat, PodInfo, TargetType, WorkloadNode, node_key, render};

/// RUNNING_PHASE is the pod lifecycle phase counted as healthy.
const RUNNING_PHASE: &str = "Running";

/// DiscoverOptions drives one discovery invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoverOptions {
    /// Namespace to list in; `None` lists cluster-wide.
    pub namespace: Option<String>,
    /// Namespaces to include (empty means all).
    pub namespaces: Vec<String>,
    /// Namespace include globs.
    pub namespace_globs: Vec<String>,
    /// Namespace exclude globs; exclusion wins.
    pub exclude_namespace_globs: Vec<String>,
    /// Namespaces to exclude; exclusion wins.
    pub exclude_namespaces: Vec<String>,
    /// Node types to include (empty means all).
    pub include_types: Vec<TargetType>,
    /// Node types to exclude; exclusion wins.
    pub exclude_types: Vec<TargetType>,
    /// Label selectors; a workload matching any of them is excluded.
    pub exclude_labels: Vec<String>,
    /// Exclude operator and controller-manager workloads.
    pub exclude_operator: bool,
    /// Keep only fully healthy workloads.
    pub healthy_only: bool,
    /// Keep only degraded workloads.
    pub unhealthy_only: bool,
    /// Name include globs (case-insensitive).
    pub name_globs: Vec<String>,
    /// Name exclude globs; exclusion wins.
    pub exclude_name_globs: Vec<String>,
    /// Also emit one node per backing pod.
    pub include_pods: bool,
    /// Emit pod nodes only; implies `include_pods`.
    pub pods_only: bool,
    /// Pod phases to keep when expanding (empty means all).
    pub pod_statuses: Vec<String>,
    /// Pod name globs when expanding.
    pub pod_name_globs: Vec<String>,
    /// Keep only pods whose containers all report ready.
    pub ready_only: bool,
    /// Cap on pods emitted per workload; zero means unlimited.
    pub max_pods_per_workload: usize,
    /// Cluster name to attribute nodes to.
    pub cluster: Option<String>,
    /// Cluster API URL attribution.
    pub cluster_url: Option<String>,
    /// Suffix of the cluster credential attribution.
    pub cluster_token_suffix: Option<String>,
    /// Tags set on every node, joined CSV.
    pub tags: Vec<String>,
    /// Operating system family attributed to nodes.
    pub os_family: String,
    /// Executor attribution.
    pub executor: String,
    /// File-copier attribution.
    pub copier: String,
    /// Free-form attributes copied onto every node.
    pub extra_attributes: BTreeMap<String, String>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            namespaces: Vec::new(),
            namespace_globs: Vec::new(),
            exclude_namespace_globs: Vec::new(),
            exclude_namespaces: Vec::new(),
            include_types: Vec::new(),
            exclude_types: Vec::new(),
            exclude_labels: Vec::new(),
            exclude_operator: false,
            healthy_only: false,
            unhealthy_only: false,
            name_globs: Vec::new(),
            exclude_name_globs: Vec::new(),
            include_pods: false,
            pods_only: false,
            pod_statuses: Vec::new(),
            pod_name_globs: Vec::new(),
            ready_only: false,
            max_pods_per_workload: 0,
            cluster: None,
            cluster_url: None,
            cluster_token_suffix: None,
            tags: Vec::new(),
            os_family: "linux".into(),
            executor: "kube-exec".into(),
            copier: "kube-copy".into(),
            extra_attributes: BTreeMap::new(),
        }
    }
}

/// WorkloadKind is an enumerable workload flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum WorkloadKind {
    /// A StatefulSet.
    StatefulSet,
    /// A Deployment.
    Deployment,
}

impl WorkloadKind {
    fn target_type(self) -> TargetType {
        match self {
            WorkloadKind::StatefulSet => TargetType::StatefulSet,
            WorkloadKind::Deployment => TargetType::Deployment,
        }
    }
}

/// Workload is the collected record for one enumerated workload.
#[derive(Clone, Debug)]
pub struct Workload {
    pub(crate) kind: WorkloadKind,
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) annotations: BTreeMap<String, String>,
    pub(crate) selector: BTreeMap<String, String>,
    pub(crate) pods: Vec<PodSummary>,
}

impl Workload {
    fn from_statefulset(s: StatefulSet) -> Option<Workload> {
        let name = s.metadata.name.clone()?;
        Some(Workload {
            kind: WorkloadKind::StatefulSet,
            name,
            namespace: s.metadata.namespace.clone().unwrap_or_default(),
            labels: s.metadata.labels.unwrap_or_default(),
            annotations: s.metadata.annotations.unwrap_or_default(),
            selector: s
                .spec
                .and_then(|spec| spec.selector.match_labels)
                .unwrap_or_default(),
            pods: Vec::new(),
        })
    }

    fn from_deployment(d: Deployment) -> Option<Workload> {
        let name = d.metadata.name.clone()?;
        Some(Workload {
            kind: WorkloadKind::Deployment,
            name,
            namespace: d.metadata.namespace.clone().unwrap_or_default(),
            labels: d.metadata.labels.unwrap_or_default(),
            annotations: d.metadata.annotations.unwrap_or_default(),
            selector: d
                .spec
                .and_then(|spec| spec.selector.match_labels)
                .unwrap_or_default(),
            pods: Vec::new(),
        })
    }

    fn healthy_pods(&self) -> usize {
        self.pods.iter().filter(|p| p.phase == RUNNING_PHASE).count()
    }

    /// Sort_key is the cluster-independent node key, used to fix processing
    /// order and helm first-contributor selection.
    fn sort_key(&self) -> String {
        node_key(None, self.kind.target_type(), &self.name, &self.namespace)
    }
}

/// PodSummary is the collected record for one pod of a workload.
#[derive(Clone, Debug, PartialEq)]
pub struct PodSummary {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) phase: String,
    pub(crate) pod_ip: String,
    pub(crate) host_ip: String,
    pub(crate) node_name: String,
    pub(crate) restarts: u32,
    pub(crate) container_count: usize,
    pub(crate) ready_containers: usize,
}

impl PodSummary {
    fn from_pod(pod: Pod) -> Option<PodSummary> {
        let name = pod.metadata.name.clone()?;
        let status = pod.status.unwrap_or_default();
        let statuses = status.container_statuses.unwrap_or_default();
        let restarts = statuses
            .iter()
            .fold(0u32, |acc, c| {
                acc.saturating_add(u32::try_from(c.restart_count).unwrap_or(0))
            });
        Some(PodSummary {
            name,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            labels: pod.metadata.labels.unwrap_or_default(),
            phase: status.phase.unwrap_or_default(),
            pod_ip: status.pod_ip.unwrap_or_default(),
            host_ip: status.host_ip.unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            restarts,
            container_count: pod.spec.as_ref().map_or(0, |s| s.containers.len()),
            ready_containers: statuses.iter().filter(|c| c.ready).count(),
        })
    }

    fn is_ready(&self) -> bool {
        self.container_count > 0 && self.ready_containers == self.container_count
    }
}

/// Discover runs the full pipeline and returns the keyed node map.
///
/// Cancellation aborts any in-flight list call and discards the partial
/// result; the call returns [Error::Cancelled] in that case.
#[instrument(skip_all)]
pub async fn discover(
    client: Client,
    opts: &DiscoverOptions,
    cancel: CancellationToken,
) -> Result<BTreeMap<String, WorkloadNode>> {
    let filters = Filters::new(opts)?;
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("discovery cancelled");
            Err(Error::Cancelled)
        }
        workloads = enumerate(&client, opts) => {
            Ok(build_nodes(workloads, &filters, opts))
        }
    }
}

/// Enumerate lists the workload kinds and the pods backing each workload.
///
/// A failed list is logged and skipped; partial discovery is preferred to
/// total failure.
#[instrument(skip_all)]
async fn enumerate(client: &Client, opts: &DiscoverOptions) -> Vec<Workload> {
    let ns = opts.namespace.as_deref();
    let mut out: Vec<Workload> = Vec::new();

    let (stateful_sets, deployments) = futures::join!(
        list_resources::<StatefulSet>(client, ns),
        list_resources::<Deployment>(client, ns),
    );
    match stateful_sets {
        Ok(items) => {
            counter!("bundle_discovery_workloads_listed_total", "kind" => "StatefulSet")
                .increment(items.len() as u64);
            out.extend(items.into_iter().filter_map(Workload::from_statefulset));
        }
        Err(err) => {
            counter!("bundle_discovery_list_failures_total", "kind" => "StatefulSet").increment(1);
            warn!(%err, kind = "StatefulSet", "list failed, skipping kind");
        }
    }
    match deployments {
        Ok(items) => {
            counter!("bundle_discovery_workloads_listed_total", "kind" => "Deployment")
                .increment(items.len() as u64);
            out.extend(items.into_iter().filter_map(Workload::from_deployment));
        }
        Err(err) => {
            counter!("bundle_discovery_list_failures_total", "kind" => "Deployment").increment(1);
            warn!(%err, kind = "Deployment", "list failed, skipping kind");
        }
    }

    for w in &mut out {
        w.pods = match list_pods(client, &w.namespace, &w.selector).await {
            Ok(pods) => pods,
            Err(err) => {
                counter!("bundle_discovery_list_failures_total", "kind" => "Pod").increment(1);
                warn!(%err, workload = w.name, "pod list failed, counting none");
                Vec::new()
            }
        };
        trace!(
            workload = w.name,
            pods = w.pods.len(),
            healthy = w.healthy_pods(),
            "counted pods"
        );
    }
    out
}

async fn list_resources<K>(client: &Client, namespace: Option<&str>) -> kube::Result<Vec<K>>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    Ok(api.list(&ListParams::default()).await?.items)
}

async fn list_pods(
    client: &Client,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> kube::Result<Vec<PodSummary>> {
    // A workload without selector labels would match every pod; skip it.
    if selector.is_empty() {
        return Ok(Vec::new());
    }
    let sel = selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default().labels(&sel)).await?;
    Ok(pods.items.into_iter().filter_map(PodSummary::from_pod).collect())
}

struct HelmAggregate {
    release: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    pod_count: usize,
    healthy_pods: usize,
}

/// Node_tags joins the option tags with any tags the workload contributes
/// through the tags annotation.
fn node_tags(opts: &DiscoverOptions, annotations: &BTreeMap<String, String>) -> String {
    let mut tags: Vec<&str> = opts.tags.iter().map(String::as_str).collect();
    if let Some(extra) = annotations.get(TAGS_ANNOTATION.as_str()) {
        tags.extend(extra.split(',').map(str::trim).filter(|t| !t.is_empty()));
    }
    tags.join(",")
}

/// Build_nodes is the pure tail of the pipeline: aggregate helm releases,
/// filter each candidate once, emit nodes, expand pods.
fn build_nodes(
    mut workloads: Vec<Workload>,
    filters: &Filters,
    opts: &DiscoverOptions,
) -> BTreeMap<String, WorkloadNode> {
    // Fixed processing order; the first contributor folded into a helm
    // aggregate is the one with the lexicographically least workload key.
    workloads.sort_by_key(Workload::sort_key);

    let mut nodes: BTreeMap<String, WorkloadNode> = BTreeMap::new();
    let mut releases: BTreeMap<String, HelmAggregate> = BTreeMap::new();
    let mut members: BTreeMap<String, Vec<&Workload>> = BTreeMap::new();
    let mut standalone: Vec<&Workload> = Vec::new();

    // The filter chain runs exactly once per candidate: a release member is
    // never judged on its own numbers, it only contributes to its aggregate.
    for w in &workloads {
        if let Some(release) = w.labels.get(INSTANCE_LABEL.as_str()) {
            let key = format!("{release}@{}", w.namespace);
            let agg = releases.entry(key.clone()).or_insert_with(|| HelmAggregate {
                release: release.clone(),
                namespace: w.namespace.clone(),
                labels: w.labels.clone(),
                annotations: w.annotations.clone(),
                pod_count: 0,
                healthy_pods: 0,
            });
            agg.pod_count = agg.pod_count.saturating_add(w.pods.len());
            agg.healthy_pods = agg.healthy_pods.saturating_add(w.healthy_pods());
            members.entry(key).or_default().push(w);
            continue;
        }

        let subject = FilterSubject {
            name: &w.name,
            namespace: &w.namespace,
            labels: &w.labels,
            pod_count: w.pods.len(),
            healthy_pods: w.healthy_pods(),
        };
        if !filters.keep(&subject) {
            trace!(workload = w.name, namespace = w.namespace, "filtered out");
            continue;
        }
        standalone.push(w);

        if filters.keep_type(w.kind.target_type()) {
            let node = workload_node(w, opts);
            nodes.insert(node.node_name.clone(), node);
        }
    }

    // Aggregates face the chain with their summed totals and release name.
    // Members of a filtered-out release are dropped with it, pods included.
    let mut kept_releases: Vec<(&String, &HelmAggregate)> = Vec::new();
    for (key, agg) in &releases {
        let subject = FilterSubject {
            name: &agg.release,
            namespace: &agg.namespace,
            labels: &agg.labels,
            pod_count: agg.pod_count,
            healthy_pods: agg.healthy_pods,
        };
        if !filters.keep(&subject) {
            trace!(release = agg.release, "aggregate filtered out");
            continue;
        }
        kept_releases.push((key, agg));
        if filters.keep_type(TargetType::HelmRelease) {
            let node = release_node(agg, opts);
            nodes.insert(node.node_name.clone(), node);
        }
    }

    if (opts.include_pods || opts.pods_only) && filters.keep_type(TargetType::Pod) {
        for w in &standalone {
            let parent_key = node_key(
                opts.cluster.as_deref(),
                w.kind.target_type(),
                &w.name,
                &w.namespace,
            );
            expand_pods(w, &w.kind.to_string(), &w.name, &parent_key, filters, opts, &mut nodes);
        }
        // Release members expand under the release node: the aggregate is
        // the only node emitted for them, so pods point at it as parent.
        for (key, agg) in kept_releases {
            let parent_key = node_key(
                opts.cluster.as_deref(),
                TargetType::HelmRelease,
                &agg.release,
                &agg.namespace,
            );
            for w in members.get(key).map(Vec::as_slice).unwrap_or_default() {
                expand_pods(w, "HelmRelease", &agg.release, &parent_key, filters, opts, &mut nodes);
            }
        }
    }

    if opts.pods_only {
        nodes.retain(|_, n| n.target_type == TargetType::Pod);
    }
    nodes
}

/// Expand_pods emits one node per kept pod of `w`, capped per workload.
fn expand_pods(
    w: &Workload,
    parent_type: &str,
    parent_name: &str,
    parent_key: &str,
    filters: &Filters,
    opts: &DiscoverOptions,
    nodes: &mut BTreeMap<String, WorkloadNode>,
) {
    let mut emitted = 0usize;
    for pod in &w.pods {
        if opts.max_pods_per_workload > 0 && emitted >= opts.max_pods_per_workload {
            debug!(
                workload = w.name,
                cap = opts.max_pods_per_workload,
                "pod cap reached"
            );
            break;
        }
        if !filters.keep_pod(pod) {
            continue;
        }
        emitted = emitted.saturating_add(1);
        let node = pod_node(pod, w, parent_type, parent_name, parent_key, opts);
        nodes.insert(node.node_name.clone(), node);
    }
}

fn base_node(opts: &DiscoverOptions) -> WorkloadNode {
    WorkloadNode {
        node_name: String::new(),
        hostname: String::new(),
        tags: opts.tags.join(","),
        os_family: opts.os_family.clone(),
        executor: opts.executor.clone(),
        copier: opts.copier.clone(),
        cluster: opts.cluster.clone(),
        cluster_url: opts.cluster_url.clone(),
        cluster_token_suffix: opts.cluster_token_suffix.clone(),
        target_type: TargetType::Pod,
        target_value: String::new(),
        target_namespace: String::new(),
        workload_kind: String::new(),
        workload_name: String::new(),
        pod_count: 0,
        healthy_pods: 0,
        healthy: false,
        pod: None,
        extra_attributes: opts.extra_attributes.clone(),
    }
}

fn workload_node(w: &Workload, opts: &DiscoverOptions) -> WorkloadNode {
    let tt = w.kind.target_type();
    let key = node_key(opts.cluster.as_deref(), tt, &w.name, &w.namespace);
    let pod_count = w.pods.len();
    let healthy_pods = w.healthy_pods();
    WorkloadNode {
        node_name: key,
        hostname: w.name.clone(),
        tags: node_tags(opts, &w.annotations),
        target_type: tt,
        target_value: w.name.clone(),
        target_namespace: w.namespace.clone(),
        workload_kind: w.kind.to_string(),
        workload_name: w.name.clone(),
        pod_count,
        healthy_pods,
        healthy: healthy_pods == pod_count,
        ..base_node(opts)
    }
}

fn release_node(agg: &HelmAggregate, opts: &DiscoverOptions) -> WorkloadNode {
    let key = node_key(
        opts.cluster.as_deref(),
        TargetType::HelmRelease,
        &agg.release,
        &agg.namespace,
    );
    WorkloadNode {
        node_name: key,
        hostname: agg.release.clone(),
        tags: node_tags(opts, &agg.annotations),
        target_type: TargetType::HelmRelease,
        target_value: agg.release.clone(),
        target_namespace: agg.namespace.clone(),
        workload_kind: "HelmRelease".into(),
        workload_name: agg.release.clone(),
        pod_count: agg.pod_count,
        healthy_pods: agg.healthy_pods,
        healthy: agg.healthy_pods == agg.pod_count,
        ..base_node(opts)
    }
}

fn pod_node(
    pod: &PodSummary,
    parent: &Workload,
    parent_type: &str,
    parent_name: &str,
    parent_key: &str,
    opts: &DiscoverOptions,
) -> WorkloadNode {
    let key = node_key(
        opts.cluster.as_deref(),
        TargetType::Pod,
        &pod.name,
        &pod.namespace,
    );
    let healthy = pod.phase == RUNNING_PHASE;
    WorkloadNode {
        node_name: key,
        hostname: if pod.pod_ip.is_empty() {
            pod.name.clone()
        } else {
            pod.pod_ip.clone()
        },
        tags: node_tags(opts, &parent.annotations),
        target_type: TargetType::Pod,
        target_value: pod.name.clone(),
        target_namespace: pod.namespace.clone(),
        workload_kind: "Pod".into(),
        workload_name: pod.name.clone(),
        pod_count: 1,
        healthy_pods: usize::from(healthy),
        healthy,
        pod: Some(PodInfo {
            pod_ip: pod.pod_ip.clone(),
            host_ip: pod.host_ip.clone(),
            k8s_node_name: pod.node_name.clone(),
            phase: pod.phase.clone(),
            ready: pod.is_ready(),
            restarts: pod.restarts,
            container_count: pod.container_count,
            ready_containers: pod.ready_containers,
            parent_type: parent_type.to_string(),
            parent_name: parent_name.to_string(),
            parent_nodename: parent_key.to_string(),
        }),
        ..base_node(opts)
    }
}
