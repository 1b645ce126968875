//! The composable workload and pod filters of the discovery pipeline.
//!
//! Filters are orthogonal and compose as an AND chain; every exclusion rule
//! wins over every inclusion rule. Filter construction is fallible (bad
//! selectors and globs are configuration errors); filtering itself is not.

use std::collections::BTreeMap;
use std::str::FromStr;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use super::nodes::TargetType;
use super::{DiscoverOptions, PodSummary};
use crate::{COMPONENT_LABEL, Error, Result};

/// Expression is a single parsed label-selector requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Expression {
    Eq(String, String),
    NotEq(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Expression {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Expression::Eq(k, v) => labels.get(k) == Some(v),
            Expression::NotEq(k, v) => labels.get(k) != Some(v),
            Expression::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            Expression::NotIn(k, vs) => !labels.get(k).is_some_and(|v| vs.contains(v)),
            Expression::Exists(k) => labels.contains_key(k),
            Expression::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Selector is a parsed orchestrator label selector.
///
/// The accepted grammar is the one the orchestrator API accepts: `k=v`,
/// `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, and `!k`, joined by
/// commas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    exprs: Vec<Expression>,
}

impl Selector {
    /// Matches reports whether every requirement holds for `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.exprs.iter().all(|e| e.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSelector(s.to_string());
        let mut exprs = Vec::new();
        for req in split_requirements(s) {
            let req = req.trim();
            if req.is_empty() {
                return Err(invalid());
            }
            if let Some(key) = req.strip_prefix('!') {
                exprs.push(Expression::DoesNotExist(parse_key(key.trim(), s)?));
            } else if let Some((key, vals)) = split_set_op(req, " notin ") {
                exprs.push(Expression::NotIn(
                    parse_key(key, s)?,
                    parse_values(vals, s)?,
                ));
            } else if let Some((key, vals)) = split_set_op(req, " in ") {
                exprs.push(Expression::In(parse_key(key, s)?, parse_values(vals, s)?));
            } else if let Some((key, val)) = req.split_once("!=") {
                exprs.push(Expression::NotEq(
                    parse_key(key.trim(), s)?,
                    val.trim().to_string(),
                ));
            } else if let Some((key, val)) = req.split_once("==").or_else(|| req.split_once('=')) {
                exprs.push(Expression::Eq(
                    parse_key(key.trim(), s)?,
                    val.trim().to_string(),
                ));
            } else {
                exprs.push(Expression::Exists(parse_key(req, s)?));
            }
        }
        if exprs.is_empty() {
            return Err(invalid());
        }
        Ok(Selector { exprs })
    }
}

/// Split_requirements splits on commas outside parentheses.
fn split_requirements(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth = depth.saturating_add(1),
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i.saturating_add(1);
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn split_set_op<'a>(req: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, rest) = req.split_once(op)?;
    Some((key.trim(), rest.trim()))
}

fn parse_key(key: &str, whole: &str) -> Result<String> {
    if key.is_empty() || key.contains([' ', '(', ')', ',', '!', '=']) {
        return Err(Error::InvalidSelector(whole.to_string()));
    }
    Ok(key.to_string())
}

fn parse_values(vals: &str, whole: &str) -> Result<Vec<String>> {
    let inner = vals
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| Error::InvalidSelector(whole.to_string()))?;
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(Error::InvalidSelector(whole.to_string()));
    }
    Ok(values)
}

/// FilterSubject is the view of a candidate node the workload filter chain
/// operates on.
#[derive(Clone, Copy, Debug)]
pub struct FilterSubject<'a> {
    /// Candidate name (workload name, or release name for aggregates).
    pub name: &'a str,
    /// Candidate namespace.
    pub namespace: &'a str,
    /// Candidate labels.
    pub labels: &'a BTreeMap<String, String>,
    /// Backing pod count.
    pub pod_count: usize,
    /// Backing pods in the Running phase.
    pub healthy_pods: usize,
}

/// Filters is the compiled AND chain for one discovery invocation.
#[derive(Debug, Default)]
pub struct Filters {
    include_types: Vec<TargetType>,
    exclude_types: Vec<TargetType>,
    exclude_selectors: Vec<Selector>,
    exclude_operator: bool,
    healthy_only: bool,
    unhealthy_only: bool,
    name_include: Option<GlobSet>,
    name_exclude: Option<GlobSet>,
    namespaces: Vec<String>,
    namespace_globs: Option<GlobSet>,
    exclude_namespaces: Vec<String>,
    exclude_namespace_globs: Option<GlobSet>,
    pod_statuses: Vec<String>,
    pod_name_globs: Option<GlobSet>,
    ready_only: bool,
}

impl Filters {
    /// New compiles the filter chain. Selector and glob parse failures are
    /// fatal here, before any listing happens.
    pub fn new(opts: &DiscoverOptions) -> Result<Filters> {
        let exclude_selectors = opts
            .exclude_labels
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Selector>>>()?;
        Ok(Filters {
            include_types: opts.include_types.clone(),
            exclude_types: opts.exclude_types.clone(),
            exclude_selectors,
            exclude_operator: opts.exclude_operator,
            healthy_only: opts.healthy_only,
            unhealthy_only: opts.unhealthy_only,
            name_include: build_globset(&opts.name_globs)?,
            name_exclude: build_globset(&opts.exclude_name_globs)?,
            namespaces: opts.namespaces.clone(),
            namespace_globs: build_globset(&opts.namespace_globs)?,
            exclude_namespaces: opts.exclude_namespaces.clone(),
            exclude_namespace_globs: build_globset(&opts.exclude_namespace_globs)?,
            pod_statuses: opts.pod_statuses.clone(),
            pod_name_globs: build_globset(&opts.pod_name_globs)?,
            ready_only: opts.ready_only,
        })
    }

    /// Keep_type reports whether nodes of the given type are wanted at all.
    /// Exclusion wins over inclusion.
    pub fn keep_type(&self, tt: TargetType) -> bool {
        if !self.include_types.is_empty() && !self.include_types.contains(&tt) {
            return false;
        }
        !self.exclude_types.contains(&tt)
    }

    /// Keep applies the workload chain to one candidate. The type rules are
    /// separate ([Filters::keep_type]): they gate which node types are
    /// emitted, while this chain decides whether the workload participates
    /// in the pipeline at all.
    pub fn keep(&self, s: &FilterSubject<'_>) -> bool {
        if self.exclude_selectors.iter().any(|sel| sel.matches(s.labels)) {
            return false;
        }
        if self.exclude_operator && is_operator_workload(s.name, s.labels) {
            return false;
        }
        if self.healthy_only && s.pod_count > 0 && s.healthy_pods < s.pod_count {
            return false;
        }
        if self.unhealthy_only && (s.pod_count == 0 || s.healthy_pods >= s.pod_count) {
            return false;
        }
        if let Some(g) = &self.name_include
            && !g.is_match(s.name)
        {
            return false;
        }
        if let Some(g) = &self.name_exclude
            && g.is_match(s.name)
        {
            return false;
        }
        self.keep_namespace(s.namespace)
    }

    /// Keep_namespace applies the namespace-enumeration rules.
    pub fn keep_namespace(&self, ns: &str) -> bool {
        let has_includes = !self.namespaces.is_empty() || self.namespace_globs.is_some();
        if has_includes {
            let listed = self.namespaces.iter().any(|n| n == ns);
            let globbed = self.namespace_globs.as_ref().is_some_and(|g| g.is_match(ns));
            if !listed && !globbed {
                return false;
            }
        }
        if self.exclude_namespaces.iter().any(|n| n == ns) {
            return false;
        }
        if self
            .exclude_namespace_globs
            .as_ref()
            .is_some_and(|g| g.is_match(ns))
        {
            return false;
        }
        true
    }

    /// Keep_pod applies the pod chain to one expanded pod.
    pub fn keep_pod(&self, pod: &PodSummary) -> bool {
        if !self.pod_statuses.is_empty()
            && !self
                .pod_statuses
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&pod.phase))
        {
            return false;
        }
        if let Some(g) = &self.pod_name_globs
            && !g.is_match(&pod.name)
        {
            return false;
        }
        if self.ready_only && !(pod.container_count > 0 && pod.ready_containers == pod.container_count)
        {
            return false;
        }
        if self.exclude_selectors.iter().any(|sel| sel.matches(&pod.labels)) {
            return false;
        }
        true
    }
}

/// Is_operator_workload reports whether a workload looks like an operator or
/// controller manager.
fn is_operator_workload(name: &str, labels: &BTreeMap<String, String>) -> bool {
    if labels.get(COMPONENT_LABEL.as_str()).map(String::as_str) == Some("operator") {
        return true;
    }
    if labels.get("control-plane").map(String::as_str) == Some("controller-manager") {
        return true;
    }
    name.ends_with("-controller-manager") || name.ends_with("-operator")
}

/// Build_globset compiles case-insensitive globs; an empty list disables the
/// filter.
fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(GlobBuilder::new(p).case_insensitive(true).build()?);
    }
    Ok(Some(b.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn subject<'a>(
        name: &'a str,
        namespace: &'a str,
        labels: &'a BTreeMap<String, String>,
    ) -> FilterSubject<'a> {
        FilterSubject {
            name,
            namespace,
            labels,
            pod_count: 2,
            healthy_pods: 2,
        }
    }

    #[test]
    fn selector_grammar() {
        let l = labels(&[("app", "web"), ("env", "prod")]);
        for (sel, expect) in [
            ("app=web", true),
            ("app==web", true),
            ("app=api", false),
            ("app!=api", true),
            ("app!=web", false),
            ("missing!=web", true),
            ("env in (prod,stage)", true),
            ("env in (stage)", false),
            ("env notin (stage)", true),
            ("env notin (prod,stage)", false),
            ("missing notin (x)", true),
            ("app", true),
            ("missing", false),
            ("!missing", true),
            ("!app", false),
            ("app=web,env=prod", true),
            ("app=web,env=stage", false),
        ] {
            let parsed: Selector = sel.parse().unwrap();
            assert_eq!(parsed.matches(&l), expect, "{sel}");
        }
    }

    #[test]
    fn invalid_selectors_fail_construction() {
        for sel in ["", ",", "env in prod", "in (a)", "env notin ()", "!"] {
            assert!(
                matches!(sel.parse::<Selector>(), Err(Error::InvalidSelector(_))),
                "{sel:?} should fail",
            );
        }
        let opts = DiscoverOptions {
            exclude_labels: vec!["env in prod".into()],
            ..Default::default()
        };
        assert!(matches!(Filters::new(&opts), Err(Error::InvalidSelector(_))));
    }

    #[test]
    fn type_include_and_exclude() {
        let f = Filters::new(&DiscoverOptions {
            include_types: vec![TargetType::Deployment],
            ..Default::default()
        })
        .unwrap();
        assert!(f.keep_type(TargetType::Deployment));
        assert!(!f.keep_type(TargetType::StatefulSet));
        assert!(!f.keep_type(TargetType::Pod));

        // An empty include set admits everything.
        let f = Filters::new(&DiscoverOptions::default()).unwrap();
        assert!(f.keep_type(TargetType::HelmRelease));

        // Exclusion wins over inclusion.
        let f = Filters::new(&DiscoverOptions {
            include_types: vec![TargetType::Deployment],
            exclude_types: vec![TargetType::Deployment],
            ..Default::default()
        })
        .unwrap();
        assert!(!f.keep_type(TargetType::Deployment));
    }

    #[test]
    fn label_exclusion() {
        let f = Filters::new(&DiscoverOptions {
            exclude_labels: vec!["tier=infra".into()],
            ..Default::default()
        })
        .unwrap();
        let excluded = labels(&[("tier", "infra")]);
        let kept = labels(&[("tier", "app")]);
        assert!(!f.keep(&subject("a", "ns", &excluded)));
        assert!(f.keep(&subject("a", "ns", &kept)));
    }

    #[test]
    fn operator_exclusion() {
        let f = Filters::new(&DiscoverOptions {
            exclude_operator: true,
            ..Default::default()
        })
        .unwrap();
        let plain = labels(&[]);
        assert!(!f.keep(&subject("cert-manager-operator", "ns", &plain)));
        assert!(!f.keep(&subject("kube-controller-manager", "ns", &plain)));
        let component = labels(&[("app.kubernetes.io/component", "operator")]);
        assert!(!f.keep(&subject("innocent", "ns", &component)));
        let cp = labels(&[("control-plane", "controller-manager")]);
        assert!(!f.keep(&subject("innocent", "ns", &cp)));
        assert!(f.keep(&subject("web", "ns", &plain)));
    }

    #[test]
    fn health_rules() {
        let l = labels(&[]);
        let healthy_only = Filters::new(&DiscoverOptions {
            healthy_only: true,
            ..Default::default()
        })
        .unwrap();
        let unhealthy_only = Filters::new(&DiscoverOptions {
            unhealthy_only: true,
            ..Default::default()
        })
        .unwrap();

        let mut s = subject("a", "ns", &l);
        s.pod_count = 3;
        s.healthy_pods = 3;
        assert!(healthy_only.keep(&s));
        assert!(!unhealthy_only.keep(&s));

        s.healthy_pods = 1;
        assert!(!healthy_only.keep(&s));
        assert!(unhealthy_only.keep(&s));

        // Zero pods: vacuously healthy, never unhealthy.
        s.pod_count = 0;
        s.healthy_pods = 0;
        assert!(healthy_only.keep(&s));
        assert!(!unhealthy_only.keep(&s));
    }

    #[test]
    fn name_globs_case_insensitive() {
        let l = labels(&[]);
        let f = Filters::new(&DiscoverOptions {
            name_globs: vec!["web-*".into()],
            exclude_name_globs: vec!["*-canary".into()],
            ..Default::default()
        })
        .unwrap();
        assert!(f.keep(&subject("WEB-api", "ns", &l)));
        assert!(!f.keep(&subject("db-api", "ns", &l)));
        // Exclude wins.
        assert!(!f.keep(&subject("web-api-CANARY", "ns", &l)));
    }

    #[test]
    fn namespace_rules() {
        let l = labels(&[]);
        let f = Filters::new(&DiscoverOptions {
            namespace_globs: vec!["prod-*".into()],
            exclude_namespaces: vec!["prod-sandbox".into()],
            ..Default::default()
        })
        .unwrap();
        assert!(f.keep(&subject("a", "prod-east", &l)));
        assert!(!f.keep(&subject("a", "staging", &l)));
        assert!(!f.keep(&subject("a", "prod-sandbox", &l)));

        let listed = Filters::new(&DiscoverOptions {
            namespaces: vec!["infra".into()],
            ..Default::default()
        })
        .unwrap();
        assert!(listed.keep_namespace("infra"));
        assert!(!listed.keep_namespace("other"));
    }

    #[test]
    fn pod_rules() {
        let f = Filters::new(&DiscoverOptions {
            pod_statuses: vec!["running".into()],
            ready_only: true,
            ..Default::default()
        })
        .unwrap();
        let mut pod = PodSummary {
            name: "web-0".into(),
            namespace: "ns".into(),
            labels: labels(&[]),
            phase: "Running".into(),
            pod_ip: "10.0.0.1".into(),
            host_ip: "192.168.0.1".into(),
            node_name: "worker".into(),
            restarts: 0,
            container_count: 2,
            ready_containers: 2,
        };
        assert!(f.keep_pod(&pod));
        pod.ready_containers = 1;
        assert!(!f.keep_pod(&pod));
        pod.ready_containers = 2;
        pod.phase = "Pending".into();
        assert!(!f.keep_pod(&pod));
    }
}
