//! Deterministic dependency ordering for bundle resources.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::extract::{ExtractOptions, extract_from_spec};
use crate::{Error, Result};
use api::v1alpha1::ResourceSpec;

/// Execution_order returns the resource ids of `specs` ordered so that every
/// dependency precedes its dependents.
///
/// Dependencies are computed per spec with [extract_from_spec]; a reference
/// to an undeclared id fails with [Error::UnknownDependency]. Ordering is
/// Kahn's algorithm with the ready set kept lexicographically sorted, so the
/// output is byte-identical across runs for the same input. If the order
/// cannot cover every input id the graph has a cycle and the call fails with
/// [Error::CircularDependency].
pub fn execution_order(specs: &[ResourceSpec], opts: &ExtractOptions) -> Result<Vec<String>> {
    let ids: BTreeSet<&str> = specs.iter().map(|s| s.id.as_str()).collect();
    let mut indegree: BTreeMap<String, usize> =
        specs.iter().map(|s| (s.id.clone(), 0)).collect();
    let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for spec in specs {
        let deps = extract_from_spec(spec, opts);
        trace!(id = spec.id, ?deps, "dependencies");
        for dep in deps {
            if !ids.contains(dep.as_str()) {
                return Err(Error::UnknownDependency {
                    id: spec.id.clone(),
                    dependency: dep,
                });
            }
            if dependents.entry(dep).or_default().insert(spec.id.clone())
                && let Some(d) = indegree.get_mut(&spec.id)
            {
                *d = d.saturating_add(1);
            }
        }
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut order = Vec::with_capacity(specs.len());
    while let Some(id) = ready.pop_first() {
        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                if let Some(d) = indegree.get_mut(dependent) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
        order.push(id);
    }

    if order.len() != indegree.len() {
        let remaining: Vec<String> = indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| id.clone())
            .collect();
        return Err(Error::CircularDependency { remaining });
    }
    Ok(order)
}

/// Detect_cycles reports whether the dependency graph of `specs` admits an
/// execution order.
///
/// This is the same computation as [execution_order] with the order
/// discarded; the two cannot disagree.
pub fn detect_cycles(specs: &[ResourceSpec], opts: &ExtractOptions) -> Result<()> {
    execution_order(specs, opts).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, depends_on: &[&str]) -> ResourceSpec {
        ResourceSpec {
            id: id.into(),
            kind: "Widget".into(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn diamond() {
        let specs = vec![
            spec("d", &["b", "c"]),
            spec("c", &["a"]),
            spec("b", &["a"]),
            spec("a", &[]),
        ];
        let order = execution_order(&specs, &ExtractOptions::default()).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_detected() {
        let specs = vec![spec("a", &["b"]), spec("b", &["a"])];
        match execution_order(&specs, &ExtractOptions::default()) {
            Err(Error::CircularDependency { remaining }) => {
                assert_eq!(remaining, vec!["a", "b"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
        assert!(detect_cycles(&specs, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn unknown_dependency() {
        let specs = vec![spec("a", &["ghost"])];
        assert_eq!(
            execution_order(&specs, &ExtractOptions::default()),
            Err(Error::UnknownDependency {
                id: "a".into(),
                dependency: "ghost".into(),
            }),
        );
    }

    #[test]
    fn order_is_permutation_and_respects_edges() {
        let specs = vec![
            spec("web", &["app"]),
            spec("app", &["db", "cache"]),
            spec("cache", &[]),
            spec("db", &["net"]),
            spec("net", &[]),
        ];
        let order = execution_order(&specs, &ExtractOptions::default()).unwrap();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["app", "cache", "db", "net", "web"]);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for s in &specs {
            for dep in &s.depends_on {
                assert!(pos(dep) < pos(&s.id), "{dep} must precede {}", s.id);
            }
        }
    }

    #[test]
    fn deterministic_under_input_permutation() {
        let mut specs = vec![
            spec("zeta", &[]),
            spec("eta", &[]),
            spec("beta", &["zeta"]),
            spec("alpha", &["zeta"]),
        ];
        let first = execution_order(&specs, &ExtractOptions::default()).unwrap();
        specs.reverse();
        let second = execution_order(&specs, &ExtractOptions::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["eta", "zeta", "alpha", "beta"]);
    }

    #[test]
    fn implicit_edges_from_expressions() {
        let mut child = spec("child", &[]);
        child.spec.insert(
            "name".into(),
            serde_json::json!("x-${resources.parent.status.externalID}"),
        );
        let specs = vec![child, spec("parent", &[])];
        let order = execution_order(&specs, &ExtractOptions::default()).unwrap();
        assert_eq!(order, vec!["parent", "child"]);
    }

    #[test]
    fn self_reference_is_not_an_edge() {
        let mut only = spec("only", &["only"]);
        only.ready_when.push("resources.only.status.ready".into());
        let order = execution_order(&[only], &ExtractOptions::default()).unwrap();
        assert_eq!(order, vec!["only"]);
    }
}
