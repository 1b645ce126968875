//! Reference extraction from strings, value trees, and resource specs.
//!
//! Two grammars are recognized. The braced form `${resources.<id>…}` is
//! always scanned for; the bare form `resources.<id>…` is opt-in and is
//! what condition expressions use. Candidates that fail the resource-id
//! grammar are silently dropped.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ident::{is_ident_char, is_valid_resource_id};
use api::v1alpha1::ResourceSpec;

/// REF_PREFIX introduces a bundle reference in either grammar.
pub const REF_PREFIX: &str = "resources.";

/// ExtractOptions selects which parts of a [ResourceSpec] contribute
/// references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Include the explicit `dependsOn` edges.
    pub include_explicit: bool,
    /// Scan the serialized `spec` for braced references.
    pub include_spec_refs: bool,
    /// Scan the `readyWhen`/`skipWhen` expression strings.
    pub include_conditions: bool,
    /// Also match bare references when scanning the `spec`.
    ///
    /// Condition expressions always match bare references regardless of this
    /// flag.
    pub include_bare_refs: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_explicit: true,
            include_spec_refs: true,
            include_conditions: true,
            include_bare_refs: false,
        }
    }
}

/// Extract_refs scans `s` for bundle references and returns the referenced
/// ids, deduplicated.
///
/// An occurrence of `resources.` directly preceded by `{` belongs to the
/// braced grammar: the id runs up to the first `.` or `}`. Any other
/// occurrence is a bare reference, considered only when `include_bare` is
/// set: the id runs up to the first non-identifier character.
pub fn extract_refs(s: &str, include_bare: bool) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let bytes = s.as_bytes();
    let mut from = 0;
    while let Some(pos) = s[from..].find(REF_PREFIX) {
        let at = from.saturating_add(pos);
        let body = at.saturating_add(REF_PREFIX.len());
        let rest = &s[body..];
        let braced = at > 0 && bytes[at.saturating_sub(1)] == b'{';
        let id = if braced {
            let end = rest.find(['.', '}']).unwrap_or(rest.len());
            &rest[..end]
        } else if include_bare {
            let end = rest
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(rest.len());
            &rest[..end]
        } else {
            ""
        };
        if is_valid_resource_id(id) {
            out.insert(id.to_string());
        }
        from = body;
    }
    out
}

/// Extract_refs_from_value scans the JSON serialization of `v`.
///
/// This gives serialize-then-scan semantics: references embedded anywhere in
/// nested strings are found, and key order does not affect the result.
pub fn extract_refs_from_value(v: &Value, include_bare: bool) -> BTreeSet<String> {
    extract_refs(&v.to_string(), include_bare)
}

/// Extract_from_spec computes the dependency set of `spec`.
///
/// The result is the union of the selected sources, with the resource's own
/// id removed. Condition strings are expressions and routinely carry bare
/// references, so bare matching is forced on for them.
pub fn extract_from_spec(spec: &ResourceSpec, opts: &ExtractOptions) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if opts.include_explicit {
        out.extend(
            spec.depends_on
                .iter()
                .filter(|d| is_valid_resource_id(d))
                .cloned(),
        );
    }
    if opts.include_spec_refs {
        let doc: Value = spec
            .spec
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>()
            .into();
        out.extend(extract_refs(&doc.to_string(), opts.include_bare_refs));
    }
    if opts.include_conditions {
        for expr in spec.ready_when.iter().chain(spec.skip_when.iter()) {
            out.extend(extract_refs(expr, true));
        }
    }
    out.remove(&spec.id);
    out
}
