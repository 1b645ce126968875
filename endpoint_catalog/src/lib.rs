#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Endpoint_catalog classifies API paths into resource, query, and action
//! endpoints.
//!
//! The input is the descriptor form produced by OpenAPI ingestion: a path
//! string plus the operations (verb and parameters) it exposes.
//! Classification is a pure function of path shape and verbs; the catalog
//! also derives resource names from path structure and exposes the naming
//! helpers (`resolve_kind`, `resolve_plural`) used when constructing custom
//! resources for classified endpoints.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// ACTION_KEYWORDS are the verbs recognized in a path segment; matched
/// case-insensitively as a substring, so `findByStatus` matches `find`.
pub const ACTION_KEYWORDS: &[&str] = &[
    "upload", "download", "find", "search", "get", "create", "delete", "update", "list", "login",
    "logout", "check", "validate", "verify", "send", "receive", "export", "import", "sync",
    "refresh", "reset", "query", "lookup",
];

/// Method is an HTTP verb an operation may use.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    /// GET.
    Get,
    /// PUT.
    Put,
    /// POST.
    Post,
    /// DELETE.
    Delete,
    /// PATCH.
    Patch,
    /// HEAD.
    Head,
    /// OPTIONS.
    Options,
}

/// ParameterLocation is where an operation parameter is carried.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// A templated path segment.
    Path,
    /// A query-string parameter.
    Query,
    /// A header.
    Header,
    /// A cookie.
    Cookie,
    /// A request body.
    Body,
}

/// Parameter is a declared operation parameter.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Parameter {
    /// Name as declared.
    pub name: String,
    /// Location (`in` in OpenAPI terms).
    #[serde(rename = "in")]
    pub location: ParameterLocation,
}

/// Operation is one verb exposed on a path.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Operation {
    /// The HTTP verb.
    pub method: Method,
    /// Declared parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Operation {
    /// Has_query_parameter reports whether any parameter is carried in the
    /// query string.
    pub fn has_query_parameter(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| p.location == ParameterLocation::Query)
    }
}

/// PathDescriptor is one API path and the operations it exposes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PathDescriptor {
    /// The path template, e.g. `/stores/{id}/orders/{orderId}`.
    pub path: String,
    /// The operations exposed on the path.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl PathDescriptor {
    fn methods(&self) -> BTreeSet<Method> {
        self.operations.iter().map(|o| o.method).collect()
    }

    fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// EndpointKind is the classification of an API path.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndpointKind {
    /// A CRUD-style endpoint backing a custom resource.
    Resource,
    /// A read-only lookup endpoint.
    Query,
    /// An imperative action on an identified resource.
    Action,
}

fn is_parameter(seg: &str) -> bool {
    seg.starts_with('{') && seg.ends_with('}') && seg.len() > 2
}

fn parameter_name(seg: &str) -> Option<&str> {
    if is_parameter(seg) {
        seg.get(1..seg.len().saturating_sub(1))
    } else {
        None
    }
}

/// Is_action_segment reports whether a path segment looks like an action
/// keyword.
pub fn is_action_segment(seg: &str) -> bool {
    let seg = seg.to_ascii_lowercase();
    ACTION_KEYWORDS.iter().any(|kw| seg.contains(kw))
}

/// Classify determines the [EndpointKind] of a path descriptor.
pub fn classify(desc: &PathDescriptor) -> EndpointKind {
    let methods = desc.methods();
    let segs = desc.segments();
    let has = |m: Method| methods.contains(&m);

    // Action: write-only verbs targeting an identified resource, with a
    // trailing action keyword, e.g. POST /pets/{petId}/upload.
    if (has(Method::Post) || has(Method::Put))
        && !has(Method::Get)
        && !has(Method::Delete)
        && !has(Method::Patch)
        && segs.len() >= 3
        && let Some((last, middle)) = segs.split_last()
        && middle.iter().skip(1).any(|s| is_parameter(s))
        && !is_parameter(last)
        && is_action_segment(last)
    {
        trace!(path = desc.path, "classified as action");
        return EndpointKind::Action;
    }

    // Query: GET only, and either a trailing action keyword or query-string
    // parameters, e.g. GET /pets/findByStatus.
    if methods == BTreeSet::from([Method::Get]) && segs.len() >= 2 {
        let keyword = segs
            .last()
            .is_some_and(|last| !is_parameter(last) && is_action_segment(last));
        let query_params = desc
            .operations
            .iter()
            .filter(|o| o.method == Method::Get)
            .any(Operation::has_query_parameter);
        if keyword || query_params {
            trace!(path = desc.path, "classified as query");
            return EndpointKind::Query;
        }
    }

    EndpointKind::Resource
}

/// Resource_name derives the resource a path addresses.
///
/// Segments are scanned right to left for the last non-action non-parameter
/// segment that is followed by a matching id parameter: `{orderId}` matches
/// the segment `order` (or `orders`), and a literal `{id}` matches anything.
/// Failing that, the first non-parameter segment not preceded by a parameter
/// is used.
pub fn resource_name(path: &str) -> Option<String> {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for (i, seg) in segs.iter().enumerate().rev() {
        if is_parameter(seg) || is_action_segment(seg) {
            continue;
        }
        let Some(param) = segs.get(i.saturating_add(1)).and_then(|s| parameter_name(s)) else {
            continue;
        };
        if parameter_matches(param, seg) {
            return Some((*seg).to_string());
        }
    }

    for (i, seg) in segs.iter().enumerate() {
        if is_parameter(seg) {
            continue;
        }
        let preceded = i
            .checked_sub(1)
            .and_then(|p| segs.get(p))
            .is_some_and(|prev| is_parameter(prev));
        if !preceded {
            return Some((*seg).to_string());
        }
    }
    None
}

/// Parameter_matches reports whether an id parameter addresses `seg`.
fn parameter_matches(param: &str, seg: &str) -> bool {
    let param = param.to_ascii_lowercase();
    if param == "id" {
        return true;
    }
    let stem = singularize(&seg.to_ascii_lowercase());
    param == format!("{stem}id") || param == format!("{stem}-id") || param == format!("{stem}_id")
}

/// Singularize reduces an API-style plural to its singular form.
///
/// The rules are the simple English ones sufficient for API names:
/// `-ies` → `-y`, sibilant `-es` is stripped, a trailing `-s` is stripped,
/// and `-ss` is left alone.
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies")
        && !stem.is_empty()
    {
        return format!("{stem}y");
    }
    if name.ends_with("ss") {
        return name.to_string();
    }
    if let Some(stem) = name.strip_suffix("es")
        && (stem.ends_with('s')
            || stem.ends_with('x')
            || stem.ends_with('z')
            || stem.ends_with("ch")
            || stem.ends_with("sh"))
    {
        return stem.to_string();
    }
    name.strip_suffix('s').unwrap_or(name).to_string()
}

/// To_plural pluralizes an API-style singular.
pub fn to_plural(word: &str) -> String {
    // Words ending in s, x, z, ch, sh pluralize with -es (eg. boxes).
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    // Words ending in y preceded by a consonant pluralize with -ies.
    if word.ends_with('y') {
        let stem = &word[..word.len().saturating_sub(1)];
        if !matches!(stem.chars().last(), Some('a' | 'e' | 'i' | 'o' | 'u') | None) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

/// Resolve_kind maps an endpoint resource name to a PascalCase singular
/// custom-resource kind: `pet-stores` becomes `PetStore`.
pub fn resolve_kind(name: &str) -> String {
    singularize(&name.to_ascii_lowercase())
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => format!("{}{}", first.to_ascii_uppercase(), chars.as_str()),
                None => String::new(),
            }
        })
        .collect()
}

/// Resolve_plural maps an endpoint resource name to the lowercase plural
/// used for listing: `pet` becomes `pets`, and `pets` stays `pets`.
pub fn resolve_plural(name: &str) -> String {
    to_plural(&singularize(&name.to_ascii_lowercase()))
}

/// Catalog groups the classified endpoints of an API.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    resources: BTreeMap<String, Vec<String>>,
    queries: Vec<String>,
    actions: Vec<String>,
}

impl Catalog {
    /// Build classifies every descriptor and groups resource endpoints under
    /// their derived resource name.
    pub fn build(descs: &[PathDescriptor]) -> Catalog {
        let mut out = Catalog::default();
        for desc in descs {
            match classify(desc) {
                EndpointKind::Action => out.actions.push(desc.path.clone()),
                EndpointKind::Query => out.queries.push(desc.path.clone()),
                EndpointKind::Resource => {
                    let name = resource_name(&desc.path).unwrap_or_default();
                    out.resources.entry(name).or_default().push(desc.path.clone());
                }
            }
        }
        out.queries.sort();
        out.actions.sort();
        for paths in out.resources.values_mut() {
            paths.sort();
        }
        out
    }

    /// Resources returns the resource endpoints grouped by resource name, in
    /// name order.
    pub fn resources(&self) -> &BTreeMap<String, Vec<String>> {
        &self.resources
    }

    /// Queries returns the query endpoint paths.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Actions returns the action endpoint paths.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Kinds returns the PascalCase kind for every known resource.
    pub fn kinds(&self) -> Vec<String> {
        self.resources.keys().map(|n| resolve_kind(n)).collect()
    }
}
