//! Expression resolution against a status snapshot.
//!
//! Resolution recursively rewrites a value tree: strings that are a single
//! `${…}` expression are replaced by the referenced value with its type
//! preserved, strings that embed expressions are treated as templates, and
//! everything else is copied verbatim. Structure and sequence lengths are
//! invariant.

use serde_json::{Map, Value};

use crate::ident::is_valid_resource_id;
use crate::{Error, Result};
use api::v1alpha1::StatusMap;

const EXPR_OPEN: &str = "${";

/// Resolve_value rewrites `v`, replacing embedded expressions using
/// `statuses`.
///
/// Failures evaluating a whole-string expression surface to the caller. A
/// failure inside a template is swallowed: substitution stops at the
/// offending fragment and the remainder of that one string is kept verbatim,
/// so partially resolved templates stay observable.
pub fn resolve_value(v: &Value, statuses: &StatusMap) -> Result<Value> {
    Ok(match v {
        Value::String(s) => resolve_string(s, statuses)?,
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, statuses)?);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, statuses))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

fn resolve_string(s: &str, statuses: &StatusMap) -> Result<Value> {
    // A string that is exactly one expression preserves the value's type.
    if let Some(inner) = s.strip_prefix(EXPR_OPEN).and_then(|r| r.strip_suffix('}'))
        && !inner.contains('}')
    {
        return evaluate(inner.trim(), statuses);
    }
    if !s.contains(EXPR_OPEN) {
        return Ok(Value::String(s.to_string()));
    }

    // Template: substitute the shortest `${…}` regions left to right.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(EXPR_OPEN) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let body = &tail[EXPR_OPEN.len()..];
        let Some(end) = body.find('}') else {
            out.push_str(tail);
            return Ok(Value::String(out));
        };
        match evaluate(body[..end].trim(), statuses) {
            Ok(v) => out.push_str(&coerce(&v)),
            Err(err) => {
                tracing::debug!(expr = &body[..end], %err, "template fragment unresolvable");
                out.push_str(tail);
                return Ok(Value::String(out));
            }
        }
        rest = &body[end.saturating_add(1)..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Coerce renders an evaluated value for embedding in a template string.
fn coerce(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate evaluates a single `resources.<id>.<segment>…` expression.
///
/// The referenced id must be present in `statuses`; navigation misses below
/// it produce [Value::Null]. Any other expression shape is unsupported.
pub fn evaluate(expr: &str, statuses: &StatusMap) -> Result<Value> {
    let unsupported = || Error::UnsupportedExpression(expr.to_string());
    let path = expr
        .strip_prefix(crate::extract::REF_PREFIX)
        .ok_or_else(unsupported)?;
    let (id, rest) = path.split_once('.').ok_or_else(unsupported)?;
    if !is_valid_resource_id(id) || rest.is_empty() {
        return Err(unsupported());
    }
    let root = statuses
        .get(id)
        .ok_or_else(|| Error::ResourceNotFound(id.to_string()))?;
    Ok(lookup_path(root, rest).cloned().unwrap_or(Value::Null))
}

/// Lookup_path navigates `v` along a dotted path.
///
/// Each segment is a mapping lookup; a miss, or a non-mapping intermediate
/// value, yields `None`.
pub fn lookup_path<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = v;
    for seg in path.split('.') {
        match cur {
            Value::Object(map) => cur = map.get(seg)?,
            _ => return None,
        }
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statuses() -> StatusMap {
        StatusMap::from([
            (
                "parent".to_string(),
                json!({"status": {"externalID": "123", "ready": true, "message": ""}}),
            ),
            (
                "p".to_string(),
                json!({"status": {"externalID": 7, "tags": {"env": "prod"}}}),
            ),
            ("bare".to_string(), json!({"status": {"nil": null}})),
        ])
    }

    #[test]
    fn embedded_substitution() {
        let spec = json!({"name": "child-of-${resources.parent.status.externalID}"});
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got, json!({"name": "child-of-123"}));
    }

    #[test]
    fn full_replacement_preserves_type() {
        let spec = json!({"petId": "${resources.p.status.externalID}"});
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got, json!({"petId": 7}));
        let spec = json!({"tags": "${resources.p.status.tags}"});
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got, json!({"tags": {"env": "prod"}}));
    }

    #[test]
    fn no_expressions_is_identity() {
        let v = json!({
            "a": ["x", 1, true, null],
            "b": {"c": "plain $ and { braces }"},
        });
        assert_eq!(resolve_value(&v, &statuses()).unwrap(), v);
        assert_eq!(resolve_value(&v, &StatusMap::new()).unwrap(), v);
    }

    #[test]
    fn template_coercions() {
        let spec = json!({
            "n": "v=${resources.p.status.externalID}",
            "nil": "v=${resources.bare.status.nil}",
            "map": "v=${resources.p.status.tags}",
        });
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got["n"], json!("v=7"));
        assert_eq!(got["nil"], json!("v="));
        assert_eq!(got["map"], json!(r#"v={"env":"prod"}"#));
    }

    #[test]
    fn template_failure_keeps_remainder() {
        // The first fragment resolves; the unresolvable one stops
        // substitution, leaving the tail untouched.
        let spec = json!({
            "v": "a-${resources.parent.status.externalID}-${resources.ghost.status.x}-${resources.parent.status.externalID}"
        });
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(
            got["v"],
            json!("a-123-${resources.ghost.status.x}-${resources.parent.status.externalID}"),
        );
    }

    #[test]
    fn adjacent_expressions_are_a_template() {
        // Two back-to-back expressions: the trailing `}` is not the final
        // byte of the first one, so this is template substitution.
        let spec =
            json!({"v": "${resources.p.status.externalID}${resources.p.status.externalID}"});
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got["v"], json!("77"));
    }

    #[test]
    fn unterminated_expression_left_verbatim() {
        let spec = json!({"v": "x-${resources.p.status"});
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got["v"], json!("x-${resources.p.status"));
    }

    #[test]
    fn whole_string_errors_surface() {
        let spec = json!({"v": "${resources.ghost.status.x}"});
        assert_eq!(
            resolve_value(&spec, &statuses()),
            Err(Error::ResourceNotFound("ghost".into())),
        );
        let spec = json!({"v": "${now()}"});
        assert_eq!(
            resolve_value(&spec, &statuses()),
            Err(Error::UnsupportedExpression("now()".into())),
        );
    }

    #[test]
    fn unsupported_shapes() {
        let m = statuses();
        for expr in ["resources", "resources.p", "resources..x", "self.status", "resources.Bad.x"] {
            assert!(
                matches!(evaluate(expr, &m), Err(Error::UnsupportedExpression(_))),
                "{expr:?}",
            );
        }
    }

    #[test]
    fn navigation_misses_are_null() {
        let m = statuses();
        assert_eq!(
            evaluate("resources.parent.status.nope", &m).unwrap(),
            Value::Null,
        );
        // Descending through a scalar is a miss, not an error.
        assert_eq!(
            evaluate("resources.parent.status.externalID.deeper", &m).unwrap(),
            Value::Null,
        );
    }

    #[test]
    fn structure_and_lengths_invariant() {
        let spec = json!({
            "list": ["${resources.p.status.externalID}", "x", "${resources.p.status.tags}"],
        });
        let got = resolve_value(&spec, &statuses()).unwrap();
        assert_eq!(got["list"], json!([7, "x", {"env": "prod"}]));
    }

    #[test]
    fn lookup_path_exported() {
        let v = json!({"a": {"b": {"c": 3}}});
        assert_eq!(lookup_path(&v, "a.b.c"), Some(&json!(3)));
        assert_eq!(lookup_path(&v, "a.b.z"), None);
        assert_eq!(lookup_path(&v, "a.b.c.d"), None);
    }
}
