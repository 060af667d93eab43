//! Node filter validation and matching
//!
//! A node filter constrains requirement targets by property and capability
//! values:
//!
//! ```yaml
//! node_filter:
//!   capabilities:
//!     - host:
//!         properties:
//!           - num_cpus: { in_range: [1, 4] }
//! ```
//!
//! Conditions are either a literal (simple equality) or a one-key
//! constraint clause. Only literal candidate values can match; a property
//! that is still an unevaluated function never satisfies a condition.

use crate::constraints::Constraint;
use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::topology::node::NodeTemplate;
use crate::value::{Value, ValueExpr};

/// Validate the filter grammar. Returns false when the shape is unusable.
pub fn validate_filter(
    filter: &Value,
    what: &str,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> bool {
    let Some(map) = filter.as_map() else {
        sink.error(
            DiagnosticKind::TypeMismatchError,
            format!("node_filter of {} must be a map", what),
            location.clone(),
        );
        return false;
    };
    let mut valid = true;
    if let Some(props) = map.get("properties") {
        valid &= validate_conditions(props, what, location, sink);
    }
    if let Some(caps) = map.get("capabilities") {
        let Some(entries) = caps.as_list() else {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"capabilities\" of node_filter of {} must be a list", what),
                location.clone(),
            );
            return false;
        };
        for entry in entries {
            match entry.as_map().filter(|m| m.len() == 1) {
                Some(m) => {
                    let (cap_name, cap_filter) = m.iter().next().expect("len checked");
                    if let Some(props) = cap_filter.get("properties") {
                        valid &= validate_conditions(
                            props,
                            &format!("capability \"{}\" of {}", cap_name, what),
                            location,
                            sink,
                        );
                    }
                }
                None => {
                    sink.error(
                        DiagnosticKind::SchemaError,
                        format!(
                            "node_filter of {}: one capability name per list item",
                            what
                        ),
                        location.clone(),
                    );
                    valid = false;
                }
            }
        }
    }
    valid
}

fn validate_conditions(
    conditions: &Value,
    what: &str,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> bool {
    let Some(entries) = conditions.as_list() else {
        sink.error(
            DiagnosticKind::TypeMismatchError,
            format!("\"properties\" of node_filter of {} must be a list", what),
            location.clone(),
        );
        return false;
    };
    let mut valid = true;
    for entry in entries {
        if entry.as_map().map(|m| m.len()) != Some(1) {
            sink.error(
                DiagnosticKind::SchemaError,
                format!(
                    "node_filter of {}: only one property allowed per filter condition",
                    what
                ),
                location.clone(),
            );
            valid = false;
        }
    }
    valid
}

/// Whether `candidate` satisfies the filter.
pub fn matches(filter: &Value, candidate: &NodeTemplate) -> bool {
    let Some(map) = filter.as_map() else {
        return false;
    };
    if let Some(conditions) = map.get("properties") {
        if !match_conditions(conditions, |name| candidate.properties.get(name)) {
            return false;
        }
    }
    if let Some(caps) = map.get("capabilities").and_then(Value::as_list) {
        for entry in caps {
            let Some((cap_name, cap_filter)) =
                entry.as_map().and_then(|m| m.iter().next())
            else {
                return false;
            };
            let Some(capability) = candidate.capabilities.get(cap_name) else {
                return false;
            };
            if let Some(conditions) = cap_filter.get("properties") {
                if !match_conditions(conditions, |name| capability.properties.get(name)) {
                    return false;
                }
            }
        }
    }
    true
}

fn match_conditions<'a>(
    conditions: &Value,
    lookup: impl Fn(&str) -> Option<&'a ValueExpr>,
) -> bool {
    let Some(entries) = conditions.as_list() else {
        return false;
    };
    for entry in entries {
        let Some((prop_name, condition)) = entry.as_map().and_then(|m| m.iter().next()) else {
            return false;
        };
        let Some(ValueExpr::Literal(actual)) = lookup(prop_name) else {
            return false;
        };
        if !condition_holds(prop_name, condition, actual) {
            return false;
        }
    }
    true
}

fn condition_holds(prop_name: &str, condition: &Value, actual: &Value) -> bool {
    // A one-key map whose key is a constraint keyword is a clause;
    // anything else is a plain equality match.
    if let Some(map) = condition.as_map() {
        if map.len() == 1 {
            let prop_type = guess_type(actual);
            if let Ok(clause) = Constraint::parse(prop_name, prop_type, condition) {
                return clause.check(prop_name, prop_type, actual, None).is_ok();
            }
        }
        return condition == actual;
    }
    condition == actual
}

/// Filters compare untyped values; infer the comparison type from the
/// candidate's literal.
fn guess_type(actual: &Value) -> &'static str {
    match actual {
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Bool(_) => "boolean",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        _ => "string",
    }
}
