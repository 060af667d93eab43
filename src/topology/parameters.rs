//! Topology inputs and outputs

use indexmap::IndexMap;

use crate::constraints::{self, Schema};
use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::types::TypeRegistry;
use crate::value::{Value, ValueExpr};

/// A declared input parameter with its bound value.
#[derive(Debug, Clone)]
pub struct Input {
    pub name: String,
    pub schema: Schema,
    /// Caller-supplied value, else the default, else None.
    pub value: Option<Value>,
}

impl Input {
    pub fn required(&self) -> bool {
        self.schema.required
    }
}

/// Parse the `inputs:` block and bind caller parameters over defaults.
/// Inputs named in `deferred` are supplied from outside (a substituting
/// topology) and are not required to bind here.
pub fn elaborate_inputs(
    raw: &Value,
    parameters: &IndexMap<String, Value>,
    deferred: &[String],
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, Input> {
    let mut inputs = IndexMap::new();
    let entries = match raw {
        Value::Null => return inputs,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"inputs\" must be a map, got {}", other.type_name()),
                loc(file, "topology_template/inputs"),
            );
            return inputs;
        }
    };
    for (name, body) in entries {
        let location = loc(file, &format!("topology_template/inputs/{}", name));
        let mut errors = Vec::new();
        let schema = Schema::parse(name, body, &mut errors);
        for e in errors {
            sink.error(DiagnosticKind::SchemaError, e, location.clone());
        }
        let supplied = parameters.get(name).cloned();
        let value = supplied.or_else(|| schema.default.clone());
        match &value {
            Some(v) => {
                for violation in constraints::validate_value(name, v, &schema, Some(registry)) {
                    let kind = if violation.contains("must be of type") {
                        DiagnosticKind::TypeMismatchError
                    } else {
                        DiagnosticKind::ConstraintViolation
                    };
                    sink.error(kind, violation, location.clone());
                }
            }
            None => {
                if schema.required && !deferred.iter().any(|d| d == name) {
                    sink.error(
                        DiagnosticKind::MissingRequiredInputError,
                        format!(
                            "topology template is missing required input \"{}\"",
                            name
                        ),
                        location.clone(),
                    );
                }
            }
        }
        inputs.insert(
            name.clone(),
            Input {
                name: name.clone(),
                schema,
                value,
            },
        );
    }
    // Parameters that name no declared input are mistakes worth surfacing.
    for supplied in parameters.keys() {
        if !inputs.contains_key(supplied) {
            sink.error(
                DiagnosticKind::UnknownFieldError,
                format!("parameter \"{}\" does not match any declared input", supplied),
                loc(file, "topology_template/inputs"),
            );
        }
    }
    inputs
}

/// A declared output: an expression evaluated on demand.
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub description: Option<String>,
    pub value: ValueExpr,
}

const OUTPUT_KEYS: &[&str] = &["description", "value"];

pub fn elaborate_outputs(
    raw: &Value,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, Output> {
    let mut outputs = IndexMap::new();
    let entries = match raw {
        Value::Null => return outputs,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"outputs\" must be a map, got {}", other.type_name()),
                loc(file, "topology_template/outputs"),
            );
            return outputs;
        }
    };
    for (name, body) in entries {
        let location = loc(file, &format!("topology_template/outputs/{}", name));
        let Some(map) = body.as_map() else {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("output \"{}\" must be a map", name),
                location,
            );
            continue;
        };
        for key in map.keys() {
            if !OUTPUT_KEYS.contains(&key.as_str()) {
                sink.error(
                    DiagnosticKind::UnknownFieldError,
                    format!("output \"{}\" contains unknown field \"{}\"", name, key),
                    location.clone(),
                );
            }
        }
        let Some(value) = map.get("value") else {
            sink.error(
                DiagnosticKind::MissingRequiredFieldError,
                format!("output \"{}\" is missing required field \"value\"", name),
                location,
            );
            continue;
        };
        outputs.insert(
            name.clone(),
            Output {
                name: name.clone(),
                description: map.get("description").and_then(Value::as_str).map(String::from),
                value: ValueExpr::parse(value),
            },
        );
    }
    outputs
}

fn loc(file: Option<&str>, path: &str) -> SourceLocation {
    match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticSink;

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new("tosca_simple_yaml_1_0", Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        reg.flatten_all(&mut sink).unwrap();
        reg
    }

    fn v(text: &str) -> Value {
        Value::parse_str(text).unwrap()
    }

    #[test]
    fn test_parameter_overrides_default() {
        let reg = registry();
        let mut sink = DiagnosticSink::new();
        let mut params = IndexMap::new();
        params.insert("cpus".to_string(), Value::Integer(4));
        let inputs = elaborate_inputs(
            &v("cpus:\n  type: integer\n  default: 2"),
            &params,
            &[],
            &reg,
            None,
            &mut sink,
        );
        assert_eq!(inputs["cpus"].value, Some(Value::Integer(4)));
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_missing_required_input() {
        let reg = registry();
        let mut sink = DiagnosticSink::new();
        elaborate_inputs(
            &v("cpus:\n  type: integer"),
            &IndexMap::new(),
            &[],
            &reg,
            None,
            &mut sink,
        );
        assert_eq!(sink.error_count(), 1);
        assert_eq!(
            sink.iter().next().unwrap().kind,
            DiagnosticKind::MissingRequiredInputError
        );
    }

    #[test]
    fn test_constraint_violation_on_binding() {
        let reg = registry();
        let mut sink = DiagnosticSink::new();
        let mut params = IndexMap::new();
        params.insert("cpus".to_string(), Value::Integer(3));
        elaborate_inputs(
            &v("cpus:\n  type: integer\n  constraints:\n    - valid_values: [1, 2, 4, 8]"),
            &params,
            &[],
            &reg,
            None,
            &mut sink,
        );
        assert_eq!(sink.error_count(), 1);
        assert_eq!(
            sink.iter().next().unwrap().kind,
            DiagnosticKind::ConstraintViolation
        );
    }

    #[test]
    fn test_output_requires_value() {
        let mut sink = DiagnosticSink::new();
        let outputs = elaborate_outputs(&v("url:\n  description: no value here"), None, &mut sink);
        assert!(outputs.is_empty());
        assert_eq!(
            sink.iter().next().unwrap().kind,
            DiagnosticKind::MissingRequiredFieldError
        );
    }
}
