//! Substitution mappings
//!
//! A topology that declares `substitution_mappings` can stand in for a node
//! of the declared type. The checks here establish the correspondence: the
//! type's required properties arrive through the topology's inputs, and its
//! capabilities and requirements are delegated to inner nodes.

use indexmap::IndexMap;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::topology::node::NodeTemplate;
use crate::topology::parameters::Input;
use crate::types::{QualifiedName, TypeKind, TypeRegistry};
use crate::value::Value;

/// Parsed `substitution_mappings` block.
#[derive(Debug, Clone)]
pub struct SubstitutionMapping {
    pub node_type: QualifiedName,
    /// Property of the substituted type -> input receiving it.
    pub properties: IndexMap<String, String>,
    /// Capability of the substituted type -> (inner node, inner capability).
    pub capabilities: IndexMap<String, (String, String)>,
    /// Requirement of the substituted type -> (inner node, inner requirement).
    pub requirements: IndexMap<String, (String, String)>,
}

const SUBSTITUTION_KEYS: &[&str] = &[
    "node_type",
    "node",
    "substitution_filter",
    "properties",
    "capabilities",
    "requirements",
    "attributes",
    "interfaces",
];

pub fn parse(
    raw: &Value,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<SubstitutionMapping> {
    let map = match raw {
        Value::Null => return None,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"substitution_mappings\" must be a map, got {}", other.type_name()),
                location.clone(),
            );
            return None;
        }
    };
    for key in map.keys() {
        if !SUBSTITUTION_KEYS.contains(&key.as_str()) {
            sink.error(
                DiagnosticKind::UnknownFieldError,
                format!("substitution_mappings contains unknown field \"{}\"", key),
                location.clone(),
            );
        }
    }
    let Some(node_type) = map.get("node_type").and_then(Value::as_str) else {
        sink.error(
            DiagnosticKind::MissingRequiredFieldError,
            "substitution_mappings is missing required field \"node_type\"",
            location.clone(),
        );
        return None;
    };
    let mut mapping = SubstitutionMapping {
        node_type: QualifiedName::new(node_type),
        properties: IndexMap::new(),
        capabilities: IndexMap::new(),
        requirements: IndexMap::new(),
    };
    if let Some(props) = map.get("properties").and_then(Value::as_map) {
        for (prop, target) in props {
            match mapping_input(target) {
                Some(input) => {
                    mapping.properties.insert(prop.clone(), input);
                }
                None => sink.error(
                    DiagnosticKind::SubstitutionMappingError,
                    format!("property mapping \"{}\" must be [ input_name ]", prop),
                    location.clone(),
                ),
            }
        }
    }
    for (section, out) in [
        ("capabilities", &mut mapping.capabilities),
        ("requirements", &mut mapping.requirements),
    ] {
        if let Some(entries) = map.get(section).and_then(Value::as_map) {
            for (name, target) in entries {
                match mapping_pair(target) {
                    Some(pair) => {
                        out.insert(name.clone(), pair);
                    }
                    None => sink.error(
                        DiagnosticKind::SubstitutionMappingError,
                        format!(
                            "{} mapping \"{}\" must be [ node, {} ]",
                            section,
                            name,
                            section.trim_end_matches('s')
                        ),
                        location.clone(),
                    ),
                }
            }
        }
    }
    Some(mapping)
}

/// `[ input_name ]`, with the bare string form tolerated.
fn mapping_input(target: &Value) -> Option<String> {
    match target {
        Value::String(s) => Some(s.clone()),
        Value::List(items) if items.len() == 1 => items[0].as_str().map(String::from),
        _ => None,
    }
}

/// `[ node, capability_or_requirement ]`.
fn mapping_pair(target: &Value) -> Option<(String, String)> {
    let items = target.as_list()?;
    if items.len() != 2 {
        return None;
    }
    Some((items[0].as_str()?.to_string(), items[1].as_str()?.to_string()))
}

/// Validate the correspondence between the substituted type and the
/// topology (4.F): inputs cover required properties, surplus inputs have
/// defaults, capabilities and requirements delegate to compatible inner
/// targets.
pub fn validate(
    mapping: &SubstitutionMapping,
    inputs: &IndexMap<String, Input>,
    nodes: &IndexMap<String, NodeTemplate>,
    registry: &TypeRegistry,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) {
    let Some(def) = registry.lookup(mapping.node_type.as_str(), TypeKind::Node) else {
        sink.error(
            DiagnosticKind::UnknownTypeError,
            format!(
                "substituted node type \"{}\" is not defined",
                mapping.node_type
            ),
            location.clone(),
        );
        return;
    };
    let def = def.clone();
    let Some(view) = registry.flattened(mapping.node_type.as_str(), TypeKind::Node) else {
        return;
    };

    // Required properties of the substituted type must arrive through
    // inputs of a matching type.
    for (prop_name, schema) in &view.properties {
        if !schema.required || schema.default.is_some() {
            continue;
        }
        let input_name = mapping
            .properties
            .get(prop_name)
            .cloned()
            .unwrap_or_else(|| prop_name.clone());
        match inputs.get(&input_name) {
            None => sink.error(
                DiagnosticKind::MissingRequiredInputError,
                format!(
                    "substituted type \"{}\" requires property \"{}\" but the template declares no input \"{}\" to receive it",
                    mapping.node_type, prop_name, input_name
                ),
                location.clone(),
            ),
            Some(input) => {
                let compatible = input.schema.type_name == schema.type_name
                    || registry.is_derived_from(&input.schema.type_name, &schema.type_name);
                if !compatible {
                    sink.error(
                        DiagnosticKind::TypeMismatchError,
                        format!(
                            "input \"{}\" of type \"{}\" cannot receive property \"{}\" of type \"{}\"",
                            input_name, input.schema.type_name, prop_name, schema.type_name
                        ),
                        location.clone(),
                    );
                }
            }
        }
    }

    // Inputs that feed no property of the substituted type must carry
    // their own default.
    for (input_name, input) in inputs {
        let feeds_property = view.properties.contains_key(input_name)
            || mapping.properties.values().any(|mapped| mapped == input_name);
        if !feeds_property && input.schema.default.is_none() && input.schema.required {
            sink.error(
                DiagnosticKind::SubstitutionMappingError,
                format!(
                    "input \"{}\" does not correspond to a property of \"{}\" and has no default",
                    input_name, mapping.node_type
                ),
                location.clone(),
            );
        }
    }

    // Capabilities declared by the substituted type itself must be mapped
    // to a compatible inner capability.
    for (cap_name, cap_def) in &def.capabilities {
        match mapping.capabilities.get(cap_name) {
            None => sink.error(
                DiagnosticKind::SubstitutionMappingError,
                format!(
                    "capability \"{}\" of substituted type \"{}\" is not mapped",
                    cap_name, mapping.node_type
                ),
                location.clone(),
            ),
            Some((inner_node, inner_cap)) => match nodes.get(inner_node) {
                None => sink.error(
                    DiagnosticKind::SubstitutionMappingError,
                    format!(
                        "capability \"{}\" maps to unknown node template \"{}\"",
                        cap_name, inner_node
                    ),
                    location.clone(),
                ),
                Some(node) => match node.capabilities.get(inner_cap) {
                    None => sink.error(
                        DiagnosticKind::SubstitutionMappingError,
                        format!(
                            "capability \"{}\" maps to \"{}\" which node \"{}\" does not offer",
                            cap_name, inner_cap, inner_node
                        ),
                        location.clone(),
                    ),
                    Some(inner) => {
                        if !registry
                            .is_derived_from(inner.type_name.as_str(), cap_def.type_name.as_str())
                        {
                            sink.error(
                                DiagnosticKind::TypeMismatchError,
                                format!(
                                    "capability \"{}\" of \"{}\" has type \"{}\", not compatible with \"{}\"",
                                    inner_cap, inner_node, inner.type_name, cap_def.type_name
                                ),
                                location.clone(),
                            );
                        }
                    }
                },
            },
        }
    }

    // Requirements declared by the substituted type itself must be mapped
    // to an inner requirement with reconcilable occurrences.
    for req_def in &def.requirements {
        match mapping.requirements.get(&req_def.name) {
            None => sink.error(
                DiagnosticKind::SubstitutionMappingError,
                format!(
                    "requirement \"{}\" of substituted type \"{}\" is not mapped",
                    req_def.name, mapping.node_type
                ),
                location.clone(),
            ),
            Some((inner_node, inner_req)) => match nodes.get(inner_node) {
                None => sink.error(
                    DiagnosticKind::SubstitutionMappingError,
                    format!(
                        "requirement \"{}\" maps to unknown node template \"{}\"",
                        req_def.name, inner_node
                    ),
                    location.clone(),
                ),
                Some(node) => {
                    let inner_slot = node
                        .view
                        .requirements
                        .iter()
                        .find(|r| &r.name == inner_req);
                    match inner_slot {
                        None => sink.error(
                            DiagnosticKind::SubstitutionMappingError,
                            format!(
                                "requirement \"{}\" maps to \"{}\" which node \"{}\" does not declare",
                                req_def.name, inner_req, inner_node
                            ),
                            location.clone(),
                        ),
                        Some(inner) => {
                            let reconcilable = inner
                                .occurrences
                                .max
                                .map_or(true, |max| req_def.occurrences.min <= max)
                                && req_def
                                    .occurrences
                                    .max
                                    .map_or(true, |max| inner.occurrences.min <= max);
                            if !reconcilable {
                                sink.error(
                                    DiagnosticKind::OccurrenceError,
                                    format!(
                                        "occurrences {} of requirement \"{}\" cannot be reconciled with {} on \"{}\"",
                                        req_def.occurrences, req_def.name, inner.occurrences, inner_node
                                    ),
                                    location.clone(),
                                );
                            }
                        }
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_forms() {
        assert_eq!(
            mapping_input(&Value::parse_str("[ server_port ]").unwrap()),
            Some("server_port".to_string())
        );
        assert_eq!(
            mapping_pair(&Value::parse_str("[ app, host ]").unwrap()),
            Some(("app".to_string(), "host".to_string()))
        );
        assert_eq!(mapping_pair(&Value::parse_str("[ app ]").unwrap()), None);
    }
}
