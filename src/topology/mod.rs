//! Topology elaboration
//!
//! Turns the `topology_template` section into a [`Topology`]: inputs bound,
//! node and relationship templates instantiated with defaults filled,
//! requirements resolved to targets, groups and policies checked, and the
//! substitution mapping validated. The returned object is read-only.

pub mod filter;
pub mod groups;
pub mod node;
pub mod parameters;
pub mod relationship;

use indexmap::IndexMap;

pub use groups::{Group, Policy};
pub use node::{CapabilityAssignment, NodeTemplate, RequirementBinding};
pub use parameters::{Input, Output};
pub use relationship::RelationshipTemplate;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::substitution::{self, SubstitutionMapping};
use crate::types::TypeRegistry;
use crate::value::Value;

const TOPOLOGY_SECTIONS: &[&str] = &[
    "description",
    "inputs",
    "node_templates",
    "relationship_templates",
    "outputs",
    "groups",
    "substitution_mappings",
    "policies",
];

/// The elaborated service topology.
#[derive(Debug)]
pub struct Topology {
    pub description: Option<String>,
    pub inputs: IndexMap<String, Input>,
    pub outputs: IndexMap<String, Output>,
    pub node_templates: IndexMap<String, NodeTemplate>,
    pub relationship_templates: IndexMap<String, RelationshipTemplate>,
    pub groups: IndexMap<String, Group>,
    pub policies: Vec<Policy>,
    pub substitution: Option<SubstitutionMapping>,
}

impl Topology {
    pub fn empty() -> Topology {
        Topology {
            description: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            node_templates: IndexMap::new(),
            relationship_templates: IndexMap::new(),
            groups: IndexMap::new(),
            policies: Vec::new(),
            substitution: None,
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeTemplate> {
        self.node_templates.get(name)
    }

    /// The bound value of an input, if any.
    pub fn input_value(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(|i| i.value.as_ref())
    }

    /// Nodes targeting `name` through some requirement.
    pub fn incoming<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a NodeTemplate, &'a RequirementBinding)> {
        self.node_templates.values().flat_map(move |node| {
            node.requirements
                .iter()
                .filter(move |r| r.target_node.as_deref() == Some(name))
                .map(move |r| (node, r))
        })
    }
}

/// Elaborate the `topology_template` body. `deferred_inputs` names inputs
/// that arrive from a substituting outer topology rather than the caller.
pub(crate) fn elaborate(
    tree: &Value,
    registry: &TypeRegistry,
    parameters: &IndexMap<String, Value>,
    deferred_inputs: &[String],
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> Topology {
    let mut topology = Topology::empty();
    let entries = match tree {
        Value::Null => return topology,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"topology_template\" must be a map, got {}", other.type_name()),
                loc(file, "topology_template"),
            );
            return topology;
        }
    };
    for key in entries.keys() {
        if !TOPOLOGY_SECTIONS.contains(&key.as_str()) {
            sink.error(
                DiagnosticKind::UnknownFieldError,
                format!("topology template contains unknown field \"{}\"", key),
                loc(file, &format!("topology_template/{}", key)),
            );
        }
    }
    topology.description = entries
        .get("description")
        .and_then(Value::as_str)
        .map(|s| s.trim_end().to_string());

    topology.inputs = parameters::elaborate_inputs(
        entries.get("inputs").unwrap_or(&Value::Null),
        parameters,
        deferred_inputs,
        registry,
        file,
        sink,
    );

    topology.relationship_templates = relationship::elaborate_relationship_templates(
        entries.get("relationship_templates").unwrap_or(&Value::Null),
        registry,
        file,
        sink,
    );

    // Node templates: parse everything first so requirement binding can
    // search siblings in declaration order.
    if let Some(raw_nodes) = entries.get("node_templates") {
        match raw_nodes.as_map() {
            Some(node_entries) => {
                let mut bodies: IndexMap<String, Value> = IndexMap::new();
                for (name, body) in node_entries {
                    let location =
                        loc(file, &format!("topology_template/node_templates/{}", name));
                    let Some(body) =
                        node::apply_copy(name, body, &bodies, "node template", &location, sink)
                    else {
                        continue;
                    };
                    if let Some(parsed) =
                        node::parse_node_template(name, &body, registry, &location, sink)
                    {
                        topology.node_templates.insert(name.clone(), parsed);
                    }
                    bodies.insert(name.clone(), body);
                }
            }
            None => sink.error(
                DiagnosticKind::TypeMismatchError,
                "\"node_templates\" must be a map",
                loc(file, "topology_template/node_templates"),
            ),
        }
    }
    node::bind_all_requirements(
        &mut topology.node_templates,
        &topology.relationship_templates,
        registry,
        file,
        sink,
    );

    topology.outputs =
        parameters::elaborate_outputs(entries.get("outputs").unwrap_or(&Value::Null), file, sink);

    topology.groups = groups::elaborate_groups(
        entries.get("groups").unwrap_or(&Value::Null),
        &topology.node_templates,
        registry,
        file,
        sink,
    );
    topology.policies = groups::elaborate_policies(
        entries.get("policies").unwrap_or(&Value::Null),
        &topology.node_templates,
        &topology.groups,
        registry,
        file,
        sink,
    );

    if let Some(raw_substitution) = entries.get("substitution_mappings") {
        let location = loc(file, "topology_template/substitution_mappings");
        if let Some(mapping) = substitution::parse(raw_substitution, &location, sink) {
            substitution::validate(
                &mapping,
                &topology.inputs,
                &topology.node_templates,
                registry,
                &location,
                sink,
            );
            topology.substitution = Some(mapping);
        }
    }

    crate::functions::validate_topology(&topology, registry, file, sink);
    topology
}

fn loc(file: Option<&str>, path: &str) -> SourceLocation {
    match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    }
}
