//! Node templates and requirement binding

use std::sync::Arc;

use indexmap::IndexMap;

use crate::constraints::{self, PropertyStatus, Schema};
use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::topology::filter;
use crate::topology::relationship::RelationshipTemplate;
use crate::types::{
    ArtifactDef, CapabilityDef, InterfaceDef, QualifiedName, RequirementDef, TypeKind,
    TypeRegistry,
};
use crate::value::{Value, ValueExpr};

/// A capability offered by a node, with its resolved property values.
#[derive(Debug, Clone)]
pub struct CapabilityAssignment {
    pub name: String,
    pub type_name: QualifiedName,
    pub properties: IndexMap<String, ValueExpr>,
}

/// One resolved requirement of a node. Targets are stored as template and
/// capability names; the topology map resolves them to handles, so node
/// cycles through distinct requirements stay representable.
#[derive(Debug, Clone)]
pub struct RequirementBinding {
    pub name: String,
    pub target_node: Option<String>,
    pub target_capability: Option<String>,
    pub relationship: RelationshipTemplate,
}

/// An instantiated node template.
#[derive(Debug, Clone)]
pub struct NodeTemplate {
    pub name: String,
    pub type_name: QualifiedName,
    pub view: Arc<crate::types::FlattenedView>,
    pub directives: Vec<String>,
    pub metadata: IndexMap<String, Value>,
    pub properties: IndexMap<String, ValueExpr>,
    pub attributes: IndexMap<String, ValueExpr>,
    pub capabilities: IndexMap<String, CapabilityAssignment>,
    pub interfaces: IndexMap<String, InterfaceDef>,
    pub artifacts: IndexMap<String, ArtifactDef>,
    pub requirements: Vec<RequirementBinding>,
    pub node_filter: Option<Value>,
    /// Requirement assignments as declared, consumed by the binder.
    pub(crate) raw_requirements: Vec<(String, Value)>,
}

impl NodeTemplate {
    pub fn is_derived_from(&self, ancestor: &str) -> bool {
        self.view.derives_from(ancestor)
    }

    /// Bindings for one requirement name.
    pub fn requirements_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a RequirementBinding> {
        self.requirements.iter().filter(move |r| r.name == name)
    }
}

const NODE_TEMPLATE_KEYS: &[&str] = &[
    "type",
    "description",
    "metadata",
    "directives",
    "properties",
    "attributes",
    "capabilities",
    "requirements",
    "interfaces",
    "artifacts",
    "node_filter",
    "copy",
];

/// Resolve a `copy:` key against previously parsed sibling bodies: the
/// referenced entry is the base, this entry's keys override it.
pub(crate) fn apply_copy(
    name: &str,
    body: &Value,
    previous: &IndexMap<String, Value>,
    what: &str,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<Value> {
    let map = match body.as_map() {
        Some(m) => m,
        None => return Some(body.clone()),
    };
    let Some(source) = map.get("copy") else {
        return Some(body.clone());
    };
    let Some(source_name) = source.as_str() else {
        sink.error(
            DiagnosticKind::SchemaError,
            format!("\"copy\" of {} \"{}\" must be a template name", what, name),
            location.clone(),
        );
        return None;
    };
    // Only previously defined siblings are eligible, which also rules out
    // copy cycles.
    let Some(base) = previous.get(source_name) else {
        sink.error(
            DiagnosticKind::SchemaError,
            format!(
                "\"copy\" of {} \"{}\" references \"{}\" which is not defined earlier in the template",
                what, name, source_name
            ),
            location.clone(),
        );
        return None;
    };
    let mut merged = base.as_map().cloned().unwrap_or_default();
    for (key, value) in map {
        if key != "copy" {
            merged.insert(key.clone(), value.clone());
        }
    }
    Some(Value::Map(merged))
}

/// Validate assigned property values against their definitions and fill
/// defaults for everything left unassigned.
pub(crate) fn fill_properties(
    what: &str,
    defs: &IndexMap<String, Schema>,
    assigned: Option<&Value>,
    out: &mut IndexMap<String, ValueExpr>,
    registry: &TypeRegistry,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) {
    if let Some(assigned) = assigned {
        match assigned.as_map() {
            Some(entries) => {
                for (prop_name, raw) in entries {
                    let Some(schema) = defs.get(prop_name) else {
                        sink.error(
                            DiagnosticKind::UnknownFieldError,
                            format!("{} contains unknown property \"{}\"", what, prop_name),
                            location.clone(),
                        );
                        continue;
                    };
                    match schema.status {
                        PropertyStatus::Deprecated => sink.warning(
                            DiagnosticKind::Deprecated,
                            format!("property \"{}\" of {} is deprecated", prop_name, what),
                            location.clone(),
                        ),
                        PropertyStatus::Removed => sink.error(
                            DiagnosticKind::UnknownFieldError,
                            format!("property \"{}\" of {} has been removed", prop_name, what),
                            location.clone(),
                        ),
                        _ => {}
                    }
                    let expr = ValueExpr::parse(raw);
                    if expr.is_fully_literal() {
                        for violation in
                            constraints::validate_value(prop_name, raw, schema, Some(registry))
                        {
                            let kind = if violation.contains("must be of type") {
                                DiagnosticKind::TypeMismatchError
                            } else {
                                DiagnosticKind::ConstraintViolation
                            };
                            sink.error(kind, format!("{}: {}", what, violation), location.clone());
                        }
                    }
                    out.insert(prop_name.clone(), expr);
                }
            }
            None => sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("properties of {} must be a map", what),
                location.clone(),
            ),
        }
    }
    for (prop_name, schema) in defs {
        if out.contains_key(prop_name) {
            continue;
        }
        match &schema.default {
            Some(default) => {
                out.insert(prop_name.clone(), ValueExpr::parse(default));
            }
            None => {
                if schema.required {
                    sink.error(
                        DiagnosticKind::MissingRequiredFieldError,
                        format!("{} is missing required property \"{}\"", what, prop_name),
                        location.clone(),
                    );
                }
            }
        }
    }
}

/// Effective property schemas of a capability slot: the capability type's
/// flattened properties refined by the node type's declaration.
fn capability_schemas(def: &CapabilityDef, registry: &TypeRegistry) -> IndexMap<String, Schema> {
    let mut schemas = registry
        .flattened(def.type_name.as_str(), TypeKind::Capability)
        .map(|view| view.properties.clone())
        .unwrap_or_default();
    for (name, refinement) in &def.properties {
        schemas.insert(name.clone(), refinement.clone());
    }
    schemas
}

/// Parse one node template entry. Requirement assignments are collected
/// raw and bound later, once every sibling exists.
pub(crate) fn parse_node_template(
    name: &str,
    body: &Value,
    registry: &TypeRegistry,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<NodeTemplate> {
    let map = match body.as_map() {
        Some(m) => m,
        None => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("node template \"{}\" must be a map", name),
                location.clone(),
            );
            return None;
        }
    };
    for key in map.keys() {
        if !NODE_TEMPLATE_KEYS.contains(&key.as_str()) {
            sink.error(
                DiagnosticKind::UnknownFieldError,
                format!("node template \"{}\" contains unknown field \"{}\"", name, key),
                location.clone(),
            );
        }
    }
    let Some(type_ref) = map.get("type").and_then(Value::as_str) else {
        sink.error(
            DiagnosticKind::MissingRequiredFieldError,
            format!("node template \"{}\" is missing required field \"type\"", name),
            location.clone(),
        );
        return None;
    };
    if let Some((target, deprecated)) = registry.alias_info(type_ref) {
        if deprecated {
            sink.warning(
                DiagnosticKind::Deprecated,
                format!(
                    "type \"{}\" of node template \"{}\" is deprecated, use \"{}\"",
                    type_ref, name, target
                ),
                location.clone(),
            );
        }
    }
    let Some(view) = registry.flattened(type_ref, TypeKind::Node) else {
        sink.error(
            DiagnosticKind::UnknownTypeError,
            format!(
                "node type \"{}\" of template \"{}\" is not defined",
                type_ref, name
            ),
            location.clone(),
        );
        return None;
    };
    let what = format!("node template \"{}\"", name);
    let mut node = NodeTemplate {
        name: name.to_string(),
        type_name: view.name.clone(),
        directives: map
            .get("directives")
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        metadata: map.get("metadata").and_then(Value::as_map).cloned().unwrap_or_default(),
        properties: IndexMap::new(),
        attributes: IndexMap::new(),
        capabilities: IndexMap::new(),
        interfaces: view.interfaces.clone(),
        artifacts: IndexMap::new(),
        requirements: Vec::new(),
        node_filter: map.get("node_filter").cloned(),
        raw_requirements: Vec::new(),
        view,
    };

    // Templates marked for substitution or selection carry partial values
    // on purpose; their properties are checked later or elsewhere.
    let deferred = node.directives.iter().any(|d| d == "substitute" || d == "select");
    if !deferred {
        fill_properties(
            &what,
            &node.view.properties.clone(),
            map.get("properties"),
            &mut node.properties,
            registry,
            location,
            sink,
        );
    } else if let Some(assigned) = map.get("properties").and_then(Value::as_map) {
        for (k, v) in assigned {
            node.properties.insert(k.clone(), ValueExpr::parse(v));
        }
    }

    if let Some(assigned) = map.get("attributes").and_then(Value::as_map) {
        for (attr_name, raw) in assigned {
            if !node.view.attributes.contains_key(attr_name) {
                sink.error(
                    DiagnosticKind::UnknownFieldError,
                    format!("{} contains unknown attribute \"{}\"", what, attr_name),
                    location.clone(),
                );
                continue;
            }
            node.attributes.insert(attr_name.clone(), ValueExpr::parse(raw));
        }
    }

    // Capabilities: every slot from the type, overlaid with assignments.
    let assigned_caps = map.get("capabilities").and_then(Value::as_map);
    if let Some(assigned) = assigned_caps {
        for cap_name in assigned.keys() {
            if !node.view.capabilities.contains_key(cap_name) {
                sink.error(
                    DiagnosticKind::UnknownFieldError,
                    format!("{} contains unknown capability \"{}\"", what, cap_name),
                    location.clone(),
                );
            }
        }
    }
    for (cap_name, cap_def) in node.view.capabilities.clone() {
        let schemas = capability_schemas(&cap_def, registry);
        let assigned = assigned_caps
            .and_then(|m| m.get(&cap_name))
            .and_then(|body| body.get("properties"));
        let mut properties = IndexMap::new();
        fill_properties(
            &format!("capability \"{}\" of {}", cap_name, what),
            &schemas,
            assigned,
            &mut properties,
            registry,
            location,
            sink,
        );
        node.capabilities.insert(
            cap_name.clone(),
            CapabilityAssignment {
                name: cap_name,
                type_name: cap_def.type_name.clone(),
                properties,
            },
        );
    }

    // Interfaces: template assignments merge over the type's.
    if let Some(assigned) = map.get("interfaces").and_then(Value::as_map) {
        let mut errors = Vec::new();
        for (iface_name, iface_body) in assigned {
            let parsed = InterfaceDef::parse(iface_name, iface_body, &mut errors);
            let merged = match node.interfaces.get(iface_name) {
                Some(declared) => declared.merged_with(&parsed),
                None => parsed,
            };
            node.interfaces.insert(iface_name.clone(), merged);
        }
        for e in errors {
            sink.error(DiagnosticKind::SchemaError, e, location.clone());
        }
    }

    // Artifacts: merge the type chain's, then the template's own, then
    // check required slots declared by the type.
    node.artifacts = node.view.artifacts.clone();
    if let Some(assigned) = map.get("artifacts").and_then(Value::as_map) {
        let mut errors = Vec::new();
        for (a_name, a_body) in assigned {
            node.artifacts
                .insert(a_name.clone(), ArtifactDef::parse(a_name, a_body, &mut errors));
        }
        for e in errors {
            sink.error(DiagnosticKind::SchemaError, e, location.clone());
        }
    }
    for (a_name, slot) in &node.view.artifacts {
        if !slot.is_slot() {
            continue;
        }
        let provided = node.artifacts.get(a_name).filter(|a| !a.is_slot());
        match provided {
            None if slot.required => sink.error(
                DiagnosticKind::MissingRequiredFieldError,
                format!(
                    "required artifact \"{}\" of type \"{}\" is not defined on {}",
                    a_name,
                    slot.type_name.as_ref().map(|t| t.as_str()).unwrap_or("any"),
                    what
                ),
                location.clone(),
            ),
            Some(artifact) => {
                if let (Some(expected), Some(actual)) = (&slot.type_name, &artifact.type_name) {
                    if !registry.is_derived_from(actual.as_str(), expected.as_str()) {
                        sink.error(
                            DiagnosticKind::TypeMismatchError,
                            format!(
                                "artifact \"{}\" of {} must be derived from type \"{}\"",
                                a_name, what, expected
                            ),
                            location.clone(),
                        );
                    }
                }
            }
            None => {}
        }
    }

    // Requirement assignments: a list of one-key maps, bound later.
    if let Some(reqs) = map.get("requirements") {
        match reqs.as_list() {
            Some(entries) => {
                for entry in entries {
                    match entry.as_map().filter(|m| m.len() == 1) {
                        Some(m) => {
                            let (req_name, req_body) = m.iter().next().expect("len checked");
                            node.raw_requirements.push((req_name.clone(), req_body.clone()));
                        }
                        None => sink.error(
                            DiagnosticKind::SchemaError,
                            format!(
                                "requirement of {} must be a single-key map, got {}",
                                what,
                                entry.canonical_string()
                            ),
                            location.clone(),
                        ),
                    }
                }
            }
            None => sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"requirements\" of {} must be a list", what),
                location.clone(),
            ),
        }
    }

    if let Some(nf) = &node.node_filter {
        filter::validate_filter(nf, &what, location, sink);
    }

    Some(node)
}

/// One requirement slot being tracked during binding.
struct Slot {
    def: RequirementDef,
    declared: bool,
    bound: u32,
}

/// Bind every requirement of every node. Runs after all templates are
/// parsed so targets can be found in declaration order.
pub(crate) fn bind_all_requirements(
    nodes: &mut IndexMap<String, NodeTemplate>,
    rel_templates: &IndexMap<String, RelationshipTemplate>,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) {
    let names: Vec<String> = nodes.keys().cloned().collect();
    for name in names {
        let bindings = bind_node(&nodes[&name], nodes, rel_templates, registry, file, sink);
        if let Some(node) = nodes.get_mut(&name) {
            node.requirements = bindings;
        }
    }
}

fn bind_node(
    node: &NodeTemplate,
    nodes: &IndexMap<String, NodeTemplate>,
    rel_templates: &IndexMap<String, RelationshipTemplate>,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> Vec<RequirementBinding> {
    let location = |req: &str| match file {
        Some(f) => SourceLocation::in_file(
            f,
            format!("topology_template/node_templates/{}/requirements/{}", node.name, req),
        ),
        None => SourceLocation::at_path(format!(
            "topology_template/node_templates/{}/requirements/{}",
            node.name, req
        )),
    };
    let mut slots: Vec<Slot> = node
        .view
        .requirements
        .iter()
        .map(|def| Slot {
            def: def.clone(),
            declared: true,
            bound: 0,
        })
        .collect();
    let mut bindings = Vec::new();

    for (req_name, body) in &node.raw_requirements {
        let loc = location(req_name);
        // The next unfilled slot of this name, appending when exhausted.
        let index = slots
            .iter()
            .position(|s| s.def.name == *req_name && s.bound == 0)
            .unwrap_or_else(|| {
                slots.push(Slot {
                    def: RequirementDef::parse(req_name, &Value::Map(IndexMap::new()), &mut Vec::new()),
                    declared: false,
                    bound: 0,
                });
                slots.len() - 1
            });
        let mut errors = Vec::new();
        let slot_node_constraint = slots[index].def.node.clone();
        let merged = merge_assignment(&slots[index].def, req_name, body, &mut errors);
        for e in errors {
            sink.error(DiagnosticKind::SchemaError, e, loc.clone());
        }
        if let Some(nf) = &merged.node_filter {
            if !filter::validate_filter(nf, &format!("requirement \"{}\"", req_name), &loc, sink) {
                continue;
            }
        }
        if let Some(binding) = resolve_assignment(
            node,
            &merged,
            slot_node_constraint.as_ref(),
            nodes,
            rel_templates,
            registry,
            &loc,
            sink,
        ) {
            slots[index].bound += 1;
            bindings.push(binding);
        }
    }

    // Unassigned slots from the type: bind them when their declared target
    // resolves unambiguously.
    for slot in &mut slots {
        if slot.bound > 0 || !slot.declared {
            continue;
        }
        let loc = location(&slot.def.name);
        if let Some(binding) =
            resolve_default_slot(node, &slot.def, nodes, rel_templates, registry, &loc, sink)
        {
            slot.bound += 1;
            bindings.push(binding);
        }
    }

    // Occurrence enforcement, per requirement name declared on the type.
    // Substituted and selected nodes are completed from outside the
    // template, so their unbound slots are not findings.
    if node.directives.iter().any(|d| d == "substitute" || d == "select") {
        return bindings;
    }
    let mut seen = Vec::new();
    for slot in slots.iter().filter(|s| s.declared) {
        if seen.contains(&slot.def.name) {
            continue;
        }
        seen.push(slot.def.name.clone());
        let occurrences = slot.def.occurrences;
        let count = slots
            .iter()
            .filter(|s| s.def.name == slot.def.name)
            .map(|s| s.bound)
            .sum::<u32>();
        if !occurrences.contains(count) {
            sink.error(
                DiagnosticKind::OccurrenceError,
                format!(
                    "requirement \"{}\" of node \"{}\" is bound {} time(s), outside occurrences {}",
                    slot.def.name, node.name, count, occurrences
                ),
                location(&slot.def.name),
            );
        }
    }
    bindings
}

/// Merge a requirement assignment over the slot definition. The assignment
/// may be a bare node name or a map refining the slot.
fn merge_assignment(
    slot: &RequirementDef,
    name: &str,
    body: &Value,
    errors: &mut Vec<String>,
) -> RequirementDef {
    let mut merged = slot.clone();
    match body {
        Value::String(node_name) => {
            merged.node = Some(QualifiedName::new(node_name.clone()));
        }
        Value::Map(_) => {
            let assignment = RequirementDef::parse(name, body, errors);
            if assignment.node.is_some() {
                merged.node = assignment.node;
            }
            if assignment.capability.is_some() {
                merged.capability = assignment.capability;
            }
            if assignment.relationship.is_some() {
                merged.relationship = assignment.relationship;
            }
            if assignment.node_filter.is_some() {
                merged.node_filter = assignment.node_filter;
            }
            if body.get("occurrences").is_some() {
                merged.occurrences = assignment.occurrences;
            }
        }
        other => errors.push(format!(
            "bad value {} for requirement \"{}\"",
            other.canonical_string(),
            name
        )),
    }
    merged
}

/// Resolve one explicit requirement assignment to a binding.
#[allow(clippy::too_many_arguments)]
fn resolve_assignment(
    source: &NodeTemplate,
    merged: &RequirementDef,
    slot_node_constraint: Option<&QualifiedName>,
    nodes: &IndexMap<String, NodeTemplate>,
    rel_templates: &IndexMap<String, RelationshipTemplate>,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<RequirementBinding> {
    let relationship = instantiate_relationship(source, merged, rel_templates, registry, loc, sink)?;

    let (target_name, target_capability) = match &merged.node {
        Some(node_ref) => {
            if let Some(target) = nodes.get(node_ref.as_str()) {
                // Explicit target template: honor the slot's node type
                // constraint and find a capability on it.
                resolve_explicit_target(
                    source,
                    merged,
                    slot_node_constraint,
                    target,
                    &relationship,
                    registry,
                    loc,
                    sink,
                )?
            } else if registry.lookup(node_ref.as_str(), TypeKind::Node).is_some() {
                match search_target(source, merged, Some(node_ref.as_str()), nodes, &relationship, registry, loc, sink)
                {
                    Some(Some(found)) => found,
                    Some(None) => return unbound(merged, loc, sink),
                    None => return None,
                }
            } else {
                sink.error(
                    DiagnosticKind::NoMatchError,
                    format!(
                        "could not find target template \"{}\" for requirement \"{}\" of node \"{}\"",
                        node_ref, merged.name, source.name
                    ),
                    loc.clone(),
                );
                return None;
            }
        }
        None => {
            let searchable = merged.capability.is_some()
                || merged.node_filter.is_some()
                || !relationship.view.valid_target_types.is_empty();
            if !searchable {
                if merged.occurrences.min != 0 {
                    sink.error(
                        DiagnosticKind::NoMatchError,
                        format!(
                            "requirement \"{}\" of node \"{}\" must specify a node, a capability or a node_filter",
                            merged.name, source.name
                        ),
                        loc.clone(),
                    );
                }
                return None;
            }
            match search_target(source, merged, None, nodes, &relationship, registry, loc, sink) {
                Some(Some(found)) => found,
                Some(None) => return unbound(merged, loc, sink),
                None => return None,
            }
        }
    };

    check_valid_source_types(source, nodes.get(&target_name), target_capability.as_deref(), registry, loc, sink);
    Some(RequirementBinding {
        name: merged.name.clone(),
        target_node: Some(target_name),
        target_capability,
        relationship,
    })
}

/// A requirement that found no target: silent when optional, a NoMatch
/// diagnostic otherwise.
fn unbound(
    merged: &RequirementDef,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<RequirementBinding> {
    if merged.occurrences.min != 0 {
        sink.error(
            DiagnosticKind::NoMatchError,
            format!(
                "no matching target template found for requirement \"{}\"",
                merged.name
            ),
            loc.clone(),
        );
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn resolve_explicit_target(
    source: &NodeTemplate,
    merged: &RequirementDef,
    slot_node_constraint: Option<&QualifiedName>,
    target: &NodeTemplate,
    relationship: &RelationshipTemplate,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<(String, Option<String>)> {
    // The slot's node constraint still applies to an explicit target.
    if let Some(constraint) = slot_node_constraint {
        if constraint.as_str() != target.name
            && registry.lookup(constraint.as_str(), TypeKind::Node).is_some()
            && !registry.is_derived_from(target.type_name.as_str(), constraint.as_str())
        {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!(
                    "target \"{}\" of requirement \"{}\" of node \"{}\" is not derived from \"{}\"",
                    target.name, merged.name, source.name, constraint
                ),
                loc.clone(),
            );
            return None;
        }
    }
    let capability = matching_capability(target, merged.capability.as_ref(), relationship, registry);
    if capability.is_none() && merged.capability.is_some() {
        sink.error(
            DiagnosticKind::NoMatchError,
            format!(
                "no matching capability \"{}\" found on target node \"{}\" for requirement \"{}\" of node \"{}\"",
                merged.capability.as_ref().unwrap(),
                target.name,
                merged.name,
                source.name
            ),
            loc.clone(),
        );
        return None;
    }
    if capability.is_none() && !relationship.view.valid_target_types.is_empty() {
        sink.error(
            DiagnosticKind::NoMatchError,
            format!(
                "no capability with a matching target type found on node \"{}\" for requirement \"{}\" of node \"{}\"",
                target.name, merged.name, source.name
            ),
            loc.clone(),
        );
        return None;
    }
    Some((target.name.clone(), capability))
}

/// Search the topology for a target, in declaration order.
#[allow(clippy::too_many_arguments)]
fn search_target(
    source: &NodeTemplate,
    merged: &RequirementDef,
    type_constraint: Option<&str>,
    nodes: &IndexMap<String, NodeTemplate>,
    relationship: &RelationshipTemplate,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<Option<(String, Option<String>)>> {
    let mut matches: Vec<(String, Option<String>)> = Vec::new();
    for candidate in nodes.values() {
        if let Some(required_type) = type_constraint {
            if !registry.is_derived_from(candidate.type_name.as_str(), required_type) {
                continue;
            }
        }
        let needs_capability =
            merged.capability.is_some() || !relationship.view.valid_target_types.is_empty();
        let capability = if needs_capability {
            match matching_capability(candidate, merged.capability.as_ref(), relationship, registry) {
                Some(c) => Some(c),
                None => continue,
            }
        } else {
            None
        };
        if let Some(nf) = &merged.node_filter {
            if !filter::matches(nf, candidate) {
                continue;
            }
            // A node_filter picks the first match in declaration order.
            return Some(Some((candidate.name.clone(), capability)));
        }
        matches.push((candidate.name.clone(), capability));
    }
    match matches.len() {
        0 => Some(None),
        1 => Some(Some(matches.remove(0))),
        _ => {
            if merged.capability.is_some() {
                sink.error(
                    DiagnosticKind::AmbiguousTargetError,
                    format!(
                        "requirement \"{}\" of node \"{}\" is ambiguous: capability \"{}\" is offered by \"{}\" and \"{}\"",
                        merged.name,
                        source.name,
                        merged.capability.as_ref().unwrap(),
                        matches[0].0,
                        matches[1].0
                    ),
                    loc.clone(),
                );
                None
            } else {
                // A bare type search with several candidates stays unbound
                // rather than guessing.
                Some(None)
            }
        }
    }
}

/// Try to satisfy a type-declared slot that the template left unassigned.
/// Only a slot whose `node` names an actual sibling template binds here; a
/// node *type* reference on an unassigned slot is a default, not a search.
fn resolve_default_slot(
    source: &NodeTemplate,
    def: &RequirementDef,
    nodes: &IndexMap<String, NodeTemplate>,
    rel_templates: &IndexMap<String, RelationshipTemplate>,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<RequirementBinding> {
    let node_ref = def.node.as_ref()?;
    let target = nodes.get(node_ref.as_str())?;
    let relationship = instantiate_relationship(source, def, rel_templates, registry, loc, sink)?;
    let target_capability =
        matching_capability(target, def.capability.as_ref(), &relationship, registry);
    let target_name = target.name.clone();
    check_valid_source_types(source, nodes.get(&target_name), target_capability.as_deref(), registry, loc, sink);
    Some(RequirementBinding {
        name: def.name.clone(),
        target_node: Some(target_name),
        target_capability,
        relationship,
    })
}

/// Pick the capability on `target` satisfying the requirement: the named
/// one if `cap_ref` is a symbolic name, else the first whose type is
/// compatible with `cap_ref` as a type or with the relationship's
/// valid_target_types.
fn matching_capability(
    target: &NodeTemplate,
    cap_ref: Option<&QualifiedName>,
    relationship: &RelationshipTemplate,
    registry: &TypeRegistry,
) -> Option<String> {
    if let Some(cap_ref) = cap_ref {
        if target.capabilities.contains_key(cap_ref.as_str()) {
            return Some(cap_ref.as_str().to_string());
        }
        return target
            .capabilities
            .values()
            .find(|cap| registry.is_derived_from(cap.type_name.as_str(), cap_ref.as_str()))
            .map(|cap| cap.name.clone());
    }
    let valid_targets = &relationship.view.valid_target_types;
    if valid_targets.is_empty() {
        return None;
    }
    target
        .capabilities
        .values()
        .find(|cap| {
            valid_targets
                .iter()
                .any(|t| registry.is_derived_from(cap.type_name.as_str(), t.as_str()))
        })
        .map(|cap| cap.name.clone())
}

/// Instantiate the relationship for a binding: a named template, a type
/// reference, an inline definition, or the slot's default.
fn instantiate_relationship(
    source: &NodeTemplate,
    def: &RequirementDef,
    rel_templates: &IndexMap<String, RelationshipTemplate>,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<RelationshipTemplate> {
    let synth_name = format!("{}.{}", source.name, def.name);
    match &def.relationship {
        Some(Value::String(reference)) => {
            if registry.lookup(reference, TypeKind::Relationship).is_some() {
                RelationshipTemplate::of_type(&synth_name, reference, None, None, registry, loc, sink)
            } else if let Some(tpl) = rel_templates.get(reference) {
                let mut tpl = tpl.clone();
                tpl.name = synth_name;
                Some(tpl)
            } else {
                sink.error(
                    DiagnosticKind::UnknownTypeError,
                    format!(
                        "relationship \"{}\" of requirement \"{}\" of node \"{}\" is neither a type nor a template",
                        reference, def.name, source.name
                    ),
                    loc.clone(),
                );
                None
            }
        }
        Some(inline @ Value::Map(map)) => {
            if map.get("type").is_none() {
                sink.error(
                    DiagnosticKind::MissingRequiredFieldError,
                    format!(
                        "inline relationship of requirement \"{}\" of node \"{}\" is missing required field \"type\"",
                        def.name, source.name
                    ),
                    loc.clone(),
                );
                return None;
            }
            RelationshipTemplate::from_body(&synth_name, inline, registry, loc, sink)
        }
        Some(other) => {
            sink.error(
                DiagnosticKind::SchemaError,
                format!(
                    "relationship of requirement \"{}\" of node \"{}\" must be a name or map, got {}",
                    def.name,
                    source.name,
                    other.type_name()
                ),
                loc.clone(),
            );
            None
        }
        None => RelationshipTemplate::of_type(
            &synth_name,
            "tosca.relationships.Root",
            None,
            None,
            registry,
            loc,
            sink,
        ),
    }
}

/// Capabilities may restrict which source node types can bind to them.
fn check_valid_source_types(
    source: &NodeTemplate,
    target: Option<&NodeTemplate>,
    capability: Option<&str>,
    registry: &TypeRegistry,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) {
    let Some(target) = target else { return };
    let Some(cap_name) = capability else { return };
    let Some(cap_def) = target.view.capabilities.get(cap_name) else {
        return;
    };
    if cap_def.valid_source_types.is_empty() {
        return;
    }
    let allowed = cap_def
        .valid_source_types
        .iter()
        .any(|t| registry.is_derived_from(source.type_name.as_str(), t.as_str()));
    if !allowed {
        sink.error(
            DiagnosticKind::TypeMismatchError,
            format!(
                "node \"{}\" of type \"{}\" is not a valid source for capability \"{}\" of \"{}\"",
                source.name, source.type_name, cap_name, target.name
            ),
            loc.clone(),
        );
    }
}
