//! Flattened type views
//!
//! A [`FlattenedView`] is the merge of a type's whole `derived_from` chain,
//! child entries overriding parent entries of the same name under the
//! refinement rules: properties may only narrow, capabilities may only
//! tighten, requirements merge by name and position, interface operations
//! replace per-operation with input union.

use indexmap::IndexMap;

use crate::constraints::Schema;
use crate::types::definition::{
    ArtifactDef, CapabilityDef, InterfaceDef, QualifiedName, RequirementDef, TypeDefinition,
    TypeKind,
};

/// The merged, inheritance-resolved view of one type.
#[derive(Debug, Clone)]
pub struct FlattenedView {
    pub name: QualifiedName,
    pub kind: TypeKind,
    /// Ancestry, self first, root last.
    pub chain: Vec<QualifiedName>,
    pub properties: IndexMap<String, Schema>,
    pub attributes: IndexMap<String, Schema>,
    pub capabilities: IndexMap<String, CapabilityDef>,
    pub requirements: Vec<RequirementDef>,
    pub interfaces: IndexMap<String, InterfaceDef>,
    pub artifacts: IndexMap<String, ArtifactDef>,
    pub valid_target_types: Vec<QualifiedName>,
    pub targets: Vec<QualifiedName>,
    pub members: Vec<QualifiedName>,
}

impl FlattenedView {
    /// Whether this view's chain passes through `ancestor`.
    pub fn derives_from(&self, ancestor: &str) -> bool {
        self.chain.iter().any(|t| t.as_str() == ancestor)
    }

    /// Build the view for the chain `root .. self` (root first). The
    /// `derives` callback answers subtype questions for narrowing checks;
    /// violations of the override rules land in `errors`.
    pub fn build(
        chain_root_first: &[&TypeDefinition],
        derives: &dyn Fn(&str, &str) -> bool,
        errors: &mut Vec<String>,
    ) -> FlattenedView {
        let this = *chain_root_first.last().expect("chain is never empty");
        let mut view = FlattenedView {
            name: this.name.clone(),
            kind: this.kind,
            chain: chain_root_first
                .iter()
                .rev()
                .map(|t| t.name.clone())
                .collect(),
            properties: IndexMap::new(),
            attributes: IndexMap::new(),
            capabilities: IndexMap::new(),
            requirements: Vec::new(),
            interfaces: IndexMap::new(),
            artifacts: IndexMap::new(),
            valid_target_types: Vec::new(),
            targets: Vec::new(),
            members: Vec::new(),
        };
        for def in chain_root_first.iter().copied() {
            merge_schemas(&mut view.properties, &def.properties, def, derives, errors, "property");
            merge_schemas(&mut view.attributes, &def.attributes, def, derives, errors, "attribute");
            merge_capabilities(&mut view.capabilities, &def.capabilities, def, derives, errors);
            merge_requirements(&mut view.requirements, &def.requirements, def, derives, errors);
            for (name, iface) in &def.interfaces {
                let merged = match view.interfaces.get(name) {
                    Some(existing) => existing.merged_with(iface),
                    None => iface.clone(),
                };
                view.interfaces.insert(name.clone(), merged);
            }
            for (name, artifact) in &def.artifacts {
                view.artifacts.insert(name.clone(), artifact.clone());
            }
            for target in &def.valid_target_types {
                if !view.valid_target_types.contains(target) {
                    view.valid_target_types.push(target.clone());
                }
            }
            if !def.targets.is_empty() {
                view.targets = def.targets.clone();
            }
            if !def.members.is_empty() {
                view.members = def.members.clone();
            }
        }
        view
    }
}

fn merge_schemas(
    merged: &mut IndexMap<String, Schema>,
    child: &IndexMap<String, Schema>,
    owner: &TypeDefinition,
    derives: &dyn Fn(&str, &str) -> bool,
    errors: &mut Vec<String>,
    what: &str,
) {
    for (name, schema) in child {
        match merged.get(name) {
            None => {
                merged.insert(name.clone(), schema.clone());
            }
            Some(parent) => {
                let mut refined = schema.clone();
                // Narrowing the type is only allowed toward a subtype.
                if refined.type_name != parent.type_name
                    && !derives(&refined.type_name, &parent.type_name)
                {
                    errors.push(format!(
                        "{} \"{}\" of \"{}\" cannot change type from \"{}\" to \"{}\"",
                        what, name, owner.name, parent.type_name, refined.type_name
                    ));
                    refined.type_name = parent.type_name.clone();
                }
                if parent.required && !refined.required {
                    errors.push(format!(
                        "{} \"{}\" of \"{}\" cannot relax \"required\"",
                        what, name, owner.name
                    ));
                    refined.required = true;
                }
                // Constraints compose as AND along the chain.
                let mut constraints = parent.constraints.clone();
                for c in refined.constraints {
                    if !constraints.contains(&c) {
                        constraints.push(c);
                    }
                }
                refined.constraints = constraints;
                if refined.default.is_none() {
                    refined.default = parent.default.clone();
                }
                if refined.description.is_none() {
                    refined.description = parent.description.clone();
                }
                merged.insert(name.clone(), refined);
            }
        }
    }
}

fn merge_capabilities(
    merged: &mut IndexMap<String, CapabilityDef>,
    child: &IndexMap<String, CapabilityDef>,
    owner: &TypeDefinition,
    derives: &dyn Fn(&str, &str) -> bool,
    errors: &mut Vec<String>,
) {
    for (name, cap) in child {
        match merged.get(name) {
            None => {
                merged.insert(name.clone(), cap.clone());
            }
            Some(parent) => {
                let mut refined = cap.clone();
                if refined.type_name != parent.type_name
                    && !derives(refined.type_name.as_str(), parent.type_name.as_str())
                {
                    errors.push(format!(
                        "capability \"{}\" of \"{}\" cannot change type from \"{}\" to \"{}\"",
                        name, owner.name, parent.type_name, refined.type_name
                    ));
                    refined.type_name = parent.type_name.clone();
                }
                if !refined.occurrences.within(&parent.occurrences) {
                    errors.push(format!(
                        "capability \"{}\" of \"{}\" cannot widen occurrences {} beyond {}",
                        name, owner.name, refined.occurrences, parent.occurrences
                    ));
                    refined.occurrences = parent.occurrences;
                }
                // valid_source_types may only be extended, never removed.
                let mut sources = parent.valid_source_types.clone();
                for s in refined.valid_source_types {
                    if !sources.contains(&s) {
                        sources.push(s);
                    }
                }
                refined.valid_source_types = sources;
                if refined.properties.is_empty() {
                    refined.properties = parent.properties.clone();
                } else {
                    let mut props = parent.properties.clone();
                    for (k, v) in refined.properties {
                        props.insert(k, v);
                    }
                    refined.properties = props;
                }
                merged.insert(name.clone(), refined);
            }
        }
    }
}

fn merge_requirements(
    merged: &mut Vec<RequirementDef>,
    child: &[RequirementDef],
    owner: &TypeDefinition,
    derives: &dyn Fn(&str, &str) -> bool,
    errors: &mut Vec<String>,
) {
    // Requirements are addressed by name *and position*: a child entry
    // refines the next not-yet-refined parent slot with the same name, and
    // appends a new slot otherwise.
    let mut refined_upto: IndexMap<String, usize> = IndexMap::new();
    for req in child {
        let start = refined_upto.get(&req.name).copied().unwrap_or(0);
        let slot = merged
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, r)| r.name == req.name)
            .map(|(i, _)| i);
        match slot {
            Some(i) => {
                refine_requirement(&mut merged[i], req, owner, derives, errors);
                refined_upto.insert(req.name.clone(), i + 1);
            }
            None => {
                merged.push(req.clone());
                refined_upto.insert(req.name.clone(), merged.len());
            }
        }
    }
}

fn refine_requirement(
    slot: &mut RequirementDef,
    child: &RequirementDef,
    owner: &TypeDefinition,
    derives: &dyn Fn(&str, &str) -> bool,
    errors: &mut Vec<String>,
) {
    if let Some(cap) = &child.capability {
        match &slot.capability {
            Some(parent_cap)
                if parent_cap != cap && !derives(cap.as_str(), parent_cap.as_str()) =>
            {
                errors.push(format!(
                    "requirement \"{}\" of \"{}\" cannot widen capability from \"{}\" to \"{}\"",
                    slot.name, owner.name, parent_cap, cap
                ));
            }
            _ => slot.capability = Some(cap.clone()),
        }
    }
    if let Some(node) = &child.node {
        match &slot.node {
            Some(parent_node)
                if parent_node != node && !derives(node.as_str(), parent_node.as_str()) =>
            {
                errors.push(format!(
                    "requirement \"{}\" of \"{}\" cannot widen node from \"{}\" to \"{}\"",
                    slot.name, owner.name, parent_node, node
                ));
            }
            _ => slot.node = Some(node.clone()),
        }
    }
    if child.relationship.is_some() {
        slot.relationship = child.relationship.clone();
    }
    if child.node_filter.is_some() {
        slot.node_filter = child.node_filter.clone();
    }
    if child.occurrences != crate::types::definition::Occurrences::required_once() {
        slot.occurrences = child.occurrences;
    }
    for (k, v) in &child.metadata {
        slot.metadata.insert(k.clone(), v.clone());
    }
    if child.description.is_some() {
        slot.description = child.description.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn node_type(name: &str, body: &str) -> TypeDefinition {
        let mut errors = Vec::new();
        let def = TypeDefinition::parse(
            TypeKind::Node,
            name,
            &Value::parse_str(body).unwrap(),
            None,
            &mut errors,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        def
    }

    fn no_derives(_: &str, _: &str) -> bool {
        false
    }

    #[test]
    fn test_property_inheritance_and_override() {
        let base = node_type(
            "base.Node",
            "properties:\n  port:\n    type: integer\n    default: 80\n  name:\n    type: string",
        );
        let child = node_type(
            "child.Node",
            "derived_from: base.Node\nproperties:\n  port:\n    type: integer\n    default: 8080",
        );
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &no_derives, &mut errors);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(view.properties["port"].default, Some(Value::Integer(8080)));
        assert!(view.properties.contains_key("name"));
    }

    #[test]
    fn test_required_cannot_relax() {
        let base = node_type("base.Node", "properties:\n  name:\n    type: string");
        let child = node_type(
            "child.Node",
            "derived_from: base.Node\nproperties:\n  name:\n    type: string\n    required: false",
        );
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &no_derives, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(view.properties["name"].required);
    }

    #[test]
    fn test_constraints_compose() {
        let base = node_type(
            "base.Node",
            "properties:\n  n:\n    type: integer\n    constraints:\n      - greater_or_equal: 1",
        );
        let child = node_type(
            "child.Node",
            "derived_from: base.Node\nproperties:\n  n:\n    type: integer\n    constraints:\n      - less_or_equal: 10",
        );
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &no_derives, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(view.properties["n"].constraints.len(), 2);
    }

    #[test]
    fn test_type_narrowing_requires_derivation() {
        let base = node_type("base.Node", "properties:\n  n:\n    type: integer");
        let child = node_type(
            "child.Node",
            "derived_from: base.Node\nproperties:\n  n:\n    type: string",
        );
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &no_derives, &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(view.properties["n"].type_name, "integer");
    }

    #[test]
    fn test_requirement_position_merge() {
        let base = node_type(
            "base.Node",
            "requirements:\n  - host:\n      capability: tosca.capabilities.Container\n      occurrences: [0, UNBOUNDED]",
        );
        let child = node_type(
            "child.Node",
            "requirements:\n  - host:\n      capability: tosca.capabilities.Compute\n  - peer:\n      capability: tosca.capabilities.Endpoint",
        );
        let derives =
            |sub: &str, sup: &str| sub == "tosca.capabilities.Compute" && sup == "tosca.capabilities.Container";
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &derives, &mut errors);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(view.requirements.len(), 2);
        assert_eq!(
            view.requirements[0].capability.as_ref().unwrap().as_str(),
            "tosca.capabilities.Compute"
        );
        // Parent's explicit occurrences survive an un-annotated refinement.
        assert_eq!(view.requirements[0].occurrences.min, 0);
        assert_eq!(view.requirements[1].name, "peer");
    }

    #[test]
    fn test_capability_occurrence_tightening() {
        let base = node_type(
            "base.Node",
            "capabilities:\n  host:\n    type: tosca.capabilities.Container\n    occurrences: [1, 4]",
        );
        let child = node_type(
            "child.Node",
            "capabilities:\n  host:\n    type: tosca.capabilities.Container\n    occurrences: [1, UNBOUNDED]",
        );
        let mut errors = Vec::new();
        let view = FlattenedView::build(&[&base, &child], &no_derives, &mut errors);
        assert_eq!(errors.len(), 1, "widening must be rejected");
        assert_eq!(view.capabilities["host"].occurrences.max, Some(4));
    }
}
