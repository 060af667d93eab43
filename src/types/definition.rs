//! Parsed TOSCA type definitions
//!
//! One [`TypeDefinition`] per entry in a `*_types` section, covering all
//! eight kinds. Definitions are parsed once at registration and are
//! immutable afterwards; merged views live in [`crate::types::FlattenedView`].

use std::fmt;

use indexmap::IndexMap;

use crate::constraints::{Constraint, Schema};
use crate::value::Value;

/// A dotted, case-sensitive type name such as `tosca.nodes.Compute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct QualifiedName(pub String);

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        QualifiedName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        QualifiedName(s.to_string())
    }
}

impl From<String> for QualifiedName {
    fn from(s: String) -> Self {
        QualifiedName(s)
    }
}

/// The eight kinds of TOSCA type definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TypeKind {
    Node,
    Relationship,
    Capability,
    Data,
    Interface,
    Artifact,
    Policy,
    Group,
}

impl TypeKind {
    /// The `*_types` document section this kind is declared under.
    pub fn section(&self) -> &'static str {
        match self {
            TypeKind::Node => "node_types",
            TypeKind::Relationship => "relationship_types",
            TypeKind::Capability => "capability_types",
            TypeKind::Data => "data_types",
            TypeKind::Interface => "interface_types",
            TypeKind::Artifact => "artifact_types",
            TypeKind::Policy => "policy_types",
            TypeKind::Group => "group_types",
        }
    }

    pub fn from_section(section: &str) -> Option<TypeKind> {
        match section {
            "node_types" => Some(TypeKind::Node),
            "relationship_types" => Some(TypeKind::Relationship),
            "capability_types" => Some(TypeKind::Capability),
            "data_types" => Some(TypeKind::Data),
            "interface_types" => Some(TypeKind::Interface),
            "artifact_types" => Some(TypeKind::Artifact),
            "policy_types" => Some(TypeKind::Policy),
            "group_types" => Some(TypeKind::Group),
            _ => None,
        }
    }

    /// Namespace prefix used to expand the `tosca:Name` shorthand.
    pub fn tosca_prefix(&self) -> &'static str {
        match self {
            TypeKind::Node => "tosca.nodes.",
            TypeKind::Relationship => "tosca.relationships.",
            TypeKind::Capability => "tosca.capabilities.",
            TypeKind::Data => "tosca.datatypes.",
            TypeKind::Interface => "tosca.interfaces.",
            TypeKind::Artifact => "tosca.artifacts.",
            TypeKind::Policy => "tosca.policies.",
            TypeKind::Group => "tosca.groups.",
        }
    }

    /// Root type a definition of this kind implicitly derives from when it
    /// has no `derived_from`.
    pub fn implicit_root(&self) -> Option<&'static str> {
        match self {
            TypeKind::Node => Some("tosca.nodes.Root"),
            TypeKind::Relationship => Some("tosca.relationships.Root"),
            TypeKind::Capability => Some("tosca.capabilities.Root"),
            TypeKind::Data => Some("tosca.datatypes.Root"),
            TypeKind::Interface => None,
            TypeKind::Artifact => Some("tosca.artifacts.Root"),
            TypeKind::Policy => Some("tosca.policies.Root"),
            TypeKind::Group => Some("tosca.groups.Root"),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Node => "node",
            TypeKind::Relationship => "relationship",
            TypeKind::Capability => "capability",
            TypeKind::Data => "data",
            TypeKind::Interface => "interface",
            TypeKind::Artifact => "artifact",
            TypeKind::Policy => "policy",
            TypeKind::Group => "group",
        };
        f.write_str(name)
    }
}

/// Multiplicity range on capabilities and requirements. `max == None`
/// means UNBOUNDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Occurrences {
    pub min: u32,
    pub max: Option<u32>,
}

impl Occurrences {
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Occurrences { min, max }
    }

    /// Default for requirement definitions.
    pub const fn required_once() -> Self {
        Occurrences { min: 1, max: Some(1) }
    }

    /// Default for capability definitions.
    pub const fn at_least_once() -> Self {
        Occurrences { min: 1, max: None }
    }

    pub fn contains(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    /// Whether this range fits entirely inside `outer`.
    pub fn within(&self, outer: &Occurrences) -> bool {
        self.min >= outer.min
            && match (self.max, outer.max) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(inner), Some(outer)) => inner <= outer,
            }
    }

    /// Parse `[min, max]` where max may be the string UNBOUNDED.
    pub fn parse(raw: &Value) -> Result<Occurrences, String> {
        let items = raw
            .as_list()
            .filter(|l| l.len() == 2)
            .ok_or_else(|| format!("occurrences {} is not a list with 2 items", render_short(raw)))?;
        let min = items[0]
            .as_i64()
            .filter(|n| *n >= 0)
            .ok_or_else(|| "occurrences lower bound must be a non-negative integer".to_string())?
            as u32;
        let max = match &items[1] {
            Value::String(s) if s == "UNBOUNDED" => None,
            v => Some(
                v.as_i64()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| "occurrences upper bound must be an integer or UNBOUNDED".to_string())?
                    as u32,
            ),
        };
        if let Some(max) = max {
            if max == 0 || min > max {
                return Err(format!("occurrences [{}, {}] is an invalid range", min, max));
            }
        }
        Ok(Occurrences { min, max })
    }
}

impl fmt::Display for Occurrences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, UNBOUNDED]", self.min),
        }
    }
}

fn render_short(v: &Value) -> String {
    v.canonical_string()
}

/// A capability slot declared by a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDef {
    pub name: String,
    pub type_name: QualifiedName,
    pub description: Option<String>,
    pub properties: IndexMap<String, Schema>,
    pub attributes: IndexMap<String, Schema>,
    pub valid_source_types: Vec<QualifiedName>,
    pub occurrences: Occurrences,
}

const CAPABILITY_KEYS: &[&str] = &[
    "type",
    "description",
    "properties",
    "attributes",
    "valid_source_types",
    "occurrences",
];

impl CapabilityDef {
    pub fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> CapabilityDef {
        let mut def = CapabilityDef {
            name: name.to_string(),
            type_name: QualifiedName::new(""),
            description: None,
            properties: IndexMap::new(),
            attributes: IndexMap::new(),
            valid_source_types: Vec::new(),
            occurrences: Occurrences::at_least_once(),
        };
        // Shorthand: `host: tosca.capabilities.Compute`
        if let Some(type_name) = body.as_str() {
            def.type_name = QualifiedName::new(type_name);
            return def;
        }
        let map = match body.as_map() {
            Some(m) => m,
            None => {
                errors.push(format!(
                    "capability \"{}\" must be a type name or a map",
                    name
                ));
                return def;
            }
        };
        for key in map.keys() {
            if !CAPABILITY_KEYS.contains(&key.as_str()) {
                errors.push(format!(
                    "capability \"{}\" contains unknown field \"{}\"",
                    name, key
                ));
            }
        }
        match map.get("type").and_then(Value::as_str) {
            Some(t) => def.type_name = QualifiedName::new(t),
            None => errors.push(format!("capability \"{}\" is missing required field \"type\"", name)),
        }
        def.description = map.get("description").and_then(Value::as_str).map(String::from);
        def.properties = parse_schema_map(name, map.get("properties"), errors);
        def.attributes = parse_schema_map(name, map.get("attributes"), errors);
        if let Some(sources) = map.get("valid_source_types") {
            match sources.as_list() {
                Some(list) => {
                    def.valid_source_types = list
                        .iter()
                        .filter_map(|v| v.as_str().map(QualifiedName::from))
                        .collect()
                }
                None => errors.push(format!(
                    "\"valid_source_types\" of capability \"{}\" must be a list",
                    name
                )),
            }
        }
        if let Some(raw) = map.get("occurrences") {
            match Occurrences::parse(raw) {
                Ok(o) => def.occurrences = o,
                Err(e) => errors.push(format!("capability \"{}\": {}", name, e)),
            }
        }
        def
    }
}

/// One (ordered) requirement slot declared by a node type. Duplicate names
/// along a list are distinct positions.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementDef {
    pub name: String,
    pub capability: Option<QualifiedName>,
    pub node: Option<QualifiedName>,
    /// Relationship type name, or an inline map carrying `type` plus
    /// interface refinements. Normalized so a map always has `type`.
    pub relationship: Option<Value>,
    pub occurrences: Occurrences,
    /// Raw node_filter tree; validated and matched by the elaborator.
    pub node_filter: Option<Value>,
    pub description: Option<String>,
    pub metadata: IndexMap<String, Value>,
}

const REQUIREMENT_KEYS: &[&str] = &[
    "capability",
    "node",
    "relationship",
    "occurrences",
    "node_filter",
    "description",
    "metadata",
    "title",
];

impl RequirementDef {
    /// Parse one requirement list entry `{ name: body }`.
    pub fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> RequirementDef {
        let mut def = RequirementDef {
            name: name.to_string(),
            capability: None,
            node: None,
            relationship: None,
            occurrences: Occurrences::required_once(),
            node_filter: None,
            description: None,
            metadata: IndexMap::new(),
        };
        // Shorthand: `host: tosca.capabilities.Compute` names the capability
        // type only (Simple Profile simple grammar).
        if let Some(cap) = body.as_str() {
            def.capability = Some(QualifiedName::new(cap));
            return def;
        }
        let map = match body.as_map() {
            Some(m) => m,
            None => {
                errors.push(format!(
                    "requirement \"{}\" must be a capability type name or a map",
                    name
                ));
                return def;
            }
        };
        for key in map.keys() {
            if !REQUIREMENT_KEYS.contains(&key.as_str()) {
                errors.push(format!(
                    "requirement \"{}\" contains unknown field \"{}\"",
                    name, key
                ));
            }
        }
        def.capability = map.get("capability").and_then(Value::as_str).map(QualifiedName::from);
        def.node = map.get("node").and_then(Value::as_str).map(QualifiedName::from);
        def.relationship = map.get("relationship").cloned();
        def.description = map.get("description").and_then(Value::as_str).map(String::from);
        def.metadata = map.get("metadata").and_then(Value::as_map).cloned().unwrap_or_default();
        def.node_filter = map.get("node_filter").cloned();
        if let Some(raw) = map.get("occurrences") {
            match Occurrences::parse(raw) {
                Ok(o) => def.occurrences = o,
                Err(e) => errors.push(format!("requirement \"{}\": {}", name, e)),
            }
        }
        def
    }

    /// The relationship type this slot defaults to.
    pub fn relationship_type(&self) -> QualifiedName {
        match &self.relationship {
            Some(Value::String(name)) => QualifiedName::new(name.clone()),
            Some(Value::Map(map)) => map
                .get("type")
                .and_then(Value::as_str)
                .map(QualifiedName::from)
                .unwrap_or_else(|| QualifiedName::new("tosca.relationships.Root")),
            _ => QualifiedName::new("tosca.relationships.Root"),
        }
    }
}

/// Operation implementation: a primary artifact plus dependencies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Implementation {
    pub primary: Option<String>,
    pub dependencies: Vec<String>,
}

impl Implementation {
    fn parse(raw: &Value, errors: &mut Vec<String>, where_: &str) -> Implementation {
        match raw {
            Value::String(s) => Implementation {
                primary: Some(s.clone()),
                dependencies: Vec::new(),
            },
            Value::Map(map) => Implementation {
                primary: map.get("primary").and_then(Value::as_str).map(String::from),
                dependencies: map
                    .get("dependencies")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
            },
            other => {
                errors.push(format!(
                    "implementation of {} must be a string or map, got {}",
                    where_,
                    other.type_name()
                ));
                Implementation::default()
            }
        }
    }
}

/// An operation declared by an interface.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationDef {
    pub description: Option<String>,
    pub implementation: Implementation,
    pub inputs: IndexMap<String, Value>,
    pub outputs: IndexMap<String, Schema>,
}

impl OperationDef {
    fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> OperationDef {
        let mut op = OperationDef::default();
        match body {
            Value::Null => {}
            // Shorthand: `create: deploy.sh`
            Value::String(file) => {
                op.implementation.primary = Some(file.clone());
            }
            Value::Map(map) => {
                op.description = map.get("description").and_then(Value::as_str).map(String::from);
                if let Some(raw) = map.get("implementation") {
                    op.implementation = Implementation::parse(raw, errors, name);
                }
                op.inputs = map.get("inputs").and_then(Value::as_map).cloned().unwrap_or_default();
                if let Some(outputs) = map.get("outputs").and_then(Value::as_map) {
                    for (out_name, out_body) in outputs {
                        op.outputs.insert(
                            out_name.clone(),
                            Schema::parse(&format!("{}.{}", name, out_name), out_body, errors),
                        );
                    }
                }
            }
            other => errors.push(format!(
                "operation \"{}\" must be a string or map, got {}",
                name,
                other.type_name()
            )),
        }
        op
    }
}

/// Keys of an interface body that are not operation names.
const INTERFACE_RESERVED: &[&str] = &[
    "type",
    "derived_from",
    "description",
    "metadata",
    "version",
    "inputs",
    "operations",
    "notifications",
];

/// An interface declared by a type or assigned on a template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterfaceDef {
    pub type_name: Option<QualifiedName>,
    pub inputs: IndexMap<String, Value>,
    pub operations: IndexMap<String, OperationDef>,
    pub notifications: IndexMap<String, OperationDef>,
}

impl InterfaceDef {
    pub fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> InterfaceDef {
        let mut def = InterfaceDef::default();
        let map = match body.as_map() {
            Some(m) => m,
            None => {
                errors.push(format!("interface \"{}\" must be a map", name));
                return def;
            }
        };
        def.type_name = map.get("type").and_then(Value::as_str).map(QualifiedName::from);
        def.inputs = map.get("inputs").and_then(Value::as_map).cloned().unwrap_or_default();
        if let Some(ops) = map.get("operations").and_then(Value::as_map) {
            for (op_name, op_body) in ops {
                def.operations
                    .insert(op_name.clone(), OperationDef::parse(op_name, op_body, errors));
            }
        }
        if let Some(ops) = map.get("notifications").and_then(Value::as_map) {
            for (op_name, op_body) in ops {
                def.notifications
                    .insert(op_name.clone(), OperationDef::parse(op_name, op_body, errors));
            }
        }
        // Pre-1.3 grammar: operations appear directly under the interface.
        for (key, op_body) in map {
            if !INTERFACE_RESERVED.contains(&key.as_str()) && !def.operations.contains_key(key) {
                def.operations
                    .insert(key.clone(), OperationDef::parse(key, op_body, errors));
            }
        }
        def
    }

    /// Merge `over` (more derived) on top of self: operations replace
    /// per-name with input union, interface inputs union with override.
    pub fn merged_with(&self, over: &InterfaceDef) -> InterfaceDef {
        let mut merged = self.clone();
        if over.type_name.is_some() {
            merged.type_name = over.type_name.clone();
        }
        for (k, v) in &over.inputs {
            merged.inputs.insert(k.clone(), v.clone());
        }
        for (name, op) in &over.operations {
            match merged.operations.get_mut(name) {
                Some(existing) => {
                    if op.implementation != Implementation::default() {
                        existing.implementation = op.implementation.clone();
                    }
                    for (k, v) in &op.inputs {
                        existing.inputs.insert(k.clone(), v.clone());
                    }
                    if !op.outputs.is_empty() {
                        existing.outputs = op.outputs.clone();
                    }
                    if op.description.is_some() {
                        existing.description = op.description.clone();
                    }
                }
                None => {
                    merged.operations.insert(name.clone(), op.clone());
                }
            }
        }
        for (name, op) in &over.notifications {
            merged.notifications.insert(name.clone(), op.clone());
        }
        merged
    }
}

/// An artifact declared by a type or template. A type-level entry without a
/// `file` declares a required artifact slot templates must fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDef {
    pub name: String,
    pub type_name: Option<QualifiedName>,
    pub file: Option<String>,
    pub repository: Option<String>,
    pub deploy_path: Option<String>,
    pub description: Option<String>,
    pub required: bool,
}

impl ArtifactDef {
    pub fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> ArtifactDef {
        let mut def = ArtifactDef {
            name: name.to_string(),
            type_name: None,
            file: None,
            repository: None,
            deploy_path: None,
            description: None,
            required: false,
        };
        match body {
            // Shorthand: `my_script: scripts/install.sh`
            Value::String(file) => def.file = Some(file.clone()),
            Value::Map(map) => {
                def.type_name = map.get("type").and_then(Value::as_str).map(QualifiedName::from);
                def.file = map.get("file").and_then(Value::as_str).map(String::from);
                def.repository = map.get("repository").and_then(Value::as_str).map(String::from);
                def.deploy_path = map.get("deploy_path").and_then(Value::as_str).map(String::from);
                def.description = map.get("description").and_then(Value::as_str).map(String::from);
                def.required = map.get("required").and_then(Value::as_bool).unwrap_or(false);
            }
            other => errors.push(format!(
                "artifact \"{}\" must be a file path or map, got {}",
                name,
                other.type_name()
            )),
        }
        def
    }

    /// True when this entry only declares that an artifact must exist.
    pub fn is_slot(&self) -> bool {
        self.file.is_none()
    }
}

/// A fully parsed type definition of any kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: QualifiedName,
    pub kind: TypeKind,
    pub parent: Option<QualifiedName>,
    pub description: Option<String>,
    pub metadata: IndexMap<String, Value>,
    pub properties: IndexMap<String, Schema>,
    pub attributes: IndexMap<String, Schema>,
    pub capabilities: IndexMap<String, CapabilityDef>,
    pub requirements: Vec<RequirementDef>,
    pub interfaces: IndexMap<String, InterfaceDef>,
    pub artifacts: IndexMap<String, ArtifactDef>,
    /// Capability types a relationship type may target.
    pub valid_target_types: Vec<QualifiedName>,
    /// Data-type level constraints (data kinds only).
    pub constraints: Vec<Constraint>,
    /// Entry/key schemas for collection-like data types.
    pub entry_schema: Option<Schema>,
    pub key_schema: Option<Schema>,
    /// Node types a policy type may be applied to.
    pub targets: Vec<QualifiedName>,
    /// Node types a group type may contain.
    pub members: Vec<QualifiedName>,
    /// File or URI this definition came from.
    pub source: Option<String>,
}

const COMMON_TYPE_KEYS: &[&str] = &["derived_from", "version", "metadata", "description"];

fn allowed_keys(kind: TypeKind) -> &'static [&'static str] {
    match kind {
        TypeKind::Node => &[
            "properties",
            "attributes",
            "capabilities",
            "requirements",
            "interfaces",
            "artifacts",
        ],
        TypeKind::Relationship => &[
            "properties",
            "attributes",
            "interfaces",
            "valid_target_types",
        ],
        TypeKind::Capability => &["properties", "attributes", "valid_source_types"],
        TypeKind::Data => &["properties", "constraints", "entry_schema", "key_schema"],
        TypeKind::Interface => &["inputs", "operations", "notifications"],
        TypeKind::Artifact => &["properties", "mime_type", "file_ext"],
        TypeKind::Policy => &["properties", "targets", "triggers"],
        TypeKind::Group => &["properties", "attributes", "members", "interfaces"],
    }
}

impl TypeDefinition {
    /// Parse one `name: body` entry from a `*_types` section.
    pub fn parse(
        kind: TypeKind,
        name: &str,
        body: &Value,
        source: Option<&str>,
        errors: &mut Vec<String>,
    ) -> TypeDefinition {
        let mut def = TypeDefinition {
            name: QualifiedName::new(name),
            kind,
            parent: None,
            description: None,
            metadata: IndexMap::new(),
            properties: IndexMap::new(),
            attributes: IndexMap::new(),
            capabilities: IndexMap::new(),
            requirements: Vec::new(),
            interfaces: IndexMap::new(),
            artifacts: IndexMap::new(),
            valid_target_types: Vec::new(),
            constraints: Vec::new(),
            entry_schema: None,
            key_schema: None,
            targets: Vec::new(),
            members: Vec::new(),
            source: source.map(String::from),
        };
        let map = match body.as_map() {
            Some(m) => m,
            None => {
                errors.push(format!("type \"{}\" must be a map", name));
                return def;
            }
        };
        // Interface types name their operations as free-form keys, so the
        // section check does not apply to them.
        if kind != TypeKind::Interface {
            for key in map.keys() {
                if !COMMON_TYPE_KEYS.contains(&key.as_str())
                    && !allowed_keys(kind).contains(&key.as_str())
                {
                    errors.push(format!(
                        "{} type \"{}\" contains unknown field \"{}\"",
                        kind, name, key
                    ));
                }
            }
        }
        match map.get("derived_from") {
            Some(Value::String(parent)) => def.parent = Some(QualifiedName::new(parent.clone())),
            // Multiple inheritance appears in the wild; the first entry wins.
            Some(Value::List(parents)) => {
                def.parent = parents.first().and_then(Value::as_str).map(QualifiedName::from)
            }
            Some(other) => errors.push(format!(
                "\"derived_from\" of \"{}\" must be a type name, got {}",
                name,
                other.type_name()
            )),
            None => {}
        }
        def.description = map.get("description").and_then(Value::as_str).map(String::from);
        def.metadata = map.get("metadata").and_then(Value::as_map).cloned().unwrap_or_default();
        def.properties = parse_schema_map(name, map.get("properties"), errors);
        def.attributes = parse_schema_map(name, map.get("attributes"), errors);

        if let Some(caps) = map.get("capabilities") {
            match caps.as_map() {
                Some(entries) => {
                    for (cap_name, cap_body) in entries {
                        def.capabilities
                            .insert(cap_name.clone(), CapabilityDef::parse(cap_name, cap_body, errors));
                    }
                }
                None => errors.push(format!("\"capabilities\" of \"{}\" must be a map", name)),
            }
        }
        if let Some(reqs) = map.get("requirements") {
            match reqs.as_list() {
                Some(entries) => {
                    for entry in entries {
                        match entry.as_map().filter(|m| m.len() == 1) {
                            Some(m) => {
                                let (req_name, req_body) = m.iter().next().expect("len checked");
                                def.requirements
                                    .push(RequirementDef::parse(req_name, req_body, errors));
                            }
                            None => errors.push(format!(
                                "bad value for requirement list item of \"{}\": {}",
                                name,
                                entry.canonical_string()
                            )),
                        }
                    }
                }
                None => errors.push(format!(
                    "\"requirements\" field of \"{}\" must be a list",
                    name
                )),
            }
        }
        if let Some(ifaces) = map.get("interfaces").and_then(Value::as_map) {
            for (iface_name, iface_body) in ifaces {
                def.interfaces
                    .insert(iface_name.clone(), InterfaceDef::parse(iface_name, iface_body, errors));
            }
        }
        if kind == TypeKind::Interface {
            // An interface type's body is itself the interface grammar.
            let iface = InterfaceDef::parse(name, body, errors);
            def.interfaces.insert(name.to_string(), iface);
        }
        if let Some(artifacts) = map.get("artifacts").and_then(Value::as_map) {
            for (a_name, a_body) in artifacts {
                def.artifacts
                    .insert(a_name.clone(), ArtifactDef::parse(a_name, a_body, errors));
            }
        }
        if let Some(targets) = map.get("valid_target_types").and_then(Value::as_list) {
            def.valid_target_types = targets
                .iter()
                .filter_map(|v| v.as_str().map(QualifiedName::from))
                .collect();
        }
        if kind == TypeKind::Data {
            if let Some(clauses) = map.get("constraints").and_then(Value::as_list) {
                for clause in clauses {
                    match Constraint::parse(name, "any", clause) {
                        Ok(c) => def.constraints.push(c),
                        Err(e) => errors.push(e),
                    }
                }
            }
            def.entry_schema = map
                .get("entry_schema")
                .map(|v| Schema::parse(&format!("{}.entry_schema", name), v, errors));
            def.key_schema = map
                .get("key_schema")
                .map(|v| Schema::parse(&format!("{}.key_schema", name), v, errors));
        }
        if let Some(targets) = map.get("targets").and_then(Value::as_list) {
            def.targets = targets
                .iter()
                .filter_map(|v| v.as_str().map(QualifiedName::from))
                .collect();
        }
        if let Some(members) = map.get("members").and_then(Value::as_list) {
            def.members = members
                .iter()
                .filter_map(|v| v.as_str().map(QualifiedName::from))
                .collect();
        }
        def
    }

    /// Whether this definition is a secondary name for another type.
    pub fn is_alias(&self) -> bool {
        self.metadata.get("alias").and_then(Value::as_bool) == Some(true)
    }

    /// Whether use of this type should produce a deprecation warning.
    pub fn is_deprecated(&self) -> bool {
        self.metadata.get("deprecated").and_then(Value::as_bool) == Some(true)
    }
}

/// Parse a `properties:`/`attributes:` map of schemas.
pub fn parse_schema_map(
    owner: &str,
    raw: Option<&Value>,
    errors: &mut Vec<String>,
) -> IndexMap<String, Schema> {
    let mut out = IndexMap::new();
    let Some(raw) = raw else { return out };
    match raw.as_map() {
        Some(entries) => {
            for (name, body) in entries {
                out.insert(
                    name.clone(),
                    Schema::parse(&format!("{}.{}", owner, name), body, errors),
                );
            }
        }
        None => errors.push(format!(
            "property definitions of \"{}\" must be a map",
            owner
        )),
    }
    out
}
