//! Parser and validator for TOSCA Simple Profile in YAML service templates
//!
//! The entry point is [`ServiceTemplate`]: feed it a file path or a parsed
//! YAML tree plus a loader for its imports, and get back a frozen
//! [`Topology`] with the full diagnostic list. Parsing never stops at the
//! first template problem; it accumulates diagnostics across stages and
//! returns as many findings as one pass can surface. Only unresolvable
//! imports, type-derivation cycles and unsupported versions abort early.
//!
//! ```no_run
//! use tosca_parser::{ParseOptions, ServiceTemplate};
//!
//! let template = ServiceTemplate::parse_file("service.yaml", ParseOptions::default())?;
//! for diagnostic in template.diagnostics() {
//!     eprintln!("{}", diagnostic);
//! }
//! for node in template.topology.node_templates.values() {
//!     println!("{} ({})", node.name, node.type_name);
//! }
//! # Ok::<(), tosca_parser::ToscaError>(())
//! ```

pub mod constraints;
pub mod error;
pub mod functions;
pub mod imports;
pub mod scalar;
pub mod substitution;
pub mod topology;
pub mod types;
pub mod value;
pub mod version;

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;

pub use crate::constraints::{Constraint, Schema};
pub use crate::error::{
    Diagnostic, DiagnosticKind, DiagnosticSink, Severity, SourceLocation, ToscaError, ToscaResult,
};
pub use crate::functions::{Evaluated, Evaluator, Scope};
pub use crate::imports::{FileLoader, ImportLoader, MapLoader};
pub use crate::scalar::{ScalarUnit, UnitFamily};
pub use crate::topology::{
    CapabilityAssignment, Group, Input, NodeTemplate, Output, Policy, RelationshipTemplate,
    RequirementBinding, Topology,
};
pub use crate::types::{ProfileExtension, QualifiedName, TypeKind, TypeRegistry};
pub use crate::value::{Value, ValueExpr};
pub use crate::version::ToscaVersion;

/// Template lifecycle stage. Every parse ends in `Validated` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Empty,
    ImportsResolved,
    TypesRegistered,
    TypesFlattened,
    TopologyElaborated,
    FunctionsBound,
    Validated,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Empty => "EMPTY",
            Stage::ImportsResolved => "IMPORTS_RESOLVED",
            Stage::TypesRegistered => "TYPES_REGISTERED",
            Stage::TypesFlattened => "TYPES_FLATTENED",
            Stage::TopologyElaborated => "TOPOLOGY_ELABORATED",
            Stage::FunctionsBound => "FUNCTIONS_BOUND",
            Stage::Validated => "VALIDATED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Caller knobs for one parse.
#[derive(Debug, Default)]
pub struct ParseOptions {
    /// Values binding the topology's `inputs`.
    pub parameters: IndexMap<String, Value>,
    /// Stop at the first error-severity diagnostic.
    pub strict: bool,
    /// Profile extensions adding versions and type tables.
    pub extensions: Vec<ProfileExtension>,
}

impl ParseOptions {
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_extension(mut self, extension: ProfileExtension) -> Self {
        self.extensions.push(extension);
        self
    }
}

/// Top-level sections of a service template document.
const TEMPLATE_SECTIONS: &[&str] = &[
    "tosca_definitions_version",
    "tosca_default_namespace",
    "metadata",
    "template_name",
    "template_author",
    "template_version",
    "description",
    "imports",
    "repositories",
    "dsl_definitions",
    "node_types",
    "relationship_types",
    "capability_types",
    "artifact_types",
    "data_types",
    "interface_types",
    "policy_types",
    "group_types",
    "topology_template",
];

/// A parsed, validated service template.
#[derive(Debug)]
pub struct ServiceTemplate {
    pub version: ToscaVersion,
    pub description: Option<String>,
    pub metadata: IndexMap<String, Value>,
    pub topology: Topology,
    pub stage: Stage,
    registry: TypeRegistry,
    diagnostics: Vec<Diagnostic>,
}

impl ServiceTemplate {
    /// Parse a template from a file, resolving imports from its directory.
    pub fn parse_file(
        path: impl AsRef<Path>,
        options: ParseOptions,
    ) -> ToscaResult<ServiceTemplate> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let tree = Value::parse_str(&text)?;
        let uri = path.to_string_lossy().into_owned();
        Self::parse_tree(tree, &uri, &FileLoader, options)
    }

    /// Parse an in-memory YAML document.
    pub fn parse_str(text: &str, options: ParseOptions) -> ToscaResult<ServiceTemplate> {
        let tree = Value::parse_str(text)?;
        Self::parse_tree(tree, "<input>", &MapLoader::new(), options)
    }

    /// Parse an already-loaded tree. `base_uri` anchors relative imports,
    /// and `loader` supplies every imported document.
    pub fn parse_tree(
        tree: Value,
        base_uri: &str,
        loader: &dyn ImportLoader,
        options: ParseOptions,
    ) -> ToscaResult<ServiceTemplate> {
        let mut sink = if options.strict {
            DiagnosticSink::strict()
        } else {
            DiagnosticSink::new()
        };
        let file = Some(base_uri);

        let Some(selector) = tree.get("tosca_definitions_version").and_then(Value::as_str)
        else {
            return Err(ToscaError::BadInput(
                "template is missing \"tosca_definitions_version\"".to_string(),
            ));
        };
        let mut registry = TypeRegistry::new(selector, options.extensions)?;

        validate_template_sections(&tree, &registry, file, &mut sink);
        let metadata = parse_metadata(&tree, file, &mut sink);
        let description = tree
            .get("description")
            .and_then(Value::as_str)
            .map(|s| s.trim_end().to_string());

        // IMPORTS_RESOLVED: pull in the whole import graph.
        let documents =
            imports::ImportResolver::new(loader).resolve(&tree, base_uri, &mut sink)?;
        tracing::debug!(count = documents.len(), "imports resolved");

        // TYPES_REGISTERED: imported documents first (post-order), then
        // the root's own sections.
        for document in &documents {
            registry.register_document(
                &document.tree,
                Some(&document.uri),
                document.prefix.as_deref(),
                &mut sink,
            );
        }
        registry.register_document(&tree, file, None, &mut sink);
        if sink.should_abort() {
            return Ok(Self::failed(registry, description, metadata, sink));
        }

        // TYPES_FLATTENED: derivation chains resolved, views memoized,
        // registry frozen.
        registry.flatten_all(&mut sink)?;
        if sink.should_abort() {
            return Ok(Self::failed(registry, description, metadata, sink));
        }

        // TOPOLOGY_ELABORATED + FUNCTIONS_BOUND.
        let topology = topology::elaborate(
            tree.get("topology_template").unwrap_or(&Value::Null),
            &registry,
            &options.parameters,
            &[],
            file,
            &mut sink,
        );

        // Nested topologies brought in by imports are validated for
        // substitution readiness against their declared node type. Inputs
        // fed by the substituted type's properties bind at substitution
        // time, not here.
        for document in &documents {
            let Some(nested_tpl) = document.tree.get("topology_template") else {
                continue;
            };
            if nested_tpl.get("substitution_mappings").is_none() {
                continue;
            }
            let deferred = substitution_fed_inputs(nested_tpl, &registry);
            topology::elaborate(
                nested_tpl,
                &registry,
                &IndexMap::new(),
                &deferred,
                Some(&document.uri),
                &mut sink,
            );
        }

        let stage = if sink.should_abort() {
            Stage::Failed
        } else {
            Stage::Validated
        };
        Ok(ServiceTemplate {
            version: registry.version().clone(),
            description,
            metadata,
            topology,
            stage,
            registry,
            diagnostics: sink.into_sorted(),
        })
    }

    fn failed(
        registry: TypeRegistry,
        description: Option<String>,
        metadata: IndexMap<String, Value>,
        sink: DiagnosticSink,
    ) -> ServiceTemplate {
        ServiceTemplate {
            version: registry.version().clone(),
            description,
            metadata,
            topology: Topology::empty(),
            stage: Stage::Failed,
            registry,
            diagnostics: sink.into_sorted(),
        }
    }

    /// All diagnostics, sorted by (file, line, column).
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Evaluate an expression against the bound inputs, with `node` as
    /// SELF.
    pub fn evaluate(&self, expr: &ValueExpr, node: Option<&str>) -> Result<Evaluated, String> {
        let scope = match node {
            Some(name) => Scope::of(name),
            None => Scope::default(),
        };
        Evaluator::new(&self.topology, &self.registry).evaluate(expr, scope)
    }

    /// Evaluate a declared output by name.
    pub fn evaluate_output(&self, name: &str) -> Result<Evaluated, String> {
        let output = self
            .topology
            .outputs
            .get(name)
            .ok_or_else(|| format!("unknown output \"{}\"", name))?;
        self.evaluate(&output.value, None)
    }
}

/// Input names of a nested topology that the substituted node type's
/// properties will supply at substitution time.
fn substitution_fed_inputs(nested_tpl: &Value, registry: &TypeRegistry) -> Vec<String> {
    let Some(mapping) = nested_tpl.get("substitution_mappings") else {
        return Vec::new();
    };
    let Some(node_type) = mapping.get("node_type").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(view) = registry.flattened(node_type, TypeKind::Node) else {
        return Vec::new();
    };
    let explicit = mapping.get("properties").and_then(Value::as_map);
    view.properties
        .keys()
        .map(|prop| {
            explicit
                .and_then(|m| m.get(prop))
                .and_then(|target| match target {
                    Value::String(s) => Some(s.clone()),
                    Value::List(items) if items.len() == 1 => {
                        items[0].as_str().map(String::from)
                    }
                    _ => None,
                })
                .unwrap_or_else(|| prop.clone())
        })
        .collect()
}

fn validate_template_sections(
    tree: &Value,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) {
    let Some(map) = tree.as_map() else {
        sink.error(
            DiagnosticKind::SchemaError,
            "service template must be a map",
            location(file, ""),
        );
        return;
    };
    let extra = registry.extra_template_sections();
    for key in map.keys() {
        if !TEMPLATE_SECTIONS.contains(&key.as_str()) && !extra.iter().any(|s| s == key) {
            sink.error(
                DiagnosticKind::UnknownFieldError,
                format!("template contains unknown field \"{}\"", key),
                location(file, key),
            );
        }
    }
}

fn parse_metadata(
    tree: &Value,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, Value> {
    let Some(raw) = tree.get("metadata") else {
        return IndexMap::new();
    };
    match raw.as_map() {
        Some(map) => {
            for (key, value) in map {
                if value.as_str().is_none() && value.as_f64().is_none() {
                    sink.error(
                        DiagnosticKind::TypeMismatchError,
                        format!("metadata entry \"{}\" must be a scalar", key),
                        location(file, "metadata"),
                    );
                }
            }
            map.clone()
        }
        None => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                "\"metadata\" must be a map",
                location(file, "metadata"),
            );
            IndexMap::new()
        }
    }
}

fn location(file: Option<&str>, path: &str) -> SourceLocation {
    match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    }
}
