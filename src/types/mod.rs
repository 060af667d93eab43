//! The type registry
//!
//! Owns every [`TypeDefinition`] for one parse: normative tables seeded per
//! `tosca_definitions_version`, user types registered from the import
//! graph, derivation chains resolved and [`FlattenedView`]s computed. The
//! registry is mutable only between the imports-resolved and
//! types-flattened stages; afterwards it is frozen and safe to share.

pub mod builtin;
pub mod definition;
pub mod flattened;

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

pub use builtin::ProfileExtension;
pub use definition::{
    ArtifactDef, CapabilityDef, Implementation, InterfaceDef, Occurrences, OperationDef,
    QualifiedName, RequirementDef, TypeDefinition, TypeKind,
};
pub use flattened::FlattenedView;

use crate::constraints::{self, DataTypeResolver, Schema};
use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation, ToscaError};
use crate::value::Value;
use crate::version::ToscaVersion;

/// A secondary name for an existing type.
#[derive(Debug, Clone)]
struct AliasEntry {
    target: QualifiedName,
    deprecated: bool,
}

#[derive(Debug)]
pub struct TypeRegistry {
    version: ToscaVersion,
    extensions: Vec<ProfileExtension>,
    types: IndexMap<QualifiedName, TypeDefinition>,
    aliases: HashMap<String, AliasEntry>,
    flattened: HashMap<QualifiedName, Arc<FlattenedView>>,
    frozen: bool,
}

impl TypeRegistry {
    /// Create a registry for a version selector, seeding the normative
    /// tables. Unknown selectors fail with `UnsupportedVersionError`.
    pub fn new(selector: &str, extensions: Vec<ProfileExtension>) -> Result<TypeRegistry, ToscaError> {
        let registered: Vec<String> = extensions.iter().map(|e| e.version.clone()).collect();
        let version = ToscaVersion::resolve(selector, &registered).ok_or_else(|| {
            let mut valid: Vec<&str> = crate::version::MAIN_TEMPLATE_VERSIONS.to_vec();
            valid.extend(registered.iter().map(String::as_str));
            ToscaError::UnsupportedVersion {
                version: selector.to_string(),
                valid: valid.join(", "),
            }
        })?;
        let mut registry = TypeRegistry {
            version,
            extensions,
            types: IndexMap::new(),
            aliases: HashMap::new(),
            flattened: HashMap::new(),
            frozen: false,
        };
        registry.seed_normative();
        Ok(registry)
    }

    pub fn version(&self) -> &ToscaVersion {
        &self.version
    }

    /// Extra top-level sections permitted by a registered extension version.
    pub fn extra_template_sections(&self) -> &[String] {
        builtin::extra_sections(&self.version, &self.extensions)
    }

    fn seed_normative(&mut self) {
        let table = builtin::normative_table(&self.version, &self.extensions);
        let mut errors = Vec::new();
        for (section, entries) in &table {
            let Some(kind) = TypeKind::from_section(section) else {
                continue;
            };
            for (name, body) in entries {
                let def = TypeDefinition::parse(kind, name, body, None, &mut errors);
                self.insert(def);
            }
        }
        debug_assert!(errors.is_empty(), "normative tables must be clean: {:?}", errors);
    }

    fn insert(&mut self, def: TypeDefinition) {
        if def.is_alias() {
            if let Some(target) = &def.parent {
                self.aliases.insert(
                    def.name.0.clone(),
                    AliasEntry {
                        target: target.clone(),
                        deprecated: def.is_deprecated(),
                    },
                );
                return;
            }
        }
        self.aliases.remove(&def.name.0);
        self.types.insert(def.name.clone(), def);
    }

    /// Register every `*_types` section of a document. `prefix` is the
    /// import's namespace prefix, applied to each exported type name.
    pub fn register_document(
        &mut self,
        tree: &Value,
        source: Option<&str>,
        prefix: Option<&str>,
        sink: &mut DiagnosticSink,
    ) {
        assert!(!self.frozen, "registry is frozen");
        let Some(map) = tree.as_map() else { return };
        for (section, entries) in map {
            let Some(kind) = TypeKind::from_section(section) else {
                continue;
            };
            let Some(entries) = entries.as_map() else {
                sink.error(
                    DiagnosticKind::SchemaError,
                    format!("\"{}\" must be a map of type definitions", section),
                    location(source, section),
                );
                continue;
            };
            for (name, body) in entries {
                let full_name = match prefix {
                    Some(p) => format!("{}.{}", p, name),
                    None => name.clone(),
                };
                let loc = location(source, &format!("{}/{}", section, name));
                let mut errors = Vec::new();
                let def = TypeDefinition::parse(kind, &full_name, body, source, &mut errors);
                for e in errors {
                    sink.error(DiagnosticKind::SchemaError, e, loc.clone());
                }
                let duplicate = self.types.contains_key(&def.name)
                    || self.aliases.contains_key(&def.name.0);
                if duplicate && !def.is_alias() {
                    sink.error(
                        DiagnosticKind::DuplicateTypeError,
                        format!("type \"{}\" is already defined", def.name),
                        loc,
                    );
                    continue;
                }
                tracing::debug!(name = %def.name, kind = %def.kind, "registered type");
                self.insert(def);
            }
        }
    }

    /// Expand the `tosca:Name` shorthand and follow alias entries to the
    /// canonical name. Returns None when nothing is registered under any
    /// spelling.
    pub fn resolve_name(&self, reference: &str, kind: TypeKind) -> Option<QualifiedName> {
        let expanded: String = match reference.strip_prefix("tosca:") {
            Some(short) => format!("{}{}", kind.tosca_prefix(), short),
            None => reference.to_string(),
        };
        if let Some(alias) = self.aliases.get(&expanded) {
            return Some(alias.target.clone());
        }
        let name = QualifiedName::new(expanded);
        self.types.contains_key(&name).then_some(name)
    }

    /// Whether `reference` is an alias entry, and whether that alias is
    /// marked deprecated.
    pub fn alias_info(&self, reference: &str) -> Option<(QualifiedName, bool)> {
        self.aliases
            .get(reference)
            .map(|a| (a.target.clone(), a.deprecated))
    }

    pub fn get(&self, name: &QualifiedName) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    /// Look a type up by reference, resolving shorthand and aliases.
    pub fn lookup(&self, reference: &str, kind: TypeKind) -> Option<&TypeDefinition> {
        let name = self.resolve_name(reference, kind)?;
        self.types.get(&name)
    }

    /// The parent a definition effectively derives from: explicit
    /// `derived_from`, else the kind's implicit root.
    fn effective_parent(&self, def: &TypeDefinition) -> Option<QualifiedName> {
        if let Some(parent) = &def.parent {
            // Parents resolve through aliases too.
            return Some(
                self.aliases
                    .get(&parent.0)
                    .map(|a| a.target.clone())
                    .unwrap_or_else(|| parent.clone()),
            );
        }
        match def.kind.implicit_root() {
            Some(root) if def.name.as_str() != root => Some(QualifiedName::new(root)),
            _ => None,
        }
    }

    /// Resolve derivation chains and compute every flattened view. Cycles
    /// are fatal; unknown parents and override violations are diagnostics.
    pub fn flatten_all(&mut self, sink: &mut DiagnosticSink) -> Result<(), ToscaError> {
        assert!(!self.frozen, "registry is frozen");
        let mut chains: HashMap<QualifiedName, Vec<QualifiedName>> = HashMap::new();
        for name in self.types.keys() {
            let mut chain = vec![name.clone()];
            let mut cursor = name.clone();
            loop {
                let def = match self.types.get(&cursor) {
                    Some(d) => d,
                    None => break,
                };
                match self.effective_parent(def) {
                    None => break,
                    Some(parent) => {
                        if chain.contains(&parent) {
                            return Err(ToscaError::TypeCycle {
                                type_name: parent.0.clone(),
                            });
                        }
                        if !self.types.contains_key(&parent)
                            && !constraints::is_primitive_type(parent.as_str())
                        {
                            sink.error(
                                DiagnosticKind::UnknownTypeError,
                                format!(
                                    "type \"{}\" derives from unknown type \"{}\"",
                                    def.name, parent
                                ),
                                location(def.source.as_deref(), def.name.as_str()),
                            );
                            break;
                        }
                        chain.push(parent.clone());
                        cursor = parent;
                    }
                }
            }
            chains.insert(name.clone(), chain);
        }

        let derives = |sub: &str, ancestor: &str| -> bool {
            sub == ancestor
                || chains
                    .get(&QualifiedName::new(sub))
                    .is_some_and(|chain| chain.iter().any(|t| t.as_str() == ancestor))
        };

        let mut views = HashMap::new();
        for (name, chain) in &chains {
            let defs: Vec<&TypeDefinition> = chain
                .iter()
                .rev()
                .filter_map(|n| self.types.get(n))
                .collect();
            let mut errors = Vec::new();
            let view = FlattenedView::build(&defs, &derives, &mut errors);
            let def = &self.types[name];
            for e in errors {
                sink.error(
                    DiagnosticKind::IncompatibleDerivationError,
                    e,
                    location(def.source.as_deref(), name.as_str()),
                );
            }
            views.insert(name.clone(), Arc::new(view));
        }
        self.flattened = views;
        self.frozen = true;
        tracing::debug!(types = self.types.len(), "type registry flattened and frozen");
        Ok(())
    }

    /// The flattened view of a type, by reference (shorthand and aliases
    /// allowed). Only available after [`TypeRegistry::flatten_all`].
    pub fn flattened(&self, reference: &str, kind: TypeKind) -> Option<Arc<FlattenedView>> {
        let name = self.resolve_name(reference, kind)?;
        self.flattened.get(&name).cloned()
    }

    /// Subtype test over resolved names. Primitive names only equal
    /// themselves.
    pub fn is_derived_from(&self, sub: &str, ancestor: &str) -> bool {
        if sub == ancestor {
            return true;
        }
        let resolved_sub = self
            .aliases
            .get(sub)
            .map(|a| a.target.0.clone())
            .unwrap_or_else(|| sub.to_string());
        let resolved_ancestor = self
            .aliases
            .get(ancestor)
            .map(|a| a.target.0.clone())
            .unwrap_or_else(|| ancestor.to_string());
        if resolved_sub == resolved_ancestor {
            return true;
        }
        self.flattened
            .get(&QualifiedName::new(resolved_sub))
            .is_some_and(|view| view.derives_from(&resolved_ancestor))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Iterate registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }
}

impl DataTypeResolver for TypeRegistry {
    fn data_type_schema(&self, type_name: &str) -> Option<IndexMap<String, Schema>> {
        let view = self.flattened(type_name, TypeKind::Data)?;
        if view.kind != TypeKind::Data {
            return None;
        }
        Some(view.properties.clone())
    }

    fn type_derives_from(&self, type_name: &str, ancestor: &str) -> bool {
        self.is_derived_from(type_name, ancestor)
    }
}

fn location(source: Option<&str>, path: &str) -> SourceLocation {
    match source {
        Some(file) => SourceLocation::in_file(file, path),
        None => SourceLocation::at_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(version: &str) -> TypeRegistry {
        let mut reg = TypeRegistry::new(version, Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        reg.flatten_all(&mut sink).unwrap();
        assert!(!sink.has_errors(), "{:?}", sink.into_sorted());
        reg
    }

    #[test]
    fn test_unsupported_version() {
        let err = TypeRegistry::new("tosca_simple_yaml_9_9", Vec::new()).unwrap_err();
        assert!(matches!(err, ToscaError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_normative_flattening() {
        let reg = registry("tosca_simple_yaml_1_0");
        let dbms = reg.flattened("tosca.nodes.DBMS", TypeKind::Node).unwrap();
        // Inherited through SoftwareComponent and Root.
        assert!(dbms.properties.contains_key("component_version"));
        assert!(dbms.capabilities.contains_key("feature"));
        // The host requirement comes from SoftwareComponent.
        assert!(dbms.requirements.iter().any(|r| r.name == "host"));
        assert!(reg.is_derived_from("tosca.nodes.DBMS", "tosca.nodes.SoftwareComponent"));
        assert!(!reg.is_derived_from("tosca.nodes.Compute", "tosca.nodes.DBMS"));
    }

    #[test]
    fn test_tosca_shorthand() {
        let reg = registry("tosca_simple_yaml_1_0");
        assert_eq!(
            reg.resolve_name("tosca:Compute", TypeKind::Node).unwrap().as_str(),
            "tosca.nodes.Compute"
        );
    }

    #[test]
    fn test_1_3_storage_alias() {
        let reg = registry("tosca_simple_yaml_1_3");
        let resolved = reg.resolve_name("tosca.nodes.BlockStorage", TypeKind::Node).unwrap();
        assert_eq!(resolved.as_str(), "tosca.nodes.Storage.BlockStorage");
        let (target, deprecated) = reg.alias_info("tosca.nodes.BlockStorage").unwrap();
        assert_eq!(target.as_str(), "tosca.nodes.Storage.BlockStorage");
        assert!(deprecated);
    }

    #[test]
    fn test_user_type_registration_and_duplicates() {
        let mut reg = TypeRegistry::new("tosca_simple_yaml_1_0", Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        let doc = Value::parse_str(
            "node_types:\n  example.App:\n    derived_from: tosca.nodes.SoftwareComponent",
        )
        .unwrap();
        reg.register_document(&doc, Some("app.yaml"), None, &mut sink);
        assert!(!sink.has_errors());
        reg.register_document(&doc, Some("app2.yaml"), None, &mut sink);
        assert_eq!(sink.error_count(), 1);
        let dup = sink.iter().next().unwrap();
        assert_eq!(dup.kind, DiagnosticKind::DuplicateTypeError);
    }

    #[test]
    fn test_namespace_prefix() {
        let mut reg = TypeRegistry::new("tosca_simple_yaml_1_0", Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        let doc = Value::parse_str(
            "node_types:\n  App:\n    derived_from: tosca.nodes.SoftwareComponent",
        )
        .unwrap();
        reg.register_document(&doc, Some("vendor.yaml"), Some("vendor"), &mut sink);
        reg.flatten_all(&mut sink).unwrap();
        assert!(reg.lookup("vendor.App", TypeKind::Node).is_some());
        assert!(reg.lookup("App", TypeKind::Node).is_none());
    }

    #[test]
    fn test_cycle_is_fatal() {
        let mut reg = TypeRegistry::new("tosca_simple_yaml_1_0", Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        let doc = Value::parse_str(
            "node_types:\n  a.A:\n    derived_from: b.B\n  b.B:\n    derived_from: a.A",
        )
        .unwrap();
        reg.register_document(&doc, None, None, &mut sink);
        let err = reg.flatten_all(&mut sink).unwrap_err();
        assert!(matches!(err, ToscaError::TypeCycle { .. }));
    }

    #[test]
    fn test_missing_derived_from_defaults_to_root() {
        let mut reg = TypeRegistry::new("tosca_simple_yaml_1_0", Vec::new()).unwrap();
        let mut sink = DiagnosticSink::new();
        let doc = Value::parse_str("node_types:\n  example.Bare: {}").unwrap();
        reg.register_document(&doc, None, None, &mut sink);
        reg.flatten_all(&mut sink).unwrap();
        let view = reg.flattened("example.Bare", TypeKind::Node).unwrap();
        assert!(view.derives_from("tosca.nodes.Root"));
        assert!(view.capabilities.contains_key("feature"));
    }

    #[test]
    fn test_data_type_resolver() {
        let reg = registry("tosca_simple_yaml_1_0");
        let fields = reg.data_type_schema("tosca.datatypes.network.PortDef").unwrap();
        assert!(fields.contains_key("port"));
        assert!(reg.data_type_schema("tosca.nodes.Compute").is_none());
    }
}
