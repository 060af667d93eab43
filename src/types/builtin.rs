//! Built-in normative type tables and profile extensions
//!
//! Each supported `tosca_definitions_version` seeds the registry from an
//! embedded definitions document. 1.0 through 1.2 share a base table; 1.3
//! applies an overlay on top of it. Profile extensions (NFV, MEC, ...)
//! contribute their own definitions plus extra allowed top-level sections,
//! keyed by their version string.

use indexmap::IndexMap;

use crate::value::Value;
use crate::version::ToscaVersion;

const BASE_DEFINITIONS: &str = include_str!("data/tosca_definitions_1_0.yaml");
const OVERLAY_1_3: &str = include_str!("data/tosca_definitions_1_3.yaml");

/// A registered profile extension: its version selector string, its type
/// definitions (a YAML document with `*_types` sections) and any extra
/// top-level template sections it permits.
#[derive(Debug, Clone)]
pub struct ProfileExtension {
    pub version: String,
    pub definitions: String,
    pub extra_sections: Vec<String>,
}

impl ProfileExtension {
    pub fn new(version: impl Into<String>, definitions: impl Into<String>) -> Self {
        ProfileExtension {
            version: version.into(),
            definitions: definitions.into(),
            extra_sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.extra_sections.push(section.into());
        self
    }
}

/// Section name -> type name -> definition body, for one definitions table.
pub type DefinitionTable = IndexMap<String, IndexMap<String, Value>>;

fn parse_table(text: &str) -> DefinitionTable {
    let doc = Value::parse_str(text).expect("embedded definitions must parse");
    let mut table = DefinitionTable::new();
    if let Some(sections) = doc.as_map() {
        for (section, entries) in sections {
            if let Some(entries) = entries.as_map() {
                table.insert(section.clone(), entries.clone());
            }
        }
    }
    table
}

/// Merge `overlay` into `base`: whole type entries are replaced, new ones
/// appended, matching the original loader's section update semantics.
fn apply_overlay(base: &mut DefinitionTable, overlay: DefinitionTable) {
    for (section, entries) in overlay {
        let slot = base.entry(section).or_default();
        for (name, body) in entries {
            slot.insert(name, body);
        }
    }
}

/// The normative table for a resolved version. Extension versions build on
/// the newest Simple Profile table and then apply their own definitions.
pub fn normative_table(
    version: &ToscaVersion,
    extensions: &[ProfileExtension],
) -> DefinitionTable {
    let mut table = parse_table(BASE_DEFINITIONS);
    match version {
        ToscaVersion::Simple1_0 | ToscaVersion::Simple1_1 | ToscaVersion::Simple1_2 => {}
        ToscaVersion::Simple1_3 => apply_overlay(&mut table, parse_table(OVERLAY_1_3)),
        ToscaVersion::Extension(selector) => {
            apply_overlay(&mut table, parse_table(OVERLAY_1_3));
            if let Some(ext) = extensions.iter().find(|e| &e.version == selector) {
                apply_overlay(&mut table, parse_table(&ext.definitions));
            }
        }
    }
    table
}

/// Extra template sections a version permits beyond the standard grammar.
pub fn extra_sections<'a>(
    version: &ToscaVersion,
    extensions: &'a [ProfileExtension],
) -> &'a [String] {
    if let ToscaVersion::Extension(selector) = version {
        if let Some(ext) = extensions.iter().find(|e| &e.version == selector) {
            return &ext.extra_sections;
        }
    }
    &[]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_table_parses() {
        let table = normative_table(&ToscaVersion::Simple1_0, &[]);
        assert!(table["node_types"].contains_key("tosca.nodes.Compute"));
        assert!(table["capability_types"].contains_key("tosca.capabilities.Compute"));
        assert!(table["relationship_types"].contains_key("tosca.relationships.HostedOn"));
        // 1.0 has the flat storage name and no Storage namespace.
        assert!(table["node_types"].contains_key("tosca.nodes.BlockStorage"));
        assert!(!table["node_types"].contains_key("tosca.nodes.Storage.BlockStorage"));
    }

    #[test]
    fn test_1_3_overlay_renames_storage() {
        let table = normative_table(&ToscaVersion::Simple1_3, &[]);
        assert!(table["node_types"].contains_key("tosca.nodes.Storage.BlockStorage"));
        let alias = &table["node_types"]["tosca.nodes.BlockStorage"];
        assert_eq!(
            alias.get("metadata").and_then(|m| m.get("alias")),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_extension_table() {
        let ext = ProfileExtension::new(
            "tosca_simple_profile_for_nfv_1_0_0",
            "node_types:\n  tosca.nodes.nfv.VDU:\n    derived_from: tosca.nodes.Compute\n",
        )
        .with_section("nfv_metadata");
        let version = ToscaVersion::Extension("tosca_simple_profile_for_nfv_1_0_0".into());
        let table = normative_table(&version, std::slice::from_ref(&ext));
        assert!(table["node_types"].contains_key("tosca.nodes.nfv.VDU"));
        assert_eq!(extra_sections(&version, std::slice::from_ref(&ext)), ["nfv_metadata"]);
    }
}
