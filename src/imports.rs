//! Import resolution
//!
//! The `imports:` list of a document is processed depth-first through a
//! caller-supplied [`ImportLoader`]. Each import contributes a document
//! (plus its own transitive imports) to the final namespace; a
//! `namespace_prefix` prefixes every type name the import exports.
//! Re-imports of the same `(resolved_uri, prefix)` pair are loaded once,
//! and import cycles are permitted: the second visit is a no-op.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation, ToscaError, ToscaResult};
use crate::value::Value;

/// Maps an import reference to a parsed tree plus the resolved URI used
/// for memoization and relative resolution of nested imports.
///
/// Implementations must be deterministic for a given `(reference, base)`
/// pair. Returning an error aborts elaboration with an `ImportError`;
/// timeouts and retries are the loader's own business.
pub trait ImportLoader {
    fn load(&self, reference: &str, base: &str) -> Result<(Value, String), String>;
}

/// Loads imports from the local filesystem, resolving relative references
/// against the importing document's directory.
#[derive(Debug, Default)]
pub struct FileLoader;

impl ImportLoader for FileLoader {
    fn load(&self, reference: &str, base: &str) -> Result<(Value, String), String> {
        // file: repository URLs are local paths in disguise.
        let reference = reference
            .strip_prefix("file://")
            .or_else(|| reference.strip_prefix("file:"))
            .unwrap_or(reference);
        let candidate = PathBuf::from(reference);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            let base_dir = Path::new(base)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            base_dir.join(candidate)
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read \"{}\": {}", path.display(), e))?;
        let tree = Value::parse_str(&text)
            .map_err(|e| format!("\"{}\" is not valid YAML: {}", path.display(), e))?;
        let resolved = path
            .canonicalize()
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        Ok((tree, resolved))
    }
}

/// A loader over an in-memory set of documents, used for pre-parsed input
/// and by archive openers that expose entries by name.
#[derive(Debug, Default)]
pub struct MapLoader {
    documents: IndexMap<String, Value>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<String>, tree: Value) -> &mut Self {
        self.documents.insert(uri.into(), tree);
        self
    }
}

impl ImportLoader for MapLoader {
    fn load(&self, reference: &str, _base: &str) -> Result<(Value, String), String> {
        match self.documents.get(reference) {
            Some(tree) => Ok((tree.clone(), reference.to_string())),
            None => Err(format!("no document named \"{}\"", reference)),
        }
    }
}

/// One import, fully loaded. Documents come out in post-order: an import's
/// own imports precede it, so earlier registrations win on collision.
#[derive(Debug)]
pub struct ImportedDocument {
    pub uri: String,
    pub prefix: Option<String>,
    pub tree: Value,
}

const IMPORT_KEYS: &[&str] = &["file", "repository", "namespace_uri", "namespace_prefix", "when"];

/// Drives `imports:` processing for one root document.
pub struct ImportResolver<'a> {
    loader: &'a dyn ImportLoader,
    visited: HashSet<(String, Option<String>)>,
    stack: Vec<String>,
    documents: Vec<ImportedDocument>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(loader: &'a dyn ImportLoader) -> Self {
        ImportResolver {
            loader,
            visited: HashSet::new(),
            stack: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Process the root document's import list and return every loaded
    /// document, transitively, in registration order.
    pub fn resolve(
        mut self,
        root_tree: &Value,
        root_uri: &str,
        sink: &mut DiagnosticSink,
    ) -> ToscaResult<Vec<ImportedDocument>> {
        self.stack.push(root_uri.to_string());
        self.process_document(root_tree, root_uri, None, sink)?;
        Ok(self.documents)
    }

    fn process_document(
        &mut self,
        tree: &Value,
        uri: &str,
        prefix: Option<&str>,
        sink: &mut DiagnosticSink,
    ) -> ToscaResult<()> {
        let repositories = parse_repositories(tree, uri, sink);
        let Some(imports) = tree.get("imports") else {
            return Ok(());
        };
        let Some(entries) = imports.as_list() else {
            sink.error(
                DiagnosticKind::SchemaError,
                "\"imports\" must be a list",
                SourceLocation::in_file(uri, "imports"),
            );
            return Ok(());
        };
        if entries.is_empty() {
            sink.error(
                DiagnosticKind::SchemaError,
                "\"imports\" keyname is defined without including templates",
                SourceLocation::in_file(uri, "imports"),
            );
        }
        for (index, entry) in entries.iter().enumerate() {
            let loc = SourceLocation::in_file(uri, format!("imports/{}", index));
            let Some(spec) = parse_import_entry(entry, &loc, sink) else {
                continue;
            };
            let reference = match &spec.repository {
                Some(repo_name) => match repositories.get(repo_name) {
                    Some(url) => format!("{}/{}", url.trim_end_matches('/'), spec.file),
                    None => {
                        sink.error(
                            DiagnosticKind::ImportError,
                            format!("import references unknown repository \"{}\"", repo_name),
                            loc,
                        );
                        continue;
                    }
                },
                None => spec.file.clone(),
            };
            let effective_prefix = compose_prefix(prefix, spec.namespace_prefix.as_deref());
            self.load_one(&reference, uri, effective_prefix, sink)?;
        }
        Ok(())
    }

    fn load_one(
        &mut self,
        reference: &str,
        base: &str,
        prefix: Option<String>,
        sink: &mut DiagnosticSink,
    ) -> ToscaResult<()> {
        let (tree, resolved_uri) =
            self.loader
                .load(reference, base)
                .map_err(|reason| ToscaError::Import {
                    reference: reference.to_string(),
                    reason,
                })?;
        if self.stack.contains(&resolved_uri) {
            // Import cycle: permitted, first completed registration wins.
            tracing::warn!(uri = %resolved_uri, "import cycle detected, skipping revisit");
            return Ok(());
        }
        if !self.visited.insert((resolved_uri.clone(), prefix.clone())) {
            return Ok(());
        }
        tracing::debug!(uri = %resolved_uri, prefix = ?prefix, "loaded import");
        self.stack.push(resolved_uri.clone());
        self.process_document(&tree, &resolved_uri, prefix.as_deref(), sink)?;
        self.stack.pop();
        self.documents.push(ImportedDocument {
            uri: resolved_uri,
            prefix,
            tree,
        });
        Ok(())
    }
}

struct ImportSpec {
    file: String,
    repository: Option<String>,
    namespace_prefix: Option<String>,
}

fn parse_import_entry(
    entry: &Value,
    loc: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<ImportSpec> {
    match entry {
        // Bare path form.
        Value::String(file) => Some(ImportSpec {
            file: file.clone(),
            repository: None,
            namespace_prefix: None,
        }),
        Value::Map(map) => {
            // Legacy one-key `{name: uri}` grammar.
            if map.len() == 1 && !map.contains_key("file") {
                let (_, uri) = map.iter().next().expect("len checked");
                return match uri.as_str() {
                    Some(file) => Some(ImportSpec {
                        file: file.to_string(),
                        repository: None,
                        namespace_prefix: None,
                    }),
                    None => {
                        sink.error(
                            DiagnosticKind::SchemaError,
                            "import entry value must be a file reference",
                            loc.clone(),
                        );
                        None
                    }
                };
            }
            for key in map.keys() {
                if !IMPORT_KEYS.contains(&key.as_str()) {
                    sink.error(
                        DiagnosticKind::UnknownFieldError,
                        format!("import definition contains unknown field \"{}\"", key),
                        loc.clone(),
                    );
                }
            }
            let Some(file) = map.get("file").and_then(Value::as_str) else {
                sink.error(
                    DiagnosticKind::MissingRequiredFieldError,
                    "import definition is missing required field \"file\"",
                    loc.clone(),
                );
                return None;
            };
            Some(ImportSpec {
                file: file.to_string(),
                repository: map.get("repository").and_then(Value::as_str).map(String::from),
                namespace_prefix: map
                    .get("namespace_prefix")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
        other => {
            sink.error(
                DiagnosticKind::SchemaError,
                format!("import entry must be a string or map, got {}", other.type_name()),
                loc.clone(),
            );
            None
        }
    }
}

/// `repositories:` of one document: name to URL.
fn parse_repositories(
    tree: &Value,
    uri: &str,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let Some(raw) = tree.get("repositories") else {
        return out;
    };
    let Some(entries) = raw.as_map() else {
        sink.error(
            DiagnosticKind::SchemaError,
            "\"repositories\" must be a map",
            SourceLocation::in_file(uri, "repositories"),
        );
        return out;
    };
    for (name, body) in entries {
        let loc = SourceLocation::in_file(uri, format!("repositories/{}", name));
        match body {
            Value::String(url) => {
                out.insert(name.clone(), url.clone());
            }
            Value::Map(map) => match map.get("url").and_then(Value::as_str) {
                Some(url) => {
                    out.insert(name.clone(), url.to_string());
                }
                None => sink.error(
                    DiagnosticKind::MissingRequiredFieldError,
                    format!("repository \"{}\" is missing required field \"url\"", name),
                    loc,
                ),
            },
            other => sink.error(
                DiagnosticKind::SchemaError,
                format!(
                    "repository \"{}\" must be a URL or map, got {}",
                    name,
                    other.type_name()
                ),
                loc,
            ),
        }
    }
    out
}

fn compose_prefix(outer: Option<&str>, inner: Option<&str>) -> Option<String> {
    match (outer, inner) {
        (Some(o), Some(i)) => Some(format!("{}.{}", o, i)),
        (Some(o), None) => Some(o.to_string()),
        (None, Some(i)) => Some(i.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Value {
        Value::parse_str(text).unwrap()
    }

    fn loader_with(docs: &[(&str, &str)]) -> MapLoader {
        let mut loader = MapLoader::new();
        for (uri, text) in docs {
            loader.insert(*uri, v(text));
        }
        loader
    }

    #[test]
    fn test_simple_import() {
        let loader = loader_with(&[("types.yaml", "node_types:\n  example.App: {}")]);
        let root = v("imports:\n  - types.yaml");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].uri, "types.yaml");
        assert_eq!(docs[0].prefix, None);
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_namespace_prefix_and_nesting() {
        let loader = loader_with(&[
            ("outer.yaml", "imports:\n  - file: inner.yaml\n    namespace_prefix: deep"),
            ("inner.yaml", "node_types:\n  X: {}"),
        ]);
        let root = v("imports:\n  - file: outer.yaml\n    namespace_prefix: vendor");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        // Post-order: inner before outer, prefixes composed.
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].uri, "inner.yaml");
        assert_eq!(docs[0].prefix.as_deref(), Some("vendor.deep"));
        assert_eq!(docs[1].prefix.as_deref(), Some("vendor"));
    }

    #[test]
    fn test_memoization() {
        let loader = loader_with(&[("shared.yaml", "node_types:\n  S: {}")]);
        let root = v("imports:\n  - shared.yaml\n  - shared.yaml");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_same_file_different_prefix_loads_twice() {
        let loader = loader_with(&[("shared.yaml", "node_types:\n  S: {}")]);
        let root = v("imports:\n  - shared.yaml\n  - file: shared.yaml\n    namespace_prefix: alt");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_cycle_is_noop() {
        let loader = loader_with(&[
            ("a.yaml", "imports:\n  - b.yaml\nnode_types:\n  A: {}"),
            ("b.yaml", "imports:\n  - a.yaml\nnode_types:\n  B: {}"),
        ]);
        let root = v("imports:\n  - a.yaml");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        // b completes first (its re-import of a is skipped), then a.
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].uri, "b.yaml");
        assert_eq!(docs[1].uri, "a.yaml");
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_unresolvable_import_is_fatal() {
        let loader = MapLoader::new();
        let root = v("imports:\n  - missing.yaml");
        let mut sink = DiagnosticSink::new();
        let err = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap_err();
        assert!(matches!(err, ToscaError::Import { .. }));
    }

    #[test]
    fn test_repository_resolution() {
        let loader = loader_with(&[(
            "https://repo.example.com/types/app.yaml",
            "node_types:\n  R: {}",
        )]);
        let root = v(
            "repositories:\n  main: https://repo.example.com/types/\nimports:\n  - file: app.yaml\n    repository: main",
        );
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].uri, "https://repo.example.com/types/app.yaml");
    }

    #[test]
    fn test_unknown_repository_reported() {
        let loader = MapLoader::new();
        let root = v("imports:\n  - file: app.yaml\n    repository: nowhere");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert!(docs.is_empty());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_import_entry_grammars() {
        let loader = loader_with(&[("x.yaml", "{}")]);
        // Legacy one-key form.
        let root = v("imports:\n  - some_name: x.yaml");
        let mut sink = DiagnosticSink::new();
        let docs = ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(docs.len(), 1);
        // Unknown key reported, file still loaded.
        let root = v("imports:\n  - file: x.yaml\n    wrong_key: 1");
        let mut sink = DiagnosticSink::new();
        ImportResolver::new(&loader)
            .resolve(&root, "root.yaml", &mut sink)
            .unwrap();
        assert_eq!(sink.error_count(), 1);
    }
}
