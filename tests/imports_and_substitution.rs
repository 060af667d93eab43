//! Import graph, namespace and substitution-mapping scenarios.

use tosca_parser::{
    DiagnosticKind, MapLoader, ParseOptions, ProfileExtension, ServiceTemplate, Severity, Value,
};

fn v(text: &str) -> Value {
    Value::parse_str(text).unwrap()
}

fn parse_with_loader(root: &str, loader: &MapLoader, options: ParseOptions) -> ServiceTemplate {
    ServiceTemplate::parse_tree(v(root), "root.yaml", loader, options)
        .expect("template should parse")
}

fn errors(template: &ServiceTemplate) -> Vec<&tosca_parser::Diagnostic> {
    template
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect()
}

#[test]
fn test_imported_types_usable_in_topology() {
    let mut loader = MapLoader::new();
    loader.insert(
        "custom_types.yaml",
        v(r#"
node_types:
  example.Cache:
    derived_from: tosca.nodes.SoftwareComponent
    properties:
      cache_size:
        type: scalar-unit.size
        default: 64 MB
"#),
    );
    let template = parse_with_loader(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - custom_types.yaml
topology_template:
  node_templates:
    cache:
      type: example.Cache
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
        &loader,
        ParseOptions::default(),
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let cache = template.topology.node("cache").unwrap();
    assert!(cache.is_derived_from("tosca.nodes.SoftwareComponent"));
}

#[test]
fn test_namespace_prefix_shields_collisions() {
    let mut loader = MapLoader::new();
    loader.insert(
        "vendor_a.yaml",
        v("node_types:\n  Service:\n    derived_from: tosca.nodes.Root"),
    );
    loader.insert(
        "vendor_b.yaml",
        v("node_types:\n  Service:\n    derived_from: tosca.nodes.SoftwareComponent"),
    );
    let template = parse_with_loader(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - file: vendor_a.yaml
    namespace_prefix: a
  - file: vendor_b.yaml
    namespace_prefix: b
topology_template:
  node_templates:
    svc_a:
      type: a.Service
    svc_b:
      type: b.Service
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
        &loader,
        ParseOptions::default(),
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert!(template
        .topology
        .node("svc_b")
        .unwrap()
        .is_derived_from("tosca.nodes.SoftwareComponent"));
}

#[test]
fn test_unprefixed_collision_reports_duplicate() {
    let mut loader = MapLoader::new();
    loader.insert(
        "vendor_a.yaml",
        v("node_types:\n  Service:\n    derived_from: tosca.nodes.Root"),
    );
    loader.insert(
        "vendor_b.yaml",
        v("node_types:\n  Service:\n    derived_from: tosca.nodes.Root"),
    );
    let template = parse_with_loader(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - vendor_a.yaml
  - vendor_b.yaml
"#,
        &loader,
        ParseOptions::default(),
    );
    let errs = errors(&template);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].kind, DiagnosticKind::DuplicateTypeError);
}

#[test]
fn test_missing_import_aborts() {
    let loader = MapLoader::new();
    let result = ServiceTemplate::parse_tree(
        v("tosca_definitions_version: tosca_simple_yaml_1_0\nimports:\n  - nowhere.yaml"),
        "root.yaml",
        &loader,
        ParseOptions::default(),
    );
    assert!(matches!(result, Err(tosca_parser::ToscaError::Import { .. })));
}

#[test]
fn test_file_loader_resolves_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let types_path = dir.path().join("custom_types.yaml");
    std::fs::write(
        &types_path,
        "node_types:\n  example.App:\n    derived_from: tosca.nodes.SoftwareComponent\n",
    )
    .unwrap();
    let template_path = dir.path().join("service.yaml");
    std::fs::write(
        &template_path,
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - custom_types.yaml
topology_template:
  node_templates:
    app:
      type: example.App
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
    )
    .unwrap();
    let template =
        ServiceTemplate::parse_file(&template_path, ParseOptions::default()).unwrap();
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert!(template.topology.node("app").is_some());
}

const QUEUING_TYPES: &str = r#"
node_types:
  example.QueuingSubsystem:
    derived_from: tosca.nodes.SoftwareComponent
    properties:
      server_port:
        type: integer
"#;

#[test]
fn test_substitution_missing_required_input() {
    let mut loader = MapLoader::new();
    loader.insert(
        "queuing.yaml",
        v(&format!(
            "{}\n{}",
            QUEUING_TYPES,
            r#"
topology_template:
  substitution_mappings:
    node_type: example.QueuingSubsystem
  node_templates:
    queue_server:
      type: tosca.nodes.Compute
"#
        )),
    );
    let template = parse_with_loader(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - queuing.yaml
topology_template:
  node_templates:
    queue:
      type: example.QueuingSubsystem
      directives: [ substitute ]
"#,
        &loader,
        ParseOptions::default(),
    );
    let errs = errors(&template);
    assert_eq!(errs.len(), 1, "{:#?}", errs);
    assert_eq!(errs[0].kind, DiagnosticKind::MissingRequiredInputError);
    assert!(errs[0].message.contains("server_port"));
    assert!(errs[0].location.path.contains("substitution_mappings"));
}

#[test]
fn test_substitution_input_satisfies_required_property() {
    let mut loader = MapLoader::new();
    loader.insert(
        "queuing.yaml",
        v(&format!(
            "{}\n{}",
            QUEUING_TYPES,
            r#"
topology_template:
  substitution_mappings:
    node_type: example.QueuingSubsystem
  inputs:
    server_port:
      type: integer
  node_templates:
    queue_server:
      type: tosca.nodes.Compute
"#
        )),
    );
    let template = parse_with_loader(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - queuing.yaml
topology_template:
  node_templates:
    queue:
      type: example.QueuingSubsystem
      directives: [ substitute ]
"#,
        &loader,
        ParseOptions::default(),
    );
    // The nested input receives the outer property at substitution time,
    // so nothing is missing anywhere.
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
}

#[test]
fn test_substitution_capability_and_requirement_mappings() {
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Frontend:
    derived_from: tosca.nodes.Root
    capabilities:
      web:
        type: tosca.capabilities.Endpoint
    requirements:
      - backend:
          capability: tosca.capabilities.Endpoint.Database
          occurrences: [ 0, 1 ]
topology_template:
  substitution_mappings:
    node_type: example.Frontend
    capabilities:
      web: [ webserver, data_endpoint ]
    requirements:
      backend: [ app, dependency ]
  node_templates:
    webserver:
      type: tosca.nodes.WebServer
      requirements:
        - host: server
    app:
      type: tosca.nodes.SoftwareComponent
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
        ParseOptions::default(),
    )
    .unwrap();
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let mapping = template.topology.substitution.as_ref().unwrap();
    assert_eq!(mapping.node_type.as_str(), "example.Frontend");
    assert_eq!(
        mapping.capabilities["web"],
        ("webserver".to_string(), "data_endpoint".to_string())
    );
}

#[test]
fn test_substitution_unmapped_capability_reported() {
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Frontend:
    derived_from: tosca.nodes.Root
    capabilities:
      web:
        type: tosca.capabilities.Endpoint
topology_template:
  substitution_mappings:
    node_type: example.Frontend
  node_templates:
    server:
      type: tosca.nodes.Compute
"#,
        ParseOptions::default(),
    )
    .unwrap();
    let errs = errors(&template);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].kind, DiagnosticKind::SubstitutionMappingError);
    assert!(errs[0].message.contains("web"));
}

#[test]
fn test_substitution_incompatible_capability_type() {
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Frontend:
    derived_from: tosca.nodes.Root
    capabilities:
      web:
        type: tosca.capabilities.Endpoint
topology_template:
  substitution_mappings:
    node_type: example.Frontend
    capabilities:
      web: [ server, os ]
  node_templates:
    server:
      type: tosca.nodes.Compute
"#,
        ParseOptions::default(),
    )
    .unwrap();
    let errs = errors(&template);
    assert!(
        errs.iter().any(|d| d.kind == DiagnosticKind::TypeMismatchError),
        "{:#?}",
        errs
    );
}

#[test]
fn test_surplus_input_needs_default() {
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Empty:
    derived_from: tosca.nodes.Root
topology_template:
  substitution_mappings:
    node_type: example.Empty
  inputs:
    tuning_knob:
      type: string
"#,
        ParseOptions::default(),
    )
    .unwrap();
    let errs = errors(&template);
    assert!(
        errs.iter()
            .any(|d| d.kind == DiagnosticKind::SubstitutionMappingError),
        "{:#?}",
        errs
    );
}

#[test]
fn test_profile_extension_version_and_types() {
    let extension = ProfileExtension::new(
        "tosca_simple_profile_for_nfv_1_0_0",
        r#"
node_types:
  tosca.nodes.nfv.VDU:
    derived_from: tosca.nodes.Compute
"#,
    );
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_profile_for_nfv_1_0_0
topology_template:
  node_templates:
    vdu:
      type: tosca.nodes.nfv.VDU
"#,
        ParseOptions::default().with_extension(extension),
    )
    .unwrap();
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert!(template
        .topology
        .node("vdu")
        .unwrap()
        .is_derived_from("tosca.nodes.Compute"));
}

#[test]
fn test_extension_version_requires_registration() {
    let result = ServiceTemplate::parse_str(
        "tosca_definitions_version: tosca_simple_profile_for_nfv_1_0_0\n",
        ParseOptions::default(),
    );
    assert!(matches!(
        result,
        Err(tosca_parser::ToscaError::UnsupportedVersion { .. })
    ));
}
