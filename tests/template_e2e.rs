//! End-to-end parsing scenarios over complete service templates.

use tosca_parser::{
    DiagnosticKind, Evaluated, ParseOptions, ServiceTemplate, Severity, Stage, Value, ValueExpr,
};

fn parse(text: &str) -> ServiceTemplate {
    ServiceTemplate::parse_str(text, ParseOptions::default()).expect("template should parse")
}

fn parse_with(text: &str, options: ParseOptions) -> ServiceTemplate {
    ServiceTemplate::parse_str(text, options).expect("template should parse")
}

fn errors(template: &ServiceTemplate) -> Vec<&tosca_parser::Diagnostic> {
    template
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect()
}

const SINGLE_COMPUTE: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0

description: Template for deploying a single server with predefined properties.

topology_template:
  inputs:
    cpus:
      type: integer
      description: Number of CPUs for the server.
      constraints:
        - valid_values: [ 1, 2, 4, 8 ]
  node_templates:
    server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: { get_input: cpus }
            mem_size: 4 MB
            disk_size: 10 GB
        os:
          properties:
            architecture: x86_64
            type: linux
            distribution: rhel
            version: "6.5"
  outputs:
    server_cpus:
      description: Number of CPUs provisioned.
      value: { get_property: [ server, host, num_cpus ] }
"#;

#[test]
fn test_single_compute_resolves_cleanly() {
    let template = parse_with(
        SINGLE_COMPUTE,
        ParseOptions::default().with_parameter("cpus", Value::Integer(2)),
    );
    assert_eq!(template.stage, Stage::Validated);
    assert!(
        !template.has_errors(),
        "unexpected diagnostics: {:#?}",
        template.diagnostics()
    );
    assert_eq!(template.topology.node_templates.len(), 1);

    let server = template.topology.node("server").unwrap();
    assert_eq!(server.type_name.as_str(), "tosca.nodes.Compute");
    assert!(server.is_derived_from("tosca.nodes.Root"));

    // The bound input flows into the capability property.
    let resolved = template.evaluate_output("server_cpus").unwrap();
    assert_eq!(resolved, Evaluated::Value(Value::Integer(2)));
}

#[test]
fn test_input_default_used_without_parameter() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  inputs:
    cpus:
      type: integer
      default: 1
"#,
    );
    assert!(!template.has_errors());
    assert_eq!(template.topology.input_value("cpus"), Some(&Value::Integer(1)));
}

#[test]
fn test_missing_required_input_reported() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  inputs:
    cpus:
      type: integer
"#,
    );
    let errs = errors(&template);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].kind, DiagnosticKind::MissingRequiredInputError);
}

#[test]
fn test_constraint_violation_on_input_binding() {
    let template = parse_with(
        SINGLE_COMPUTE,
        ParseOptions::default().with_parameter("cpus", Value::Integer(3)),
    );
    let errs = errors(&template);
    assert_eq!(errs.len(), 1, "{:#?}", errs);
    assert_eq!(errs[0].kind, DiagnosticKind::ConstraintViolation);
    assert!(errs[0].message.contains("cpus"));
}

const HOSTING_CHAIN: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    my_db:
      type: tosca.nodes.Database
      properties:
        name: inventory
      requirements:
        - host: my_dbms
    my_dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: 4
            mem_size: 4 GB
            disk_size: 40 GB
"#;

#[test]
fn test_requirement_chain_binds_and_resolves() {
    let template = parse(HOSTING_CHAIN);
    assert!(
        !template.has_errors(),
        "unexpected diagnostics: {:#?}",
        template.diagnostics()
    );

    let db = template.topology.node("my_db").unwrap();
    let host = db.requirements_named("host").next().unwrap();
    assert_eq!(host.target_node.as_deref(), Some("my_dbms"));
    assert_eq!(host.target_capability.as_deref(), Some("host"));
    assert_eq!(
        host.relationship.type_name.as_str(),
        "tosca.relationships.HostedOn"
    );

    // get_property walks the host chain two hops down to the compute.
    let expr = ValueExpr::parse(
        &Value::parse_str("{ get_property: [ SELF, host, host, num_cpus ] }").unwrap(),
    );
    let resolved = template.evaluate(&expr, Some("my_db")).unwrap();
    assert_eq!(resolved, Evaluated::Value(Value::Integer(4)));

    // HOST resolves to the first Compute-derived node up the chain.
    let expr = ValueExpr::parse(
        &Value::parse_str("{ get_property: [ HOST, host, num_cpus ] }").unwrap(),
    );
    let resolved = template.evaluate(&expr, Some("my_db")).unwrap();
    assert_eq!(resolved, Evaluated::Value(Value::Integer(4)));
}

#[test]
fn test_incoming_bindings_visible_on_target() {
    let template = parse(HOSTING_CHAIN);
    let incoming: Vec<_> = template.topology.incoming("server").collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].0.name, "my_dbms");
}

#[test]
fn test_node_filter_selects_first_matching_candidate() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    big_server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: 8
    small_server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: 4
    my_dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host:
            node_filter:
              capabilities:
                - host:
                    properties:
                      - num_cpus: { in_range: [ 1, 4 ] }
"#,
    );
    assert!(
        !template.has_errors(),
        "unexpected diagnostics: {:#?}",
        template.diagnostics()
    );
    let dbms = template.topology.node("my_dbms").unwrap();
    let host = dbms.requirements_named("host").next().unwrap();
    assert_eq!(host.target_node.as_deref(), Some("small_server"));
}

#[test]
fn test_node_filter_without_match_reports() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: 16
    my_dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host:
            node_filter:
              capabilities:
                - host:
                    properties:
                      - num_cpus: { in_range: [ 1, 4 ] }
"#,
    );
    let errs = errors(&template);
    assert!(errs
        .iter()
        .any(|d| d.kind == DiagnosticKind::NoMatchError), "{:#?}", errs);
}

#[test]
fn test_deprecated_alias_resolves_with_warning() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    my_volume:
      type: tosca.nodes.BlockStorage
      properties:
        size: 10 GB
"#,
    );
    assert!(
        !template.has_errors(),
        "unexpected diagnostics: {:#?}",
        template.diagnostics()
    );
    let volume = template.topology.node("my_volume").unwrap();
    assert_eq!(volume.type_name.as_str(), "tosca.nodes.Storage.BlockStorage");
    let warnings: Vec<_> = template
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, DiagnosticKind::Deprecated);
}

#[test]
fn test_unknown_property_and_missing_required() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    my_db:
      type: tosca.nodes.Database
      properties:
        nmae: typo
"#,
    );
    let errs = errors(&template);
    // "nmae" is unknown, and the required "name" is missing.
    assert!(errs.iter().any(|d| d.kind == DiagnosticKind::UnknownFieldError));
    assert!(errs
        .iter()
        .any(|d| d.kind == DiagnosticKind::MissingRequiredFieldError));
    // The host requirement of the database found no target either.
    assert!(errs.iter().any(|d| d.kind == DiagnosticKind::OccurrenceError));
}

#[test]
fn test_occurrences_exceeded() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    app:
      type: tosca.nodes.SoftwareComponent
      requirements:
        - host: server_one
        - host: server_two
    server_one:
      type: tosca.nodes.Compute
    server_two:
      type: tosca.nodes.Compute
"#,
    );
    let errs = errors(&template);
    assert!(
        errs.iter().any(|d| d.kind == DiagnosticKind::OccurrenceError),
        "{:#?}",
        errs
    );
}

#[test]
fn test_relationship_template_referenced_by_name() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  relationship_templates:
    app_connection:
      type: tosca.relationships.ConnectsTo
  node_templates:
    app:
      type: tosca.nodes.SoftwareComponent
      requirements:
        - host: server
        - dependency:
            node: my_db
            relationship: app_connection
    my_db:
      type: tosca.nodes.Database
      properties:
        name: inventory
      requirements:
        - host: my_dbms
    my_dbms:
      type: tosca.nodes.DBMS
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
    );
    assert!(
        !template.has_errors(),
        "unexpected diagnostics: {:#?}",
        template.diagnostics()
    );
    let app = template.topology.node("app").unwrap();
    let dep = app.requirements_named("dependency").next().unwrap();
    assert_eq!(dep.target_node.as_deref(), Some("my_db"));
    assert_eq!(
        dep.relationship.type_name.as_str(),
        "tosca.relationships.ConnectsTo"
    );
}

#[test]
fn test_copy_duplicates_sibling() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: 2
    server_clone:
      copy: server
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let clone = template.topology.node("server_clone").unwrap();
    assert_eq!(clone.type_name.as_str(), "tosca.nodes.Compute");
    let expr = ValueExpr::parse(
        &Value::parse_str("{ get_property: [ server_clone, host, num_cpus ] }").unwrap(),
    );
    assert_eq!(
        template.evaluate(&expr, None).unwrap(),
        Evaluated::Value(Value::Integer(2))
    );
}

#[test]
fn test_copy_forward_reference_rejected() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    clone:
      copy: later
    later:
      type: tosca.nodes.Compute
"#,
    );
    assert!(errors(&template)
        .iter()
        .any(|d| d.kind == DiagnosticKind::SchemaError));
}

#[test]
fn test_groups_and_policies() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server_one:
      type: tosca.nodes.Compute
    server_two:
      type: tosca.nodes.Compute
  groups:
    server_group:
      type: tosca.groups.Root
      members: [ server_one, server_two ]
  policies:
    - keep_together:
        type: tosca.policies.Placement
        targets: [ server_group ]
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert_eq!(
        template.topology.groups["server_group"].members,
        vec!["server_one", "server_two"]
    );
    let policy = &template.topology.policies[0];
    assert!(policy.targets_are_groups);
    assert_eq!(policy.targets, vec!["server_group"]);
}

#[test]
fn test_group_member_must_exist() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
  groups:
    bad_group:
      type: tosca.groups.Root
      members: [ ghost ]
"#,
    );
    assert!(errors(&template)
        .iter()
        .any(|d| d.kind == DiagnosticKind::NoMatchError));
}

#[test]
fn test_unknown_topology_section() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  workflows:
    deploy: {}
"#,
    );
    let errs = errors(&template);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].kind, DiagnosticKind::UnknownFieldError);
    assert!(errs[0].message.contains("workflows"));
}

#[test]
fn test_unsupported_version_is_fatal() {
    let result = ServiceTemplate::parse_str(
        "tosca_definitions_version: tosca_simple_yaml_9_9\n",
        ParseOptions::default(),
    );
    assert!(matches!(
        result,
        Err(tosca_parser::ToscaError::UnsupportedVersion { .. })
    ));
}

#[test]
fn test_concat_and_token() {
    let template = parse_with(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  inputs:
    host_name:
      type: string
      default: db.example.com
  outputs:
    url:
      value: { concat: [ "http://", { get_input: host_name }, ":", "8080" ] }
    domain:
      value: { token: [ { get_input: host_name }, ".", 1 ] }
"#,
        ParseOptions::default(),
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert_eq!(
        template.evaluate_output("url").unwrap(),
        Evaluated::Value(Value::String("http://db.example.com:8080".into()))
    );
    assert_eq!(
        template.evaluate_output("domain").unwrap(),
        Evaluated::Value(Value::String("example".into()))
    );
}

#[test]
fn test_token_out_of_range_reported() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  outputs:
    nope:
      value: { token: [ "a.b", ".", 7 ] }
"#,
    );
    assert!(errors(&template)
        .iter()
        .any(|d| d.kind == DiagnosticKind::FunctionEvaluationError));
}

#[test]
fn test_unknown_function_reported() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  outputs:
    nope:
      value: { get_inputs: cpus }
"#,
    );
    assert!(errors(&template)
        .iter()
        .any(|d| d.kind == DiagnosticKind::UnknownFunctionError));
}

#[test]
fn test_get_attribute_yields_placeholder() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
  outputs:
    ip:
      value: { get_attribute: [ server, private_address ] }
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let resolved = template.evaluate_output("ip").unwrap();
    assert_eq!(
        resolved,
        Evaluated::Unknown {
            type_name: "string".into()
        }
    );
}

#[test]
fn test_parse_is_idempotent() {
    let options = || ParseOptions::default().with_parameter("cpus", Value::Integer(2));
    let first = parse_with(SINGLE_COMPUTE, options());
    let second = parse_with(SINGLE_COMPUTE, options());
    assert_eq!(first.diagnostics(), second.diagnostics());
    let names: Vec<_> = first.topology.node_templates.keys().collect();
    let names_again: Vec<_> = second.topology.node_templates.keys().collect();
    assert_eq!(names, names_again);
}

#[test]
fn test_strict_mode_marks_failed() {
    let template = ServiceTemplate::parse_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  inputs:
    cpus:
      type: integer
"#,
        ParseOptions::default().strict(),
    )
    .unwrap();
    assert_eq!(template.stage, Stage::Failed);
    assert!(template.has_errors());
}

#[test]
fn test_user_types_in_template_document() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Frontend:
    derived_from: tosca.nodes.SoftwareComponent
    properties:
      listen_port:
        type: integer
        default: 8080
        constraints:
          - in_range: [ 1024, 65535 ]
topology_template:
  node_templates:
    frontend:
      type: example.Frontend
      requirements:
        - host: server
    server:
      type: tosca.nodes.Compute
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let frontend = template.topology.node("frontend").unwrap();
    assert!(frontend.is_derived_from("tosca.nodes.SoftwareComponent"));
    let expr = ValueExpr::parse(
        &Value::parse_str("{ get_property: [ frontend, listen_port ] }").unwrap(),
    );
    assert_eq!(
        template.evaluate(&expr, None).unwrap(),
        Evaluated::Value(Value::Integer(8080))
    );
}

#[test]
fn test_tosca_shorthand_in_template() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: "tosca:Compute"
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert_eq!(
        template.topology.node("server").unwrap().type_name.as_str(),
        "tosca.nodes.Compute"
    );
}

#[test]
fn test_required_artifact_slot() {
    const TYPES: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Appliance:
    derived_from: tosca.nodes.Root
    artifacts:
      sw_image:
        type: tosca.artifacts.Deployment.Image
        required: true
"#;
    // Template without the artifact: one finding naming the slot.
    let template = parse(&format!(
        "{}\ntopology_template:\n  node_templates:\n    box:\n      type: example.Appliance\n",
        TYPES
    ));
    let errs = errors(&template);
    assert_eq!(errs.len(), 1, "{:#?}", errs);
    assert_eq!(errs[0].kind, DiagnosticKind::MissingRequiredFieldError);
    assert!(errs[0].message.contains("sw_image"));

    // Template filling the slot: clean, and get_artifact resolves the file.
    let template = parse(&format!(
        r#"{}
topology_template:
  node_templates:
    box:
      type: example.Appliance
      artifacts:
        sw_image:
          type: tosca.artifacts.Deployment.Image
          file: images/appliance.qcow2
  outputs:
    image:
      value: {{ get_artifact: [ box, sw_image ] }}
"#,
        TYPES
    ));
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    assert_eq!(
        template.evaluate_output("image").unwrap(),
        Evaluated::Value(Value::String("images/appliance.qcow2".into()))
    );
}

#[test]
fn test_flattening_composes_across_three_levels() {
    let template = parse(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.Base:
    derived_from: tosca.nodes.Root
    properties:
      tier:
        type: string
        default: base
      retries:
        type: integer
        constraints:
          - greater_or_equal: 0
  example.Mid:
    derived_from: example.Base
    properties:
      tier:
        type: string
        default: mid
  example.Leaf:
    derived_from: example.Mid
    properties:
      retries:
        type: integer
        constraints:
          - less_or_equal: 5
topology_template:
  node_templates:
    widget:
      type: example.Leaf
      properties:
        retries: 3
"#,
    );
    assert!(!template.has_errors(), "{:#?}", template.diagnostics());
    let widget = template.topology.node("widget").unwrap();
    // Grandchild default survives through the middle level.
    assert_eq!(
        widget.properties["tier"],
        ValueExpr::Literal(Value::String("mid".into()))
    );
    // Constraints accumulated along the chain: both bounds enforced.
    let view = template
        .registry()
        .flattened("example.Leaf", tosca_parser::TypeKind::Node)
        .unwrap();
    assert_eq!(view.properties["retries"].constraints.len(), 2);
}
