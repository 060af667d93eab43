//! Intrinsic function evaluation
//!
//! Function calls are trees: arguments may themselves be calls. The
//! [`Evaluator`] resolves them against an elaborated topology and the bound
//! inputs. Attributes and operation outputs have no values during static
//! analysis; they evaluate to an [`Evaluated::Unknown`] placeholder that
//! carries the declared type and satisfies any consumer type check.

use indexmap::IndexMap;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::topology::{NodeTemplate, Topology};
use crate::types::TypeRegistry;
use crate::value::{FunctionCall, Value, ValueExpr, FUNCTION_NAMES};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Value(Value),
    /// A value only known at runtime, carrying its declared type.
    Unknown { type_name: String },
}

impl Evaluated {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Evaluated::Value(v) => Some(v),
            Evaluated::Unknown { .. } => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Evaluated::Unknown { .. })
    }
}

/// Entity bindings for one evaluation: which node is SELF, and for
/// relationship-scoped values, SOURCE and TARGET.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub self_node: Option<&'a str>,
    pub source: Option<&'a str>,
    pub target: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn of(self_node: &'a str) -> Scope<'a> {
        Scope {
            self_node: Some(self_node),
            source: None,
            target: None,
        }
    }
}

pub struct Evaluator<'a> {
    topology: &'a Topology,
    registry: &'a TypeRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(topology: &'a Topology, registry: &'a TypeRegistry) -> Evaluator<'a> {
        Evaluator { topology, registry }
    }

    /// Evaluate an expression. Errors carry a human-readable reason and
    /// map to `FunctionEvaluationError` diagnostics.
    pub fn evaluate(&self, expr: &ValueExpr, scope: Scope<'_>) -> Result<Evaluated, String> {
        let mut stack = Vec::new();
        self.eval(expr, scope, &mut stack)
    }

    fn eval(
        &self,
        expr: &ValueExpr,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        match expr {
            ValueExpr::Literal(v) => Ok(Evaluated::Value(v.clone())),
            ValueExpr::Reference(path) => Ok(Evaluated::Value(Value::List(
                path.iter().map(|s| Value::String(s.clone())).collect(),
            ))),
            ValueExpr::List(items) => {
                let mut out = Vec::new();
                for item in items {
                    match self.eval(item, scope, stack)? {
                        Evaluated::Value(v) => out.push(v),
                        unknown @ Evaluated::Unknown { .. } => return Ok(unknown),
                    }
                }
                Ok(Evaluated::Value(Value::List(out)))
            }
            ValueExpr::Map(map) => {
                let mut out = IndexMap::new();
                for (k, item) in map {
                    match self.eval(item, scope, stack)? {
                        Evaluated::Value(v) => {
                            out.insert(k.clone(), v);
                        }
                        unknown @ Evaluated::Unknown { .. } => return Ok(unknown),
                    }
                }
                Ok(Evaluated::Value(Value::Map(out)))
            }
            ValueExpr::Function(call) => self.eval_call(call, scope, stack),
        }
    }

    fn eval_call(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        match call.name.as_str() {
            "get_input" => self.get_input(call),
            "get_property" => {
                let path = self.reference_path(call, scope, stack)?;
                self.get_property(&path, scope, stack)
            }
            "get_attribute" => {
                let path = self.reference_path(call, scope, stack)?;
                self.get_attribute(&path, scope, stack)
            }
            "get_operation_output" => self.get_operation_output(call, scope, stack),
            "get_artifact" => self.get_artifact(call, scope, stack),
            "get_nodes_of_type" => self.get_nodes_of_type(call, scope, stack),
            "concat" => self.concat(call, scope, stack),
            "token" => self.token(call, scope, stack),
            other => Err(format!("unknown function \"{}\"", other)),
        }
    }

    fn get_input(&self, call: &FunctionCall) -> Result<Evaluated, String> {
        // The argument is the input name, optionally followed by nested
        // keys for collection-typed inputs.
        let mut segments: Vec<String> = Vec::new();
        for arg in &call.args {
            match arg {
                ValueExpr::Literal(Value::String(s)) => segments.push(s.clone()),
                ValueExpr::Literal(Value::Integer(i)) => segments.push(i.to_string()),
                ValueExpr::Literal(Value::List(items)) => {
                    segments.extend(items.iter().filter_map(|v| v.as_str().map(String::from)))
                }
                ValueExpr::Reference(path) => segments.extend(path.iter().cloned()),
                _ => return Err("get_input expects an input name".to_string()),
            }
        }
        let Some((name, rest)) = segments.split_first() else {
            return Err("get_input expects an input name".to_string());
        };
        let (name, rest) = (name.clone(), rest.to_vec());
        let Some(input) = self.topology.inputs.get(&name) else {
            return Err(format!("unknown input \"{}\"", name));
        };
        match &input.value {
            Some(value) => {
                let resolved = descend(value.clone(), &rest)?;
                Ok(Evaluated::Value(resolved))
            }
            None => Ok(Evaluated::Unknown {
                type_name: input.schema.type_name.clone(),
            }),
        }
    }

    /// The `[ entity, path... ]` argument of get_property / get_attribute.
    fn reference_path(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Vec<String>, String> {
        if let [ValueExpr::Reference(path)] = call.args.as_slice() {
            return Ok(path.clone());
        }
        // Arguments may be nested calls; evaluate each to a string.
        let mut path = Vec::new();
        for arg in &call.args {
            match self.eval(arg, scope, stack)? {
                Evaluated::Value(Value::String(s)) => path.push(s),
                Evaluated::Value(other) => {
                    return Err(format!(
                        "{} expects string path elements, got {}",
                        call.name,
                        other.type_name()
                    ))
                }
                Evaluated::Unknown { .. } => {
                    return Err(format!("{} path cannot be resolved statically", call.name))
                }
            }
        }
        if path.len() < 2 {
            return Err(format!(
                "{} expects [ entity, path... ], got {} element(s)",
                call.name,
                path.len()
            ));
        }
        Ok(path)
    }

    fn resolve_entity(&self, entity: &str, scope: Scope<'_>) -> Result<&NodeTemplate, String> {
        let name = match entity {
            "SELF" => scope
                .self_node
                .ok_or_else(|| "SELF is not valid in this context".to_string())?,
            "SOURCE" => scope
                .source
                .ok_or_else(|| "SOURCE is only valid on a relationship".to_string())?,
            "TARGET" => scope
                .target
                .ok_or_else(|| "TARGET is only valid on a relationship".to_string())?,
            "HOST" => {
                let start = scope
                    .self_node
                    .ok_or_else(|| "HOST is not valid in this context".to_string())?;
                return self.host_of(start);
            }
            other => other,
        };
        self.topology
            .node(name)
            .ok_or_else(|| format!("unknown entity \"{}\"", name))
    }

    /// Walk the host chain until a Compute-derived node, or the last node
    /// that still has a host, whichever comes first.
    fn host_of(&self, start: &str) -> Result<&NodeTemplate, String> {
        let mut visited = vec![start.to_string()];
        let mut current = self
            .hosted_on(start)
            .ok_or_else(|| format!("node \"{}\" has no host requirement", start))?;
        loop {
            if current.is_derived_from("tosca.nodes.Compute") {
                return Ok(current);
            }
            match self.hosted_on(&current.name) {
                Some(next) => {
                    if visited.contains(&next.name) {
                        return Err(format!("host chain of \"{}\" is cyclic", start));
                    }
                    visited.push(next.name.clone());
                    current = next;
                }
                None => return Ok(current),
            }
        }
    }

    /// The first HostedOn-ish target of a node: the requirement named
    /// `host`, else the first binding with a HostedOn-derived relationship.
    fn hosted_on(&self, name: &str) -> Option<&NodeTemplate> {
        let node = self.topology.node(name)?;
        let binding = node
            .requirements_named("host")
            .next()
            .or_else(|| {
                node.requirements
                    .iter()
                    .find(|r| r.relationship.is_derived_from("tosca.relationships.HostedOn"))
            })?;
        self.topology.node(binding.target_node.as_deref()?)
    }

    fn get_property(
        &self,
        path: &[String],
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let node = self.resolve_entity(&path[0], scope)?;
        self.walk(node, &path[1..], scope, stack, false)
    }

    fn get_attribute(
        &self,
        path: &[String],
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let node = self.resolve_entity(&path[0], scope)?;
        self.walk(node, &path[1..], scope, stack, true)
    }

    /// Resolve a property/attribute path on a node: a property name, a
    /// capability name followed by one of its properties, or a requirement
    /// name hopping to the target node.
    fn walk(
        &self,
        node: &NodeTemplate,
        path: &[String],
        scope: Scope<'_>,
        stack: &mut Vec<String>,
        attributes: bool,
    ) -> Result<Evaluated, String> {
        let Some((head, rest)) = path.split_first() else {
            return Err("property path is empty".to_string());
        };

        if attributes {
            if let Some(expr) = node.attributes.get(head) {
                return self.resolve_guarded(node, head, expr, rest, stack);
            }
            if let Some(schema) = node.view.attributes.get(head) {
                return match &schema.default {
                    Some(default) => Ok(Evaluated::Value(descend(default.clone(), rest)?)),
                    None => Ok(Evaluated::Unknown {
                        type_name: schema.type_name.clone(),
                    }),
                };
            }
        } else if let Some(expr) = node.properties.get(head) {
            return self.resolve_guarded(node, head, expr, rest, stack);
        }

        // Requirements shadow same-named capabilities, as in
        // `[ SELF, host, host, num_cpus ]` hopping twice before reading.
        if let Some(binding) = node.requirements_named(head).next() {
            if let Some(target) = binding.target_node.as_deref().and_then(|t| self.topology.node(t)) {
                return self.walk(target, rest, scope, stack, attributes);
            }
            return Err(format!(
                "requirement \"{}\" of \"{}\" is not bound to a target",
                head, node.name
            ));
        }

        if let Some(capability) = node.capabilities.get(head) {
            let Some((prop, rest)) = rest.split_first() else {
                return Err(format!(
                    "capability \"{}\" of \"{}\" needs a property name",
                    head, node.name
                ));
            };
            if let Some(expr) = capability.properties.get(prop) {
                return self.resolve_guarded(node, &format!("{}.{}", head, prop), expr, rest, stack);
            }
            if attributes {
                // Capability attributes are runtime-only.
                return Ok(Evaluated::Unknown {
                    type_name: "any".to_string(),
                });
            }
            return Err(format!(
                "capability \"{}\" of \"{}\" has no property \"{}\"",
                head, node.name, prop
            ));
        }

        // Last resort: a property offered by one of the node's capabilities.
        if !attributes {
            for capability in node.capabilities.values() {
                if let Some(expr) = capability.properties.get(head) {
                    return self.resolve_guarded(
                        node,
                        &format!("{}.{}", capability.name, head),
                        expr,
                        rest,
                        stack,
                    );
                }
            }
        }

        Err(format!(
            "\"{}\" is not a {} of node \"{}\"",
            head,
            if attributes { "attribute" } else { "property" },
            node.name
        ))
    }

    /// Evaluate a stored expression with cycle protection, then descend
    /// into the result with the remaining path.
    fn resolve_guarded(
        &self,
        node: &NodeTemplate,
        key: &str,
        expr: &ValueExpr,
        rest: &[String],
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let guard = format!("{}/{}", node.name, key);
        if stack.contains(&guard) {
            return Err(format!(
                "circular reference while resolving \"{}\" of node \"{}\"",
                key, node.name
            ));
        }
        stack.push(guard);
        let result = self.eval(expr, Scope::of(&node.name), stack);
        stack.pop();
        match result? {
            Evaluated::Value(value) => Ok(Evaluated::Value(descend(value, rest)?)),
            unknown => Ok(unknown),
        }
    }

    fn get_operation_output(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let args = self.string_args(call, scope, stack)?;
        let [entity, interface, operation, output] = args.as_slice() else {
            return Err("get_operation_output expects [ node, interface, operation, output ]".to_string());
        };
        let node = self.resolve_entity(entity, scope)?;
        let Some(iface) = node.interfaces.get(interface) else {
            return Err(format!(
                "node \"{}\" has no interface \"{}\"",
                node.name, interface
            ));
        };
        let Some(op) = iface.operations.get(operation) else {
            return Err(format!(
                "interface \"{}\" of \"{}\" has no operation \"{}\"",
                interface, node.name, operation
            ));
        };
        let type_name = op
            .outputs
            .get(output)
            .map(|schema| schema.type_name.clone())
            .unwrap_or_else(|| "any".to_string());
        Ok(Evaluated::Unknown { type_name })
    }

    fn get_artifact(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let args = self.string_args(call, scope, stack)?;
        if args.len() < 2 {
            return Err("get_artifact expects [ entity, artifact_name ]".to_string());
        }
        let node = self.resolve_entity(&args[0], scope)?;
        let Some(artifact) = node.artifacts.get(&args[1]) else {
            return Err(format!(
                "node \"{}\" has no artifact \"{}\"",
                node.name, args[1]
            ));
        };
        match &artifact.file {
            Some(file) => Ok(Evaluated::Value(Value::String(file.clone()))),
            None => Err(format!(
                "artifact \"{}\" of node \"{}\" has no file",
                args[1], node.name
            )),
        }
    }

    fn get_nodes_of_type(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let args = self.string_args(call, scope, stack)?;
        let [type_name] = args.as_slice() else {
            return Err("get_nodes_of_type expects a node type name".to_string());
        };
        let names = self
            .topology
            .node_templates
            .values()
            .filter(|n| self.registry.is_derived_from(n.type_name.as_str(), type_name))
            .map(|n| Value::String(n.name.clone()))
            .collect();
        Ok(Evaluated::Value(Value::List(names)))
    }

    fn concat(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        let mut out = String::new();
        for arg in &call.args {
            match self.eval(arg, scope, stack)? {
                Evaluated::Value(v) => out.push_str(&v.canonical_string()),
                Evaluated::Unknown { .. } => {
                    return Ok(Evaluated::Unknown {
                        type_name: "string".to_string(),
                    })
                }
            }
        }
        Ok(Evaluated::Value(Value::String(out)))
    }

    fn token(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Evaluated, String> {
        if call.args.len() != 3 {
            return Err("token expects [ string, separator, index ]".to_string());
        }
        let text = match self.eval(&call.args[0], scope, stack)? {
            Evaluated::Value(Value::String(s)) => s,
            Evaluated::Value(other) => {
                return Err(format!("token expects a string, got {}", other.type_name()))
            }
            unknown @ Evaluated::Unknown { .. } => return Ok(unknown),
        };
        let separator = match self.eval(&call.args[1], scope, stack)? {
            Evaluated::Value(Value::String(s)) if !s.is_empty() => s,
            _ => return Err("token separator must be a non-empty string".to_string()),
        };
        let index = match self.eval(&call.args[2], scope, stack)? {
            Evaluated::Value(Value::Integer(i)) if i >= 0 => i as usize,
            _ => return Err("token index must be a non-negative integer".to_string()),
        };
        let pieces: Vec<&str> = text.split(separator.as_str()).collect();
        match pieces.get(index) {
            Some(piece) => Ok(Evaluated::Value(Value::String(piece.to_string()))),
            None => Err(format!(
                "token index {} is out of range for \"{}\" split on \"{}\"",
                index, text, separator
            )),
        }
    }

    fn string_args(
        &self,
        call: &FunctionCall,
        scope: Scope<'_>,
        stack: &mut Vec<String>,
    ) -> Result<Vec<String>, String> {
        if let [ValueExpr::Reference(path)] = call.args.as_slice() {
            return Ok(path.clone());
        }
        let mut out = Vec::new();
        for arg in &call.args {
            match self.eval(arg, scope, stack)? {
                Evaluated::Value(Value::String(s)) => out.push(s),
                Evaluated::Value(Value::Bool(b)) => out.push(b.to_string()),
                Evaluated::Value(other) => out.push(other.canonical_string()),
                Evaluated::Unknown { .. } => {
                    return Err(format!("{} arguments cannot be resolved statically", call.name))
                }
            }
        }
        Ok(out)
    }
}

/// Index into a resolved value with the remaining path segments.
fn descend(value: Value, path: &[String]) -> Result<Value, String> {
    let mut current = value;
    for segment in path {
        current = match &current {
            Value::Map(map) => map
                .get(segment)
                .cloned()
                .ok_or_else(|| format!("key \"{}\" not found", segment))?,
            Value::List(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| format!("\"{}\" is not a list index", segment))?;
                items
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("index {} is out of range", index))?
            }
            other => {
                return Err(format!(
                    "cannot index into {} with \"{}\"",
                    other.type_name(),
                    segment
                ))
            }
        };
    }
    Ok(current)
}

/// Validate every value expression in the topology by statically
/// evaluating it; resolution failures become diagnostics. Runs as the
/// functions-bound stage.
pub(crate) fn validate_topology(
    topology: &Topology,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) {
    let evaluator = Evaluator::new(topology, registry);

    for node in topology.node_templates.values() {
        let scope = Scope::of(&node.name);
        let base = format!("topology_template/node_templates/{}", node.name);
        for (prop, expr) in &node.properties {
            check_expr(&evaluator, expr, scope, file, &format!("{}/properties/{}", base, prop), sink);
        }
        for capability in node.capabilities.values() {
            for (prop, expr) in &capability.properties {
                check_expr(
                    &evaluator,
                    expr,
                    scope,
                    file,
                    &format!("{}/capabilities/{}/properties/{}", base, capability.name, prop),
                    sink,
                );
            }
        }
        for (iface_name, iface) in &node.interfaces {
            for (input, raw) in &iface.inputs {
                let expr = ValueExpr::parse(raw);
                check_expr(
                    &evaluator,
                    &expr,
                    scope,
                    file,
                    &format!("{}/interfaces/{}/inputs/{}", base, iface_name, input),
                    sink,
                );
            }
            for (op_name, op) in &iface.operations {
                for (input, raw) in &op.inputs {
                    let expr = ValueExpr::parse(raw);
                    check_expr(
                        &evaluator,
                        &expr,
                        scope,
                        file,
                        &format!("{}/interfaces/{}/{}/inputs/{}", base, iface_name, op_name, input),
                        sink,
                    );
                }
            }
        }
        for binding in &node.requirements {
            let rel_scope = Scope {
                self_node: Some(&node.name),
                source: Some(&node.name),
                target: binding.target_node.as_deref(),
            };
            for (prop, expr) in &binding.relationship.properties {
                check_expr(
                    &evaluator,
                    expr,
                    rel_scope,
                    file,
                    &format!("{}/requirements/{}/relationship/properties/{}", base, binding.name, prop),
                    sink,
                );
            }
        }
    }

    for output in topology.outputs.values() {
        check_expr(
            &evaluator,
            &output.value,
            Scope::default(),
            file,
            &format!("topology_template/outputs/{}", output.name),
            sink,
        );
    }
}

fn check_expr(
    evaluator: &Evaluator<'_>,
    expr: &ValueExpr,
    scope: Scope<'_>,
    file: Option<&str>,
    path: &str,
    sink: &mut DiagnosticSink,
) {
    let location = match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    };
    scan_unknown_functions(expr, &location, sink);
    if let Err(reason) = evaluator.evaluate(expr, scope) {
        sink.error(DiagnosticKind::FunctionEvaluationError, reason, location);
    }
}

/// A one-key map whose key looks like an intrinsic (get_*) but is not
/// recognized deserves its own diagnostic rather than silently passing
/// through as plain data.
fn scan_unknown_functions(expr: &ValueExpr, location: &SourceLocation, sink: &mut DiagnosticSink) {
    match expr {
        ValueExpr::Literal(value) => scan_value(value, location, sink),
        ValueExpr::List(items) => {
            for item in items {
                scan_unknown_functions(item, location, sink);
            }
        }
        ValueExpr::Map(map) => {
            for item in map.values() {
                scan_unknown_functions(item, location, sink);
            }
        }
        ValueExpr::Function(call) => {
            for arg in &call.args {
                scan_unknown_functions(arg, location, sink);
            }
        }
        ValueExpr::Reference(_) => {}
    }
}

fn scan_value(value: &Value, location: &SourceLocation, sink: &mut DiagnosticSink) {
    match value {
        Value::Map(map) => {
            if map.len() == 1 {
                let key = map.keys().next().expect("len checked");
                if key.starts_with("get_") && !FUNCTION_NAMES.contains(&key.as_str()) {
                    sink.error(
                        DiagnosticKind::UnknownFunctionError,
                        format!("\"{}\" is not a known intrinsic function", key),
                        location.clone(),
                    );
                }
            }
            for item in map.values() {
                scan_value(item, location, sink);
            }
        }
        Value::List(items) => {
            for item in items {
                scan_value(item, location, sink);
            }
        }
        _ => {}
    }
}
