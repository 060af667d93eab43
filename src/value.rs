//! The YAML-agnostic value tree and tagged value expressions
//!
//! The parser consumes any YAML implementation's output through a single
//! conversion at the boundary: `serde_yaml::Value` becomes [`Value`], an
//! ordered tree that the rest of the crate operates on. Template values that
//! may contain intrinsic function calls are parsed into [`ValueExpr`] and
//! resolved later by the function evaluator.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A parsed YAML value. Maps preserve declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Convert from the serde_yaml tree. Non-string mapping keys are
    /// stringified through their YAML scalar form.
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                Value::List(seq.iter().map(Value::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        other => serde_yaml::to_string(other)
                            .map(|s| s.trim_end().to_string())
                            .unwrap_or_default(),
                    };
                    out.insert(key, Value::from_yaml(v));
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
        }
    }

    /// Parse a YAML document string into a value tree.
    pub fn parse_str(text: &str) -> Result<Value, serde_yaml::Error> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
        Ok(Value::from_yaml(&yaml))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// The YAML-ish name of this value's shape, for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Canonical string form used by `concat` for non-string operands.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                serde_yaml::to_string(self).map(|s| s.trim_end().to_string()).unwrap_or_default()
            }
        }
    }
}

/// Names of the intrinsic functions the evaluator understands.
pub const FUNCTION_NAMES: &[&str] = &[
    "get_input",
    "get_property",
    "get_attribute",
    "get_operation_output",
    "get_artifact",
    "get_nodes_of_type",
    "concat",
    "token",
];

/// A template value with intrinsic function calls made explicit.
///
/// Function arguments that are pure entity/path references (the list form of
/// `get_property` and friends) parse into [`ValueExpr::Reference`] so the
/// evaluator can walk them without re-inspecting raw values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueExpr {
    Literal(Value),
    List(Vec<ValueExpr>),
    Map(IndexMap<String, ValueExpr>),
    Function(FunctionCall),
    Reference(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<ValueExpr>,
}

impl ValueExpr {
    /// Parse a raw value into an expression tree, recognizing one-key maps
    /// whose key is an intrinsic function name.
    pub fn parse(value: &Value) -> ValueExpr {
        match value {
            Value::Map(map) if map.len() == 1 => {
                let (key, arg) = map.iter().next().expect("len checked");
                if FUNCTION_NAMES.contains(&key.as_str()) {
                    return ValueExpr::Function(FunctionCall {
                        name: key.clone(),
                        args: Self::parse_args(key, arg),
                    });
                }
                ValueExpr::parse_container(value)
            }
            _ => ValueExpr::parse_container(value),
        }
    }

    fn parse_container(value: &Value) -> ValueExpr {
        match value {
            Value::List(items) => {
                if items.iter().all(|v| ValueExpr::parse(v).is_literal()) {
                    ValueExpr::Literal(value.clone())
                } else {
                    ValueExpr::List(items.iter().map(ValueExpr::parse).collect())
                }
            }
            Value::Map(map) => {
                let parsed: IndexMap<String, ValueExpr> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), ValueExpr::parse(v)))
                    .collect();
                if parsed.values().all(ValueExpr::is_literal) {
                    ValueExpr::Literal(value.clone())
                } else {
                    ValueExpr::Map(parsed)
                }
            }
            other => ValueExpr::Literal(other.clone()),
        }
    }

    fn parse_args(function: &str, arg: &Value) -> Vec<ValueExpr> {
        match (function, arg) {
            // Path-shaped functions take [entity, segment, ...]; keep the
            // reference in one piece when every element is a plain string.
            ("get_property", Value::List(items))
            | ("get_attribute", Value::List(items))
                if items.iter().all(|v| v.as_str().is_some()) =>
            {
                vec![ValueExpr::Reference(
                    items.iter().map(|v| v.as_str().unwrap().to_string()).collect(),
                )]
            }
            (_, Value::List(items)) => items.iter().map(ValueExpr::parse).collect(),
            (_, single) => vec![ValueExpr::parse(single)],
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, ValueExpr::Literal(_))
    }

    /// True when no function call appears anywhere in the tree.
    pub fn is_fully_literal(&self) -> bool {
        match self {
            ValueExpr::Literal(_) | ValueExpr::Reference(_) => true,
            ValueExpr::List(items) => items.iter().all(ValueExpr::is_fully_literal),
            ValueExpr::Map(map) => map.values().all(ValueExpr::is_fully_literal),
            ValueExpr::Function(_) => false,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            ValueExpr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Visit every function call in the tree.
    pub fn visit_functions<'a>(&'a self, visit: &mut dyn FnMut(&'a FunctionCall)) {
        match self {
            ValueExpr::Function(call) => {
                visit(call);
                for arg in &call.args {
                    arg.visit_functions(visit);
                }
            }
            ValueExpr::List(items) => {
                for item in items {
                    item.visit_functions(visit);
                }
            }
            ValueExpr::Map(map) => {
                for item in map.values() {
                    item.visit_functions(visit);
                }
            }
            ValueExpr::Literal(_) | ValueExpr::Reference(_) => {}
        }
    }
}

/// True when a raw value is an intrinsic function call at its root.
pub fn is_function(value: &Value) -> bool {
    matches!(
        value,
        Value::Map(map) if map.len() == 1
            && FUNCTION_NAMES.contains(&map.keys().next().unwrap().as_str())
    )
}
