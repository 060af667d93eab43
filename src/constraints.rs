//! Property schemas, constraint clauses and value validation
//!
//! A [`Schema`] is the parsed body of a property or parameter definition
//! (`type`, `required`, `default`, `constraints`, `entry_schema`, ...).
//! [`Constraint`] clauses are one-key maps (`{ valid_values: [...] }`)
//! evaluated against values after scalar-unit normalization. The free
//! function [`validate_value`] drives the whole check: primitive type shape,
//! entry/key schemas, user data types (through [`DataTypeResolver`]) and the
//! constraint list.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use regex::Regex;

use crate::scalar::{self, UnitFamily};
use crate::value::{self, Value};
use crate::version::VersionValue;

/// Primitive property type names.
pub const PRIMITIVE_TYPES: &[&str] = &[
    "string",
    "integer",
    "float",
    "number",
    "boolean",
    "timestamp",
    "null",
    "range",
    "version",
    "list",
    "map",
    "scalar-unit.size",
    "scalar-unit.time",
    "scalar-unit.frequency",
    "scalar-unit.bitrate",
    "any",
];

pub fn is_primitive_type(name: &str) -> bool {
    PRIMITIVE_TYPES.contains(&name)
}

/// Lookup seam for user-defined data types, implemented by the type
/// registry. Kept as a trait so the constraint engine stays leaf-level.
pub trait DataTypeResolver {
    /// Flattened property schemas of a data type, or None if the name is
    /// not a registered data type.
    fn data_type_schema(&self, type_name: &str) -> Option<IndexMap<String, Schema>>;

    /// Whether `type_name` derives from `ancestor` (both resolved names).
    fn type_derives_from(&self, type_name: &str, ancestor: &str) -> bool;
}

/// Property lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyStatus {
    #[default]
    Supported,
    Unsupported,
    Experimental,
    Deprecated,
    Removed,
}

impl PropertyStatus {
    pub fn parse(text: &str) -> Option<PropertyStatus> {
        match text {
            "supported" => Some(PropertyStatus::Supported),
            "unsupported" => Some(PropertyStatus::Unsupported),
            "experimental" => Some(PropertyStatus::Experimental),
            "deprecated" => Some(PropertyStatus::Deprecated),
            "removed" => Some(PropertyStatus::Removed),
            _ => None,
        }
    }
}

/// Parsed schema of a property, attribute, parameter or entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub type_name: String,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub status: PropertyStatus,
    pub constraints: Vec<Constraint>,
    pub entry_schema: Option<Box<Schema>>,
    pub key_schema: Option<Box<Schema>>,
    pub metadata: IndexMap<String, Value>,
}

const SCHEMA_KEYS: &[&str] = &[
    "type",
    "required",
    "description",
    "default",
    "constraints",
    "key_schema",
    "entry_schema",
    "status",
    "metadata",
    "title",
];

impl Schema {
    pub fn of_type(type_name: impl Into<String>) -> Schema {
        Schema {
            type_name: type_name.into(),
            required: true,
            default: None,
            description: None,
            status: PropertyStatus::Supported,
            constraints: Vec::new(),
            entry_schema: None,
            key_schema: None,
            metadata: IndexMap::new(),
        }
    }

    /// Parse a schema body. `name` is only used in messages. Problems are
    /// appended to `errors`; a best-effort schema is still returned so
    /// later validation can proceed.
    pub fn parse(name: &str, body: &Value, errors: &mut Vec<String>) -> Schema {
        let map = match body.as_map() {
            Some(m) => m,
            None => {
                errors.push(format!(
                    "schema definition of \"{}\" must be a map, not {}",
                    name,
                    body.type_name()
                ));
                return Schema::of_type("any");
            }
        };
        let type_name = match map.get("type").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => {
                errors.push(format!(
                    "schema definition of \"{}\" must have a \"type\" attribute",
                    name
                ));
                "any".to_string()
            }
        };
        for key in map.keys() {
            if !SCHEMA_KEYS.contains(&key.as_str()) {
                errors.push(format!(
                    "schema definition of \"{}\" contains unknown field \"{}\"",
                    name, key
                ));
            }
        }
        let required = match map.get("required") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                errors.push(format!(
                    "\"required\" of \"{}\" must be a boolean, not {}",
                    name,
                    other.type_name()
                ));
                true
            }
        };
        let status = match map.get("status").and_then(Value::as_str) {
            None => PropertyStatus::Supported,
            Some(text) => PropertyStatus::parse(text).unwrap_or_else(|| {
                errors.push(format!(
                    "schema definition of \"{}\" has invalid status \"{}\"",
                    name, text
                ));
                PropertyStatus::Supported
            }),
        };
        let mut constraints = Vec::new();
        if let Some(clauses) = map.get("constraints") {
            match clauses.as_list() {
                Some(list) => {
                    for clause in list {
                        match Constraint::parse(name, &type_name, clause) {
                            Ok(c) => constraints.push(c),
                            Err(e) => errors.push(e),
                        }
                    }
                }
                None => errors.push(format!(
                    "\"constraints\" of \"{}\" must be a list",
                    name
                )),
            }
        }
        let entry_schema = map
            .get("entry_schema")
            .map(|v| Box::new(Schema::parse(&format!("{}.entry_schema", name), v, errors)));
        let key_schema = map
            .get("key_schema")
            .map(|v| Box::new(Schema::parse(&format!("{}.key_schema", name), v, errors)));
        let metadata = map
            .get("metadata")
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();
        Schema {
            type_name,
            required,
            default: map.get("default").cloned(),
            description: map.get("description").and_then(Value::as_str).map(String::from),
            status,
            constraints,
            entry_schema,
            key_schema,
            metadata,
        }
    }
}

/// A single constraint clause, as declared.
#[derive(Debug, Clone)]
pub enum Constraint {
    Equal(Value),
    GreaterThan(Value),
    GreaterOrEqual(Value),
    LessThan(Value),
    LessOrEqual(Value),
    InRange { min: Value, max: Value },
    ValidValues(Vec<Value>),
    Length(usize),
    MinLength(usize),
    MaxLength(usize),
    Pattern { source: String, regex: Regex },
    Schema(Box<Schema>),
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        use Constraint::*;
        match (self, other) {
            (Equal(a), Equal(b)) => a == b,
            (GreaterThan(a), GreaterThan(b)) => a == b,
            (GreaterOrEqual(a), GreaterOrEqual(b)) => a == b,
            (LessThan(a), LessThan(b)) => a == b,
            (LessOrEqual(a), LessOrEqual(b)) => a == b,
            (InRange { min: a1, max: a2 }, InRange { min: b1, max: b2 }) => a1 == b1 && a2 == b2,
            (ValidValues(a), ValidValues(b)) => a == b,
            (Length(a), Length(b)) => a == b,
            (MinLength(a), MinLength(b)) => a == b,
            (MaxLength(a), MaxLength(b)) => a == b,
            (Pattern { source: a, .. }, Pattern { source: b, .. }) => a == b,
            (Schema(a), Schema(b)) => a == b,
            _ => false,
        }
    }
}

/// Types a comparison clause may be declared on.
const COMPARABLE_TYPES: &[&str] = &[
    "integer",
    "float",
    "number",
    "timestamp",
    "version",
    "scalar-unit.size",
    "scalar-unit.time",
    "scalar-unit.frequency",
    "scalar-unit.bitrate",
];

impl Constraint {
    pub fn keyword(&self) -> &'static str {
        match self {
            Constraint::Equal(_) => "equal",
            Constraint::GreaterThan(_) => "greater_than",
            Constraint::GreaterOrEqual(_) => "greater_or_equal",
            Constraint::LessThan(_) => "less_than",
            Constraint::LessOrEqual(_) => "less_or_equal",
            Constraint::InRange { .. } => "in_range",
            Constraint::ValidValues(_) => "valid_values",
            Constraint::Length(_) => "length",
            Constraint::MinLength(_) => "min_length",
            Constraint::MaxLength(_) => "max_length",
            Constraint::Pattern { .. } => "pattern",
            Constraint::Schema(_) => "schema",
        }
    }

    /// Parse a one-key clause map declared on a property of `prop_type`.
    pub fn parse(prop_name: &str, prop_type: &str, clause: &Value) -> Result<Constraint, String> {
        let map = clause
            .as_map()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| format!("invalid constraint on \"{}\": must be a map with one key", prop_name))?;
        let (op, arg) = map.iter().next().expect("len checked");

        let wants_length = |arg: &Value| -> Result<usize, String> {
            arg.as_i64()
                .filter(|n| *n >= 0)
                .map(|n| n as usize)
                .ok_or_else(|| format!("the \"{}\" constraint on \"{}\" expects a non-negative integer", op, prop_name))
        };

        let parsed = match op.as_str() {
            "equal" => Constraint::Equal(arg.clone()),
            "greater_than" => Constraint::GreaterThan(arg.clone()),
            "greater_or_equal" => Constraint::GreaterOrEqual(arg.clone()),
            "less_than" => Constraint::LessThan(arg.clone()),
            "less_or_equal" => Constraint::LessOrEqual(arg.clone()),
            "in_range" => {
                let list = arg.as_list().filter(|l| l.len() == 2).ok_or_else(|| {
                    format!(
                        "the \"in_range\" constraint on \"{}\" expects a list of two values",
                        prop_name
                    )
                })?;
                for bound in list {
                    if let Some(s) = bound.as_str() {
                        let is_scalar = UnitFamily::from_type_name(prop_type).is_some();
                        if s != "UNBOUNDED" && !is_scalar && prop_type != "timestamp" && prop_type != "version" {
                            return Err(format!(
                                "the \"in_range\" constraint on \"{}\" expects comparable values, not \"{}\"",
                                prop_name, s
                            ));
                        }
                    }
                }
                Constraint::InRange {
                    min: list[0].clone(),
                    max: list[1].clone(),
                }
            }
            "valid_values" => {
                let list = arg.as_list().ok_or_else(|| {
                    format!("the \"valid_values\" constraint on \"{}\" expects a list", prop_name)
                })?;
                Constraint::ValidValues(list.to_vec())
            }
            "length" => Constraint::Length(wants_length(arg)?),
            "min_length" => Constraint::MinLength(wants_length(arg)?),
            "max_length" => Constraint::MaxLength(wants_length(arg)?),
            "pattern" => {
                let source = arg
                    .as_str()
                    .ok_or_else(|| format!("the \"pattern\" constraint on \"{}\" expects a string", prop_name))?;
                let regex = Regex::new(&format!("^(?:{})$", source))
                    .map_err(|e| format!("invalid pattern on \"{}\": {}", prop_name, e))?;
                Constraint::Pattern {
                    source: source.to_string(),
                    regex,
                }
            }
            "schema" => {
                let mut errors = Vec::new();
                let schema = Schema::parse(&format!("{}.schema", prop_name), arg, &mut errors);
                if let Some(first) = errors.into_iter().next() {
                    return Err(first);
                }
                Constraint::Schema(Box::new(schema))
            }
            other => {
                return Err(format!(
                    "invalid constraint \"{}\" on \"{}\"",
                    other, prop_name
                ))
            }
        };

        // Clause/type compatibility, per the Simple Profile tables.
        let type_ok = match &parsed {
            Constraint::Equal(_) | Constraint::ValidValues(_) | Constraint::Schema(_) => true,
            Constraint::GreaterThan(_)
            | Constraint::GreaterOrEqual(_)
            | Constraint::LessThan(_)
            | Constraint::LessOrEqual(_) => COMPARABLE_TYPES.contains(&prop_type),
            Constraint::InRange { .. } => {
                COMPARABLE_TYPES.contains(&prop_type) || prop_type == "range"
            }
            Constraint::Length(_) => prop_type == "string",
            Constraint::MinLength(_) | Constraint::MaxLength(_) => {
                matches!(prop_type, "string" | "map" | "list")
            }
            Constraint::Pattern { .. } => prop_type == "string",
        };
        if !type_ok && is_primitive_type(prop_type) {
            return Err(format!(
                "constraint \"{}\" is not valid for data type \"{}\"",
                parsed.keyword(),
                prop_type
            ));
        }
        Ok(parsed)
    }

    /// Evaluate the clause against a value of `prop_type`. Returns the
    /// violation message on failure.
    pub fn check(
        &self,
        prop_name: &str,
        prop_type: &str,
        val: &Value,
        resolver: Option<&dyn DataTypeResolver>,
    ) -> Result<(), String> {
        match self {
            Constraint::Equal(expected) => {
                if values_equal(val, expected, prop_type) {
                    Ok(())
                } else {
                    Err(format!(
                        "the value {} of \"{}\" is not equal to {}",
                        render(val),
                        prop_name,
                        render(expected)
                    ))
                }
            }
            Constraint::GreaterThan(bound) => {
                self.compare(prop_name, prop_type, val, bound, |o| o == Ordering::Greater, "greater than")
            }
            Constraint::GreaterOrEqual(bound) => self.compare(
                prop_name,
                prop_type,
                val,
                bound,
                |o| o != Ordering::Less,
                "greater than or equal to",
            ),
            Constraint::LessThan(bound) => {
                self.compare(prop_name, prop_type, val, bound, |o| o == Ordering::Less, "less than")
            }
            Constraint::LessOrEqual(bound) => self.compare(
                prop_name,
                prop_type,
                val,
                bound,
                |o| o != Ordering::Greater,
                "less than or equal to",
            ),
            Constraint::InRange { min, max } => {
                // A range-typed value checks both of its own bounds.
                let (lo, hi) = match val.as_list() {
                    Some(pair) if prop_type == "range" && pair.len() == 2 => {
                        (&pair[0], &pair[1])
                    }
                    _ => (val, val),
                };
                let below = !is_unbounded(min)
                    && matches!(compare_values(lo, min, prop_type), Some(Ordering::Less));
                let above = !is_unbounded(max)
                    && matches!(compare_values(hi, max, prop_type), Some(Ordering::Greater));
                if below || above {
                    Err(format!(
                        "the value {} of \"{}\" is out of range ({}, {})",
                        render(val),
                        prop_name,
                        render(min),
                        render(max)
                    ))
                } else {
                    Ok(())
                }
            }
            Constraint::ValidValues(allowed) => {
                let ok = match val {
                    Value::List(items) => items
                        .iter()
                        .all(|item| allowed.iter().any(|a| values_equal(item, a, prop_type))),
                    single => allowed.iter().any(|a| values_equal(single, a, prop_type)),
                };
                if ok {
                    Ok(())
                } else {
                    let listing = allowed.iter().map(render).collect::<Vec<_>>().join(", ");
                    Err(format!(
                        "the value {} of \"{}\" is not one of [{}]",
                        render(val),
                        prop_name,
                        listing
                    ))
                }
            }
            Constraint::Length(n) => {
                check_length(prop_name, val, |len| len == *n, &format!("equal to {}", n))
            }
            Constraint::MinLength(n) => {
                check_length(prop_name, val, |len| len >= *n, &format!("at least {}", n))
            }
            Constraint::MaxLength(n) => {
                check_length(prop_name, val, |len| len <= *n, &format!("no greater than {}", n))
            }
            Constraint::Pattern { source, regex } => match val.as_str() {
                Some(s) if regex.is_match(s) => Ok(()),
                Some(s) => Err(format!(
                    "the value \"{}\" of \"{}\" does not match pattern \"{}\"",
                    s, prop_name, source
                )),
                None => Err(format!(
                    "the \"pattern\" constraint on \"{}\" requires a string value",
                    prop_name
                )),
            },
            Constraint::Schema(schema) => {
                let nested = validate_value(prop_name, val, schema, resolver);
                match nested.into_iter().next() {
                    None => Ok(()),
                    Some(first) => Err(first),
                }
            }
        }
    }

    fn compare(
        &self,
        prop_name: &str,
        prop_type: &str,
        val: &Value,
        bound: &Value,
        accept: impl Fn(Ordering) -> bool,
        relation: &str,
    ) -> Result<(), String> {
        match compare_values(val, bound, prop_type) {
            Some(ordering) if accept(ordering) => Ok(()),
            Some(_) => Err(format!(
                "the value {} of \"{}\" must be {} {}",
                render(val),
                prop_name,
                relation,
                render(bound)
            )),
            None => Err(format!(
                "the value {} of \"{}\" is not comparable to {}",
                render(val),
                prop_name,
                render(bound)
            )),
        }
    }
}

fn is_unbounded(v: &Value) -> bool {
    v.as_str() == Some("UNBOUNDED")
}

fn check_length(
    prop_name: &str,
    val: &Value,
    accept: impl Fn(usize) -> bool,
    requirement: &str,
) -> Result<(), String> {
    let len = match val {
        Value::String(s) => s.chars().count(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => {
            return Err(format!(
                "length constraint on \"{}\" requires a string, list or map, got {}",
                prop_name,
                other.type_name()
            ))
        }
    };
    if accept(len) {
        Ok(())
    } else {
        Err(format!(
            "length of value {} of \"{}\" must be {}",
            render(val),
            prop_name,
            requirement
        ))
    }
}

/// Compare two values under the rules of the declared property type.
/// Scalar-units compare by normalized magnitude; unit mismatch in family is
/// a parse failure and yields None.
pub fn compare_values(a: &Value, b: &Value, prop_type: &str) -> Option<Ordering> {
    if let Some(family) = UnitFamily::from_type_name(prop_type) {
        let left = scalar::normalized_value(family, a).ok()?;
        let right = scalar::normalized_value(family, b).ok()?;
        return left.partial_cmp(&right);
    }
    match prop_type {
        "timestamp" => {
            let left = parse_timestamp(a.as_str()?)?;
            let right = parse_timestamp(b.as_str()?)?;
            Some(left.cmp(&right))
        }
        "version" => {
            let left = VersionValue::parse(a.as_str()?).ok()?;
            let right = VersionValue::parse(b.as_str()?).ok()?;
            Some(left.cmp(&right))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => Some(x.cmp(y)),
                _ => None,
            },
        },
    }
}

/// Value equality under the declared type: scalar-units compare normalized,
/// everything else structurally.
pub fn values_equal(a: &Value, b: &Value, prop_type: &str) -> bool {
    if let Some(family) = UnitFamily::from_type_name(prop_type) {
        if let (Ok(x), Ok(y)) = (
            scalar::normalized_value(family, a),
            scalar::normalized_value(family, b),
        ) {
            return x == y;
        }
    }
    // Integer literals compare equal to float literals of the same value.
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

fn parse_timestamp(text: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    chrono::DateTime::parse_from_rfc3339(text).ok()
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s),
        other => other.canonical_string(),
    }
}

/// Validate a value against a schema: type shape, entries, user data types
/// and constraints. Returns every violation found (empty when valid).
///
/// Intrinsic function calls are not validated here; callers skip values
/// that parse as functions and defer to the evaluator.
pub fn validate_value(
    name: &str,
    val: &Value,
    schema: &Schema,
    resolver: Option<&dyn DataTypeResolver>,
) -> Vec<String> {
    let mut errors = Vec::new();
    if value::is_function(val) {
        return errors;
    }
    validate_type_shape(name, val, schema, resolver, &mut errors);
    for constraint in &schema.constraints {
        if let Err(msg) = constraint.check(name, &schema.type_name, val, resolver) {
            errors.push(msg);
        }
    }
    errors
}

fn validate_type_shape(
    name: &str,
    val: &Value,
    schema: &Schema,
    resolver: Option<&dyn DataTypeResolver>,
    errors: &mut Vec<String>,
) {
    let t = schema.type_name.as_str();
    let mismatch = |errors: &mut Vec<String>, expected: &str| {
        errors.push(format!(
            "\"{}\" must be of type \"{}\", got {}",
            name,
            expected,
            val.type_name()
        ));
    };
    match t {
        "any" => {}
        "string" => {
            if val.as_str().is_none() {
                mismatch(errors, t);
            }
        }
        "integer" => {
            if val.as_i64().is_none() {
                mismatch(errors, t);
            }
        }
        "float" | "number" => {
            if val.as_f64().is_none() {
                mismatch(errors, t);
            }
        }
        "boolean" => {
            if val.as_bool().is_none() {
                mismatch(errors, t);
            }
        }
        "null" => {
            if !val.is_null() {
                mismatch(errors, t);
            }
        }
        "timestamp" => match val.as_str() {
            Some(s) if parse_timestamp(s).is_some() => {}
            _ => mismatch(errors, t),
        },
        "version" => match val.as_str() {
            Some(s) if VersionValue::parse(s).is_ok() => {}
            // A bare YAML float like 1.3 also reads as a version.
            _ if val.as_f64().is_some() => {}
            _ => mismatch(errors, t),
        },
        "range" => {
            let ok = val.as_list().is_some_and(|pair| {
                pair.len() == 2
                    && pair
                        .iter()
                        .all(|bound| bound.as_i64().is_some() || is_unbounded(bound))
            });
            if !ok {
                errors.push(format!(
                    "\"{}\" must be a range: a list of two integers (upper bound may be UNBOUNDED)",
                    name
                ));
            }
        }
        "list" => match val.as_list() {
            Some(items) => {
                if let Some(entry) = &schema.entry_schema {
                    for (i, item) in items.iter().enumerate() {
                        errors.extend(validate_value(
                            &format!("{}[{}]", name, i),
                            item,
                            entry,
                            resolver,
                        ));
                    }
                }
            }
            None => mismatch(errors, t),
        },
        "map" => match val.as_map() {
            Some(entries) => {
                for (key, item) in entries {
                    if let Some(key_schema) = &schema.key_schema {
                        errors.extend(validate_value(
                            &format!("{} key \"{}\"", name, key),
                            &Value::String(key.clone()),
                            key_schema,
                            resolver,
                        ));
                    }
                    if let Some(entry) = &schema.entry_schema {
                        errors.extend(validate_value(
                            &format!("{}.{}", name, key),
                            item,
                            entry,
                            resolver,
                        ));
                    }
                }
            }
            None => mismatch(errors, t),
        },
        "scalar-unit.size" | "scalar-unit.time" | "scalar-unit.frequency"
        | "scalar-unit.bitrate" => {
            let family = UnitFamily::from_type_name(t).expect("matched above");
            if let Err(msg) = scalar::normalized_value(family, val) {
                errors.push(format!("\"{}\": {}", name, msg));
            }
        }
        // Everything else is a user data type resolved via the registry.
        custom => match resolver.and_then(|r| r.data_type_schema(custom)) {
            Some(fields) => validate_complex(name, val, &fields, resolver, errors),
            None => errors.push(format!(
                "\"{}\" declares unknown type \"{}\"",
                name, custom
            )),
        },
    }
}

fn validate_complex(
    name: &str,
    val: &Value,
    fields: &IndexMap<String, Schema>,
    resolver: Option<&dyn DataTypeResolver>,
    errors: &mut Vec<String>,
) {
    let map = match val.as_map() {
        Some(m) => m,
        None => {
            errors.push(format!(
                "\"{}\" must be a map of data type fields, got {}",
                name,
                val.type_name()
            ));
            return;
        }
    };
    for key in map.keys() {
        if !fields.contains_key(key) {
            errors.push(format!("\"{}\" contains unknown field \"{}\"", name, key));
        }
    }
    for (field, field_schema) in fields {
        match map.get(field) {
            Some(v) => errors.extend(validate_value(
                &format!("{}.{}", name, field),
                v,
                field_schema,
                resolver,
            )),
            None => {
                if field_schema.required && field_schema.default.is_none() {
                    errors.push(format!(
                        "\"{}\" is missing required field \"{}\"",
                        name, field
                    ));
                }
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Value {
        Value::parse_str(text).unwrap()
    }

    fn clause(prop_type: &str, text: &str) -> Constraint {
        Constraint::parse("prop", prop_type, &v(text)).unwrap()
    }

    #[test]
    fn test_valid_values() {
        let c = clause("integer", "valid_values: [1, 2, 4, 8]");
        assert!(c.check("cpus", "integer", &Value::Integer(2), None).is_ok());
        let err = c.check("cpus", "integer", &Value::Integer(3), None).unwrap_err();
        assert!(err.contains("3"), "message should carry the value: {}", err);
    }

    #[test]
    fn test_in_range_inclusive() {
        let c = clause("integer", "in_range: [1, 4]");
        assert!(c.check("n", "integer", &Value::Integer(1), None).is_ok());
        assert!(c.check("n", "integer", &Value::Integer(4), None).is_ok());
        assert!(c.check("n", "integer", &Value::Integer(5), None).is_err());
    }

    #[test]
    fn test_in_range_unbounded() {
        let c = clause("integer", "in_range: [2, UNBOUNDED]");
        assert!(c.check("n", "integer", &Value::Integer(2_000_000), None).is_ok());
        assert!(c.check("n", "integer", &Value::Integer(1), None).is_err());
    }

    #[test]
    fn test_scalar_unit_range() {
        let c = clause("scalar-unit.size", "in_range: [1 MB, 1 GB]");
        assert!(c
            .check("mem", "scalar-unit.size", &v("\"4 MB\""), None)
            .is_ok());
        assert!(c
            .check("mem", "scalar-unit.size", &v("\"2 GB\""), None)
            .is_err());
        // 1024 KiB == 1 MiB > 1 MB, still inside.
        assert!(c
            .check("mem", "scalar-unit.size", &v("\"1024 KiB\""), None)
            .is_ok());
    }

    #[test]
    fn test_pattern_is_anchored() {
        let c = clause("string", "pattern: \"[a-z]+\"");
        assert!(c.check("s", "string", &v("\"abc\""), None).is_ok());
        assert!(c.check("s", "string", &v("\"abc1\""), None).is_err());
    }

    #[test]
    fn test_length_clauses() {
        let c = clause("string", "min_length: 2");
        assert!(c.check("s", "string", &v("\"ab\""), None).is_ok());
        assert!(c.check("s", "string", &v("\"a\""), None).is_err());
        let c = clause("string", "max_length: 3");
        assert!(c.check("s", "string", &v("\"abcd\""), None).is_err());
    }

    #[test]
    fn test_clause_type_compatibility() {
        assert!(Constraint::parse("p", "string", &v("greater_than: 3")).is_err());
        assert!(Constraint::parse("p", "integer", &v("pattern: \"x\"")).is_err());
        assert!(Constraint::parse("p", "integer", &v("nonsense: 3")).is_err());
    }

    #[test]
    fn test_schema_parse_defaults() {
        let mut errors = Vec::new();
        let schema = Schema::parse("cpus", &v("type: integer\ndefault: 2"), &mut errors);
        assert!(errors.is_empty());
        assert!(schema.required);
        assert_eq!(schema.default, Some(Value::Integer(2)));
    }

    #[test]
    fn test_schema_requires_type() {
        let mut errors = Vec::new();
        Schema::parse("cpus", &v("default: 2"), &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("type"));
    }

    #[test]
    fn test_validate_list_entries() {
        let mut errors = Vec::new();
        let schema = Schema::parse(
            "ports",
            &v("type: list\nentry_schema:\n  type: integer"),
            &mut errors,
        );
        let violations = validate_value("ports", &v("[80, 443, web]"), &schema, None);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("ports[2]"));
    }

    #[test]
    fn test_validate_timestamp_and_version() {
        let schema = Schema::of_type("timestamp");
        assert!(validate_value("t", &v("\"2024-05-01T10:30:00Z\""), &schema, None).is_empty());
        assert!(!validate_value("t", &v("\"not a time\""), &schema, None).is_empty());
        let schema = Schema::of_type("version");
        assert!(validate_value("v", &v("\"1.2.3\""), &schema, None).is_empty());
    }

    #[test]
    fn test_function_values_skip_validation() {
        let schema = Schema::of_type("integer");
        assert!(validate_value("n", &v("{ get_input: cpus }"), &schema, None).is_empty());
    }

    #[test]
    fn test_range_value_in_range() {
        let c = clause("range", "in_range: [0, 100]");
        assert!(c.check("r", "range", &v("[10, 20]"), None).is_ok());
        assert!(c.check("r", "range", &v("[10, 200]"), None).is_err());
    }
}
