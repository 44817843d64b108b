//! Type tags, values, and method signatures.
//!
//! BotMesh resolves methods without host-language reflection: a component
//! publishes an ordered table of [`MethodSignature`]s at registration time,
//! and the dispatcher matches call arguments against them using a pure
//! widening rule over [`TypeTag`]s. [`Value`] is the wire representation of
//! an argument or result; its [`Value::type_tag`] is what the matcher sees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Class name every reference type widens to.
pub const OBJECT_CLASS: &str = "Object";

/// Class name the numeric primitive families widen to.
pub const NUMBER_CLASS: &str = "Number";

/// Language-neutral type tag used in method signatures.
///
/// Primitive tags (`Int`, `Float`, `Bool`, `Str`) are normalized to their
/// object counterparts during matching, so a declared `Class("Number")`
/// parameter accepts an `Int` argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    Array(Box<TypeTag>),
    /// A named object type, matched through the catalog's type hierarchy.
    Class(String),
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Str => write!(f, "str"),
            TypeTag::Array(elem) => write!(f, "array<{elem}>"),
            TypeTag::Class(name) => write!(f, "{name}"),
        }
    }
}

/// A dynamically typed argument or result value.
///
/// `Object` values carry their class name so the widening matcher can walk
/// the type hierarchy; fields use a `BTreeMap` for a stable wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(Vec<Value>),
    Object {
        class: String,
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    /// The runtime [`TypeTag`] of this value.
    ///
    /// Returns `None` for [`Value::Null`]: null carries no type of its own
    /// and is matched specially (assignable to any reference parameter,
    /// never to a primitive one).
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(TypeTag::Int),
            Value::Float(_) => Some(TypeTag::Float),
            Value::Bool(_) => Some(TypeTag::Bool),
            Value::Str(_) => Some(TypeTag::Str),
            Value::Array(items) => {
                let elem = items
                    .iter()
                    .find_map(Value::type_tag)
                    .unwrap_or(TypeTag::Class(OBJECT_CLASS.to_string()));
                Some(TypeTag::Array(Box::new(elem)))
            }
            Value::Object { class, .. } => Some(TypeTag::Class(class.clone())),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// One callable method: a name plus an ordered parameter type list.
///
/// Catalog entries are immutable once published; enumeration order is the
/// order signatures were declared in, and the dispatcher's first-match rule
/// depends on that order being stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<TypeTag>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: Vec<TypeTag>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")
    }
}

/// Descriptive `(key, value)` metadata handed to dependency hooks, telling
/// the component which dependency changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: String,
    pub value: String,
}

impl Constraint {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The conventional constraint naming a server-side dependency by its
    /// interface type.
    pub fn server(interface: impl Into<String>) -> Self {
        Self::new("server", interface)
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
