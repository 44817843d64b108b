//! [`Catalog`] – the ordered method-signature table a component publishes.
//!
//! Entries are immutable once published: the registry hands the catalog out
//! to callers verbatim, and the first-match dispatch rule depends on the
//! enumeration order never changing after registration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use botmesh_types::value::{NUMBER_CLASS, OBJECT_CLASS};
use botmesh_types::{MethodSignature, TypeTag};

/// Widening relationships between named object types.
///
/// Maps each class to its direct supertypes; [`TypeHierarchy::widens_to`]
/// walks the closure. The built-in families are always present:
/// `Int`/`Float` widen through `Number`, and every class widens to
/// `Object`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeHierarchy {
    supertypes: HashMap<String, Vec<String>>,
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        let mut supertypes = HashMap::new();
        supertypes.insert("Int".to_string(), vec![NUMBER_CLASS.to_string()]);
        supertypes.insert("Float".to_string(), vec![NUMBER_CLASS.to_string()]);
        supertypes.insert(NUMBER_CLASS.to_string(), vec![OBJECT_CLASS.to_string()]);
        supertypes.insert("Bool".to_string(), vec![OBJECT_CLASS.to_string()]);
        supertypes.insert("Str".to_string(), vec![OBJECT_CLASS.to_string()]);
        Self { supertypes }
    }
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a class with its direct supertypes.
    ///
    /// Classes with no declared supertypes still widen to `Object`.
    /// Re-declaring a class replaces its supertype list.
    pub fn declare(&mut self, class: impl Into<String>, supertypes: Vec<String>) {
        self.supertypes.insert(class.into(), supertypes);
    }

    /// Whether `class` widens to `target` (reflexively and transitively).
    ///
    /// Every class widens to itself and to `Object`, including classes the
    /// hierarchy has never seen.
    pub fn widens_to(&self, class: &str, target: &str) -> bool {
        if class == target || target == OBJECT_CLASS {
            return true;
        }
        let mut pending = vec![class];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(current) = pending.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(supers) = self.supertypes.get(current) {
                for s in supers {
                    if s == target {
                        return true;
                    }
                    pending.push(s);
                }
            }
        }
        false
    }
}

/// Ordered signature table for one component type.
///
/// Built before registration, then treated as read-only. Methods may be
/// overloaded: the same name may appear with different parameter lists, and
/// resolution takes the first declared signature that accepts the
/// arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    signatures: Vec<MethodSignature>,
    hierarchy: TypeHierarchy,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a method signature. Declaration order is enumeration order.
    pub fn method(mut self, name: impl Into<String>, params: Vec<TypeTag>) -> Self {
        self.signatures.push(MethodSignature::new(name, params));
        self
    }

    /// Declare an object class used by this catalog's signatures.
    pub fn class(mut self, class: impl Into<String>, supertypes: Vec<String>) -> Self {
        self.hierarchy.declare(class, supertypes);
        self
    }

    pub fn signatures(&self) -> &[MethodSignature] {
        &self.signatures
    }

    pub fn signature(&self, index: usize) -> Option<&MethodSignature> {
        self.signatures.get(index)
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_numeric_family() {
        let h = TypeHierarchy::new();
        assert!(h.widens_to("Int", NUMBER_CLASS));
        assert!(h.widens_to("Float", NUMBER_CLASS));
        assert!(h.widens_to("Int", OBJECT_CLASS));
        assert!(!h.widens_to("Str", NUMBER_CLASS));
    }

    #[test]
    fn widening_is_reflexive() {
        let h = TypeHierarchy::new();
        assert!(h.widens_to("Pose", "Pose"));
    }

    #[test]
    fn unknown_class_still_widens_to_object() {
        let h = TypeHierarchy::new();
        assert!(h.widens_to("NeverDeclared", OBJECT_CLASS));
    }

    #[test]
    fn declared_chain_is_transitive() {
        let mut h = TypeHierarchy::new();
        h.declare("StampedPose", vec!["Pose".to_string()]);
        h.declare("Pose", vec!["Geometry".to_string()]);
        assert!(h.widens_to("StampedPose", "Geometry"));
        assert!(!h.widens_to("Geometry", "StampedPose"));
    }

    #[test]
    fn cyclic_declarations_terminate() {
        let mut h = TypeHierarchy::new();
        h.declare("A", vec!["B".to_string()]);
        h.declare("B", vec!["A".to_string()]);
        assert!(h.widens_to("A", "B"));
        assert!(!h.widens_to("A", "C"));
    }

    #[test]
    fn catalog_preserves_declaration_order() {
        let catalog = Catalog::new()
            .method("setVels", vec![TypeTag::Float, TypeTag::Float])
            .method("setVels", vec![TypeTag::Class(NUMBER_CLASS.to_string()); 2])
            .method("stop", vec![]);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.signature(0).unwrap().params[0], TypeTag::Float);
        assert_eq!(catalog.signature(2).unwrap().name, "stop");
    }

    #[test]
    fn catalog_roundtrip() {
        let catalog = Catalog::new()
            .class("Pose", vec![OBJECT_CLASS.to_string()])
            .method("moveTo", vec![TypeTag::Class("Pose".to_string())]);
        let json = serde_json::to_string(&catalog).unwrap();
        let back: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert!(back.hierarchy().widens_to("Pose", OBJECT_CLASS));
    }
}
