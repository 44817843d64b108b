//! Pure widening-match functions.
//!
//! The matcher compares a declared parameter list against the runtime tags
//! of an argument list. The rule is widening-only: a declared type accepts
//! an argument whose type widens to it after primitives are normalized into
//! their object families, and nothing else. Resolution takes the **first**
//! signature in catalog enumeration order that accepts every argument;
//! there is no further ambiguity resolution.

use botmesh_types::{MethodSignature, TypeTag, Value};

use crate::catalog::TypeHierarchy;

/// Object-family class name a primitive tag normalizes to.
fn boxed_class(tag: &TypeTag) -> Option<&str> {
    match tag {
        TypeTag::Int => Some("Int"),
        TypeTag::Float => Some("Float"),
        TypeTag::Bool => Some("Bool"),
        TypeTag::Str => Some("Str"),
        TypeTag::Array(_) | TypeTag::Class(_) => None,
    }
}

/// Whether an argument value may be passed where `declared` is expected.
///
/// * `Null` is assignable to any reference parameter (`Class` or `Array`),
///   never to a primitive one.
/// * Primitive tags match exactly; there is no implicit `Int → Float`
///   conversion, only widening into the `Number`/`Object` families via a
///   declared `Class` parameter.
/// * `Class` parameters accept any argument whose (possibly boxed) class
///   widens to the declared class through `hierarchy`.
/// * `Array` parameters are covariant in their element type.
pub fn assignable(declared: &TypeTag, arg: &Value, hierarchy: &TypeHierarchy) -> bool {
    let Some(arg_tag) = arg.type_tag() else {
        return matches!(declared, TypeTag::Class(_) | TypeTag::Array(_));
    };
    tag_assignable(declared, &arg_tag, hierarchy)
}

fn tag_assignable(declared: &TypeTag, arg: &TypeTag, hierarchy: &TypeHierarchy) -> bool {
    if declared == arg {
        return true;
    }
    match declared {
        TypeTag::Class(target) => {
            let arg_class = match arg {
                TypeTag::Class(c) => c.as_str(),
                TypeTag::Array(_) => return target == botmesh_types::value::OBJECT_CLASS,
                primitive => match boxed_class(primitive) {
                    Some(c) => c,
                    None => return false,
                },
            };
            hierarchy.widens_to(arg_class, target)
        }
        TypeTag::Array(declared_elem) => match arg {
            TypeTag::Array(arg_elem) => tag_assignable(declared_elem, arg_elem, hierarchy),
            _ => false,
        },
        // Primitive parameters take exactly their own tag.
        _ => false,
    }
}

/// Whether `sig` accepts the whole argument list.
pub fn signature_accepts(
    sig: &MethodSignature,
    args: &[Value],
    hierarchy: &TypeHierarchy,
) -> bool {
    sig.arity() == args.len()
        && sig
            .params
            .iter()
            .zip(args)
            .all(|(declared, arg)| assignable(declared, arg, hierarchy))
}

/// Resolve a call to the index of the first signature (in enumeration
/// order) named `method` that accepts `args`. Deterministic for a fixed
/// catalog and argument list.
pub fn resolve_first_match(
    signatures: &[MethodSignature],
    method: &str,
    args: &[Value],
    hierarchy: &TypeHierarchy,
) -> Option<usize> {
    signatures
        .iter()
        .position(|sig| sig.name == method && signature_accepts(sig, args, hierarchy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use botmesh_types::value::{NUMBER_CLASS, OBJECT_CLASS};

    fn number() -> TypeTag {
        TypeTag::Class(NUMBER_CLASS.to_string())
    }

    #[test]
    fn exact_primitive_match() {
        let h = TypeHierarchy::new();
        assert!(assignable(&TypeTag::Float, &Value::Float(1.0), &h));
        assert!(assignable(&TypeTag::Int, &Value::Int(3), &h));
    }

    #[test]
    fn int_does_not_silently_become_float() {
        let h = TypeHierarchy::new();
        assert!(!assignable(&TypeTag::Float, &Value::Int(3), &h));
        assert!(!assignable(&TypeTag::Int, &Value::Float(3.0), &h));
    }

    #[test]
    fn int_widens_to_number_parameter() {
        let h = TypeHierarchy::new();
        assert!(assignable(&number(), &Value::Int(3), &h));
        assert!(assignable(&number(), &Value::Float(3.0), &h));
    }

    #[test]
    fn string_never_matches_a_numeric_parameter() {
        let h = TypeHierarchy::new();
        assert!(!assignable(&number(), &Value::from("not-a-number"), &h));
        assert!(!assignable(&TypeTag::Float, &Value::from("1.0"), &h));
        assert!(!assignable(&TypeTag::Int, &Value::from("3"), &h));
    }

    #[test]
    fn everything_widens_to_object_parameter() {
        let h = TypeHierarchy::new();
        let object = TypeTag::Class(OBJECT_CLASS.to_string());
        assert!(assignable(&object, &Value::Int(1), &h));
        assert!(assignable(&object, &Value::from("s"), &h));
        assert!(assignable(&object, &Value::Array(vec![Value::Int(1)]), &h));
    }

    #[test]
    fn null_matches_reference_parameters_only() {
        let h = TypeHierarchy::new();
        assert!(assignable(
            &TypeTag::Class("Pose".to_string()),
            &Value::Null,
            &h
        ));
        assert!(assignable(
            &TypeTag::Array(Box::new(TypeTag::Int)),
            &Value::Null,
            &h
        ));
        assert!(!assignable(&TypeTag::Float, &Value::Null, &h));
        assert!(!assignable(&TypeTag::Bool, &Value::Null, &h));
    }

    #[test]
    fn arrays_are_covariant() {
        let h = TypeHierarchy::new();
        let number_array = TypeTag::Array(Box::new(number()));
        assert!(assignable(
            &number_array,
            &Value::Array(vec![Value::Int(1), Value::Int(2)]),
            &h
        ));
        assert!(!assignable(
            &number_array,
            &Value::Array(vec![Value::from("x")]),
            &h
        ));
    }

    #[test]
    fn declared_subclass_chain_matches() {
        let mut h = TypeHierarchy::new();
        h.declare("StampedPose", vec!["Pose".to_string()]);
        let arg = Value::Object {
            class: "StampedPose".to_string(),
            fields: Default::default(),
        };
        assert!(assignable(&TypeTag::Class("Pose".to_string()), &arg, &h));
        assert!(!assignable(
            &TypeTag::Class("StampedPose".to_string()),
            &Value::Object {
                class: "Pose".to_string(),
                fields: Default::default(),
            },
            &h
        ));
    }

    #[test]
    fn arity_must_match() {
        let h = TypeHierarchy::new();
        let sig = MethodSignature::new("setVels", vec![TypeTag::Float, TypeTag::Float]);
        assert!(!signature_accepts(&sig, &[Value::Float(1.0)], &h));
        assert!(signature_accepts(
            &sig,
            &[Value::Float(1.0), Value::Float(0.0)],
            &h
        ));
    }

    #[test]
    fn first_match_in_enumeration_order_wins() {
        let h = TypeHierarchy::new();
        let signatures = vec![
            MethodSignature::new("setVels", vec![number(), number()]),
            MethodSignature::new("setVels", vec![TypeTag::Float, TypeTag::Float]),
        ];
        // Both accept (Float, Float); the earlier, wider one is selected.
        let idx = resolve_first_match(
            &signatures,
            "setVels",
            &[Value::Float(1.0), Value::Float(0.0)],
            &h,
        );
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn resolution_is_stable_across_repeated_calls() {
        let h = TypeHierarchy::new();
        let signatures = vec![
            MethodSignature::new("go", vec![number()]),
            MethodSignature::new("go", vec![TypeTag::Int]),
        ];
        let args = [Value::Int(7)];
        let first = resolve_first_match(&signatures, "go", &args, &h);
        for _ in 0..10 {
            assert_eq!(resolve_first_match(&signatures, "go", &args, &h), first);
        }
    }

    #[test]
    fn wrong_name_resolves_to_none() {
        let h = TypeHierarchy::new();
        let signatures = vec![MethodSignature::new("stop", vec![])];
        assert_eq!(resolve_first_match(&signatures, "halt", &[], &h), None);
    }
}
