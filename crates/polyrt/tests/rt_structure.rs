//! Structural equality, hashing, and copying over a reflected IR.

mod common;

use common::{add, let_in, register_ir_types, var};
use polyrt::structure::{
    copy_deep, copy_replace, copy_shallow, structural_equal, structural_equal_fail_reason,
    structural_hash,
};
use polyrt::value::Any;

fn eq_bound(a: &Any, b: &Any) -> bool {
    structural_equal(a.view(), b.view(), true, false).unwrap()
}

fn eq_free(a: &Any, b: &Any) -> bool {
    structural_equal(a.view(), b.view(), false, false).unwrap()
}

/// Two alpha-equivalent `let` bindings: `let x = 1 in x + 1` versus
/// `let y = 1 in y + 1`.
#[test]
fn test_let_binding_alpha_equivalence() {
    let x = var("x");
    let y = var("y");
    let lhs = Any::from(let_in(&x, 1i64, Any::from(add(Any::from(&x), Any::from(1i64)))));
    let rhs = Any::from(let_in(&y, 1i64, Any::from(add(Any::from(&y), Any::from(1i64)))));
    assert!(eq_bound(&lhs, &rhs));
    // Without free-variable binding the body is traversed before the
    // binder, so its variable is still unbound there.
    assert!(!eq_free(&lhs, &rhs));
    let reason = structural_equal_fail_reason(lhs.view(), rhs.view(), false)
        .unwrap()
        .expect("body var is unbound");
    assert!(reason.contains(".body.a"), "{reason}");
    assert!(reason.contains("Unbound variable"), "{reason}");
}

#[test]
fn test_inconsistent_binding_rejected() {
    let x = var("x");
    let y = var("y");
    // let x = 1 in x + x   vs   let y = 1 in y + <other var>
    let z = var("z");
    let lhs = Any::from(let_in(&x, 1i64, Any::from(add(Any::from(&x), Any::from(&x)))));
    let rhs = Any::from(let_in(&y, 1i64, Any::from(add(Any::from(&y), Any::from(&z)))));
    assert!(!eq_bound(&lhs, &rhs));
}

/// A free variable fails with "Unbound variable" at its path when
/// free-variable binding is off.
#[test]
fn test_free_var_unbound_path() {
    register_ir_types();
    let x = var("x");
    let y = var("y");
    let lhs = Any::from(add(Any::from(&x), Any::from(1i64)));
    let rhs = Any::from(add(Any::from(&y), Any::from(1i64)));
    assert!(eq_bound(&lhs, &rhs), "free vars bind when allowed");
    let reason = structural_equal_fail_reason(lhs.view(), rhs.view(), false)
        .unwrap()
        .expect("must fail without binding");
    assert!(reason.contains(".a"), "path should name the field: {reason}");
    assert!(reason.contains("Unbound variable"), "{reason}");
}

#[test]
fn test_free_var_path_through_let_body() {
    let x = var("x");
    let y = var("y");
    let free = var("free");
    let lhs = Any::from(let_in(&x, 1i64, Any::from(add(Any::from(&free), Any::from(1i64)))));
    let rhs = Any::from(let_in(&y, 1i64, Any::from(add(Any::from(&free), Any::from(1i64)))));
    let reason = structural_equal_fail_reason(lhs.view(), rhs.view(), false)
        .unwrap()
        .expect("the body's var is free");
    assert!(reason.contains(".body.a"), "{reason}");
    assert!(reason.contains("Unbound variable"), "{reason}");
}

/// Equal graphs hash equally, including alpha-equivalent ones.
#[test]
fn test_hash_consistent_with_equality() {
    let x = var("x");
    let y = var("y");
    let lhs = Any::from(let_in(&x, 1i64, Any::from(add(Any::from(&x), Any::from(1i64)))));
    let rhs = Any::from(let_in(&y, 1i64, Any::from(add(Any::from(&y), Any::from(1i64)))));
    assert!(eq_bound(&lhs, &rhs));
    assert_eq!(
        structural_hash(lhs.view()).unwrap(),
        structural_hash(rhs.view()).unwrap()
    );

    let different = Any::from(let_in(&x, 2i64, Any::from(add(Any::from(&x), Any::from(1i64)))));
    assert_ne!(
        structural_hash(lhs.view()).unwrap(),
        structural_hash(different.view()).unwrap()
    );
}

#[test]
fn test_field_mismatch_path() {
    let lhs = Any::from(add(1i64, 2i64));
    let rhs = Any::from(add(1i64, 3i64));
    let reason = structural_equal_fail_reason(lhs.view(), rhs.view(), true)
        .unwrap()
        .expect("b differs");
    assert!(reason.contains(".b"), "{reason}");
    assert!(reason.contains("2 vs 3"), "{reason}");
}

/// Deep copy produces an equal graph sharing no reflected objects.
#[test]
fn test_deep_copy_of_reflected_graph() {
    let x = var("x");
    let shared = add(Any::from(&x), Any::from(1i64));
    let root = add(Any::from(&shared), Any::from(&shared));
    let original = Any::from(&root);

    let copied = copy_deep(original.view()).unwrap();
    assert!(eq_bound(&original, &copied));
    assert_ne!(copied.object_ptr(), original.object_ptr());

    // Sharing preserved inside the copy
    let copied_root = copied.cast::<polyrt::object::Ref<common::AddObj>>().unwrap();
    let a = copied_root.a.object_ptr().unwrap();
    let b = copied_root.b.object_ptr().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, shared.as_ptr() as *mut _);
}

#[test]
fn test_shallow_copy_of_reflected_object() {
    let original = add(7i64, 8i64);
    let copied = copy_shallow(Any::from(&original).view()).unwrap();
    let copied = copied.cast::<polyrt::object::Ref<common::AddObj>>().unwrap();
    assert_ne!(copied.as_ptr(), original.as_ptr());
    assert_eq!(copied.a.cast::<i64>().unwrap(), 7);
    assert_eq!(copied.b.cast::<i64>().unwrap(), 8);
}

#[test]
fn test_copy_replace_overrides_named_field() {
    let original = add(7i64, 8i64);
    let replacement = Any::from(99i64);
    let copied = copy_replace(
        Any::from(&original).view(),
        &[("b", replacement.view())],
    )
    .unwrap();
    let copied = copied.cast::<polyrt::object::Ref<common::AddObj>>().unwrap();
    assert_eq!(copied.a.cast::<i64>().unwrap(), 7);
    assert_eq!(copied.b.cast::<i64>().unwrap(), 99);
}
