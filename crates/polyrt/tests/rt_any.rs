//! Value-layer universal properties: subtype tests, view/owned
//! round-trips, and reference-count neutrality of the read-only
//! algorithms.

mod common;

use common::{add, var};
use polyrt::containers::{Dict, List, Str};
use polyrt::object::{Obj, ObjectType, Ref};
use polyrt::registry;
use polyrt::structure::{json_serialize, structural_equal, structural_hash};
use polyrt::value::{ty, Any, AnyView, DataType, Device};

/// `is_instance(B, A)` iff `B.type_ancestors[A.type_depth] == A.type_index`
/// or `B == A`.
#[test]
fn test_subtype_ancestor_formula() {
    let table = registry::global();
    let base = table.type_register(ty::OBJECT, "rt_any.Base", -1).unwrap();
    let mid = table.type_register(base.type_index, "rt_any.Mid", -1).unwrap();
    let leaf = table.type_register(mid.type_index, "rt_any.Leaf", -1).unwrap();

    assert_eq!(leaf.type_depth, 3);
    assert_eq!(leaf.type_ancestors, vec![ty::OBJECT, base.type_index, mid.type_index]);

    // Formula cross-check over every pair
    let all = [ty::OBJECT, base.type_index, mid.type_index, leaf.type_index];
    for &child in &all {
        for &parent in &all {
            let child_info = registry::type_info(child).unwrap();
            let parent_info = registry::type_info(parent).unwrap();
            let expected = child == parent
                || child_info.type_ancestors.get(parent_info.type_depth as usize)
                    == Some(&parent);
            assert_eq!(
                registry::is_instance(child, parent),
                expected,
                "is_instance({child}, {parent})"
            );
        }
    }
    assert!(!registry::is_instance(base.type_index, leaf.type_index));
}

/// `Any::from(AnyView::from(v))` is structurally equal to `v`, and POD
/// casts return the original value.
#[test]
fn test_view_owned_roundtrip() {
    let values = [
        Any::from(true),
        Any::from(-5i64),
        Any::from(2.75f64),
        Any::from("text"),
        Any::from(Device::new(polyrt::value::device_type::CUDA, 1)),
        Any::from(DataType::new(polyrt::value::dtype_code::INT, 32, 1)),
        Any::from(&List::from_iter([1i64, 2])),
        Any::none(),
    ];
    for v in &values {
        let owned = v.view().to_owned_any();
        assert!(
            structural_equal(v.view(), owned.view(), true, false).unwrap(),
            "round-trip changed {v:?}"
        );
    }

    assert_eq!(Any::from(42i64).cast::<i64>().unwrap(), 42);
    assert_eq!(Any::from(1.5f64).cast::<f64>().unwrap(), 1.5);
    assert!(Any::from(true).cast::<bool>().unwrap());
    assert_eq!(Any::from("abc").cast::<String>().unwrap(), "abc");
}

/// Read-only algorithms must not leak or drop references.
#[test]
fn test_refcount_neutrality_of_read_only_ops() {
    let leaf = Str::new("leaf");
    let x = var("x");
    let graph = add(Any::from(&leaf), Any::from(&x));
    let value = Any::from(&graph);
    let other = Any::from(&add(Any::from(&leaf), Any::from(&x)));

    let baseline = (
        leaf.obj().header().ref_count(),
        x.header().ref_count(),
        graph.header().ref_count(),
    );

    let _ = structural_equal(value.view(), other.view(), true, false).unwrap();
    let _ = structural_hash(value.view()).unwrap();
    let _ = json_serialize(value.view()).unwrap();
    let _ = value.to_string();

    let after = (
        leaf.obj().header().ref_count(),
        x.header().ref_count(),
        graph.header().ref_count(),
    );
    assert_eq!(baseline, after, "read-only operations changed refcounts");
}

#[test]
fn test_clone_drop_balance() {
    let obj = Obj::create();
    {
        let a = Any::from(&obj);
        let views: Vec<AnyView<'_>> = (0..10).map(|_| a.view()).collect();
        assert_eq!(obj.header().ref_count(), 2, "views take no references");
        let owned: Vec<Any> = views.iter().map(|v| v.to_owned_any()).collect();
        assert_eq!(obj.header().ref_count(), 12);
        drop(owned);
        assert_eq!(obj.header().ref_count(), 2);
    }
    assert_eq!(obj.header().ref_count(), 1);
}

#[test]
fn test_container_storage_takes_ownership() {
    let obj = Obj::create();
    let dict = Dict::new();
    dict.insert(Any::from("k"), Any::from(&obj));
    let list = List::new();
    list.push(dict.at(AnyView::from("k")).unwrap());
    assert_eq!(obj.header().ref_count(), 3);
    drop(dict);
    assert_eq!(obj.header().ref_count(), 2);
    drop(list);
    assert_eq!(obj.header().ref_count(), 1);
}

#[test]
fn test_null_semantics() {
    // None converts into nullable targets and fails into non-nullable
    let none = Any::none();
    assert_eq!(none.cast::<Option<i64>>().unwrap(), None);
    assert!(none.cast::<Ref<Obj>>().unwrap().is_null());
    assert_eq!(none.cast::<i64>().unwrap_err().kind, "TypeError");
    assert_eq!(none.cast::<Str>().unwrap_err().kind, "TypeError");

    // Optional stores Some as the payload's own tag
    let some = Any::from(Some(3i64));
    assert_eq!(some.type_index(), ty::INT);
    let stored_none = Any::from(None::<i64>);
    assert!(stored_none.is_none());
}

#[test]
fn test_conversion_error_names_types() {
    let err = Any::from(&List::new()).cast::<Dict>().unwrap_err();
    assert_eq!(
        err.message,
        "Cannot convert from type `object.List` to `object.Dict`"
    );
    let err = Any::from("x").cast::<i64>().unwrap_err();
    assert_eq!(err.message, "Cannot convert from type `object.Str` to `int`");
}

#[test]
fn test_object_type_constants() {
    assert_eq!(Obj::type_index(), ty::OBJECT);
    assert_eq!(common::VarObj::TYPE_KEY, "ir.Var");
    assert!(common::VarObj::type_index() >= ty::DYN_OBJECT_BEGIN);
}
