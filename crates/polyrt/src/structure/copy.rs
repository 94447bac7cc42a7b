//! Copying - Shallow, Deep, and Replace
//!
//! Reflected objects are reconstructed by calling their `__init__`
//! vtable entry with the current field values; `List`/`Dict` rebuild
//! their payloads directly. `Str`/`Func`/`Error`/`Tensor` have value
//! semantics and are aliased rather than duplicated; `Opaque` cannot be
//! copied at all.

use rustc_hash::FxHashMap;

use crate::containers::{Dict, DictObj, List, ListObj};
use crate::error::Result;
use crate::object::ObjectHeader;
use crate::registry::{self, FieldView};
use crate::structure::visit::{topo_visit, visit_fields};
use crate::value::{ty, Any, AnyView};

fn is_value_semantic(type_index: i32) -> bool {
    matches!(type_index, ty::STR | ty::ERROR | ty::FUNC | ty::TENSOR)
}

/// Rebuild a reflected object from its current field values through its
/// `__init__` constructor, applying `replace` overrides by field name.
fn reconstruct(
    obj: *mut ObjectHeader,
    map_child: &mut dyn FnMut(&Any) -> Result<Any>,
    replace: Option<&FxHashMap<&str, AnyView<'_>>>,
) -> Result<Any> {
    let type_index = unsafe { (*obj).type_index };
    let info = crate::structure::visit::type_info_of(obj)?;
    let mut args: Vec<Any> = Vec::with_capacity(info.fields.len());
    unsafe {
        visit_fields(obj, &info, |field, view| {
            if let Some(replacements) = replace {
                if let Some(value) = replacements.get(field.name.as_str()) {
                    args.push(value.to_owned_any());
                    return Ok(());
                }
            }
            match view {
                FieldView::Any(v) => args.push(map_child(v)?),
                FieldView::ObjRef(r) => {
                    if r.is_null() {
                        args.push(Any::none());
                    } else {
                        let as_any = Any::from(r.clone());
                        args.push(map_child(&as_any)?);
                    }
                }
                pod => args.push(pod.as_any_view().to_owned_any()),
            }
            Ok(())
        })?;
    }
    let init = crate::rethrow!(registry::init_func_of(type_index));
    let views: Vec<AnyView<'_>> = args.iter().map(|a| a.view()).collect();
    Ok(crate::rethrow!(init.call(&views)))
}

/// Shallow copy: PODs are returned as-is, containers get a new payload
/// sharing the same elements, value-semantic objects alias themselves,
/// and reflected objects are rebuilt with their original field values.
pub fn copy_shallow(source: AnyView<'_>) -> Result<Any> {
    let type_index = source.type_index();
    if ty::is_pod(type_index) || is_value_semantic(type_index) {
        return Ok(source.to_owned_any());
    }
    let obj = source.object_ptr().expect("non-POD value");
    match type_index {
        ty::LIST => {
            let list = unsafe { &*(obj as *const ListObj) };
            let out = List::with_capacity(list.len());
            for value in list.elems() {
                out.push(value.clone());
            }
            Ok(Any::from(out))
        }
        ty::DICT => {
            let dict = unsafe { &*(obj as *const DictObj) };
            let out = Dict::with_capacity(dict.len() as u64);
            dict.for_each(|k, v| out.insert(k.clone(), v.clone()));
            Ok(Any::from(out))
        }
        _ => reconstruct(obj, &mut |child| Ok(child.clone()), None),
    }
}

/// Shallow copy with named-field overrides. Only reflected objects can
/// be rebuilt this way.
pub fn copy_replace(source: AnyView<'_>, replacements: &[(&str, AnyView<'_>)]) -> Result<Any> {
    let type_index = source.type_index();
    if ty::is_pod(type_index) {
        crate::throw!(TypeError, "`__replace__` doesn't work on a POD type: {}", source);
    }
    if is_value_semantic(type_index)
        || matches!(type_index, ty::LIST | ty::DICT | ty::OPAQUE)
    {
        crate::throw!(TypeError, "`__replace__` doesn't work on type: {}", source.type_key());
    }
    let map: FxHashMap<&str, AnyView<'_>> = replacements.iter().copied().collect();
    let obj = source.object_ptr().expect("non-POD value");
    reconstruct(obj, &mut |child| Ok(child.clone()), Some(&map))
}

/// Deep copy: a topological walk rebuilds every node from deep-copied
/// children. Shared substructures stay shared through the memo table;
/// value-semantic objects are aliased; `Opaque` fails.
pub fn copy_deep(source: AnyView<'_>) -> Result<Any> {
    let type_index = source.type_index();
    if ty::is_pod(type_index) {
        return Ok(source.to_owned_any());
    }
    if is_value_semantic(type_index) {
        return Ok(source.to_owned_any());
    }
    let root = source.object_ptr().expect("non-POD value");
    let mut memo: FxHashMap<usize, Any> = FxHashMap::default();
    unsafe {
        topo_visit(root, |obj, info| {
            let copied = copy_node(obj, info.type_index, &mut memo)?;
            memo.insert(obj as usize, copied);
            Ok(())
        })?;
    }
    Ok(memo.remove(&(root as usize)).expect("root visited"))
}

fn map_deep_child(child: &Any, memo: &FxHashMap<usize, Any>) -> Result<Any> {
    match child.object_ptr() {
        None => Ok(child.clone()),
        Some(ptr) => {
            let index = unsafe { (*ptr).type_index };
            if is_value_semantic(index) {
                return Ok(child.clone());
            }
            match memo.get(&(ptr as usize)) {
                Some(copied) => Ok(copied.clone()),
                None => crate::throw!(
                    InternalError,
                    "object is missing from the deep-copy memo: {}",
                    child
                ),
            }
        }
    }
}

fn copy_node(
    obj: *mut ObjectHeader,
    type_index: i32,
    memo: &mut FxHashMap<usize, Any>,
) -> Result<Any> {
    match type_index {
        ty::LIST => {
            let list = unsafe { &*(obj as *const ListObj) };
            let out = List::with_capacity(list.len());
            for value in list.elems() {
                out.push(map_deep_child(value, memo)?);
            }
            Ok(Any::from(out))
        }
        ty::DICT => {
            let dict = unsafe { &*(obj as *const DictObj) };
            let out = Dict::with_capacity(dict.len() as u64);
            let mut failure = None;
            dict.for_each(|k, v| {
                if failure.is_some() {
                    return;
                }
                match (map_deep_child(k, memo), map_deep_child(v, memo)) {
                    (Ok(k), Ok(v)) => out.insert(k, v),
                    (Err(e), _) | (_, Err(e)) => failure = Some(e),
                }
            });
            match failure {
                Some(e) => Err(e),
                None => Ok(Any::from(out)),
            }
        }
        index if is_value_semantic(index) => {
            Ok(unsafe { Any::from_view(AnyView::from_raw(crate::value::AnyRaw {
                type_index: index,
                small_len: 0,
                v: crate::value::RawValue { v_obj: obj },
            })) })
        }
        ty::OPAQUE => {
            let name = unsafe { &(*(obj as *const crate::containers::OpaqueObj)).type_name };
            crate::throw!(TypeError, "Cannot copy `object.Opaque` of type: {}", name)
        }
        _ => reconstruct(obj, &mut |child| map_deep_child(child, memo), None),
    }
}
