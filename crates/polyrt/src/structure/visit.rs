//! Graph Visitation - Reflected Fields and Topological Walks
//!
//! The structural algorithms see objects through two primitives: field
//! visitation (iterate a reflected type's fields in offset order,
//! reading each through its typed accessor) and a topological post-order
//! walk (children before parents, each node once) used by deep copy and
//! serialization.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::containers::{DictObj, ListObj};
use crate::error::Result;
use crate::object::ObjectHeader;
use crate::registry::{self, FieldInfo, FieldView, TypeInfo};
use crate::value::{ty, Any};

/// Iterate `info`'s reflected fields over the object at `obj`.
///
/// # Safety
///
/// `obj` must point to a live object laid out as `info` describes.
pub unsafe fn visit_fields(
    obj: *mut ObjectHeader,
    info: &TypeInfo,
    mut f: impl FnMut(&FieldInfo, FieldView<'_>) -> Result<()>,
) -> Result<()> {
    let base = obj as *const u8;
    for field in &info.fields {
        f(field, field.access.read(base, field.offset))?;
    }
    Ok(())
}

fn push_child(out: &mut Vec<*mut ObjectHeader>, value: &Any) {
    if let Some(ptr) = value.object_ptr() {
        // Strings are leaves with inline value semantics; they are never
        // separate graph nodes.
        if unsafe { (*ptr).type_index } != ty::STR {
            out.push(ptr);
        }
    }
}

/// Object-valued children of a node, in traversal order.
///
/// # Safety
///
/// `obj` must point to a live object of its tagged type.
pub(crate) unsafe fn children_of(obj: *mut ObjectHeader) -> Result<Vec<*mut ObjectHeader>> {
    let type_index = (*obj).type_index;
    let mut out = Vec::new();
    match type_index {
        ty::LIST => {
            let list = &*(obj as *const ListObj);
            for value in list.elems() {
                push_child(&mut out, value);
            }
        }
        ty::DICT => {
            let dict = &*(obj as *const DictObj);
            dict.for_each(|k, v| {
                push_child(&mut out, k);
                push_child(&mut out, v);
            });
        }
        ty::STR | ty::FUNC | ty::ERROR | ty::TENSOR | ty::OPAQUE => {}
        _ => {
            let info = type_info_of(obj)?;
            visit_fields(obj, &info, |_, view| {
                match view {
                    FieldView::Any(v) => push_child(&mut out, v),
                    FieldView::ObjRef(r) => {
                        if !r.is_null() && r.type_index() != ty::STR {
                            out.push(r.as_ptr());
                        }
                    }
                    _ => {}
                }
                Ok(())
            })?;
        }
    }
    Ok(out)
}

pub(crate) fn type_info_of(obj: *mut ObjectHeader) -> Result<Arc<TypeInfo>> {
    let type_index = unsafe { (*obj).type_index };
    match registry::type_info(type_index) {
        Some(info) => Ok(info),
        None => crate::throw!(InternalError, "Type index `{}` has no registered info", type_index),
    }
}

/// Post-order traversal from `root`: every reachable object is visited
/// exactly once, after all of its children. The walk does not detect
/// cycles; acyclicity is the caller's obligation, as everywhere in the
/// reference-counted graph.
///
/// # Safety
///
/// `root` must point to a live object graph that stays unmodified for
/// the duration of the walk.
pub(crate) unsafe fn topo_visit(
    root: *mut ObjectHeader,
    mut visit: impl FnMut(*mut ObjectHeader, &Arc<TypeInfo>) -> Result<()>,
) -> Result<()> {
    let mut visited: FxHashSet<usize> = FxHashSet::default();
    let mut stack: Vec<(*mut ObjectHeader, bool)> = vec![(root, false)];
    while let Some((obj, expanded)) = stack.pop() {
        if expanded {
            let info = type_info_of(obj)?;
            visit(obj, &info)?;
            continue;
        }
        if !visited.insert(obj as usize) {
            continue;
        }
        stack.push((obj, true));
        let children = children_of(obj)?;
        // Reverse so children are expanded in declaration order.
        for child in children.into_iter().rev() {
            if !visited.contains(&(child as usize)) {
                stack.push((child, false));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::List;

    #[test]
    fn test_topo_visits_children_first() {
        let inner = List::new();
        inner.push(Any::from(1i64));
        let outer = List::new();
        outer.push(Any::from(&inner));
        outer.push(Any::from(2i64));

        let mut order = Vec::new();
        unsafe {
            topo_visit(outer.obj().as_ptr() as *mut ObjectHeader, |obj, _| {
                order.push(obj as usize);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], inner.obj().as_ptr() as usize);
        assert_eq!(order[1], outer.obj().as_ptr() as usize);
    }

    #[test]
    fn test_shared_child_visited_once() {
        let shared = List::new();
        let outer = List::new();
        outer.push(Any::from(&shared));
        outer.push(Any::from(&shared));

        let mut count = 0;
        unsafe {
            topo_visit(outer.obj().as_ptr() as *mut ObjectHeader, |_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(count, 2, "shared child plus root");
    }

    #[test]
    fn test_strings_are_not_graph_nodes() {
        let list = List::new();
        list.push(Any::from("leaf"));
        let mut visited_types = Vec::new();
        unsafe {
            topo_visit(list.obj().as_ptr() as *mut ObjectHeader, |obj, _| {
                visited_types.push((*obj).type_index);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(visited_types, vec![ty::LIST]);
    }
}
