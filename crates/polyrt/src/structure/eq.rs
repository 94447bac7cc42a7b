//! Structural Equality
//!
//! Traverses two object graphs in lockstep with an explicit task stack.
//! Reflected types recurse through their fields; `Bind`-kind types (and
//! `Var`-kind types when free variables may bind) record an lhs/rhs pair
//! in a two-way binding table on exit, and later occurrences must map
//! consistently. A mismatch raises an internal error carrying an
//! [`ObjectPath`]; only the public entry points catch it.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::config;
use crate::containers::{DictObj, ListObj, StrObj, TensorObj};
use crate::error::{Result, RtError};
use crate::object::ObjectHeader;
use crate::registry::{self, FieldKind, FieldView, StructureKind, TypeInfo};
use crate::structure::path::ObjectPath;
use crate::structure::visit::type_info_of;
use crate::value::{ty, AnyRaw, AnyView};

struct SEqualError {
    message: String,
    path: ObjectPath,
}

enum EqFail {
    /// The graphs differ (or contain incomparable nodes).
    Mismatch(Box<SEqualError>),
    /// The traversal itself broke (missing metadata).
    Fatal(RtError),
}

type EqResult<T> = std::result::Result<T, EqFail>;

fn mismatch<T>(message: String, path: &ObjectPath) -> EqResult<T> {
    Err(EqFail::Mismatch(Box::new(SEqualError { message, path: path.clone() })))
}

fn value_mismatch<T>(lhs: impl std::fmt::Display, rhs: impl std::fmt::Display, path: &ObjectPath) -> EqResult<T> {
    mismatch(format!("{lhs} vs {rhs}"), path)
}

struct Task {
    lhs: *mut ObjectHeader,
    rhs: *mut ObjectHeader,
    info: Arc<TypeInfo>,
    visited: bool,
    bind_free_vars: bool,
    path: ObjectPath,
    /// Mismatch recorded during expansion, surfaced after the children
    /// compared equal (so the deepest difference wins).
    err: Option<String>,
}

struct Machine {
    tasks: Vec<Task>,
    lhs_to_rhs: FxHashMap<usize, usize>,
    rhs_to_lhs: FxHashMap<usize, usize>,
    tol_f32: f64,
    tol_f64: f64,
}

impl Machine {
    fn new() -> Machine {
        let cfg = config::current();
        Machine {
            tasks: Vec::new(),
            lhs_to_rhs: FxHashMap::default(),
            rhs_to_lhs: FxHashMap::default(),
            tol_f32: cfg.float_tolerance_f32,
            tol_f64: cfg.float_tolerance_f64,
        }
    }

    fn f32_eq(&self, a: f32, b: f32) -> bool {
        ((a - b) as f64).abs() < self.tol_f32
    }

    fn f64_eq(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.tol_f64
    }

    /// Binding consistency: true when the pair is already proven equal.
    fn check_bind(&self, lhs: *mut ObjectHeader, rhs: *mut ObjectHeader, path: &ObjectPath) -> EqResult<bool> {
        let l = self.lhs_to_rhs.get(&(lhs as usize));
        let r = self.rhs_to_lhs.get(&(rhs as usize));
        match (l, r) {
            (Some(&mapped_rhs), Some(&mapped_lhs)) => {
                if mapped_rhs == rhs as usize && mapped_lhs == lhs as usize {
                    Ok(true)
                } else {
                    mismatch(
                        "Inconsistent binding: LHS and RHS are both bound, but to different nodes"
                            .to_string(),
                        path,
                    )
                }
            }
            (Some(_), None) => mismatch(
                "Inconsistent binding. LHS has been bound to a different node while RHS is not bound"
                    .to_string(),
                path,
            ),
            (None, Some(_)) => mismatch(
                "Inconsistent binding. RHS has been bound to a different node while LHS is not bound"
                    .to_string(),
                path,
            ),
            (None, None) => Ok(false),
        }
    }

    fn enqueue_any(
        &mut self,
        bind_free_vars: bool,
        lhs: &AnyRaw,
        rhs: &AnyRaw,
        path: ObjectPath,
    ) -> EqResult<()> {
        if lhs.type_index != rhs.type_index {
            return value_mismatch(
                registry::type_key(lhs.type_index),
                registry::type_key(rhs.type_index),
                &path,
            );
        }
        let display = |raw: &AnyRaw| unsafe { AnyView::from_raw(*raw) }.to_string();
        let eq = match lhs.type_index {
            ty::NONE => return Ok(()),
            ty::BOOL => unsafe { lhs.v.v_bool == rhs.v.v_bool },
            ty::INT => unsafe { lhs.v.v_int64 == rhs.v.v_int64 },
            ty::FLOAT => unsafe { self.f64_eq(lhs.v.v_float64, rhs.v.v_float64) },
            ty::PTR => unsafe { lhs.v.v_ptr == rhs.v.v_ptr },
            ty::DATA_TYPE => unsafe { lhs.v.v_dtype == rhs.v.v_dtype },
            ty::DEVICE => unsafe { lhs.v.v_device == rhs.v.v_device },
            ty::RAW_STR => unsafe { lhs.raw_str_bytes() == rhs.raw_str_bytes() },
            _ => {
                return self.enqueue_task(
                    bind_free_vars,
                    unsafe { lhs.obj_ptr() },
                    unsafe { rhs.obj_ptr() },
                    path,
                );
            }
        };
        if eq {
            Ok(())
        } else {
            value_mismatch(display(lhs), display(rhs), &path)
        }
    }

    fn enqueue_task(
        &mut self,
        bind_free_vars: bool,
        lhs: *mut ObjectHeader,
        rhs: *mut ObjectHeader,
        path: ObjectPath,
    ) -> EqResult<()> {
        let lhs_index = if lhs.is_null() { ty::NONE } else { unsafe { (*lhs).type_index } };
        let rhs_index = if rhs.is_null() { ty::NONE } else { unsafe { (*rhs).type_index } };
        if lhs_index != rhs_index {
            return value_mismatch(
                registry::type_key(lhs_index),
                registry::type_key(rhs_index),
                &path,
            );
        }
        match lhs_index {
            ty::NONE => Ok(()),
            ty::STR => {
                let (l, r) = unsafe { (&*(lhs as *const StrObj), &*(rhs as *const StrObj)) };
                if l == r {
                    Ok(())
                } else {
                    value_mismatch(l, r, &path)
                }
            }
            ty::TENSOR => self.compare_tensors(
                unsafe { &*(lhs as *const TensorObj) },
                unsafe { &*(rhs as *const TensorObj) },
                &path,
            ),
            ty::FUNC | ty::ERROR => {
                mismatch("Cannot compare `object.Func` or `object.Error`".to_string(), &path)
            }
            ty::OPAQUE => {
                let name =
                    unsafe { &(*(lhs as *const crate::containers::OpaqueObj)).type_name };
                mismatch(format!("Cannot compare `object.Opaque` of type: {name}"), &path)
            }
            _ => {
                let info = type_info_of(lhs).map_err(EqFail::Fatal)?;
                self.tasks.push(Task {
                    lhs,
                    rhs,
                    info,
                    visited: false,
                    bind_free_vars,
                    path,
                    err: None,
                });
                Ok(())
            }
        }
    }

    fn compare_tensors(&self, lhs: &TensorObj, rhs: &TensorObj, path: &ObjectPath) -> EqResult<()> {
        if lhs.tensor.ndim != rhs.tensor.ndim {
            return value_mismatch(lhs.tensor.ndim, rhs.tensor.ndim, &path.field("ndim"));
        }
        if lhs.tensor.byte_offset != rhs.tensor.byte_offset {
            return value_mismatch(
                lhs.tensor.byte_offset,
                rhs.tensor.byte_offset,
                &path.field("byte_offset"),
            );
        }
        if lhs.dtype() != rhs.dtype() {
            return value_mismatch(lhs.dtype(), rhs.dtype(), &path.field("dtype"));
        }
        if lhs.device() != rhs.device() {
            return value_mismatch(lhs.device(), rhs.device(), &path.field("device"));
        }
        if lhs.shape() != rhs.shape() {
            return value_mismatch(
                format!("{:?}", lhs.shape()),
                format!("{:?}", rhs.shape()),
                &path.field("shape"),
            );
        }
        if lhs.strides() != rhs.strides() {
            return value_mismatch(
                format!("{:?}", lhs.strides()),
                format!("{:?}", rhs.strides()),
                &path.field("strides"),
            );
        }
        if let (Ok(l), Ok(r)) = (lhs.data_bytes(), rhs.data_bytes()) {
            if l != r {
                return mismatch("Tensor data bytes differ".to_string(), path);
            }
        }
        Ok(())
    }

    fn compare_field_views(
        &mut self,
        bind_free_vars: bool,
        field_kind: FieldKind,
        lhs: FieldView<'_>,
        rhs: FieldView<'_>,
        path: ObjectPath,
    ) -> EqResult<()> {
        let bind = bind_free_vars || field_kind == FieldKind::Bind;
        use FieldView::*;
        let eq = match (&lhs, &rhs) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (F32(a), F32(b)) => self.f32_eq(*a, *b),
            (F64(a), F64(b)) => self.f64_eq(*a, *b),
            (Ptr(a), Ptr(b)) => a == b,
            (DataType(a), DataType(b)) => a == b,
            (Device(a), Device(b)) => a == b,
            (Any(a), Any(b)) => {
                return self.enqueue_any(bind, a.raw(), b.raw(), path);
            }
            (ObjRef(a), ObjRef(b)) => {
                if a.is_null() && b.is_null() {
                    return Ok(());
                }
                return self.enqueue_task(bind, a.as_ptr(), b.as_ptr(), path);
            }
            _ => {
                return Err(EqFail::Fatal(RtError::internal(
                    "reflected field storage classes diverged between lhs and rhs",
                )));
            }
        };
        if eq {
            Ok(())
        } else {
            value_mismatch(lhs.as_any_view(), rhs.as_any_view(), &path)
        }
    }

    fn expand_list(&mut self, task_index: usize) -> EqResult<()> {
        let (lhs, rhs, bind, path) = {
            let t = &self.tasks[task_index];
            (t.lhs, t.rhs, t.bind_free_vars, t.path.clone())
        };
        let lhs_list = unsafe { &*(lhs as *const ListObj) };
        let rhs_list = unsafe { &*(rhs as *const ListObj) };
        let (lhs_size, rhs_size) = (lhs_list.len(), rhs_list.len());
        for i in (0..lhs_size.min(rhs_size)).rev() {
            self.enqueue_any(
                bind,
                lhs_list.elems()[i].raw(),
                rhs_list.elems()[i].raw(),
                path.list_index(i as i64),
            )?;
        }
        if lhs_size != rhs_size {
            self.tasks[task_index].err =
                Some(format!("List length mismatch: {lhs_size} vs {rhs_size}"));
        }
        Ok(())
    }

    fn expand_dict(&mut self, task_index: usize) -> EqResult<()> {
        let (lhs, rhs, bind, path) = {
            let t = &self.tasks[task_index];
            (t.lhs, t.rhs, t.bind_free_vars, t.path.clone())
        };
        let lhs_dict = unsafe { &*(lhs as *const DictObj) };
        let rhs_dict = unsafe { &*(rhs as *const DictObj) };
        let mut not_found = Vec::new();
        for (key, value) in lhs_dict.entries() {
            let key_index = key.type_index();
            let rhs_value = if ty::is_pod(key_index) || key_index == ty::STR {
                rhs_dict.get(key.view())
            } else {
                let key_ptr = key.object_ptr().expect("object key") as usize;
                match self.lhs_to_rhs.get(&key_ptr) {
                    Some(&mapped) => {
                        let mut probe = AnyRaw::none();
                        probe.type_index = unsafe { (*(mapped as *mut ObjectHeader)).type_index };
                        probe.v.v_obj = mapped as *mut ObjectHeader;
                        rhs_dict.get(unsafe { AnyView::from_raw(probe) })
                    }
                    None => {
                        not_found.push(key.to_string());
                        continue;
                    }
                }
            };
            match rhs_value {
                Some(rhs_value) => {
                    let key_path = path.dict_key(&key);
                    self.enqueue_any(bind, value.raw(), rhs_value.raw(), key_path)?;
                }
                None => not_found.push(key.to_string()),
            }
        }
        if !not_found.is_empty() {
            self.tasks[task_index].err =
                Some(format!("Dict key(s) not found in rhs: {}", not_found.join(", ")));
        } else if lhs_dict.len() != rhs_dict.len() {
            self.tasks[task_index].err = Some(format!(
                "Dict size mismatch: {} vs {}",
                lhs_dict.len(),
                rhs_dict.len()
            ));
        }
        Ok(())
    }

    fn expand_reflected(&mut self, task_index: usize) -> EqResult<()> {
        let (lhs, rhs, bind, path, info) = {
            let t = &self.tasks[task_index];
            (t.lhs, t.rhs, t.bind_free_vars, t.path.clone(), t.info.clone())
        };
        let lhs_base = lhs as *const u8;
        let rhs_base = rhs as *const u8;
        for field in &info.fields {
            let lhs_view = unsafe { field.access.read(lhs_base, field.offset) };
            let rhs_view = unsafe { field.access.read(rhs_base, field.offset) };
            self.compare_field_views(bind, field.kind, lhs_view, rhs_view, path.field(&field.name))?;
        }
        Ok(())
    }

    fn run(&mut self) -> EqResult<()> {
        while !self.tasks.is_empty() {
            let task_index = self.tasks.len() - 1;
            {
                let task = &mut self.tasks[task_index];
                if let Some(message) = task.err.take() {
                    let path = task.path.clone();
                    return mismatch(message, &path);
                }
            }
            let (lhs, rhs, visited, bind, path, kind) = {
                let t = &self.tasks[task_index];
                (t.lhs, t.rhs, t.visited, t.bind_free_vars, t.path.clone(), t.info.structure_kind)
            };
            if self.check_bind(lhs, rhs, &path)? {
                self.tasks.pop();
                continue;
            }
            if visited {
                match kind {
                    StructureKind::Bind => {
                        self.lhs_to_rhs.insert(lhs as usize, rhs as usize);
                        self.rhs_to_lhs.insert(rhs as usize, lhs as usize);
                    }
                    StructureKind::Var if bind => {
                        self.lhs_to_rhs.insert(lhs as usize, rhs as usize);
                        self.rhs_to_lhs.insert(rhs as usize, lhs as usize);
                    }
                    StructureKind::Var => {
                        return mismatch("Unbound variable".to_string(), &path);
                    }
                    StructureKind::None | StructureKind::NoBind => {}
                }
                self.tasks.pop();
                continue;
            }
            self.tasks[task_index].visited = true;
            match unsafe { (*lhs).type_index } {
                ty::LIST => self.expand_list(task_index)?,
                ty::DICT => self.expand_dict(task_index)?,
                _ => self.expand_reflected(task_index)?,
            }
        }
        Ok(())
    }
}

fn equal_impl(lhs: AnyView<'_>, rhs: AnyView<'_>, bind_free_vars: bool) -> EqResult<()> {
    let mut machine = Machine::new();
    machine.enqueue_any(bind_free_vars, lhs.raw(), rhs.raw(), ObjectPath::root())?;
    machine.run()
}

/// Structural equality of two values.
///
/// With `assert_mode`, a difference is a `ValueError` whose message
/// carries the path of the first mismatch; otherwise differences yield
/// `Ok(false)`.
pub fn structural_equal(
    lhs: AnyView<'_>,
    rhs: AnyView<'_>,
    bind_free_vars: bool,
    assert_mode: bool,
) -> Result<bool> {
    match equal_impl(lhs, rhs, bind_free_vars) {
        Ok(()) => Ok(true),
        Err(EqFail::Mismatch(e)) => {
            if assert_mode {
                Err(RtError::value_error(format!(
                    "Structural equality check failed at {}: {}",
                    e.path, e.message
                )))
            } else {
                Ok(false)
            }
        }
        Err(EqFail::Fatal(e)) => Err(e),
    }
}

/// Why two values differ, as `"path: reason"`, or `None` when equal.
pub fn structural_equal_fail_reason(
    lhs: AnyView<'_>,
    rhs: AnyView<'_>,
    bind_free_vars: bool,
) -> Result<Option<String>> {
    match equal_impl(lhs, rhs, bind_free_vars) {
        Ok(()) => Ok(None),
        Err(EqFail::Mismatch(e)) => Ok(Some(format!(
            "Structural equality check failed at {}: {}",
            e.path, e.message
        ))),
        Err(EqFail::Fatal(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::List;
    use crate::value::Any;

    fn eq(lhs: &Any, rhs: &Any) -> bool {
        structural_equal(lhs.view(), rhs.view(), true, false).unwrap()
    }

    #[test]
    fn test_pod_equality() {
        assert!(eq(&Any::from(1i64), &Any::from(1i64)));
        assert!(!eq(&Any::from(1i64), &Any::from(2i64)));
        assert!(!eq(&Any::from(1i64), &Any::from(1.0f64)));
        assert!(eq(&Any::none(), &Any::none()));
    }

    #[test]
    fn test_float_tolerance() {
        assert!(eq(&Any::from(1.0f64), &Any::from(1.0 + 1e-9)));
        assert!(!eq(&Any::from(1.0f64), &Any::from(1.0 + 1e-6)));
    }

    #[test]
    fn test_string_content_equality() {
        assert!(eq(&Any::from("abc"), &Any::from("abc")));
        assert!(!eq(&Any::from("abc"), &Any::from("abd")));
    }

    #[test]
    fn test_list_lockstep() {
        let a = List::from_iter([1i64, 2, 3]);
        let b = List::from_iter([1i64, 2, 3]);
        let c = List::from_iter([1i64, 2]);
        assert!(eq(&Any::from(&a), &Any::from(&b)));
        assert!(!eq(&Any::from(&a), &Any::from(&c)));
    }

    #[test]
    fn test_list_reports_deepest_path() {
        let a = List::from_iter([1i64, 2, 3]);
        let b = List::from_iter([1i64, 9, 3]);
        let reason =
            structural_equal_fail_reason(Any::from(&a).view(), Any::from(&b).view(), true)
                .unwrap()
                .unwrap();
        assert!(reason.contains("[1]"), "unexpected reason: {reason}");
        assert!(reason.contains("2 vs 9"), "unexpected reason: {reason}");
    }

    #[test]
    fn test_length_mismatch_reported_after_common_prefix() {
        let a = List::from_iter([1i64, 2]);
        let b = List::from_iter([1i64, 2, 3]);
        let reason =
            structural_equal_fail_reason(Any::from(&a).view(), Any::from(&b).view(), true)
                .unwrap()
                .unwrap();
        assert!(reason.contains("List length mismatch: 2 vs 3"), "{reason}");
    }

    #[test]
    fn test_func_comparison_is_rejected() {
        let f = crate::containers::Func::from_typed(|| 0i64);
        let g = crate::containers::Func::from_typed(|| 0i64);
        let reason =
            structural_equal_fail_reason(Any::from(&f).view(), Any::from(&g).view(), true)
                .unwrap()
                .unwrap();
        assert!(reason.contains("Cannot compare `object.Func` or `object.Error`"), "{reason}");
    }

    #[test]
    fn test_assert_mode_raises() {
        let err = structural_equal(
            Any::from(1i64).view(),
            Any::from(2i64).view(),
            true,
            true,
        )
        .unwrap_err();
        assert_eq!(err.kind, "ValueError");
        assert!(err.message.contains("1 vs 2"));
    }
}
