//! Exported C Functions
//!
//! The safe-call convention: every entry point traps runtime errors and
//! panics, parks them in a thread-local slot, and reports them through
//! the return code (0 success, -1 generic failure, -2 typed error).

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use libc::c_char;

use polyrt::containers::{Func, FuncObj, SafeCallFn};
use polyrt::error::ErrorObj;
use polyrt::object::{
    alloc_extern_object, dec_ref, delete_extern_object, inc_ref, Deleter, ObjectHeader, Ref,
};
use polyrt::registry::{
    self, FieldInfo, FieldKind, MethodInfo, MethodKind, OverrideMode, StructureKind, TypeDesc,
    VTable,
};
use polyrt::value::{Any, AnyRaw, AnyView};
use polyrt::{ensure, rt_err, throw};

use crate::ctypes::{access_from_code, snapshot_of, CTypeField, CTypeInfo, CTypeMethod};

/// Opaque vtable handle: a leaked `Arc<VTable>`.
pub type PolyrtVTableHandle = *mut c_void;

thread_local! {
    static LAST_ERROR: RefCell<Any> = const { RefCell::new(Any::none()) };
}

fn set_last_error(value: Any) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = value);
}

/// Run an ABI body, translating errors and panics into return codes.
/// The capture point appends its own traceback frame before parking the
/// error, so the last-error slot records where the error left Rust.
fn guarded(f: impl FnOnce() -> polyrt::Result<()>) -> i32 {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => 0,
        Ok(Err(mut err)) => {
            err.push_frame(file!(), line!(), module_path!());
            set_last_error(Any::from(err.into_object()));
            -2
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic across the ABI boundary".to_string());
            set_last_error(Any::from(message));
            -1
        }
    }
}

unsafe fn cstr<'a>(ptr: *const c_char) -> polyrt::Result<&'a str> {
    ensure!(!ptr.is_null(), ValueError, "Unexpected NULL string argument");
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| rt_err!(ValueError, "String argument is not valid UTF-8"))
}

unsafe fn arg_views<'a>(num_args: i32, args: *const AnyRaw) -> Vec<AnyView<'a>> {
    (0..num_args.max(0) as usize)
        .map(|i| AnyView::from_raw(*args.add(i)))
        .collect()
}

/// Move the pending error (or `None`) into `ret`.
///
/// # Safety
///
/// `ret` must point to writable storage for one value cell.
#[no_mangle]
pub unsafe extern "C" fn polyrt_last_error_take(ret: *mut AnyRaw) -> i32 {
    let taken = LAST_ERROR.with(|slot| std::mem::take(&mut *slot.borrow_mut()));
    *ret = taken.into_raw();
    0
}

/// # Safety
///
/// `any` must point to a live value cell.
#[no_mangle]
pub unsafe extern "C" fn polyrt_any_inc_ref(any: *mut AnyRaw) -> i32 {
    guarded(|| {
        if !(*any).is_pod() {
            inc_ref((*any).obj_ptr());
        }
        Ok(())
    })
}

/// # Safety
///
/// `any` must point to a live value cell owning one reference.
#[no_mangle]
pub unsafe extern "C" fn polyrt_any_dec_ref(any: *mut AnyRaw) -> i32 {
    guarded(|| {
        if !(*any).is_pod() {
            dec_ref((*any).obj_ptr());
        }
        Ok(())
    })
}

/// Convert a borrowed view in place into an owned value (raw strings
/// become heap strings; objects gain a reference).
///
/// # Safety
///
/// `any` must point to a live value cell holding a borrow.
#[no_mangle]
pub unsafe extern "C" fn polyrt_any_view_to_owned(any: *mut AnyRaw) -> i32 {
    guarded(|| {
        let mut view = *any;
        if view.type_index == polyrt::value::ty::RAW_STR && view.small_len == 0 {
            // C callers hand over NUL-terminated strings without length.
            view.small_len = CStr::from_ptr(view.v.v_str).to_bytes().len() as i32;
        }
        let owned = Any::from_view(AnyView::from_raw(view));
        *any = owned.into_raw();
        Ok(())
    })
}

/// # Safety
///
/// `type_key` must be a NUL-terminated string; `out_type_index` must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_register(
    parent_type_index: i32,
    type_key: *const c_char,
    type_index: i32,
    out_type_index: *mut i32,
) -> i32 {
    guarded(|| {
        let key = cstr(type_key)?;
        let info = registry::global().type_register(parent_type_index, key, type_index)?;
        if !out_type_index.is_null() {
            *out_type_index = info.type_index;
        }
        Ok(())
    })
}

/// # Safety
///
/// `out` must be writable. The returned pointer stays valid for the
/// process lifetime; it is null for unknown indices.
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_index2info(
    type_index: i32,
    out: *mut *const CTypeInfo,
) -> i32 {
    guarded(|| {
        *out = snapshot_of(type_index);
        Ok(())
    })
}

/// # Safety
///
/// As [`polyrt_type_index2info`]; `type_key` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_key2info(
    type_key: *const c_char,
    out: *mut *const CTypeInfo,
) -> i32 {
    guarded(|| {
        let key = cstr(type_key)?;
        *out = match registry::global().type_info_by_key(key) {
            Some(info) => snapshot_of(info.type_index),
            None => std::ptr::null(),
        };
        Ok(())
    })
}

/// # Safety
///
/// `fields` must point to `num_fields` valid descriptors with
/// NUL-terminated names.
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_register_fields(
    type_index: i32,
    num_fields: i64,
    fields: *const CTypeField,
) -> i32 {
    guarded(|| {
        let mut out = Vec::with_capacity(num_fields.max(0) as usize);
        for i in 0..num_fields.max(0) as usize {
            let field = &*fields.add(i);
            let Some(access) = access_from_code(field.access_code) else {
                throw!(ValueError, "Unknown field access code: {}", field.access_code);
            };
            let ty_desc = match access {
                polyrt::registry::FieldAccess::Any => TypeDesc::Any,
                _ => TypeDesc::Atomic(field.ty_index),
            };
            out.push(FieldInfo {
                name: cstr(field.name)?.to_string(),
                index: i as i32,
                offset: field.offset as usize,
                num_bytes: access.num_bytes(),
                frozen: field.frozen != 0,
                ty: ty_desc,
                access,
                kind: FieldKind::NoBind,
            });
        }
        registry::global().set_fields(type_index, out)
    })
}

/// # Safety
///
/// `sub_structure_indices` / `sub_structure_kinds` must hold
/// `num_sub_structures` entries each.
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_register_structure(
    type_index: i32,
    structure_kind: i32,
    num_sub_structures: i64,
    sub_structure_indices: *const i32,
    sub_structure_kinds: *const i32,
) -> i32 {
    guarded(|| {
        let Some(kind) = StructureKind::from_i32(structure_kind) else {
            throw!(ValueError, "Unknown structure kind: {}", structure_kind);
        };
        let mut subs = Vec::with_capacity(num_sub_structures.max(0) as usize);
        for i in 0..num_sub_structures.max(0) as usize {
            let field_index = *sub_structure_indices.add(i);
            let field_kind = match *sub_structure_kinds.add(i) {
                0 => FieldKind::NoBind,
                1 => FieldKind::Bind,
                other => throw!(ValueError, "Unknown structure field kind: {}", other),
            };
            subs.push((field_index, field_kind));
        }
        registry::global().set_structure(type_index, kind, &subs)
    })
}

/// # Safety
///
/// `method.name` must be NUL-terminated and `method.func` must hold a
/// live function object (the registry takes its own reference).
#[no_mangle]
pub unsafe extern "C" fn polyrt_type_add_method(type_index: i32, method: CTypeMethod) -> i32 {
    guarded(|| {
        let func = AnyView::from_raw(method.func).cast::<Func>()?;
        registry::global().add_method(
            type_index,
            MethodInfo {
                name: cstr(method.name)?.to_string(),
                func,
                kind: if method.kind == 1 { MethodKind::Static } else { MethodKind::Member },
            },
        )
    })
}

/// # Safety
///
/// `name` must be NUL-terminated; `out` writable. Release the handle
/// with [`polyrt_vtable_delete`].
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_get_global(
    name: *const c_char,
    out: *mut PolyrtVTableHandle,
) -> i32 {
    guarded(|| {
        let vtable = registry::global().get_vtable(cstr(name)?);
        *out = Arc::into_raw(vtable) as PolyrtVTableHandle;
        Ok(())
    })
}

/// Create a standalone (unregistered) vtable.
///
/// # Safety
///
/// As [`polyrt_vtable_get_global`].
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_create(
    name: *const c_char,
    out: *mut PolyrtVTableHandle,
) -> i32 {
    guarded(|| {
        let vtable = Arc::new(VTable::new(cstr(name)?));
        *out = Arc::into_raw(vtable) as PolyrtVTableHandle;
        Ok(())
    })
}

/// # Safety
///
/// `handle` must come from a vtable-producing entry point, once.
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_delete(handle: PolyrtVTableHandle) -> i32 {
    guarded(|| {
        ensure!(!handle.is_null(), ValueError, "Unexpected NULL vtable handle");
        drop(Arc::from_raw(handle as *const VTable));
        Ok(())
    })
}

/// # Safety
///
/// `handle` must be live; `ret` writable. On success `ret` owns the
/// function value.
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_get_func(
    handle: PolyrtVTableHandle,
    type_index: i32,
    allow_ancestor: i32,
    ret: *mut AnyRaw,
) -> i32 {
    guarded(|| {
        let vtable = &*(handle as *const VTable);
        let func = vtable.get_func(type_index, allow_ancestor != 0)?;
        *ret = Any::from(func).into_raw();
        Ok(())
    })
}

/// # Safety
///
/// `handle` must be live; `func` must hold a function object.
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_set_func(
    handle: PolyrtVTableHandle,
    type_index: i32,
    func: AnyRaw,
    override_mode: i32,
) -> i32 {
    guarded(|| {
        let vtable = &*(handle as *const VTable);
        let Some(mode) = OverrideMode::from_i32(override_mode) else {
            throw!(ValueError, "Unknown override mode: {}", override_mode);
        };
        let func = AnyView::from_raw(func).cast::<Func>()?;
        vtable.set_func(type_index, func, mode)
    })
}

/// Dispatch on the first argument's runtime type.
///
/// # Safety
///
/// `handle` must be live; `args` must hold `num_args` cells; `ret`
/// writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_vtable_call(
    handle: PolyrtVTableHandle,
    num_args: i32,
    args: *const AnyRaw,
    ret: *mut AnyRaw,
) -> i32 {
    guarded(|| {
        let vtable = &*(handle as *const VTable);
        let views = arg_views(num_args, args);
        *ret = vtable.call(&views)?.into_raw();
        Ok(())
    })
}

/// Wrap a foreign callable into a function object.
///
/// # Safety
///
/// `safe_call` must follow the safe-call convention; `deleter` (if any)
/// is invoked once on `self_ptr` when the object dies.
#[no_mangle]
pub unsafe extern "C" fn polyrt_func_create(
    self_ptr: *mut c_void,
    deleter: Option<Deleter>,
    safe_call: SafeCallFn,
    ret: *mut AnyRaw,
) -> i32 {
    guarded(|| {
        let func = Func::from_foreign(self_ptr, deleter, safe_call);
        *ret = Any::from(func).into_raw();
        Ok(())
    })
}

/// # Safety
///
/// `name` must be NUL-terminated; `func` must hold a function object.
#[no_mangle]
pub unsafe extern "C" fn polyrt_func_set_global(
    name: *const c_char,
    func: AnyRaw,
    allow_override: i32,
) -> i32 {
    guarded(|| {
        let func = AnyView::from_raw(func).cast::<Func>()?;
        registry::global().set_global_func(cstr(name)?, func, allow_override != 0)
    })
}

/// Look up a global function; `ret` holds `None` when absent.
///
/// # Safety
///
/// `name` must be NUL-terminated; `ret` writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_func_get_global(name: *const c_char, ret: *mut AnyRaw) -> i32 {
    guarded(|| {
        *ret = match registry::global().get_global_func(cstr(name)?) {
            Some(func) => Any::from(func).into_raw(),
            None => Any::none().into_raw(),
        };
        Ok(())
    })
}

/// Invoke a function object under the safe-call convention. The return
/// code comes from the callee: 0 success, -2 error object in `ret`, -1
/// panic message in `ret`.
///
/// # Safety
///
/// `func` must point to a live function object; `args` must hold
/// `num_args` cells; `ret` writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_func_safe_call(
    func: *mut c_void,
    num_args: i32,
    args: *const AnyRaw,
    ret: *mut AnyRaw,
) -> i32 {
    let func = &*(func as *const FuncObj);
    let views = arg_views(num_args, args);
    let mut out = Any::none();
    let code = func.safe_call_impl(&views, &mut out);
    *ret = out.into_raw();
    code
}

/// Create an error object from a kind and message bytes.
///
/// # Safety
///
/// `kind` must be NUL-terminated; `bytes` must hold `num_bytes` bytes;
/// `ret` writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_error_create(
    kind: *const c_char,
    num_bytes: i64,
    bytes: *const c_char,
    ret: *mut AnyRaw,
) -> i32 {
    guarded(|| {
        let kind = cstr(kind)?.to_string();
        let message = if bytes.is_null() || num_bytes <= 0 {
            String::new()
        } else {
            let slice = std::slice::from_raw_parts(bytes as *const u8, num_bytes as usize);
            String::from_utf8_lossy(slice).into_owned()
        };
        let err = ErrorObj::new(kind, message, Vec::new());
        *ret = Any::from(err).into_raw();
        Ok(())
    })
}

thread_local! {
    static ERROR_INFO: RefCell<(Vec<CString>, Vec<*const c_char>)> =
        const { RefCell::new((Vec::new(), Vec::new())) };
}

/// Extract `[kind, message, file, line, function, ...]` from an error
/// object. The returned pointers stay valid on this thread until the
/// next call.
///
/// # Safety
///
/// `error` must hold a live error object; the out-params must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_error_get_info(
    error: AnyRaw,
    num_strs: *mut i32,
    strs: *mut *const *const c_char,
) -> i32 {
    guarded(|| {
        let err = AnyView::from_raw(error).cast::<Ref<ErrorObj>>()?;
        ensure!(!err.is_null(), TypeError, "Expected an error object, got None");
        let strings = err.info_strings();
        ERROR_INFO.with(|slot| {
            let (owned, pointers) = &mut *slot.borrow_mut();
            owned.clear();
            pointers.clear();
            for s in strings {
                owned.push(CString::new(s).unwrap_or_default());
            }
            for s in owned.iter() {
                pointers.push(s.as_ptr());
            }
            *num_strs = pointers.len() as i32;
            *strs = pointers.as_ptr();
        });
        Ok(())
    })
}

/// Allocate a zeroed extern object (header plus reflected payload).
///
/// # Safety
///
/// `ret` must be writable.
#[no_mangle]
pub unsafe extern "C" fn polyrt_ext_obj_create(
    num_bytes: i32,
    type_index: i32,
    ret: *mut AnyRaw,
) -> i32 {
    guarded(|| {
        let obj = alloc_extern_object(type_index, num_bytes.max(0) as usize)?;
        *ret = obj.into_raw();
        Ok(())
    })
}

/// Destroy an extern object without going through its refcount. Prefer
/// `polyrt_any_dec_ref`; this exists for embedders that manage the
/// object manually.
///
/// # Safety
///
/// `objptr` must come from [`polyrt_ext_obj_create`] and own its last
/// reference.
#[no_mangle]
pub unsafe extern "C" fn polyrt_ext_obj_delete(objptr: *mut c_void) {
    delete_extern_object(objptr as *mut ObjectHeader);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str) -> CString {
        CString::new(name).unwrap()
    }

    #[test]
    fn test_register_and_lookup_roundtrip() {
        let key = c("abi.test.Node");
        let mut index = 0i32;
        let code = unsafe {
            polyrt_type_register(polyrt::value::ty::OBJECT, key.as_ptr(), -1, &mut index)
        };
        assert_eq!(code, 0);
        assert!(index >= polyrt::value::ty::DYN_OBJECT_BEGIN);

        let mut info: *const CTypeInfo = std::ptr::null();
        assert_eq!(unsafe { polyrt_type_index2info(index, &mut info) }, 0);
        assert!(!info.is_null());
        unsafe {
            assert_eq!((*info).type_index, index);
            assert_eq!(CStr::from_ptr((*info).type_key).to_str().unwrap(), "abi.test.Node");
            assert_eq!((*info).type_depth, 1);
        }
    }

    #[test]
    fn test_conflicting_index_sets_last_error() {
        let key = c("abi.test.Conflict");
        let mut index = 0i32;
        unsafe {
            assert_eq!(
                polyrt_type_register(polyrt::value::ty::OBJECT, key.as_ptr(), -1, &mut index),
                0
            );
            let code =
                polyrt_type_register(polyrt::value::ty::OBJECT, key.as_ptr(), index + 5, &mut index);
            assert_eq!(code, -2);
            let mut err = AnyRaw::none();
            polyrt_last_error_take(&mut err);
            let err = Any::from_raw(err);
            let err = err.cast::<Ref<ErrorObj>>().unwrap();
            assert_eq!(err.kind, "KeyError");
        }
    }

    #[test]
    fn test_global_func_through_abi() {
        let func = Func::from_typed(|x: i64| x * 3);
        let func_any = Any::from(func);
        let name = c("abi.test.triple");
        unsafe {
            assert_eq!(polyrt_func_set_global(name.as_ptr(), *func_any.as_raw(), 0), 0);
            let mut fetched = AnyRaw::none();
            assert_eq!(polyrt_func_get_global(name.as_ptr(), &mut fetched), 0);
            let fetched = Any::from_raw(fetched);
            let ptr = fetched.object_ptr().unwrap() as *mut c_void;
            let args = [*Any::from(5i64).as_raw()];
            let mut ret = AnyRaw::none();
            assert_eq!(polyrt_func_safe_call(ptr, 1, args.as_ptr(), &mut ret), 0);
            let ret = Any::from_raw(ret);
            assert_eq!(ret.cast::<i64>().unwrap(), 15);
        }
    }

    #[test]
    fn test_safe_call_type_error_code() {
        let func = Func::from_typed(|x: i64| x);
        let func_any = Any::from(func);
        unsafe {
            let ptr = func_any.object_ptr().unwrap() as *mut c_void;
            let args = [*Any::from("bad").as_raw()];
            let mut ret = AnyRaw::none();
            assert_eq!(polyrt_func_safe_call(ptr, 1, args.as_ptr(), &mut ret), -2);
            let err = Any::from_raw(ret).cast::<Ref<ErrorObj>>().unwrap();
            assert_eq!(err.kind, "TypeError");
        }
    }

    #[test]
    fn test_error_create_and_info() {
        let kind = c("ValueError");
        let message = b"bad input";
        unsafe {
            let mut err = AnyRaw::none();
            assert_eq!(
                polyrt_error_create(
                    kind.as_ptr(),
                    message.len() as i64,
                    message.as_ptr() as *const c_char,
                    &mut err
                ),
                0
            );
            let mut count = 0i32;
            let mut strs: *const *const c_char = std::ptr::null();
            assert_eq!(polyrt_error_get_info(err, &mut count, &mut strs), 0);
            assert_eq!(count, 2);
            assert_eq!(CStr::from_ptr(*strs).to_str().unwrap(), "ValueError");
            assert_eq!(CStr::from_ptr(*strs.add(1)).to_str().unwrap(), "bad input");
            // The info call borrowed; the error cell still owns its object.
            polyrt_any_dec_ref(&mut err as *mut AnyRaw);
        }
    }

    #[test]
    fn test_vtable_roundtrip() {
        let name = c("abi.test.__describe__");
        unsafe {
            let mut handle: PolyrtVTableHandle = std::ptr::null_mut();
            assert_eq!(polyrt_vtable_get_global(name.as_ptr(), &mut handle), 0);
            let func = Any::from(Func::from_typed(|v: i64| v + 100));
            assert_eq!(
                polyrt_vtable_set_func(handle, polyrt::value::ty::INT, *func.as_raw(), 0),
                0
            );
            let args = [*Any::from(1i64).as_raw()];
            let mut ret = AnyRaw::none();
            assert_eq!(polyrt_vtable_call(handle, 1, args.as_ptr(), &mut ret), 0);
            assert_eq!(Any::from_raw(ret).cast::<i64>().unwrap(), 101);
            assert_eq!(polyrt_vtable_delete(handle), 0);
        }
    }
}
