//! Extern Objects - Heap Objects Defined Across the ABI
//!
//! An embedder can create objects whose layout exists only as registered
//! reflection metadata: a header followed by `num_bytes - 16` zeroed
//! payload bytes. Teardown walks the registered field table, releasing
//! every `Any` / object-handle field, then frees the allocation.
//!
//! Allocation sizes are tracked in a side pool keyed by address, so the
//! deleter can reconstruct the layout.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::c_void;
use std::sync::atomic::AtomicI32;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::object::header::{inc_ref, ObjectHeader};
use crate::registry;
use crate::value::{Any, AnyRaw, RawValue};

const EXT_OBJ_ALIGN: usize = 16;

lazy_static! {
    static ref SIZE_POOL: Mutex<FxHashMap<usize, usize>> = Mutex::new(FxHashMap::default());
}

unsafe extern "C" fn extern_obj_deleter(ptr: *mut c_void) {
    delete_extern_object(ptr as *mut ObjectHeader);
}

/// Allocate a zeroed extern object of `num_bytes` total (header
/// included) tagged with `type_index`, returning an owning value.
pub fn alloc_extern_object(type_index: i32, num_bytes: usize) -> Result<Any> {
    crate::ensure!(
        num_bytes >= std::mem::size_of::<ObjectHeader>(),
        ValueError,
        "Extern object size must cover the 16-byte header, got {}",
        num_bytes
    );
    crate::ensure!(
        registry::type_info(type_index).is_some(),
        KeyError,
        "Type index `{}` not registered",
        type_index
    );
    let layout = Layout::from_size_align(num_bytes, EXT_OBJ_ALIGN)
        .map_err(|e| crate::rt_err!(ValueError, "Invalid extern object layout: {}", e))?;
    let ptr = unsafe { alloc_zeroed(layout) } as *mut ObjectHeader;
    crate::ensure!(!ptr.is_null(), RuntimeError, "Extern object allocation failed");
    unsafe {
        std::ptr::write(
            ptr,
            ObjectHeader {
                type_index,
                ref_cnt: AtomicI32::new(0),
                deleter: Some(extern_obj_deleter),
            },
        );
    }
    SIZE_POOL.lock().insert(ptr as usize, num_bytes);
    unsafe {
        inc_ref(ptr);
        Ok(Any::from_raw(AnyRaw {
            type_index,
            small_len: 0,
            v: RawValue { v_obj: ptr },
        }))
    }
}

/// Tear down an extern object: drop every reference-holding reflected
/// field, then free the allocation. Invoked by the header deleter on the
/// final decref; also exported for embedders that bypass refcounting.
///
/// # Safety
///
/// `ptr` must come from [`alloc_extern_object`] and not be used again.
pub unsafe fn delete_extern_object(ptr: *mut ObjectHeader) {
    let Some(num_bytes) = SIZE_POOL.lock().remove(&(ptr as usize)) else {
        log::error!("delete_extern_object: unknown object address {ptr:p}");
        return;
    };
    let type_index = (*ptr).type_index;
    if let Some(info) = registry::type_info(type_index) {
        let base = ptr as *mut u8;
        for field in &info.fields {
            field.access.drop_in_place(base, field.offset);
        }
    }
    let layout = Layout::from_size_align(num_bytes, EXT_OBJ_ALIGN).expect("layout was validated");
    dealloc(ptr as *mut u8, layout);
}
