//! Object Header - Common Prefix of Every Heap Object
//!
//! Object Header Layout (16 bytes on 64-bit):
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  type_index (4 bytes, i32)              │
//! ├─────────────────────────────────────────┤
//! │  ref_cnt (4 bytes, AtomicI32)           │
//! ├─────────────────────────────────────────┤
//! │  deleter (8 bytes, fn pointer)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The layout coincides with the value header ([`crate::value::AnyRaw`]),
//! so a pointer to a heap object is also a pointer to its header. Reference
//! count increments are relaxed; decrements are acquire-release, and the
//! thread that observes the count reach zero runs the deleter.

use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, Ordering};

/// Destroys an object and frees its storage. Stored in every header.
pub type Deleter = unsafe extern "C" fn(*mut c_void);

/// Common prefix of every heap object.
#[repr(C)]
pub struct ObjectHeader {
    pub type_index: i32,
    pub(crate) ref_cnt: AtomicI32,
    pub deleter: Option<Deleter>,
}

impl ObjectHeader {
    /// Header for a freshly allocated `T`, with `ref_cnt == 0`.
    ///
    /// The count stays zero until the first strong handle takes the object;
    /// it is zero again only in the instant before the deleter runs.
    pub fn new_for<T: ObjectType>() -> ObjectHeader {
        ObjectHeader {
            type_index: T::type_index(),
            ref_cnt: AtomicI32::new(0),
            deleter: Some(drop_boxed::<T>),
        }
    }

    /// Header with an explicit dynamic type index and deleter. Used for
    /// extern objects whose layout is described only by reflection.
    pub fn with_deleter(type_index: i32, deleter: Deleter) -> ObjectHeader {
        ObjectHeader { type_index, ref_cnt: AtomicI32::new(0), deleter: Some(deleter) }
    }

    #[inline]
    pub fn ref_count(&self) -> i32 {
        self.ref_cnt.load(Ordering::Relaxed)
    }
}

/// Marker for heap object types.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` structs whose first field is an
/// [`ObjectHeader`], allocated through [`crate::object::Ref::new`] (or an
/// allocator that writes an equivalent header). `type_index()` must return
/// the index this type is registered under.
pub unsafe trait ObjectType: Sized + 'static {
    /// Stable string name, e.g. `"object.Str"`.
    const TYPE_KEY: &'static str;

    /// Runtime type index. Constant for core types; assigned by the
    /// registry on first use for dynamic types.
    fn type_index() -> i32;

    #[inline]
    fn header(&self) -> &ObjectHeader {
        // Sound per the trait contract: the header is the first field.
        unsafe { &*(self as *const Self as *const ObjectHeader) }
    }
}

/// Deleter for objects allocated as `Box<T>`.
unsafe extern "C" fn drop_boxed<T: ObjectType>(ptr: *mut c_void) {
    drop(Box::from_raw(ptr as *mut T));
}

/// Take one reference. Relaxed: acquiring a new handle to a live object
/// needs no synchronization beyond the existing happens-before edge that
/// made the object visible.
///
/// # Safety
///
/// `ptr` must be null or point to a live object header.
#[inline]
pub unsafe fn inc_ref(ptr: *mut ObjectHeader) {
    if !ptr.is_null() {
        (*ptr).ref_cnt.fetch_add(1, Ordering::Relaxed);
    }
}

/// Release one reference; runs the deleter when the pre-decrement value
/// was 1. Acquire-release so the deleting thread observes all writes made
/// through other handles.
///
/// # Safety
///
/// `ptr` must be null or point to a live object header owning one
/// reference that this call consumes.
#[inline]
pub unsafe fn dec_ref(ptr: *mut ObjectHeader) {
    if ptr.is_null() {
        return;
    }
    if (*ptr).ref_cnt.fetch_sub(1, Ordering::AcqRel) == 1 {
        if let Some(deleter) = (*ptr).deleter {
            deleter(ptr as *mut c_void);
        }
    }
}
