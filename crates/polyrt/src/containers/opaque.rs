//! Opaque - Foreign Handle Wrapper
//!
//! Carries a pointer the runtime cannot introspect, plus the deleter
//! that releases it and a type name for diagnostics. Opaque values move
//! through `Any` freely but are rejected by the structural algorithms.

use std::ffi::c_void;
use std::fmt;

use crate::object::{Deleter, InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::value::ty;

#[repr(C)]
pub struct OpaqueObj {
    pub(crate) header: ObjectHeader,
    pub handle: *mut c_void,
    pub handle_deleter: Option<Deleter>,
    pub type_name: String,
}

unsafe impl ObjectType for OpaqueObj {
    const TYPE_KEY: &'static str = "object.Opaque";
    fn type_index() -> i32 {
        ty::OPAQUE
    }
}

unsafe impl InstanceOf<Obj> for OpaqueObj {}

impl OpaqueObj {
    /// Wrap a foreign handle.
    ///
    /// # Safety
    ///
    /// `handle_deleter` (if any) must be safe to invoke exactly once on
    /// `handle` when the object dies.
    pub unsafe fn new(
        handle: *mut c_void,
        handle_deleter: Option<Deleter>,
        type_name: impl Into<String>,
    ) -> Ref<OpaqueObj> {
        Ref::new(OpaqueObj {
            header: ObjectHeader::new_for::<OpaqueObj>(),
            handle,
            handle_deleter,
            type_name: type_name.into(),
        })
    }
}

impl Drop for OpaqueObj {
    fn drop(&mut self) {
        if let Some(deleter) = self.handle_deleter {
            unsafe { deleter(self.handle) };
        }
    }
}

impl fmt::Debug for OpaqueObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({}, {:p})", self.type_name, self.handle)
    }
}
