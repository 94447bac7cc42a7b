//! Any / AnyView - The Uniform Value Type
//!
//! Both flavors share the 16-byte [`AnyRaw`] layout; they differ only in
//! ownership:
//!
//! - [`AnyView`] borrows. It never touches reference counts, and it is the
//!   only place a `RAW_STR` (borrowed C-string) tag may appear.
//! - [`Any`] owns. Cloning increments the pointee's count, dropping
//!   decrements it, and constructing one from a `RAW_STR` view copies the
//!   bytes into a heap [`crate::containers::Str`] first.

use std::fmt;
use std::marker::PhantomData;

use crate::error::Result;
use crate::object::{dec_ref, inc_ref, ObjectHeader, ObjectRef, ObjectType, Ref};
use crate::registry;
use crate::value::convert::TryFromAny;
use crate::value::{ty, AnyRaw};

/// Borrowed heterogeneous value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AnyView<'a> {
    pub(crate) raw: AnyRaw,
    pub(crate) _marker: PhantomData<&'a ()>,
}

impl<'a> AnyView<'a> {
    pub const fn none() -> AnyView<'static> {
        AnyView { raw: AnyRaw::none(), _marker: PhantomData }
    }

    /// Wrap a raw cell without touching reference counts.
    ///
    /// # Safety
    ///
    /// Any object pointer in `raw` must stay live for `'a`.
    pub unsafe fn from_raw(raw: AnyRaw) -> AnyView<'a> {
        AnyView { raw, _marker: PhantomData }
    }

    #[inline]
    pub fn type_index(&self) -> i32 {
        self.raw.type_index
    }

    pub fn type_key(&self) -> String {
        registry::type_key(self.raw.type_index)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.raw.is_none()
    }

    /// Convert into `T`, failing with a `TypeError` naming both types.
    pub fn cast<T: TryFromAny>(&self) -> Result<T> {
        T::try_from_any(&self.raw)
    }

    /// Promote to an owned value (copies raw strings into the heap).
    pub fn to_owned_any(&self) -> Any {
        Any::from_view(*self)
    }

    /// The object pointer if this view holds a heap object.
    pub fn object_ptr(&self) -> Option<*mut ObjectHeader> {
        if self.raw.is_pod() {
            None
        } else {
            Some(unsafe { self.raw.obj_ptr() })
        }
    }

    pub(crate) fn raw(&self) -> &AnyRaw {
        &self.raw
    }

    /// The underlying ABI cell.
    pub fn as_raw(&self) -> &AnyRaw {
        &self.raw
    }
}

impl Default for AnyView<'_> {
    fn default() -> Self {
        AnyView::none()
    }
}

/// Owned heterogeneous value.
#[repr(C)]
pub struct Any {
    pub(crate) raw: AnyRaw,
}

impl Any {
    pub const fn none() -> Any {
        Any { raw: AnyRaw::none() }
    }

    /// Take ownership of a raw cell that already holds one reference.
    ///
    /// # Safety
    ///
    /// If `raw` holds an object pointer, this `Any` now owns exactly one
    /// of its references. `raw` must not be `RAW_STR`-tagged.
    pub unsafe fn from_raw(raw: AnyRaw) -> Any {
        debug_assert_ne!(raw.type_index, ty::RAW_STR);
        Any { raw }
    }

    /// Promote a borrowed view: increments for objects, copies raw
    /// strings into a heap `Str`.
    pub fn from_view(view: AnyView<'_>) -> Any {
        let raw = view.raw;
        if raw.type_index == ty::RAW_STR {
            let bytes = unsafe { raw.raw_str_bytes() };
            let s = crate::containers::StrObj::from_bytes(bytes);
            return Any::from(s);
        }
        if !raw.is_pod() {
            unsafe { inc_ref(raw.obj_ptr()) };
        }
        Any { raw }
    }

    /// Give up ownership of the raw cell (no decrement).
    pub fn into_raw(self) -> AnyRaw {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// Borrow as a view.
    pub fn view(&self) -> AnyView<'_> {
        AnyView { raw: self.raw, _marker: PhantomData }
    }

    #[inline]
    pub fn type_index(&self) -> i32 {
        self.raw.type_index
    }

    pub fn type_key(&self) -> String {
        registry::type_key(self.raw.type_index)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.raw.is_none()
    }

    /// Convert into `T`, failing with a `TypeError` naming both types.
    pub fn cast<T: TryFromAny>(&self) -> Result<T> {
        T::try_from_any(&self.raw)
    }

    /// The object pointer if this value holds a heap object.
    pub fn object_ptr(&self) -> Option<*mut ObjectHeader> {
        if self.raw.is_pod() {
            None
        } else {
            Some(unsafe { self.raw.obj_ptr() })
        }
    }

    /// Strong type-erased handle to the payload object, if any.
    pub fn as_object_ref(&self) -> Option<ObjectRef> {
        self.object_ptr().map(|p| unsafe { ObjectRef::from_header(p) })
    }

    /// Reset to `None`, releasing any held reference.
    pub fn reset(&mut self) {
        *self = Any::none();
    }

    pub(crate) fn raw(&self) -> &AnyRaw {
        &self.raw
    }

    /// The underlying ABI cell (still owned by this value).
    pub fn as_raw(&self) -> &AnyRaw {
        &self.raw
    }
}

impl Default for Any {
    fn default() -> Self {
        Any::none()
    }
}

impl Clone for Any {
    fn clone(&self) -> Self {
        if !self.raw.is_pod() {
            unsafe { inc_ref(self.raw.obj_ptr()) };
        }
        Any { raw: self.raw }
    }
}

impl Drop for Any {
    fn drop(&mut self) {
        if !self.raw.is_pod() {
            unsafe { dec_ref(self.raw.obj_ptr()) };
        }
    }
}

impl From<AnyView<'_>> for Any {
    fn from(view: AnyView<'_>) -> Any {
        Any::from_view(view)
    }
}

impl<'a> From<&'a Any> for AnyView<'a> {
    fn from(any: &'a Any) -> AnyView<'a> {
        any.view()
    }
}

impl<T: ObjectType> From<Ref<T>> for Any {
    fn from(r: Ref<T>) -> Any {
        if r.is_null() {
            return Any::none();
        }
        let type_index = unsafe { (*(r.as_ptr() as *mut ObjectHeader)).type_index };
        let mut raw = AnyRaw::none();
        raw.type_index = type_index;
        raw.v.v_obj = r.into_raw() as *mut ObjectHeader;
        Any { raw }
    }
}

impl<T: ObjectType> From<&Ref<T>> for Any {
    fn from(r: &Ref<T>) -> Any {
        Any::from(r.clone())
    }
}

impl From<ObjectRef> for Any {
    fn from(r: ObjectRef) -> Any {
        if r.is_null() {
            return Any::none();
        }
        let mut raw = AnyRaw::none();
        raw.type_index = r.type_index();
        raw.v.v_obj = r.into_raw();
        Any { raw }
    }
}

impl<'a, T: ObjectType> From<&'a Ref<T>> for AnyView<'a> {
    fn from(r: &'a Ref<T>) -> AnyView<'a> {
        if r.is_null() {
            return AnyView::none();
        }
        let mut raw = AnyRaw::none();
        raw.type_index = unsafe { (*(r.as_ptr() as *mut ObjectHeader)).type_index };
        raw.v.v_obj = r.as_ptr() as *mut ObjectHeader;
        AnyView { raw, _marker: PhantomData }
    }
}

unsafe impl Send for Any {}

fn format_raw(raw: &AnyRaw, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match raw.type_index {
        ty::NONE => write!(f, "None"),
        ty::BOOL => write!(f, "{}", if unsafe { raw.v.v_bool } { "True" } else { "False" }),
        ty::INT => write!(f, "{}", unsafe { raw.v.v_int64 }),
        ty::FLOAT => write!(f, "{}", unsafe { raw.v.v_float64 }),
        ty::PTR => {
            let p = unsafe { raw.v.v_ptr };
            if p.is_null() {
                write!(f, "None")
            } else {
                write!(f, "{p:p}")
            }
        }
        ty::DATA_TYPE => write!(f, "{}", unsafe { raw.v.v_dtype }),
        ty::DEVICE => write!(f, "{}", unsafe { raw.v.v_device }),
        ty::RAW_STR => {
            let bytes = unsafe { raw.raw_str_bytes() };
            write!(f, "\"{}\"", String::from_utf8_lossy(bytes))
        }
        _ => write!(f, "{}", registry::object_to_string(raw)),
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_raw(&self.raw, f)
    }
}

impl fmt::Display for AnyView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_raw(&self.raw, f)
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Any({}: {})", self.type_key(), self)
    }
}

impl fmt::Debug for AnyView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyView({}: {})", self.type_key(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Obj;

    #[test]
    fn test_none_lifecycle() {
        let v = Any::none();
        assert!(v.is_none());
        assert_eq!(v.type_index(), ty::NONE);
        drop(v);
    }

    #[test]
    fn test_object_refcount_through_any() {
        let obj = Obj::create();
        assert_eq!(obj.header().ref_count(), 1);
        let a = Any::from(&obj);
        assert_eq!(obj.header().ref_count(), 2);
        let b = a.clone();
        assert_eq!(obj.header().ref_count(), 3);
        drop(a);
        drop(b);
        assert_eq!(obj.header().ref_count(), 1);
    }

    #[test]
    fn test_view_does_not_touch_refcount() {
        let obj = Obj::create();
        let view = AnyView::from(&obj);
        assert_eq!(obj.header().ref_count(), 1);
        assert_eq!(view.type_index(), ty::OBJECT);
        let owned = view.to_owned_any();
        assert_eq!(obj.header().ref_count(), 2);
        drop(owned);
        assert_eq!(obj.header().ref_count(), 1);
    }

    #[test]
    fn test_owned_any_never_holds_raw_str() {
        let view = AnyView::from("hello");
        assert_eq!(view.type_index(), ty::RAW_STR);
        let owned = Any::from_view(view);
        assert_eq!(owned.type_index(), ty::STR);
        assert_eq!(owned.cast::<String>().unwrap(), "hello");
    }
}
