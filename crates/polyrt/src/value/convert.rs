//! Value Conversions
//!
//! `From` implementations build `Any`/`AnyView` cells from host values;
//! [`TryFromAny`] converts back, producing `TypeError`s that name both the
//! source type key and the requested target. Numeric widening: `int`
//! converts into `float`; no other cross-kind numeric conversion exists.

use std::ffi::c_void;
use std::marker::PhantomData;

use crate::error::{Result, RtError};
use crate::object::{ObjectRef, ObjectType, Ref};
use crate::registry;
use crate::value::{ty, Any, AnyRaw, AnyView, DataType, Device, RawValue};

/// Render the type name used in conversion and signature diagnostics.
pub trait TypeNamed {
    fn type_str() -> String;
}

/// Fallible extraction of a typed value from a raw cell.
pub trait TryFromAny: Sized {
    fn try_from_any(raw: &AnyRaw) -> Result<Self>;
}

pub(crate) fn conversion_error(raw: &AnyRaw, target: &str) -> RtError {
    RtError::type_error(format!(
        "Cannot convert from type `{}` to `{}`",
        registry::type_key(raw.type_index),
        target
    ))
}

fn pod_cell(type_index: i32, v: RawValue) -> AnyRaw {
    AnyRaw { type_index, small_len: 0, v }
}

macro_rules! impl_pod_from {
    ($ty:ty, $index:expr, $field:ident, $cast:ty) => {
        impl From<$ty> for Any {
            fn from(v: $ty) -> Any {
                unsafe { Any::from_raw(pod_cell($index, RawValue { $field: v as $cast })) }
            }
        }
        impl From<$ty> for AnyView<'static> {
            fn from(v: $ty) -> AnyView<'static> {
                unsafe { AnyView::from_raw(pod_cell($index, RawValue { $field: v as $cast })) }
            }
        }
    };
}

impl From<bool> for Any {
    fn from(v: bool) -> Any {
        unsafe { Any::from_raw(pod_cell(ty::BOOL, RawValue { v_bool: v })) }
    }
}

impl From<bool> for AnyView<'static> {
    fn from(v: bool) -> AnyView<'static> {
        unsafe { AnyView::from_raw(pod_cell(ty::BOOL, RawValue { v_bool: v })) }
    }
}

impl_pod_from!(i8, ty::INT, v_int64, i64);
impl_pod_from!(i16, ty::INT, v_int64, i64);
impl_pod_from!(i32, ty::INT, v_int64, i64);
impl_pod_from!(i64, ty::INT, v_int64, i64);
impl_pod_from!(u8, ty::INT, v_int64, i64);
impl_pod_from!(u16, ty::INT, v_int64, i64);
impl_pod_from!(u32, ty::INT, v_int64, i64);
impl_pod_from!(u64, ty::INT, v_int64, i64);
impl_pod_from!(f32, ty::FLOAT, v_float64, f64);
impl_pod_from!(f64, ty::FLOAT, v_float64, f64);

impl From<DataType> for Any {
    fn from(v: DataType) -> Any {
        unsafe { Any::from_raw(pod_cell(ty::DATA_TYPE, RawValue { v_dtype: v })) }
    }
}

impl From<DataType> for AnyView<'static> {
    fn from(v: DataType) -> AnyView<'static> {
        unsafe { AnyView::from_raw(pod_cell(ty::DATA_TYPE, RawValue { v_dtype: v })) }
    }
}

impl From<Device> for Any {
    fn from(v: Device) -> Any {
        unsafe { Any::from_raw(pod_cell(ty::DEVICE, RawValue { v_device: v })) }
    }
}

impl From<Device> for AnyView<'static> {
    fn from(v: Device) -> AnyView<'static> {
        unsafe { AnyView::from_raw(pod_cell(ty::DEVICE, RawValue { v_device: v })) }
    }
}

impl From<*mut c_void> for Any {
    fn from(p: *mut c_void) -> Any {
        // A null pointer is indistinguishable from None at the value level.
        let index = if p.is_null() { ty::NONE } else { ty::PTR };
        unsafe { Any::from_raw(pod_cell(index, RawValue { v_ptr: p })) }
    }
}

impl From<*mut c_void> for AnyView<'static> {
    fn from(p: *mut c_void) -> AnyView<'static> {
        let index = if p.is_null() { ty::NONE } else { ty::PTR };
        unsafe { AnyView::from_raw(pod_cell(index, RawValue { v_ptr: p })) }
    }
}

impl<'a> From<&'a str> for AnyView<'a> {
    fn from(s: &'a str) -> AnyView<'a> {
        let raw = AnyRaw {
            type_index: ty::RAW_STR,
            small_len: s.len() as i32,
            v: RawValue { v_str: s.as_ptr() as *const _ },
        };
        AnyView { raw, _marker: PhantomData }
    }
}

impl From<&str> for Any {
    fn from(s: &str) -> Any {
        Any::from(crate::containers::StrObj::from_bytes(s.as_bytes()))
    }
}

impl From<String> for Any {
    fn from(s: String) -> Any {
        Any::from(crate::containers::StrObj::from_bytes(s.as_bytes()))
    }
}

impl<T> From<Option<T>> for Any
where
    T: Into<Any>,
{
    fn from(v: Option<T>) -> Any {
        match v {
            Some(v) => v.into(),
            None => Any::none(),
        }
    }
}

macro_rules! impl_int_try_from {
    ($($ty:ty),*) => {$(
        impl TryFromAny for $ty {
            fn try_from_any(raw: &AnyRaw) -> Result<$ty> {
                match raw.type_index {
                    ty::INT => Ok(unsafe { raw.v.v_int64 } as $ty),
                    ty::BOOL => Ok(unsafe { raw.v.v_bool } as $ty),
                    _ => Err(conversion_error(raw, "int")),
                }
            }
        }
        impl TypeNamed for $ty {
            fn type_str() -> String {
                "int".to_string()
            }
        }
    )*};
}

impl_int_try_from!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_float_try_from {
    ($($ty:ty),*) => {$(
        impl TryFromAny for $ty {
            fn try_from_any(raw: &AnyRaw) -> Result<$ty> {
                match raw.type_index {
                    ty::FLOAT => Ok(unsafe { raw.v.v_float64 } as $ty),
                    // int -> float widening
                    ty::INT => Ok(unsafe { raw.v.v_int64 } as $ty),
                    _ => Err(conversion_error(raw, "float")),
                }
            }
        }
        impl TypeNamed for $ty {
            fn type_str() -> String {
                "float".to_string()
            }
        }
    )*};
}

impl_float_try_from!(f32, f64);

impl TryFromAny for bool {
    fn try_from_any(raw: &AnyRaw) -> Result<bool> {
        match raw.type_index {
            ty::BOOL => Ok(unsafe { raw.v.v_bool }),
            _ => Err(conversion_error(raw, "bool")),
        }
    }
}

impl TypeNamed for bool {
    fn type_str() -> String {
        "bool".to_string()
    }
}

impl TryFromAny for *mut c_void {
    fn try_from_any(raw: &AnyRaw) -> Result<*mut c_void> {
        match raw.type_index {
            ty::PTR | ty::NONE | ty::RAW_STR => Ok(unsafe { raw.v.v_ptr }),
            _ => Err(conversion_error(raw, "Ptr")),
        }
    }
}

impl TypeNamed for *mut c_void {
    fn type_str() -> String {
        "Ptr".to_string()
    }
}

/// Read the bytes of a `Str` object or raw-string cell, if it is one.
pub(crate) fn str_bytes_of(raw: &AnyRaw) -> Option<&[u8]> {
    match raw.type_index {
        ty::RAW_STR => Some(unsafe { raw.raw_str_bytes() }),
        ty::STR => {
            let obj = unsafe { &*(raw.obj_ptr() as *const crate::containers::StrObj) };
            Some(obj.as_bytes())
        }
        _ => None,
    }
}

impl TryFromAny for DataType {
    fn try_from_any(raw: &AnyRaw) -> Result<DataType> {
        if raw.type_index == ty::DATA_TYPE {
            return Ok(unsafe { raw.v.v_dtype });
        }
        match str_bytes_of(raw) {
            Some(bytes) => DataType::parse(&String::from_utf8_lossy(bytes)),
            None => Err(conversion_error(raw, "dtype")),
        }
    }
}

impl TypeNamed for DataType {
    fn type_str() -> String {
        "dtype".to_string()
    }
}

impl TryFromAny for Device {
    fn try_from_any(raw: &AnyRaw) -> Result<Device> {
        if raw.type_index == ty::DEVICE {
            return Ok(unsafe { raw.v.v_device });
        }
        match str_bytes_of(raw) {
            Some(bytes) => Device::parse(&String::from_utf8_lossy(bytes)),
            None => Err(conversion_error(raw, "Device")),
        }
    }
}

impl TypeNamed for Device {
    fn type_str() -> String {
        "Device".to_string()
    }
}

impl TryFromAny for String {
    fn try_from_any(raw: &AnyRaw) -> Result<String> {
        match str_bytes_of(raw) {
            Some(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            None => Err(conversion_error(raw, "str")),
        }
    }
}

impl TypeNamed for String {
    fn type_str() -> String {
        "str".to_string()
    }
}

impl TypeNamed for &'static str {
    fn type_str() -> String {
        "str".to_string()
    }
}

impl TryFromAny for Any {
    fn try_from_any(raw: &AnyRaw) -> Result<Any> {
        Ok(Any::from_view(unsafe { AnyView::from_raw(*raw) }))
    }
}

impl TypeNamed for Any {
    fn type_str() -> String {
        "Any".to_string()
    }
}

impl<T: ObjectType> TryFromAny for Ref<T> {
    fn try_from_any(raw: &AnyRaw) -> Result<Ref<T>> {
        if raw.is_none() {
            // Nullable target: None converts to the null handle.
            return Ok(Ref::null());
        }
        if !raw.is_pod() && registry::is_instance(raw.type_index, T::type_index()) {
            return Ok(unsafe { Ref::from_raw(raw.obj_ptr() as *mut T) });
        }
        Err(conversion_error(raw, &<Ref<T>>::type_str()))
    }
}

impl<T: ObjectType> TypeNamed for Ref<T> {
    fn type_str() -> String {
        format!("Ref<{}>", T::TYPE_KEY)
    }
}

impl TryFromAny for ObjectRef {
    fn try_from_any(raw: &AnyRaw) -> Result<ObjectRef> {
        if raw.is_pod() {
            return Err(conversion_error(raw, "object.ObjectRef"));
        }
        Ok(unsafe { ObjectRef::from_header(raw.obj_ptr()) })
    }
}

impl TypeNamed for ObjectRef {
    fn type_str() -> String {
        "object.ObjectRef".to_string()
    }
}

impl<T: TryFromAny> TryFromAny for Option<T> {
    fn try_from_any(raw: &AnyRaw) -> Result<Option<T>> {
        if raw.is_none() {
            Ok(None)
        } else {
            T::try_from_any(raw).map(Some)
        }
    }
}

impl<T: TypeNamed> TypeNamed for Option<T> {
    fn type_str() -> String {
        format!("Optional<{}>", T::type_str())
    }
}

impl TypeNamed for () {
    fn type_str() -> String {
        "void".to_string()
    }
}
