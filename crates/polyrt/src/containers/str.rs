//! Str - Immutable Byte String Object
//!
//! An immutable byte sequence (UTF-8 for text, but arbitrary bytes are
//! legal — the tensor codec stores binary here). The ABI-visible prefix
//! is `(length: i64, data: *const u8)` with a NUL terminator after the
//! last byte; one owned buffer backs both.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

use crate::error::Result;
use crate::object::{InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::util::str_hash;
use crate::value::convert::{conversion_error, TryFromAny, TypeNamed};
use crate::value::{ty, Any, AnyRaw};

#[repr(C)]
pub struct StrObj {
    pub(crate) header: ObjectHeader,
    length: i64,
    data: *const u8,
    storage: Box<[u8]>,
}

unsafe impl ObjectType for StrObj {
    const TYPE_KEY: &'static str = "object.Str";
    fn type_index() -> i32 {
        ty::STR
    }
}

unsafe impl InstanceOf<Obj> for StrObj {}

impl StrObj {
    /// Copy `bytes` into a fresh NUL-terminated string object.
    pub fn from_bytes(bytes: &[u8]) -> Ref<StrObj> {
        let mut storage = Vec::with_capacity(bytes.len() + 1);
        storage.extend_from_slice(bytes);
        storage.push(0);
        let storage = storage.into_boxed_slice();
        Ref::new(StrObj {
            header: ObjectHeader::new_for::<StrObj>(),
            length: bytes.len() as i64,
            data: storage.as_ptr(),
            storage,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[..self.length as usize]
    }

    /// Pointer to the NUL-terminated bytes (the ABI view).
    #[inline]
    pub fn as_c_ptr(&self) -> *const u8 {
        self.data
    }

    /// Lossy text view; binary payloads render with replacement chars.
    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// 64-bit content hash (rolling chunk hash).
    pub fn hash(&self) -> u64 {
        str_hash(self.as_bytes())
    }

    /// Length-then-memcmp ordering.
    pub fn compare(&self, other: &StrObj) -> Ordering {
        self.length
            .cmp(&other.length)
            .then_with(|| self.as_bytes().cmp(other.as_bytes()))
    }
}

impl PartialEq for StrObj {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for StrObj {}

impl fmt::Display for StrObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// Strong handle to a [`StrObj`].
#[repr(transparent)]
#[derive(Clone)]
pub struct Str {
    obj: Ref<StrObj>,
}

impl Str {
    pub fn new(text: &str) -> Str {
        Str { obj: StrObj::from_bytes(text.as_bytes()) }
    }

    pub fn from_bytes(bytes: &[u8]) -> Str {
        Str { obj: StrObj::from_bytes(bytes) }
    }

    pub(crate) fn from_obj(obj: Ref<StrObj>) -> Str {
        debug_assert!(!obj.is_null());
        Str { obj }
    }

    pub fn obj(&self) -> &Ref<StrObj> {
        &self.obj
    }
}

impl Deref for Str {
    type Target = StrObj;
    fn deref(&self) -> &StrObj {
        &self.obj
    }
}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Str({:?})", self.to_string_lossy())
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for Str {}

impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Str {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialOrd for Str {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Str {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl From<Str> for Any {
    fn from(s: Str) -> Any {
        Any::from(s.obj)
    }
}

impl From<&Str> for Any {
    fn from(s: &Str) -> Any {
        Any::from(s.obj.clone())
    }
}

impl TryFromAny for Str {
    fn try_from_any(raw: &AnyRaw) -> Result<Str> {
        match raw.type_index {
            ty::STR => {
                let obj = unsafe { Ref::from_raw(raw.obj_ptr() as *mut StrObj) };
                Ok(Str::from_obj(obj))
            }
            ty::RAW_STR => Ok(Str::from_bytes(unsafe { raw.raw_str_bytes() })),
            _ => Err(conversion_error(raw, &Str::type_str())),
        }
    }
}

impl TypeNamed for Str {
    fn type_str() -> String {
        "object.Str".to_string()
    }
}

impl crate::registry::reflect::ReflectedField for Str {
    const ACCESS: crate::registry::FieldAccess = crate::registry::FieldAccess::ObjRef;
    fn type_desc() -> crate::registry::TypeDesc {
        crate::registry::TypeDesc::Atomic(ty::STR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_content() {
        let s = Str::new("hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.as_bytes(), b"hello");
        assert_eq!(s, "hello");
        // NUL terminator sits past the end
        unsafe { assert_eq!(*s.as_c_ptr().add(5), 0) };
    }

    #[test]
    fn test_compare_is_length_first() {
        let short = Str::new("zz");
        let long = Str::new("aaa");
        assert_eq!(short.compare(&long), Ordering::Less);
        assert_eq!(Str::new("abc").compare(&Str::new("abd")), Ordering::Less);
        assert_eq!(Str::new("abc").compare(&Str::new("abc")), Ordering::Equal);
    }

    #[test]
    fn test_hash_matches_content() {
        let a = Str::new("structural");
        let b = Str::new("structural");
        let c = Str::new("structura1");
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_any_roundtrip() {
        let v = Any::from("quick fox");
        assert_eq!(v.type_index(), ty::STR);
        let s = v.cast::<Str>().unwrap();
        assert_eq!(s, "quick fox");
        assert_eq!(v.cast::<String>().unwrap(), "quick fox");
    }

    #[test]
    fn test_binary_payload() {
        let bytes = [0u8, 159, 146, 150];
        let s = Str::from_bytes(&bytes);
        assert_eq!(s.as_bytes(), &bytes);
        assert_eq!(s.len(), 4);
    }
}
