//! List - Dense Heterogeneous Array
//!
//! A contiguous array of `Any` slots with power-of-two growth. Mutation
//! goes through `&self` (the payload sits in an `UnsafeCell`): handles
//! alias freely, exactly like every other heap object here, and the
//! container is not internally synchronized.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;

use crate::error::Result;
use crate::object::{InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::util::bit_ceil;
use crate::value::convert::{conversion_error, TryFromAny, TypeNamed};
use crate::value::{ty, Any, AnyRaw, AnyView};

#[repr(C)]
pub struct ListObj {
    pub(crate) header: ObjectHeader,
    data: UnsafeCell<Vec<Any>>,
}

unsafe impl ObjectType for ListObj {
    const TYPE_KEY: &'static str = "object.List";
    fn type_index() -> i32 {
        ty::LIST
    }
}

unsafe impl InstanceOf<Obj> for ListObj {}

impl ListObj {
    pub fn new() -> Ref<ListObj> {
        ListObj::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Ref<ListObj> {
        Ref::new(ListObj {
            header: ObjectHeader::new_for::<ListObj>(),
            data: UnsafeCell::new(Vec::with_capacity(capacity)),
        })
    }

    // SAFETY: single-threaded aliased access per the container contract;
    // callers never hold both a `&` and `&mut` borrow across a call.
    pub(crate) fn elems(&self) -> &Vec<Any> {
        unsafe { &*self.data.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn elems_mut(&self) -> &mut Vec<Any> {
        unsafe { &mut *self.data.get() }
    }

    pub fn len(&self) -> usize {
        self.elems().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.elems().capacity()
    }

    fn check_index(&self, index: i64) -> Result<usize> {
        if index < 0 {
            crate::throw!(KeyError, "List index cannot be negative: {}", index);
        }
        let i = index as usize;
        let len = self.len();
        crate::ensure!(i < len, IndexError, "List index out of range: {} vs size {}", index, len);
        Ok(i)
    }

    fn grow_for_one(&self) {
        let data = self.elems_mut();
        if data.len() == data.capacity() {
            let target = bit_ceil((data.len() + 1).max(4) as u64) as usize;
            data.reserve_exact(target - data.len());
        }
    }

    pub fn push(&self, value: Any) {
        self.grow_for_one();
        self.elems_mut().push(value);
    }

    pub fn pop(&self) -> Result<Any> {
        match self.elems_mut().pop() {
            Some(v) => Ok(v),
            None => crate::throw!(IndexError, "Cannot pop from an empty list"),
        }
    }

    pub fn get(&self, index: i64) -> Result<Any> {
        let i = self.check_index(index)?;
        Ok(self.elems()[i].clone())
    }

    pub fn set(&self, index: i64, value: Any) -> Result<()> {
        let i = self.check_index(index)?;
        self.elems_mut()[i] = value;
        Ok(())
    }

    /// Insert before position `index`; `index == len` appends.
    pub fn insert(&self, index: i64, value: Any) -> Result<()> {
        if index < 0 {
            crate::throw!(KeyError, "List index cannot be negative: {}", index);
        }
        let len = self.len();
        let i = index as usize;
        crate::ensure!(i <= len, IndexError, "List index out of range: {} vs size {}", index, len);
        self.grow_for_one();
        self.elems_mut().insert(i, value);
        Ok(())
    }

    pub fn erase(&self, index: i64) -> Result<Any> {
        let i = self.check_index(index)?;
        Ok(self.elems_mut().remove(i))
    }

    pub fn clear(&self) {
        self.elems_mut().clear();
    }

    /// Grow (with `None` fill) or shrink to exactly `size` elements.
    pub fn resize(&self, size: usize) {
        self.elems_mut().resize_with(size, Any::none);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = AnyView<'_>> + ExactSizeIterator {
        self.elems().iter().map(|v| v.view())
    }
}

impl fmt::Debug for ListObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elems().iter()).finish()
    }
}

/// Strong handle to a [`ListObj`].
#[repr(transparent)]
#[derive(Clone)]
pub struct List {
    obj: Ref<ListObj>,
}

impl List {
    pub fn new() -> List {
        List { obj: ListObj::new() }
    }

    pub fn with_capacity(capacity: usize) -> List {
        List { obj: ListObj::with_capacity(capacity) }
    }

    pub fn from_views(views: &[AnyView<'_>]) -> List {
        let list = List::with_capacity(views.len());
        for view in views {
            list.push(view.to_owned_any());
        }
        list
    }

    pub(crate) fn from_obj(obj: Ref<ListObj>) -> List {
        debug_assert!(!obj.is_null());
        List { obj }
    }

    pub fn obj(&self) -> &Ref<ListObj> {
        &self.obj
    }

    /// Snapshot of the elements (cheap clones: refcount bumps and PODs).
    pub fn to_vec(&self) -> Vec<Any> {
        self.obj.elems().clone()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = AnyView<'_>> + ExactSizeIterator {
        self.obj.iter()
    }
}

impl Default for List {
    fn default() -> Self {
        List::new()
    }
}

impl Deref for List {
    type Target = ListObj;
    fn deref(&self) -> &ListObj {
        &self.obj
    }
}

impl<T: Into<Any>> FromIterator<T> for List {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> List {
        let list = List::new();
        for item in iter {
            list.push(item.into());
        }
        list
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.obj, f)
    }
}

impl From<List> for Any {
    fn from(list: List) -> Any {
        Any::from(list.obj)
    }
}

impl From<&List> for Any {
    fn from(list: &List) -> Any {
        Any::from(list.obj.clone())
    }
}

impl TryFromAny for List {
    fn try_from_any(raw: &AnyRaw) -> Result<List> {
        if raw.type_index == ty::LIST {
            let obj = unsafe { Ref::from_raw(raw.obj_ptr() as *mut ListObj) };
            Ok(List::from_obj(obj))
        } else {
            Err(conversion_error(raw, &List::type_str()))
        }
    }
}

impl TypeNamed for List {
    fn type_str() -> String {
        "object.List".to_string()
    }
}

impl crate::registry::reflect::ReflectedField for List {
    const ACCESS: crate::registry::FieldAccess = crate::registry::FieldAccess::ObjRef;
    fn type_desc() -> crate::registry::TypeDesc {
        crate::registry::TypeDesc::List(Box::new(crate::registry::TypeDesc::Any))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get_len() {
        let list = List::new();
        list.push(Any::from(1i64));
        list.push(Any::from(2.0f64));
        list.push(Any::from("three"));
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0).unwrap().cast::<i64>().unwrap(), 1);
        assert_eq!(list.get(1).unwrap().cast::<f64>().unwrap(), 2.0);
        assert_eq!(list.get(2).unwrap().cast::<String>().unwrap(), "three");
    }

    #[test]
    fn test_negative_index_is_key_error() {
        let list = List::from_iter([1i64]);
        assert_eq!(list.get(-1).unwrap_err().kind, "KeyError");
        assert_eq!(list.set(-2, Any::none()).unwrap_err().kind, "KeyError");
    }

    #[test]
    fn test_out_of_range_is_index_error() {
        let list = List::from_iter([1i64]);
        assert_eq!(list.get(1).unwrap_err().kind, "IndexError");
        assert_eq!(list.erase(5).unwrap_err().kind, "IndexError");
    }

    #[test]
    fn test_insert_erase() {
        let list = List::from_iter([1i64, 3]);
        list.insert(1, Any::from(2i64)).unwrap();
        let values: Vec<i64> = list.iter().map(|v| v.cast::<i64>().unwrap()).collect();
        assert_eq!(values, [1, 2, 3]);
        let removed = list.erase(0).unwrap();
        assert_eq!(removed.cast::<i64>().unwrap(), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_capacity_grows_in_powers_of_two() {
        let list = List::new();
        for i in 0..9i64 {
            list.push(Any::from(i));
        }
        assert!(list.capacity().is_power_of_two());
        assert!(list.capacity() >= 9);
    }

    #[test]
    fn test_resize_fills_none() {
        let list = List::from_iter([1i64]);
        list.resize(3);
        assert_eq!(list.len(), 3);
        assert!(list.get(2).unwrap().is_none());
        list.resize(1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_element_refcounts() {
        let s = crate::containers::Str::new("shared");
        let list = List::new();
        list.push(Any::from(&s));
        assert_eq!(s.obj().header().ref_count(), 2);
        list.erase(0).unwrap();
        assert_eq!(s.obj().header().ref_count(), 1);
    }
}
