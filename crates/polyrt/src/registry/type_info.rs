//! Type Metadata - Reflected Descriptions of Registered Types

use std::ffi::c_void;
use std::fmt;

use crate::containers::Func;
use crate::error::Result;
use crate::object::ObjectRef;
use crate::registry;
use crate::value::{Any, AnyView, DataType, Device};

/// Structural-equality binding behavior of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    /// Not comparable structurally.
    None,
    /// Children compared recursively; no variable binding.
    NoBind,
    /// Like `NoBind`, and on exit the lhs/rhs pair is recorded in the
    /// binding table.
    Bind,
    /// A binding variable: bound when free variables may bind, otherwise
    /// an "Unbound variable" failure.
    Var,
}

impl StructureKind {
    pub fn from_i32(v: i32) -> Option<StructureKind> {
        Some(match v {
            0 => StructureKind::None,
            1 => StructureKind::NoBind,
            2 => StructureKind::Bind,
            3 => StructureKind::Var,
            _ => return None,
        })
    }
}

/// Per-field override of the recursion's binding behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    NoBind,
    Bind,
}

/// Type annotation attached to a reflected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Any,
    Atomic(i32),
    Ptr(Box<TypeDesc>),
    Optional(Box<TypeDesc>),
    List(Box<TypeDesc>),
    Dict(Box<TypeDesc>, Box<TypeDesc>),
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Any => write!(f, "Any"),
            TypeDesc::Atomic(index) => write!(f, "{}", registry::type_key(*index)),
            TypeDesc::Ptr(t) => write!(f, "Ptr[{t}]"),
            TypeDesc::Optional(t) => write!(f, "Optional[{t}]"),
            TypeDesc::List(t) => write!(f, "list[{t}]"),
            TypeDesc::Dict(k, v) => write!(f, "dict[{k}, {v}]"),
        }
    }
}

/// Storage class of a reflected field: selects the typed accessor the
/// visitors use to read or write it through a raw object pointer.
///
/// Optional PODs and optional objects are carried in `Any` /
/// `ObjRef`-classed storage; the nullable state is the `None` tag or the
/// null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    DataType,
    Device,
    /// An `Any` cell embedded in the object.
    Any,
    /// A nullable strong object handle (`Ref<T>` or `ObjectRef`).
    ObjRef,
}

/// A field read out of an object, preserving its static storage class.
#[derive(Debug, Clone, Copy)]
pub enum FieldView<'a> {
    Bool(bool),
    Int(i64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
    DataType(DataType),
    Device(Device),
    Any(&'a Any),
    ObjRef(&'a ObjectRef),
}

impl<'a> FieldView<'a> {
    /// Borrow this field as a value view.
    pub fn as_any_view(&self) -> AnyView<'a> {
        match *self {
            FieldView::Bool(v) => AnyView::from(v),
            FieldView::Int(v) => AnyView::from(v),
            FieldView::F32(v) => AnyView::from(v),
            FieldView::F64(v) => AnyView::from(v),
            FieldView::Ptr(v) => AnyView::from(v),
            FieldView::DataType(v) => AnyView::from(v),
            FieldView::Device(v) => AnyView::from(v),
            FieldView::Any(v) => v.view(),
            FieldView::ObjRef(v) => {
                if v.is_null() {
                    AnyView::none()
                } else {
                    let mut raw = crate::value::AnyRaw::none();
                    raw.type_index = v.type_index();
                    raw.v.v_obj = v.as_ptr();
                    unsafe { AnyView::from_raw(raw) }
                }
            }
        }
    }
}

impl FieldAccess {
    pub fn num_bytes(&self) -> u32 {
        match self {
            FieldAccess::Bool | FieldAccess::I8 => 1,
            FieldAccess::I16 => 2,
            FieldAccess::I32 | FieldAccess::F32 | FieldAccess::DataType => 4,
            FieldAccess::I64
            | FieldAccess::F64
            | FieldAccess::Ptr
            | FieldAccess::Device
            | FieldAccess::ObjRef => 8,
            FieldAccess::Any => 16,
        }
    }

    /// Read the field stored at `base + offset`.
    ///
    /// # Safety
    ///
    /// `base` must point to a live object whose registered layout places a
    /// field of this storage class at `offset`.
    pub unsafe fn read<'a>(&self, base: *const u8, offset: usize) -> FieldView<'a> {
        let p = base.add(offset);
        match self {
            FieldAccess::Bool => FieldView::Bool(*(p as *const bool)),
            FieldAccess::I8 => FieldView::Int(*(p as *const i8) as i64),
            FieldAccess::I16 => FieldView::Int(*(p as *const i16) as i64),
            FieldAccess::I32 => FieldView::Int(*(p as *const i32) as i64),
            FieldAccess::I64 => FieldView::Int(*(p as *const i64)),
            FieldAccess::F32 => FieldView::F32(*(p as *const f32)),
            FieldAccess::F64 => FieldView::F64(*(p as *const f64)),
            FieldAccess::Ptr => FieldView::Ptr(*(p as *const *mut c_void)),
            FieldAccess::DataType => FieldView::DataType(*(p as *const DataType)),
            FieldAccess::Device => FieldView::Device(*(p as *const Device)),
            FieldAccess::Any => FieldView::Any(&*(p as *const Any)),
            FieldAccess::ObjRef => FieldView::ObjRef(&*(p as *const ObjectRef)),
        }
    }

    /// Store `value` into the field at `base + offset`, converting as
    /// needed and releasing any previously held reference.
    ///
    /// # Safety
    ///
    /// As [`FieldAccess::read`], plus exclusive access to the field.
    pub unsafe fn write(&self, base: *mut u8, offset: usize, value: AnyView<'_>) -> Result<()> {
        let p = base.add(offset);
        match self {
            FieldAccess::Bool => *(p as *mut bool) = value.cast::<bool>()?,
            FieldAccess::I8 => *(p as *mut i8) = value.cast::<i8>()?,
            FieldAccess::I16 => *(p as *mut i16) = value.cast::<i16>()?,
            FieldAccess::I32 => *(p as *mut i32) = value.cast::<i32>()?,
            FieldAccess::I64 => *(p as *mut i64) = value.cast::<i64>()?,
            FieldAccess::F32 => *(p as *mut f32) = value.cast::<f32>()?,
            FieldAccess::F64 => *(p as *mut f64) = value.cast::<f64>()?,
            FieldAccess::Ptr => *(p as *mut *mut c_void) = value.cast::<*mut c_void>()?,
            FieldAccess::DataType => *(p as *mut DataType) = value.cast::<DataType>()?,
            FieldAccess::Device => *(p as *mut Device) = value.cast::<Device>()?,
            FieldAccess::Any => *(p as *mut Any) = value.to_owned_any(),
            FieldAccess::ObjRef => {
                let new = value.cast::<Option<ObjectRef>>()?.unwrap_or_default();
                *(p as *mut ObjectRef) = new;
            }
        }
        Ok(())
    }

    /// Drop any strong reference the field holds. Used when tearing down
    /// extern objects whose layout exists only in the registry.
    ///
    /// # Safety
    ///
    /// As [`FieldAccess::write`]; the field must not be used afterwards.
    pub unsafe fn drop_in_place(&self, base: *mut u8, offset: usize) {
        let p = base.add(offset);
        match self {
            FieldAccess::Any => std::ptr::drop_in_place(p as *mut Any),
            FieldAccess::ObjRef => std::ptr::drop_in_place(p as *mut ObjectRef),
            _ => {}
        }
    }
}

/// One reflected field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    /// Position in declaration order.
    pub index: i32,
    /// Byte offset from the object base (header included).
    pub offset: usize,
    pub num_bytes: u32,
    /// Read-only after construction.
    pub frozen: bool,
    pub ty: TypeDesc,
    pub access: FieldAccess,
    /// Binding override applied when recursing into this field.
    pub kind: FieldKind,
}

/// Whether a reflected method takes the object as its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Member,
    Static,
}

#[derive(Clone)]
pub struct MethodInfo {
    pub name: String,
    pub func: Func,
    pub kind: MethodKind,
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInfo")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Everything the runtime knows about one registered type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub type_index: i32,
    pub type_key: String,
    pub type_key_hash: u64,
    /// 0 for root types.
    pub type_depth: i32,
    /// Transitive parent chain, root first; length == `type_depth`.
    pub type_ancestors: Vec<i32>,
    /// Sorted by offset.
    pub fields: Vec<FieldInfo>,
    /// Sorted by name.
    pub methods: Vec<MethodInfo>,
    pub structure_kind: StructureKind,
}

impl TypeInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// O(1) subtype test against this type's ancestor chain.
    pub fn is_instance_of(&self, parent: &TypeInfo) -> bool {
        if self.type_index == parent.type_index {
            return true;
        }
        self.type_ancestors.get(parent.type_depth as usize) == Some(&parent.type_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_kind_codes() {
        assert_eq!(StructureKind::from_i32(0), Some(StructureKind::None));
        assert_eq!(StructureKind::from_i32(3), Some(StructureKind::Var));
        assert_eq!(StructureKind::from_i32(9), None);
    }

    #[test]
    fn test_field_view_as_any() {
        let view = FieldView::Int(5).as_any_view();
        assert_eq!(view.cast::<i64>().unwrap(), 5);
        let view = FieldView::F64(1.5).as_any_view();
        assert_eq!(view.cast::<f64>().unwrap(), 1.5);
    }

    #[test]
    fn test_access_widths() {
        assert_eq!(FieldAccess::Bool.num_bytes(), 1);
        assert_eq!(FieldAccess::DataType.num_bytes(), 4);
        assert_eq!(FieldAccess::Device.num_bytes(), 8);
        assert_eq!(FieldAccess::Any.num_bytes(), 16);
    }
}
