//! Reflection Registration - Describing Object Layouts to the Registry
//!
//! Types declare themselves with [`define_object!`], which emits the
//! `#[repr(C)]` struct (header first), the `ObjectType` impl with a
//! lazily assigned dynamic type index, and a `create` constructor.
//! Reflection metadata is then attached with a [`TypeBuilder`] plus the
//! [`reflect_field!`] macro, which derives `(name, offset, storage
//! class, type annotation)` from the struct field itself.

use std::ffi::c_void;
use std::sync::Arc;

use crate::containers::Func;
use crate::error::Result;
use crate::object::{ObjectRef, ObjectType, Ref};
use crate::registry::type_info::{
    FieldAccess, FieldInfo, FieldKind, MethodInfo, MethodKind, StructureKind, TypeDesc, TypeInfo,
};
use crate::registry::{self, global};
use crate::value::{ty, Any, DataType, Device};

/// Storage class and annotation of a type usable as a reflected field.
pub trait ReflectedField {
    const ACCESS: FieldAccess;
    fn type_desc() -> TypeDesc;
}

macro_rules! impl_reflected_pod {
    ($($ty:ty => $access:ident, $index:expr;)*) => {$(
        impl ReflectedField for $ty {
            const ACCESS: FieldAccess = FieldAccess::$access;
            fn type_desc() -> TypeDesc {
                TypeDesc::Atomic($index)
            }
        }
    )*};
}

impl_reflected_pod! {
    bool => Bool, ty::BOOL;
    i8 => I8, ty::INT;
    i16 => I16, ty::INT;
    i32 => I32, ty::INT;
    i64 => I64, ty::INT;
    f32 => F32, ty::FLOAT;
    f64 => F64, ty::FLOAT;
    *mut c_void => Ptr, ty::PTR;
    DataType => DataType, ty::DATA_TYPE;
    Device => Device, ty::DEVICE;
}

impl ReflectedField for Any {
    const ACCESS: FieldAccess = FieldAccess::Any;
    fn type_desc() -> TypeDesc {
        TypeDesc::Any
    }
}

impl ReflectedField for ObjectRef {
    const ACCESS: FieldAccess = FieldAccess::ObjRef;
    fn type_desc() -> TypeDesc {
        TypeDesc::Atomic(ty::OBJECT)
    }
}

impl<T: ObjectType> ReflectedField for Ref<T> {
    const ACCESS: FieldAccess = FieldAccess::ObjRef;
    fn type_desc() -> TypeDesc {
        TypeDesc::Optional(Box::new(TypeDesc::Atomic(T::type_index())))
    }
}

/// Fluent attachment of fields, structure, and methods to a registered
/// type. Finish with [`TypeBuilder::register`].
pub struct TypeBuilder {
    type_index: i32,
    fields: Vec<FieldInfo>,
    structure: Option<(StructureKind, Vec<String>)>,
    methods: Vec<MethodInfo>,
}

impl TypeBuilder {
    /// Start describing `T`, registering it if this is its first use.
    pub fn new<T: ObjectType>() -> TypeBuilder {
        TypeBuilder {
            type_index: T::type_index(),
            fields: Vec::new(),
            structure: None,
            methods: Vec::new(),
        }
    }

    /// Describe an existing dynamic index (the C-side path).
    pub fn for_index(type_index: i32) -> TypeBuilder {
        TypeBuilder { type_index, fields: Vec::new(), structure: None, methods: Vec::new() }
    }

    pub fn field(
        mut self,
        name: &str,
        offset: usize,
        access: FieldAccess,
        ty_desc: TypeDesc,
    ) -> Self {
        self.fields.push(FieldInfo {
            name: name.to_string(),
            index: self.fields.len() as i32,
            offset,
            num_bytes: access.num_bytes(),
            frozen: false,
            ty: ty_desc,
            access,
            kind: FieldKind::NoBind,
        });
        self
    }

    /// Typed field registration; the probe closure only drives inference.
    pub fn field_by<O, F: ReflectedField>(
        self,
        name: &str,
        offset: usize,
        _probe: fn(&O) -> &F,
    ) -> Self {
        self.field(name, offset, F::ACCESS, F::type_desc())
    }

    /// Mark a previously added field as read-only.
    pub fn frozen(mut self, name: &str) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.frozen = true;
        }
        self
    }

    /// Set the structure kind; `bind_fields` names the fields whose
    /// recursion is upgraded to `Bind`.
    pub fn structure(mut self, kind: StructureKind, bind_fields: &[&str]) -> Self {
        self.structure = Some((kind, bind_fields.iter().map(|s| s.to_string()).collect()));
        self
    }

    pub fn method(mut self, name: &str, func: Func) -> Self {
        self.methods.push(MethodInfo { name: name.to_string(), func, kind: MethodKind::Member });
        self
    }

    pub fn static_method(mut self, name: &str, func: Func) -> Self {
        self.methods.push(MethodInfo { name: name.to_string(), func, kind: MethodKind::Static });
        self
    }

    /// Shorthand for the `__init__` constructor method.
    pub fn init(self, func: Func) -> Self {
        self.method("__init__", func)
    }

    pub fn register(self) -> Result<Arc<TypeInfo>> {
        let table = global();
        let sub_kinds: Vec<(i32, FieldKind)> = match &self.structure {
            Some((_, binds)) => binds
                .iter()
                .filter_map(|name| {
                    self.fields
                        .iter()
                        .position(|f| &f.name == name)
                        .map(|i| (i as i32, FieldKind::Bind))
                })
                .collect(),
            None => Vec::new(),
        };
        table.set_fields(self.type_index, self.fields)?;
        if let Some((kind, _)) = self.structure {
            table.set_structure(self.type_index, kind, &sub_kinds)?;
        }
        for method in self.methods {
            table.add_method(self.type_index, method)?;
        }
        registry::type_info(self.type_index)
            .ok_or_else(|| crate::rt_err!(InternalError, "type info vanished during registration"))
    }
}

/// Declare a heap object type: the `#[repr(C)]` struct (header first),
/// its `ObjectType` impl with a registry-assigned index, the upcast
/// marker to its parent, and a `create` constructor taking the payload
/// fields in order.
#[macro_export]
macro_rules! define_object {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $parent:ty [ $key:literal ] {
            $( $(#[$fmeta:meta])* pub $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        pub struct $name {
            pub(crate) header: $crate::object::ObjectHeader,
            $( $(#[$fmeta])* pub $field : $fty, )*
        }

        unsafe impl $crate::object::ObjectType for $name {
            const TYPE_KEY: &'static str = $key;
            fn type_index() -> i32 {
                static INDEX: ::std::sync::OnceLock<i32> = ::std::sync::OnceLock::new();
                *INDEX.get_or_init(|| {
                    $crate::registry::global()
                        .type_register(
                            <$parent as $crate::object::ObjectType>::type_index(),
                            $key,
                            -1,
                        )
                        .expect("dynamic type registration cannot conflict")
                        .type_index
                })
            }
        }

        unsafe impl $crate::object::InstanceOf<$parent> for $name {}

        impl $name {
            pub fn create($( $field : $fty ),*) -> $crate::object::Ref<$name> {
                $crate::object::Ref::new($name {
                    header: $crate::object::ObjectHeader::new_for::<$name>(),
                    $( $field, )*
                })
            }
        }
    };
}

/// Attach one struct field to a [`TypeBuilder`], deriving its metadata
/// from the field's Rust type.
#[macro_export]
macro_rules! reflect_field {
    ($builder:expr, $owner:ty, $field:ident) => {
        $builder.field_by(
            stringify!($field),
            ::core::mem::offset_of!($owner, $field),
            |o: &$owner| &o.$field,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AnyView;

    define_object! {
        /// A two-field node used only by this test module.
        pub struct PairObj : crate::object::Obj ["test.reflect.Pair"] {
            pub first: Any,
            pub second: i64,
        }
    }

    fn register_pair() -> Arc<TypeInfo> {
        let builder = TypeBuilder::new::<PairObj>();
        let builder = reflect_field!(builder, PairObj, first);
        let builder = reflect_field!(builder, PairObj, second);
        builder
            .structure(StructureKind::NoBind, &[])
            .init(Func::new(|args: &[AnyView<'_>]| {
                crate::ensure!(args.len() == 2, TypeError, "Pair takes 2 arguments");
                Ok(Any::from(PairObj::create(args[0].to_owned_any(), args[1].cast::<i64>()?)))
            }))
            .register()
            .unwrap()
    }

    #[test]
    fn test_define_and_reflect() {
        let info = register_pair();
        assert!(info.type_index >= ty::DYN_OBJECT_BEGIN);
        assert_eq!(info.fields.len(), 2);
        assert_eq!(info.fields[0].name, "first");
        assert_eq!(info.fields[0].access, FieldAccess::Any);
        assert_eq!(info.fields[1].access, FieldAccess::I64);
        assert!(info.fields[0].offset >= 16, "payload starts after the header");
    }

    #[test]
    fn test_field_read_through_access() {
        register_pair();
        let pair = PairObj::create(Any::from(5i64), 9);
        let info = registry::type_info(PairObj::type_index()).unwrap();
        let base = pair.as_ptr() as *const u8;
        let first = info.field("first").unwrap();
        let second = info.field("second").unwrap();
        unsafe {
            match first.access.read(base, first.offset) {
                crate::registry::FieldView::Any(v) => assert_eq!(v.cast::<i64>().unwrap(), 5),
                other => panic!("wrong field view: {other:?}"),
            }
            match second.access.read(base, second.offset) {
                crate::registry::FieldView::Int(v) => assert_eq!(v, 9),
                other => panic!("wrong field view: {other:?}"),
            }
        }
    }

    #[test]
    fn test_init_through_vtable() {
        register_pair();
        let init = registry::init_func_of(PairObj::type_index()).unwrap();
        let ret = init.call(&[AnyView::from(1i64), AnyView::from(2i64)]).unwrap();
        let obj = ret.cast::<Ref<PairObj>>().unwrap();
        assert_eq!(obj.second, 2);
        assert_eq!(obj.first.cast::<i64>().unwrap(), 1);
    }
}
