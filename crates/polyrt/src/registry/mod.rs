//! Type Registry - Process-Wide Type Metadata and Dispatch
//!
//! One global [`TypeTable`] owns every registered [`TypeInfo`], assigns
//! dynamic type indices, and maintains the name-keyed vtables and global
//! function table. Registration happens during module load; steady-state
//! lookups are read-only snapshots (`Arc<TypeInfo>`), so concurrent
//! readers never contend with each other.

pub mod reflect;
pub mod type_info;
pub mod vtable;

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::containers::Func;
use crate::error::Result;
use crate::util::str_hash;
use crate::value::{ty, Any, AnyRaw, AnyView};

pub use reflect::TypeBuilder;
pub use type_info::{
    FieldAccess, FieldInfo, FieldKind, FieldView, MethodInfo, MethodKind, StructureKind, TypeDesc,
    TypeInfo,
};
pub use vtable::{OverrideMode, VTable};

/// Table slots grow in chunks of this many entries.
const TABLE_CHUNK: usize = 1024;

struct Inner {
    /// Next dynamic type index to hand out.
    num_types: i32,
    entries: Vec<Option<Arc<TypeInfo>>>,
    key_to_index: FxHashMap<String, i32>,
    vtables: FxHashMap<String, Arc<VTable>>,
    global_funcs: FxHashMap<String, Func>,
}

/// A type table: the global one for normal use, or a private one for
/// embedding scenarios that need isolation.
pub struct TypeTable {
    inner: RwLock<Inner>,
}

lazy_static! {
    static ref GLOBAL: TypeTable = TypeTable::new();
}

/// The process-wide table, lazily initialized on first use.
pub fn global() -> &'static TypeTable {
    &GLOBAL
}

impl TypeTable {
    /// A fresh table with the POD, core, and typing indices pre-registered.
    pub fn new() -> TypeTable {
        let table = TypeTable {
            inner: RwLock::new(Inner {
                num_types: ty::DYN_OBJECT_BEGIN,
                entries: vec![None; TABLE_CHUNK],
                key_to_index: FxHashMap::default(),
                vtables: FxHashMap::default(),
                global_funcs: FxHashMap::default(),
            }),
        };
        table.bootstrap();
        table
    }

    pub fn type_info(&self, type_index: i32) -> Option<Arc<TypeInfo>> {
        let inner = self.inner.read();
        if type_index < 0 {
            return None;
        }
        inner.entries.get(type_index as usize).and_then(|e| e.clone())
    }

    pub fn type_info_by_key(&self, type_key: &str) -> Option<Arc<TypeInfo>> {
        let inner = self.inner.read();
        let index = *inner.key_to_index.get(type_key)?;
        inner.entries.get(index as usize).and_then(|e| e.clone())
    }

    /// Register `type_key` under `parent_index`.
    ///
    /// Re-registering an existing key is idempotent and returns the
    /// existing record; requesting a conflicting explicit index is a
    /// `KeyError`. `type_index == -1` allocates a fresh dynamic index.
    pub fn type_register(
        &self,
        parent_index: i32,
        type_key: &str,
        type_index: i32,
    ) -> Result<Arc<TypeInfo>> {
        let mut inner = self.inner.write();
        if let Some(&existing) = inner.key_to_index.get(type_key) {
            let info = inner.entries[existing as usize].clone().expect("index map out of sync");
            if type_index != -1 && type_index != info.type_index {
                crate::throw!(
                    KeyError,
                    "Type `{}` registered with type index `{}`, but re-registered with type index: {}",
                    type_key,
                    info.type_index,
                    type_index
                );
            }
            return Ok(info);
        }
        let type_index = if type_index == -1 {
            let index = inner.num_types;
            inner.num_types += 1;
            index
        } else {
            type_index
        };
        if type_index as usize >= inner.entries.len() {
            let len = (type_index as usize / TABLE_CHUNK + 1) * TABLE_CHUNK;
            inner.entries.resize(len, None);
        }
        if inner.entries[type_index as usize].is_some() {
            crate::throw!(
                KeyError,
                "Type index `{}` is already taken; cannot register type `{}`",
                type_index,
                type_key
            );
        }
        let parent = if parent_index == -1 {
            None
        } else {
            inner.entries.get(parent_index as usize).and_then(|e| e.clone())
        };
        let (type_depth, type_ancestors) = match parent {
            Some(parent) => {
                let mut ancestors = parent.type_ancestors.clone();
                ancestors.push(parent_index);
                (parent.type_depth + 1, ancestors)
            }
            None => (0, Vec::new()),
        };
        let info = Arc::new(TypeInfo {
            type_index,
            type_key: type_key.to_string(),
            type_key_hash: str_hash(type_key.as_bytes()),
            type_depth,
            type_ancestors,
            fields: Vec::new(),
            methods: Vec::new(),
            structure_kind: StructureKind::None,
        });
        inner.entries[type_index as usize] = Some(info.clone());
        inner.key_to_index.insert(type_key.to_string(), type_index);
        log::debug!("registered type `{}` at index {}", type_key, type_index);
        Ok(info)
    }

    fn update_info(
        &self,
        type_index: i32,
        update: impl FnOnce(&mut TypeInfo),
    ) -> Result<Arc<TypeInfo>> {
        let mut inner = self.inner.write();
        let slot = inner
            .entries
            .get_mut(type_index as usize)
            .and_then(|e| e.as_mut());
        let Some(slot) = slot else {
            crate::throw!(KeyError, "Type index `{}` not registered", type_index);
        };
        let mut info = (**slot).clone();
        update(&mut info);
        *slot = Arc::new(info);
        Ok(slot.clone())
    }

    /// Attach reflected fields; stored sorted by offset, with declaration
    /// indices assigned from the input order.
    pub fn set_fields(&self, type_index: i32, mut fields: Vec<FieldInfo>) -> Result<()> {
        for (i, field) in fields.iter_mut().enumerate() {
            field.index = i as i32;
        }
        fields.sort_by_key(|f| f.offset);
        self.update_info(type_index, |info| info.fields = fields)?;
        Ok(())
    }

    /// Attach the structure kind plus per-field binding overrides
    /// (`sub_kinds` pairs a declaration index with its override).
    pub fn set_structure(
        &self,
        type_index: i32,
        kind: StructureKind,
        sub_kinds: &[(i32, FieldKind)],
    ) -> Result<()> {
        self.update_info(type_index, |info| {
            info.structure_kind = kind;
            for (field_index, field_kind) in sub_kinds {
                if let Some(field) = info.fields.iter_mut().find(|f| f.index == *field_index) {
                    field.kind = *field_kind;
                }
            }
        })?;
        Ok(())
    }

    /// Reflect a method and insert it into the global vtable of the same
    /// name. Name collisions within a type keep insertion order in the
    /// reflected list; the vtable sees the latest.
    pub fn add_method(&self, type_index: i32, method: MethodInfo) -> Result<()> {
        let vtable = self.get_vtable(&method.name);
        vtable.set_func(type_index, method.func.clone(), OverrideMode::Overwrite)?;
        self.update_info(type_index, |info| {
            info.methods.push(method);
            info.methods.sort_by(|a, b| a.name.cmp(&b.name));
        })?;
        Ok(())
    }

    /// The named global vtable, created on first use.
    pub fn get_vtable(&self, name: &str) -> Arc<VTable> {
        if let Some(vtable) = self.inner.read().vtables.get(name) {
            return vtable.clone();
        }
        let mut inner = self.inner.write();
        inner
            .vtables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(VTable::new(name)))
            .clone()
    }

    pub fn set_global_func(&self, name: &str, func: Func, allow_override: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.global_funcs.contains_key(name) && !allow_override {
            crate::throw!(KeyError, "Global function already registered: {}", name);
        }
        inner.global_funcs.insert(name.to_string(), func);
        Ok(())
    }

    pub fn get_global_func(&self, name: &str) -> Option<Func> {
        self.inner.read().global_funcs.get(name).cloned()
    }

    fn bootstrap(&self) {
        use crate::containers::{Dict, List};
        use crate::value::{DataType, Device};

        let register = |parent: i32, key: &str, index: i32| {
            self.type_register(parent, key, index)
                .expect("builtin registration cannot conflict");
        };
        // On-stack POD types
        register(-1, "None", ty::NONE);
        register(-1, "bool", ty::BOOL);
        register(-1, "int", ty::INT);
        register(-1, "float", ty::FLOAT);
        register(-1, "Ptr", ty::PTR);
        register(-1, "dtype", ty::DATA_TYPE);
        register(-1, "Device", ty::DEVICE);
        register(-1, "char *", ty::RAW_STR);
        // Core heap object types
        register(-1, "object.Object", ty::OBJECT);
        register(ty::OBJECT, "object.List", ty::LIST);
        register(ty::OBJECT, "object.Dict", ty::DICT);
        register(ty::OBJECT, "object.Error", ty::ERROR);
        register(ty::OBJECT, "object.Func", ty::FUNC);
        register(ty::OBJECT, "object.Str", ty::STR);
        register(ty::OBJECT, "object.Tensor", ty::TENSOR);
        register(ty::OBJECT, "object.Opaque", ty::OPAQUE);
        // Type-descriptor objects
        register(ty::OBJECT, "typing.Type", ty::TYPING);
        register(ty::TYPING, "typing.Any", ty::TYPING_ANY);
        register(ty::TYPING, "typing.Atomic", ty::TYPING_ATOMIC);
        register(ty::TYPING, "typing.Ptr", ty::TYPING_PTR);
        register(ty::TYPING, "typing.Optional", ty::TYPING_OPTIONAL);
        register(ty::TYPING, "typing.List", ty::TYPING_LIST);
        register(ty::TYPING, "typing.Dict", ty::TYPING_DICT);

        let method = |index: i32, name: &str, func: Func| {
            self.add_method(index, MethodInfo {
                name: name.to_string(),
                func,
                kind: MethodKind::Member,
            })
            .expect("builtin method registration cannot fail");
        };

        // `__str__`: PODs format directly; `format_pod` never re-enters the
        // vtable for these indices.
        for index in [ty::NONE, ty::BOOL, ty::INT, ty::FLOAT, ty::PTR, ty::DATA_TYPE, ty::DEVICE, ty::RAW_STR]
        {
            method(index, "__str__", Func::new(|args: &[AnyView<'_>]| {
                crate::ensure!(args.len() == 1, TypeError, "`__str__` expects exactly 1 argument");
                Ok(Any::from(format!("{}", args[0])))
            }));
        }
        method(ty::OBJECT, "__str__", Func::new(|args: &[AnyView<'_>]| {
            crate::ensure!(args.len() == 1, TypeError, "`__str__` expects exactly 1 argument");
            Ok(Any::from(fallback_str(args[0].raw())))
        }));
        method(ty::STR, "__str__", Func::new(|args: &[AnyView<'_>]| {
            let s = args[0].cast::<String>()?;
            Ok(Any::from(format!("\"{s}\"")))
        }));
        method(ty::LIST, "__str__", Func::new(|args: &[AnyView<'_>]| {
            let list = args[0].cast::<List>()?;
            let items: Vec<String> = list.iter().map(|v| v.to_string()).collect();
            Ok(Any::from(format!("[{}]", items.join(", "))))
        }));
        method(ty::DICT, "__str__", Func::new(|args: &[AnyView<'_>]| {
            let dict = args[0].cast::<Dict>()?;
            let items: Vec<String> =
                dict.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            Ok(Any::from(format!("{{{}}}", items.join(", "))))
        }));
        method(ty::ERROR, "__str__", Func::new(|args: &[AnyView<'_>]| {
            let err = args[0].cast::<crate::object::Ref<crate::error::ErrorObj>>()?;
            Ok(Any::from(format!("{}", *err)))
        }));

        // `__init__`: constructors used by deserialization and copying.
        method(ty::BOOL, "__init__", Func::from_typed(|v: bool| v));
        method(ty::INT, "__init__", Func::from_typed(|v: i64| v));
        method(ty::FLOAT, "__init__", Func::from_typed(|v: f64| v));
        method(ty::DEVICE, "__init__", Func::from_typed(|v: Device| v));
        method(ty::DATA_TYPE, "__init__", Func::from_typed(|v: DataType| v));
        method(ty::STR, "__init__", Func::from_typed(|v: String| v));
        method(ty::LIST, "__init__", Func::new(|args: &[AnyView<'_>]| {
            Ok(Any::from(List::from_views(args)))
        }));
        method(ty::DICT, "__init__", Func::new(|args: &[AnyView<'_>]| {
            Ok(Any::from(Dict::from_kv_views(args)?))
        }));
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        TypeTable::new()
    }
}

/// Type key for an index, `"(undefined)"` when unknown.
pub fn type_key(type_index: i32) -> String {
    match global().type_info(type_index) {
        Some(info) => info.type_key.clone(),
        None => "(undefined)".to_string(),
    }
}

pub fn type_info(type_index: i32) -> Option<Arc<TypeInfo>> {
    global().type_info(type_index)
}

/// Resolve a type key, failing with a `TypeError` when unknown.
pub fn type_index_of(type_key: &str) -> Result<i32> {
    match global().type_info_by_key(type_key) {
        Some(info) => Ok(info.type_index),
        None => crate::throw!(TypeError, "Cannot find type with key: {}", type_key),
    }
}

/// Subtype test: `child` is-a `parent` iff they are the same type or
/// `parent` appears at its depth in `child`'s ancestor chain.
pub fn is_instance(child: i32, parent: i32) -> bool {
    if child == parent {
        return true;
    }
    match (global().type_info(child), global().type_info(parent)) {
        (Some(child), Some(parent)) => child.is_instance_of(&parent),
        _ => false,
    }
}

/// The `__init__` constructor of a type, inherited through ancestors.
pub fn init_func_of(type_index: i32) -> Result<Func> {
    global().get_vtable("__init__").get_func(type_index, true)
}

fn fallback_str(raw: &AnyRaw) -> String {
    format!("{}@{:p}", type_key(raw.type_index), unsafe { raw.obj_ptr() })
}

/// Render a heap object through its `__str__` vtable entry, falling back
/// to `type_key@address`.
pub(crate) fn object_to_string(raw: &AnyRaw) -> String {
    let view = unsafe { AnyView::from_raw(*raw) };
    let vtable = global().get_vtable("__str__");
    match vtable.get_func(raw.type_index, true) {
        Ok(func) => match func.call(&[view]).and_then(|ret| ret.cast::<String>()) {
            Ok(text) => text,
            Err(_) => fallback_str(raw),
        },
        Err(_) => fallback_str(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        assert_eq!(type_key(ty::NONE), "None");
        assert_eq!(type_key(ty::STR), "object.Str");
        assert_eq!(type_key(ty::TYPING_DICT), "typing.Dict");
        assert_eq!(type_key(424242), "(undefined)");
    }

    #[test]
    fn test_dynamic_registration_is_idempotent() {
        let a = global().type_register(ty::OBJECT, "test.registry.Node", -1).unwrap();
        let b = global().type_register(ty::OBJECT, "test.registry.Node", -1).unwrap();
        assert_eq!(a.type_index, b.type_index);
        assert!(a.type_index >= ty::DYN_OBJECT_BEGIN);
        // Conflicting explicit index is refused
        let err = global()
            .type_register(ty::OBJECT, "test.registry.Node", a.type_index + 7)
            .unwrap_err();
        assert_eq!(err.kind, "KeyError");
    }

    #[test]
    fn test_ancestor_chain() {
        let info = type_info(ty::STR).unwrap();
        assert_eq!(info.type_depth, 1);
        assert_eq!(info.type_ancestors, vec![ty::OBJECT]);
        assert!(is_instance(ty::STR, ty::OBJECT));
        assert!(!is_instance(ty::OBJECT, ty::STR));
        assert!(is_instance(ty::STR, ty::STR));
        assert!(!is_instance(ty::INT, ty::OBJECT));
    }

    #[test]
    fn test_global_funcs() {
        let table = global();
        let func = Func::from_typed(|x: i64, y: i64| x + y);
        table.set_global_func("test.registry.add", func, false).unwrap();
        let got = table.get_global_func("test.registry.add").unwrap();
        let ret = got.call(&[AnyView::from(2i64), AnyView::from(3i64)]).unwrap();
        assert_eq!(ret.cast::<i64>().unwrap(), 5);
        // Duplicate without override
        let dup = Func::from_typed(|| 0i64);
        assert_eq!(
            table.set_global_func("test.registry.add", dup.clone(), false).unwrap_err().kind,
            "KeyError"
        );
        table.set_global_func("test.registry.add", dup, true).unwrap();
    }

    #[test]
    fn test_init_func_of_int() {
        let func = init_func_of(ty::INT).unwrap();
        let ret = func.call(&[AnyView::from(9i64)]).unwrap();
        assert_eq!(ret.cast::<i64>().unwrap(), 9);
    }

    #[test]
    fn test_init_func_missing_for_opaque() {
        let err = init_func_of(ty::OPAQUE).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("__init__"));
    }
}
