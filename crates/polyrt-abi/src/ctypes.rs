//! C Mirrors of Registry Metadata
//!
//! `#[repr(C)]` snapshots of [`polyrt::registry::TypeInfo`]. The strings
//! and arrays they point into are owned by a process-wide pool; a
//! snapshot is built on first request and stays valid for the process
//! lifetime, matching the append-only registration discipline.

use std::ffi::CString;
use std::sync::Mutex;

use libc::c_char;

use polyrt::registry::{self, FieldAccess, MethodKind};
use polyrt::value::AnyRaw;

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;

/// One reflected field, C view. `access_code` selects the storage class
/// (see [`access_code_of`]); `ty_index` is the annotated type index (the
/// `None` index for `Any`-typed fields).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CTypeField {
    pub name: *const c_char,
    pub index: i32,
    pub offset: i64,
    pub num_bytes: i32,
    pub frozen: i32,
    pub access_code: i32,
    pub ty_index: i32,
}

/// One reflected method, C view. `func` must hold a function object.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CTypeMethod {
    pub name: *const c_char,
    pub func: AnyRaw,
    /// 0: member method; 1: static method
    pub kind: i32,
}

#[repr(C)]
pub struct CTypeInfo {
    pub type_index: i32,
    pub type_key: *const c_char,
    pub type_key_hash: u64,
    pub type_depth: i32,
    /// `type_depth` entries.
    pub type_ancestors: *const i32,
    pub num_fields: i64,
    pub fields: *const CTypeField,
    pub num_methods: i64,
    pub methods: *const CTypeMethod,
    pub structure_kind: i32,
}

pub(crate) fn access_code_of(access: FieldAccess) -> i32 {
    match access {
        FieldAccess::Bool => 0,
        FieldAccess::I8 => 1,
        FieldAccess::I16 => 2,
        FieldAccess::I32 => 3,
        FieldAccess::I64 => 4,
        FieldAccess::F32 => 5,
        FieldAccess::F64 => 6,
        FieldAccess::Ptr => 7,
        FieldAccess::DataType => 8,
        FieldAccess::Device => 9,
        FieldAccess::Any => 10,
        FieldAccess::ObjRef => 11,
    }
}

pub(crate) fn access_from_code(code: i32) -> Option<FieldAccess> {
    Some(match code {
        0 => FieldAccess::Bool,
        1 => FieldAccess::I8,
        2 => FieldAccess::I16,
        3 => FieldAccess::I32,
        4 => FieldAccess::I64,
        5 => FieldAccess::F32,
        6 => FieldAccess::F64,
        7 => FieldAccess::Ptr,
        8 => FieldAccess::DataType,
        9 => FieldAccess::Device,
        10 => FieldAccess::Any,
        11 => FieldAccess::ObjRef,
        _ => return None,
    })
}

/// Backing storage for one snapshot. Field order matters only in that
/// the pointers in `info` refer into the sibling members.
struct Snapshot {
    info: Box<CTypeInfo>,
    _type_key: CString,
    _ancestors: Box<[i32]>,
    _field_names: Box<[CString]>,
    _fields: Box<[CTypeField]>,
    _method_names: Box<[CString]>,
    _methods: Box<[CTypeMethod]>,
}

// Snapshots are immutable once built; raw pointers inside only target
// their own boxed storage.
unsafe impl Send for Snapshot {}
unsafe impl Sync for Snapshot {}

lazy_static! {
    static ref SNAPSHOTS: Mutex<FxHashMap<i32, &'static Snapshot>> =
        Mutex::new(FxHashMap::default());
}

/// The C view of a registered type, or null when the index is unknown.
/// The first request per type takes the snapshot; later metadata updates
/// are not reflected (registration precedes steady-state lookups).
pub(crate) fn snapshot_of(type_index: i32) -> *const CTypeInfo {
    let mut snapshots = SNAPSHOTS.lock().expect("snapshot pool poisoned");
    if let Some(snapshot) = snapshots.get(&type_index) {
        return &*snapshot.info;
    }
    let Some(info) = registry::type_info(type_index) else {
        return std::ptr::null();
    };
    let type_key = CString::new(info.type_key.as_str()).unwrap_or_default();
    let ancestors: Box<[i32]> = info.type_ancestors.clone().into_boxed_slice();
    let field_names: Box<[CString]> = info
        .fields
        .iter()
        .map(|f| CString::new(f.name.as_str()).unwrap_or_default())
        .collect();
    let fields: Box<[CTypeField]> = info
        .fields
        .iter()
        .zip(field_names.iter())
        .map(|(f, name)| CTypeField {
            name: name.as_ptr(),
            index: f.index,
            offset: f.offset as i64,
            num_bytes: f.num_bytes as i32,
            frozen: f.frozen as i32,
            access_code: access_code_of(f.access),
            ty_index: match &f.ty {
                registry::TypeDesc::Atomic(index) => *index,
                _ => polyrt::value::ty::NONE,
            },
        })
        .collect();
    let method_names: Box<[CString]> = info
        .methods
        .iter()
        .map(|m| CString::new(m.name.as_str()).unwrap_or_default())
        .collect();
    let methods: Box<[CTypeMethod]> = info
        .methods
        .iter()
        .zip(method_names.iter())
        .map(|(m, name)| {
            let func_any = polyrt::Any::from(&m.func);
            CTypeMethod {
                name: name.as_ptr(),
                // The pool owns one reference per exported method slot.
                func: func_any.into_raw(),
                kind: match m.kind {
                    MethodKind::Member => 0,
                    MethodKind::Static => 1,
                },
            }
        })
        .collect();
    let snapshot = Box::leak(Box::new(Snapshot {
        info: Box::new(CTypeInfo {
            type_index: info.type_index,
            type_key: type_key.as_ptr(),
            type_key_hash: info.type_key_hash,
            type_depth: info.type_depth,
            type_ancestors: ancestors.as_ptr(),
            num_fields: fields.len() as i64,
            fields: fields.as_ptr(),
            num_methods: methods.len() as i64,
            methods: methods.as_ptr(),
            structure_kind: info.structure_kind as i32,
        }),
        _type_key: type_key,
        _ancestors: ancestors,
        _field_names: field_names,
        _fields: fields,
        _method_names: method_names,
        _methods: methods,
    }));
    let ptr: *const CTypeInfo = &*snapshot.info;
    snapshots.insert(type_index, snapshot);
    ptr
}
