//! Structural Hash
//!
//! Produces a 64-bit hash consistent with structural equality: a
//! depth-first post-order walk that folds child hashes into the node's
//! type-key hash. Binding nodes mix a sequence number tagged "bound";
//! unbound variables mix one tagged "unbound". Dict entries are hashed
//! order-independently by sorting per-entry hashes and folding only the
//! unique ones.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::containers::{DictObj, ListObj, StrObj, TensorObj};
use crate::error::Result;
use crate::object::ObjectHeader;
use crate::registry::{self, FieldKind, FieldView, StructureKind, TypeInfo};
use crate::structure::visit::type_info_of;
use crate::util::{hash_combine, str_hash};
use crate::value::{ty, AnyRaw};

/// Per-type seed hashes, mirroring the registered type-key hashes.
struct Seeds {
    none_combined: u64,
    bool_: u64,
    int: u64,
    float: u64,
    ptr: u64,
    dtype: u64,
    device: u64,
    raw_str: u64,
    str_: u64,
    tensor: u64,
    bound: u64,
    unbound: u64,
}

fn seeds() -> &'static Seeds {
    static SEEDS: std::sync::OnceLock<Seeds> = std::sync::OnceLock::new();
    SEEDS.get_or_init(|| {
        let key_hash = |index: i32| {
            registry::type_info(index).map(|i| i.type_key_hash).unwrap_or_default()
        };
        Seeds {
            none_combined: hash_combine(key_hash(ty::NONE), 0),
            bool_: key_hash(ty::BOOL),
            int: key_hash(ty::INT),
            float: key_hash(ty::FLOAT),
            ptr: key_hash(ty::PTR),
            dtype: key_hash(ty::DATA_TYPE),
            device: key_hash(ty::DEVICE),
            raw_str: key_hash(ty::RAW_STR),
            str_: key_hash(ty::STR),
            tensor: key_hash(ty::TENSOR),
            bound: str_hash(b"$$Bounds$$"),
            unbound: str_hash(b"$$Unbound$$"),
        }
    })
}

fn hash_bool(v: bool) -> u64 {
    hash_combine(seeds().bool_, v as u64)
}

fn hash_int(v: i64) -> u64 {
    hash_combine(seeds().int, v as u64)
}

fn hash_f64(v: f64) -> u64 {
    let v = if v.is_nan() { f64::NAN } else { v };
    hash_combine(seeds().float, v.to_bits())
}

fn hash_f32(v: f32) -> u64 {
    // f32 fields hash through the same float family, widened.
    hash_f64(if v.is_nan() { f64::NAN } else { v as f64 })
}

fn hash_ptr(v: *mut std::ffi::c_void) -> u64 {
    hash_combine(seeds().ptr, v as u64)
}

fn hash_dtype(v: crate::value::DataType) -> u64 {
    hash_combine(seeds().dtype, v.to_bits())
}

fn hash_device(v: crate::value::Device) -> u64 {
    hash_combine(seeds().device, v.to_bits())
}

fn hash_str_bytes(bytes: &[u8]) -> u64 {
    hash_combine(seeds().str_, str_hash(bytes))
}

struct Task {
    obj: *mut ObjectHeader,
    info: Option<Arc<TypeInfo>>,
    visited: bool,
    bind_free_vars: bool,
    hash_value: u64,
    index_in_results: usize,
}

struct Machine {
    tasks: Vec<Task>,
    results: Vec<u64>,
    obj_to_hash: FxHashMap<usize, u64>,
    num_bound_nodes: u64,
    num_unbound_vars: u64,
}

impl Machine {
    fn push_pod(&mut self, hash_value: u64) {
        self.tasks.push(Task {
            obj: std::ptr::null_mut(),
            info: None,
            visited: false,
            bind_free_vars: false,
            hash_value,
            index_in_results: usize::MAX,
        });
    }

    fn enqueue_any(&mut self, bind_free_vars: bool, raw: &AnyRaw) -> Result<()> {
        match raw.type_index {
            ty::NONE => self.push_pod(seeds().none_combined),
            ty::BOOL => self.push_pod(hash_bool(unsafe { raw.v.v_bool })),
            ty::INT => self.push_pod(hash_int(unsafe { raw.v.v_int64 })),
            ty::FLOAT => self.push_pod(hash_f64(unsafe { raw.v.v_float64 })),
            ty::PTR => self.push_pod(hash_ptr(unsafe { raw.v.v_ptr })),
            ty::DATA_TYPE => self.push_pod(hash_dtype(unsafe { raw.v.v_dtype })),
            ty::DEVICE => self.push_pod(hash_device(unsafe { raw.v.v_device })),
            ty::RAW_STR => {
                let h = hash_combine(seeds().raw_str, str_hash(unsafe { raw.raw_str_bytes() }));
                self.push_pod(h);
            }
            _ => self.enqueue_obj(bind_free_vars, unsafe { raw.obj_ptr() })?,
        }
        Ok(())
    }

    fn enqueue_obj(&mut self, bind_free_vars: bool, obj: *mut ObjectHeader) -> Result<()> {
        let type_index = if obj.is_null() { ty::NONE } else { unsafe { (*obj).type_index } };
        match type_index {
            ty::NONE => self.push_pod(seeds().none_combined),
            ty::STR => {
                let s = unsafe { &*(obj as *const StrObj) };
                self.push_pod(hash_str_bytes(s.as_bytes()));
            }
            ty::TENSOR => {
                let t = unsafe { &*(obj as *const TensorObj) };
                let mut h = hash_int(t.tensor.ndim as i64);
                h = hash_combine(h, hash_int(t.tensor.byte_offset as i64));
                h = hash_combine(h, hash_dtype(t.dtype()));
                h = hash_combine(h, hash_device(t.device()));
                for dim in t.shape() {
                    h = hash_combine(h, hash_int(*dim));
                }
                if let Some(strides) = t.strides() {
                    for stride in strides {
                        h = hash_combine(h, hash_int(*stride));
                    }
                }
                self.push_pod(hash_combine(seeds().tensor, h));
            }
            ty::FUNC | ty::ERROR => {
                crate::throw!(TypeError, "Cannot compare `object.Func` or `object.Error`")
            }
            ty::OPAQUE => {
                let name = unsafe { &(*(obj as *const crate::containers::OpaqueObj)).type_name };
                crate::throw!(TypeError, "Cannot compare `object.Opaque` of type: {}", name)
            }
            _ => {
                let info = type_info_of(obj)?;
                let hash_value = info.type_key_hash;
                self.tasks.push(Task {
                    obj,
                    info: Some(info),
                    visited: false,
                    bind_free_vars,
                    hash_value,
                    index_in_results: usize::MAX,
                });
            }
        }
        Ok(())
    }

    /// Hash of a dict key if it is hashable right now: POD and string
    /// keys directly, object keys only once memoized by the post-order.
    fn dict_key_hash(&self, key: &AnyRaw) -> Option<u64> {
        Some(match key.type_index {
            ty::NONE => seeds().none_combined,
            ty::BOOL => hash_int(unsafe { key.v.v_bool } as i64),
            ty::INT => hash_int(unsafe { key.v.v_int64 }),
            ty::FLOAT => hash_f64(unsafe { key.v.v_float64 }),
            ty::PTR => hash_ptr(unsafe { key.v.v_ptr }),
            ty::DATA_TYPE => hash_dtype(unsafe { key.v.v_dtype }),
            ty::DEVICE => hash_device(unsafe { key.v.v_device }),
            ty::STR => {
                let s = unsafe { &*(key.obj_ptr() as *const StrObj) };
                hash_str_bytes(s.as_bytes())
            }
            _ => *self.obj_to_hash.get(&(unsafe { key.obj_ptr() } as usize))?,
        })
    }

    fn run(&mut self) -> Result<()> {
        while !self.tasks.is_empty() {
            let task_index = self.tasks.len() - 1;
            let (obj, visited, bind, hash_value) = {
                let t = &self.tasks[task_index];
                (t.obj, t.visited, t.bind_free_vars, t.hash_value)
            };
            if visited {
                let (index_in_results, kind) = {
                    let t = &self.tasks[task_index];
                    (
                        t.index_in_results,
                        t.info.as_ref().map(|i| i.structure_kind).unwrap_or(StructureKind::None),
                    )
                };
                crate::ensure!(
                    self.results.len() >= index_in_results,
                    InternalError,
                    "structural hash result stack underflow: {} vs {}",
                    self.results.len(),
                    index_in_results
                );
                let mut h = hash_value;
                while self.results.len() > index_in_results {
                    let child = self.results.pop().unwrap();
                    h = hash_combine(h, child);
                }
                match kind {
                    StructureKind::Bind => {
                        h = hash_combine(h, seeds().bound);
                        h = hash_combine(h, self.num_bound_nodes);
                        self.num_bound_nodes += 1;
                    }
                    StructureKind::Var if bind => {
                        h = hash_combine(h, seeds().bound);
                        h = hash_combine(h, self.num_bound_nodes);
                        self.num_bound_nodes += 1;
                    }
                    StructureKind::Var => {
                        h = hash_combine(h, seeds().unbound);
                        h = hash_combine(h, self.num_unbound_vars);
                        self.num_unbound_vars += 1;
                    }
                    StructureKind::None | StructureKind::NoBind => {}
                }
                self.obj_to_hash.insert(obj as usize, h);
                self.results.push(h);
                self.tasks.pop();
                continue;
            }
            if !obj.is_null() {
                if let Some(&memoized) = self.obj_to_hash.get(&(obj as usize)) {
                    self.results.push(memoized);
                    self.tasks.pop();
                    continue;
                }
            }
            if obj.is_null() {
                self.results.push(hash_value);
                self.tasks.pop();
                continue;
            }
            {
                let t = &mut self.tasks[task_index];
                t.visited = true;
                t.index_in_results = self.results.len();
            }
            match unsafe { (*obj).type_index } {
                ty::LIST => {
                    let list = unsafe { &*(obj as *const ListObj) };
                    self.tasks[task_index].hash_value =
                        hash_combine(hash_value, list.len() as u64);
                    for i in (0..list.len()).rev() {
                        self.enqueue_any(bind, list.elems()[i].raw())?;
                    }
                }
                ty::DICT => {
                    let dict = unsafe { &*(obj as *const DictObj) };
                    self.tasks[task_index].hash_value =
                        hash_combine(hash_value, dict.len() as u64);
                    let mut pairs: Vec<(u64, crate::value::Any, crate::value::Any)> = Vec::new();
                    for (k, v) in dict.entries() {
                        // Keys not yet memoized (unbound subgraphs) are
                        // skipped; matching equality tolerates this.
                        if let Some(h) = self.dict_key_hash(k.raw()) {
                            pairs.push((h, k, v));
                        }
                    }
                    pairs.sort_by_key(|p| p.0);
                    let mut i = 0;
                    while i < pairs.len() {
                        let mut j = i + 1;
                        while j < pairs.len() && pairs[i].0 == pairs[j].0 {
                            j += 1;
                        }
                        // Entries whose key hashes collide are dropped so
                        // the result stays order-independent.
                        if i + 1 == j {
                            self.enqueue_any(bind, pairs[i].1.raw())?;
                            self.enqueue_any(bind, pairs[i].2.raw())?;
                        }
                        i = j;
                    }
                }
                _ => {
                    let info = self.tasks[task_index].info.clone().expect("reflected task");
                    let base = obj as *const u8;
                    for field in &info.fields {
                        let field_bind = bind || field.kind == FieldKind::Bind;
                        match unsafe { field.access.read(base, field.offset) } {
                            FieldView::Bool(v) => self.push_pod(hash_bool(v)),
                            FieldView::Int(v) => self.push_pod(hash_int(v)),
                            FieldView::F32(v) => self.push_pod(hash_f32(v)),
                            FieldView::F64(v) => self.push_pod(hash_f64(v)),
                            FieldView::Ptr(v) => self.push_pod(hash_ptr(v)),
                            FieldView::DataType(v) => self.push_pod(hash_dtype(v)),
                            FieldView::Device(v) => self.push_pod(hash_device(v)),
                            FieldView::Any(v) => self.enqueue_any(field_bind, v.raw())?,
                            FieldView::ObjRef(r) => self.enqueue_obj(field_bind, r.as_ptr())?,
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Structural hash of a value. Hashing `Func`, `Error`, or `Opaque`
/// nodes is a `TypeError`.
pub fn structural_hash(value: crate::value::AnyView<'_>) -> Result<u64> {
    let mut machine = Machine {
        tasks: Vec::new(),
        results: Vec::new(),
        obj_to_hash: FxHashMap::default(),
        num_bound_nodes: 0,
        num_unbound_vars: 0,
    };
    machine.enqueue_any(false, value.raw())?;
    machine.run()?;
    crate::ensure!(
        machine.results.len() == 1,
        InternalError,
        "structural hash produced {} results instead of 1",
        machine.results.len()
    );
    Ok(machine.results[0])
}
