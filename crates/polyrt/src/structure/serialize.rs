//! Serialization - JSON-Style Object Graph Codec
//!
//! `json_serialize` produces `{"values": [...], "type_keys": [...],
//! "tensors": [...]?}`: each object becomes an array
//! `[json_type_index, field...]` in topological order, so references are
//! always backward indices. Ints, devices, and dtypes travel as typed
//! wrappers `[json_type_index, literal]`; strings inline as JSON
//! strings; tensors reference the base64 `tensors` array. The root is
//! the last entry of `values`.
//!
//! `json_deserialize` rebuilds the graph linearly, substituting backward
//! references and typed literals, then invoking each type's `__init__`.
//! A forward reference is a `ValueError`.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::containers::{Dict, DictObj, Func, List, ListObj, StrObj, Tensor, TensorObj};
use crate::error::Result;
use crate::object::ObjectHeader;
use crate::registry::{self, FieldView};
use crate::structure::json::json_loads;
use crate::structure::visit::{topo_visit, visit_fields};
use crate::value::{ty, Any, AnyRaw, AnyView};

struct Emitter {
    type_keys: IndexMap<String, i64>,
    obj_to_index: FxHashMap<usize, i64>,
    values: Vec<Json>,
    tensors: Vec<String>,
}

impl Emitter {
    fn new() -> Emitter {
        Emitter {
            type_keys: IndexMap::new(),
            obj_to_index: FxHashMap::default(),
            values: Vec::new(),
            tensors: Vec::new(),
        }
    }

    fn json_type_index(&mut self, type_key: &str) -> i64 {
        let next = self.type_keys.len() as i64;
        *self.type_keys.entry(type_key.to_string()).or_insert(next)
    }

    fn emit_int(&mut self, v: i64) -> Json {
        let idx = self.json_type_index("int");
        serde_json::json!([idx, v])
    }

    fn emit_device(&mut self, v: crate::value::Device) -> Json {
        let idx = self.json_type_index("Device");
        serde_json::json!([idx, v.to_string()])
    }

    fn emit_dtype(&mut self, v: crate::value::DataType) -> Json {
        let idx = self.json_type_index("dtype");
        serde_json::json!([idx, v.to_string()])
    }

    /// One cell of a row: a literal, a typed wrapper, or a backward
    /// object reference.
    fn emit_cell(&mut self, raw: &AnyRaw) -> Result<Json> {
        Ok(match raw.type_index {
            ty::NONE => Json::Null,
            ty::BOOL => Json::Bool(unsafe { raw.v.v_bool }),
            ty::INT => self.emit_int(unsafe { raw.v.v_int64 }),
            ty::FLOAT => serde_json::json!(unsafe { raw.v.v_float64 }),
            ty::DEVICE => self.emit_device(unsafe { raw.v.v_device }),
            ty::DATA_TYPE => self.emit_dtype(unsafe { raw.v.v_dtype }),
            ty::RAW_STR => {
                Json::String(String::from_utf8_lossy(unsafe { raw.raw_str_bytes() }).into_owned())
            }
            ty::STR => {
                let s = unsafe { &*(raw.obj_ptr() as *const StrObj) };
                Json::String(s.to_string_lossy().into_owned())
            }
            index if !ty::is_pod(index) => {
                match index {
                    ty::FUNC | ty::ERROR => crate::throw!(
                        TypeError,
                        "Unserializable type: {}",
                        registry::type_key(index)
                    ),
                    ty::OPAQUE => {
                        let obj = unsafe { raw.obj_ptr() as *const crate::containers::OpaqueObj };
                        crate::throw!(
                            TypeError,
                            "Cannot serialize `object.Opaque` of type: {}",
                            unsafe { &(*obj).type_name }
                        )
                    }
                    _ => {}
                }
                let ptr = unsafe { raw.obj_ptr() } as usize;
                match self.obj_to_index.get(&ptr) {
                    Some(&idx) => serde_json::json!(idx),
                    None => crate::throw!(
                        InternalError,
                        "topological ordering violated during serialization"
                    ),
                }
            }
            index => crate::throw!(TypeError, "Cannot serialize type: {}", registry::type_key(index)),
        })
    }

    fn emit_object_row(&mut self, obj: *mut ObjectHeader, type_key: &str) -> Result<()> {
        let type_index = unsafe { (*obj).type_index };
        let row = match type_index {
            ty::LIST => {
                let mut row = vec![serde_json::json!(self.json_type_index(type_key))];
                let list = unsafe { &*(obj as *const ListObj) };
                for value in list.elems() {
                    row.push(self.emit_cell(value.raw())?);
                }
                row
            }
            ty::DICT => {
                let mut row = vec![serde_json::json!(self.json_type_index(type_key))];
                let dict = unsafe { &*(obj as *const DictObj) };
                for (k, v) in dict.entries() {
                    row.push(self.emit_cell(k.raw())?);
                    row.push(self.emit_cell(v.raw())?);
                }
                row
            }
            ty::TENSOR => {
                let tensor = unsafe { &*(obj as *const TensorObj) };
                let payload = tensor.to_base64()?;
                let slot = self.tensors.len() as i64;
                self.tensors.push(payload);
                vec![serde_json::json!(self.json_type_index(type_key)), serde_json::json!(slot)]
            }
            ty::STR => {
                // Root-level string: its own entry, as a plain JSON string.
                let s = unsafe { &*(obj as *const StrObj) };
                self.obj_to_index.insert(obj as usize, self.values.len() as i64);
                self.values.push(Json::String(s.to_string_lossy().into_owned()));
                return Ok(());
            }
            ty::FUNC | ty::ERROR => {
                crate::throw!(TypeError, "Unserializable type: {}", type_key)
            }
            ty::OPAQUE => {
                let o = unsafe { &*(obj as *const crate::containers::OpaqueObj) };
                crate::throw!(TypeError, "Cannot serialize `object.Opaque` of type: {}", o.type_name)
            }
            _ => {
                let mut row = vec![serde_json::json!(self.json_type_index(type_key))];
                let info = crate::structure::visit::type_info_of(obj)?;
                let mut cells: Vec<Json> = Vec::with_capacity(info.fields.len());
                let mut failure = None;
                unsafe {
                    visit_fields(obj, &info, |_, view| {
                        let cell = match view {
                            FieldView::Bool(v) => Json::Bool(v),
                            FieldView::Int(v) => self.emit_int(v),
                            FieldView::F32(v) => serde_json::json!(v as f64),
                            FieldView::F64(v) => serde_json::json!(v),
                            FieldView::DataType(v) => self.emit_dtype(v),
                            FieldView::Device(v) => self.emit_device(v),
                            FieldView::Ptr(_) => {
                                failure = Some(crate::rt_err!(
                                    TypeError,
                                    "Unserializable type: Ptr"
                                ));
                                Json::Null
                            }
                            FieldView::Any(v) => self.emit_cell(v.raw())?,
                            FieldView::ObjRef(r) => {
                                if r.is_null() {
                                    Json::Null
                                } else {
                                    let mut raw = AnyRaw::none();
                                    raw.type_index = r.type_index();
                                    raw.v.v_obj = r.as_ptr();
                                    self.emit_cell(&raw)?
                                }
                            }
                        };
                        cells.push(cell);
                        Ok(())
                    })?;
                }
                if let Some(err) = failure {
                    return Err(err);
                }
                row.extend(cells);
                row
            }
        };
        self.obj_to_index.insert(obj as usize, self.values.len() as i64);
        self.values.push(Json::Array(row));
        Ok(())
    }

    /// Assemble the document. `pod_root` is the single entry of `values`
    /// when the root was not an object graph.
    fn finish(self, pod_root: Option<Json>) -> String {
        let mut doc = serde_json::Map::new();
        let mut values = self.values;
        if let Some(root) = pod_root {
            values.push(root);
        }
        doc.insert("values".to_string(), Json::Array(values));
        doc.insert(
            "type_keys".to_string(),
            Json::Array(self.type_keys.keys().map(|k| Json::String(k.clone())).collect()),
        );
        if !self.tensors.is_empty() {
            doc.insert(
                "tensors".to_string(),
                Json::Array(self.tensors.into_iter().map(Json::String).collect()),
            );
        }
        serde_json::to_string(&Json::Object(doc)).expect("JSON document is serializable")
    }
}

/// Serialize a value graph into its JSON wire form.
pub fn json_serialize(value: AnyView<'_>) -> Result<String> {
    let mut emitter = Emitter::new();
    let raw = value.raw();
    if !ty::is_pod(raw.type_index) {
        unsafe {
            let root = raw.obj_ptr();
            topo_visit(root, |obj, info| emitter.emit_object_row(obj, &info.type_key))?;
        }
        return Ok(emitter.finish(None));
    }
    // POD root: `values` holds exactly one literal or typed wrapper.
    let root = match raw.type_index {
        ty::NONE => Json::Null,
        ty::BOOL => Json::Bool(unsafe { raw.v.v_bool }),
        ty::INT => emitter.emit_int(unsafe { raw.v.v_int64 }),
        ty::FLOAT => serde_json::json!(unsafe { raw.v.v_float64 }),
        ty::DEVICE => emitter.emit_device(unsafe { raw.v.v_device }),
        ty::DATA_TYPE => emitter.emit_dtype(unsafe { raw.v.v_dtype }),
        ty::RAW_STR => {
            Json::String(String::from_utf8_lossy(unsafe { raw.raw_str_bytes() }).into_owned())
        }
        index => crate::throw!(TypeError, "Cannot serialize type: {}", registry::type_key(index)),
    };
    Ok(emitter.finish(Some(root)))
}

fn as_row(value: &Any) -> Option<List> {
    value.cast::<List>().ok()
}

fn invoke_init(constructors: &[Option<Func>], row: &[Any]) -> Result<Any> {
    crate::ensure!(!row.is_empty(), ValueError, "Empty constructor row");
    let json_type_index = row[0].cast::<i64>()? as usize;
    let func = constructors
        .get(json_type_index)
        .and_then(|f| f.as_ref())
        .ok_or_else(|| crate::rt_err!(ValueError, "Invalid type index in row: {}", json_type_index))?;
    let views: Vec<AnyView<'_>> = row[1..].iter().map(|a| a.view()).collect();
    Ok(crate::rethrow!(func.call(&views)))
}

/// Decode the JSON wire form back into a value graph.
pub fn json_deserialize(text: &str) -> Result<Any> {
    let doc = json_loads(text)?.cast::<Dict>().map_err(|_| {
        crate::rt_err!(ValueError, "Serialized document must be a JSON object")
    })?;
    // Step 1: constructor table from `type_keys`.
    let type_keys = doc.at(AnyView::from("type_keys"))?.cast::<List>()?;
    let mut constructors: Vec<Option<Func>> = Vec::with_capacity(type_keys.len());
    let mut tensor_json_index: Option<i64> = None;
    for (i, key) in type_keys.iter().enumerate() {
        let key = key.cast::<String>()?;
        let type_index = registry::type_index_of(&key)?;
        if type_index == ty::TENSOR {
            tensor_json_index = Some(i as i64);
            constructors.push(None);
        } else {
            constructors.push(Some(crate::rethrow!(registry::init_func_of(type_index))));
        }
    }
    // Step 2: decode tensors.
    let mut tensors: Vec<Tensor> = Vec::new();
    if let Some(payloads) = doc.get(AnyView::from("tensors")) {
        let payloads = payloads.cast::<List>()?;
        for payload in payloads.iter() {
            tensors.push(Tensor::from_base64(&payload.cast::<String>()?)?);
        }
    }
    // Step 3: rebuild `values` linearly; references only point backward.
    let values = doc.at(AnyView::from("values"))?.cast::<List>()?;
    let count = values.len();
    crate::ensure!(count > 0, ValueError, "Serialized document has no values");
    for i in 0..count as i64 {
        let entry = values.get(i)?;
        match entry.type_index() {
            ty::LIST => {
                let row = entry.cast::<List>()?;
                let row_vec = row.to_vec();
                crate::ensure!(!row_vec.is_empty(), ValueError, "Empty value row at #{}", i);
                let json_type_index = row_vec[0].cast::<i64>()?;
                if Some(json_type_index) == tensor_json_index {
                    let slot = row_vec
                        .get(1)
                        .ok_or_else(|| crate::rt_err!(ValueError, "Tensor row missing payload index"))?
                        .cast::<i64>()? as usize;
                    let tensor = tensors.get(slot).ok_or_else(|| {
                        crate::rt_err!(ValueError, "Tensor payload index out of range: {}", slot)
                    })?;
                    values.set(i, Any::from(tensor))?;
                    continue;
                }
                let type_key = type_keys
                    .get(json_type_index)
                    .map(|k| k.cast::<String>().unwrap_or_default())
                    .unwrap_or_default();
                let mut args: Vec<Any> = Vec::with_capacity(row_vec.len());
                args.push(row_vec[0].clone());
                for arg in &row_vec[1..] {
                    match arg.type_index() {
                        ty::INT => {
                            let k = arg.cast::<i64>()?;
                            crate::ensure!(
                                k >= 0 && k < i,
                                ValueError,
                                "Invalid reference when parsing type `{}`: referring #{} at #{}",
                                type_key,
                                k,
                                i
                            );
                            args.push(values.get(k)?);
                        }
                        ty::LIST => {
                            let nested = as_row(arg).expect("checked list");
                            args.push(invoke_init(&constructors, &nested.to_vec())?);
                        }
                        ty::STR | ty::BOOL | ty::FLOAT | ty::NONE => args.push(arg.clone()),
                        _ => crate::throw!(ValueError, "Unexpected value: {}", arg),
                    }
                }
                values.set(i, invoke_init(&constructors, &args)?)?;
            }
            ty::INT => {
                let k = entry.cast::<i64>()?;
                crate::ensure!(
                    k >= 0 && k < i,
                    ValueError,
                    "Invalid reference: referring #{} at #{}",
                    k,
                    i
                );
                values.set(i, values.get(k)?)?;
            }
            ty::STR | ty::BOOL | ty::FLOAT | ty::NONE => {}
            _ => crate::throw!(ValueError, "Unexpected value: {}", values.get(i)?),
        }
    }
    values.get(count as i64 - 1)
}
