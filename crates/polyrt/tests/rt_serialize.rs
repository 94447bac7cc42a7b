//! Serialization round-trips, including reflected types and tensors.

mod common;

use common::{add, let_in, var};
use polyrt::containers::{Dict, List, Tensor};
use polyrt::structure::{json_deserialize, json_loads, json_serialize, structural_equal};
use polyrt::value::{Any, AnyView, DTYPE_F32};

fn assert_roundtrip(value: &Any) {
    let text = json_serialize(value.view()).unwrap();
    let back = json_deserialize(&text).unwrap();
    assert!(
        structural_equal(value.view(), back.view(), true, false).unwrap(),
        "round-trip changed the value; wire form: {text}"
    );
}

/// `serialize([1, "hello", 2.5])` keeps the typed-int wrapper and the
/// inline string, with the root list as the last `values` entry.
#[test]
fn test_wire_format_of_simple_list() {
    let list = List::new();
    list.push(Any::from(1i64));
    list.push(Any::from("hello"));
    list.push(Any::from(2.5f64));
    let text = json_serialize(Any::from(&list).view()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();

    let values = doc["values"].as_array().unwrap();
    let root = values.last().unwrap();
    assert_eq!(root, &serde_json::json!([0, [1, 1], "hello", 2.5]));
    let type_keys = doc["type_keys"].as_array().unwrap();
    assert_eq!(type_keys[0], "object.List");
    assert_eq!(type_keys[1], "int");
    assert_roundtrip(&Any::from(&list));
}

#[test]
fn test_reflected_graph_roundtrip() {
    let x = var("x");
    let graph = let_in(&x, 41i64, Any::from(add(Any::from(&x), Any::from(1i64))));
    assert_roundtrip(&Any::from(&graph));
}

#[test]
fn test_dict_roundtrip() {
    let dict = Dict::new();
    dict.insert(Any::from("ints"), Any::from(&List::from_iter([1i64, 2, 3])));
    dict.insert(Any::from(7i64), Any::from("seven"));
    dict.insert(Any::from("nested"), {
        let inner = Dict::new();
        inner.insert(Any::from("x"), Any::none());
        Any::from(&inner)
    });
    assert_roundtrip(&Any::from(&dict));
}

#[test]
fn test_backward_references_only() {
    let shared = List::from_iter([1i64]);
    let outer = List::new();
    outer.push(Any::from(&shared));
    outer.push(Any::from(&shared));
    let text = json_serialize(Any::from(&outer).view()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    let values = doc["values"].as_array().unwrap();
    // Two entries: the shared list first, then the outer list referring
    // back to index 0 twice.
    assert_eq!(values.len(), 2);
    assert_eq!(values[1], serde_json::json!([0, 0, 0]));
}

#[test]
fn test_tensor_roundtrip_through_document() {
    let tensor = Tensor::from_parts(
        vec![2, 2],
        DTYPE_F32,
        [1.0f32, 2.0, 3.0, 4.0].iter().flat_map(|v| v.to_ne_bytes()).collect(),
    )
    .unwrap();
    let list = List::new();
    list.push(Any::from(&tensor));
    list.push(Any::from("meta"));
    let text = json_serialize(Any::from(&list).view()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["tensors"].as_array().unwrap().len(), 1);
    let back = json_deserialize(&text).unwrap().cast::<List>().unwrap();
    let t = back.get(0).unwrap().cast::<Tensor>().unwrap();
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.data_bytes().unwrap(), tensor.data_bytes().unwrap());
}

#[test]
fn test_pod_roots() {
    assert_roundtrip(&Any::from(123i64));
    assert_roundtrip(&Any::from(-2.25f64));
    assert_roundtrip(&Any::from(false));
    assert_roundtrip(&Any::none());
    assert_roundtrip(&Any::from("root string"));
    assert_roundtrip(&Any::from(polyrt::value::Device::new(
        polyrt::value::device_type::CUDA,
        3,
    )));
}

#[test]
fn test_json_loads_plain_documents() {
    let v = json_loads(r#"{"a": 1, "b": [true, null, "s"]}"#).unwrap();
    let dict = v.cast::<Dict>().unwrap();
    assert_eq!(dict.len(), 2);
    let b = dict.at(AnyView::from("b")).unwrap().cast::<List>().unwrap();
    assert!(b.get(0).unwrap().cast::<bool>().unwrap());
    assert!(b.get(1).unwrap().is_none());
}

#[test]
fn test_unknown_type_key_fails() {
    let text = r#"{"values": [[0]], "type_keys": ["no.such.Type"]}"#;
    let err = json_deserialize(text).unwrap_err();
    assert_eq!(err.kind, "TypeError");
    assert!(err.message.contains("no.such.Type"));
}
