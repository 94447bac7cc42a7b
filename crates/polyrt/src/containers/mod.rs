//! Containers - Core Heap Object Types
//!
//! The built-in object family: strings, lists, dicts, callables,
//! tensors, and opaque foreign handles. Each type is a `#[repr(C)]`
//! object (header first) with a `#[repr(transparent)]` strong handle.

pub mod dict;
pub mod func;
pub mod list;
pub mod opaque;
pub mod str;
pub mod tensor;

pub use self::str::{Str, StrObj};
pub use dict::{Dict, DictObj};
pub use func::{Func, FuncObj, SafeCallFn, TypedFn};
pub use list::{List, ListObj};
pub use opaque::OpaqueObj;
pub use tensor::{Tensor, TensorData, TensorObj};
