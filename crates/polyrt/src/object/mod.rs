//! Object Model - Headers, Allocation, and Strong Handles
//!
//! Every heap object begins with a 16-byte [`ObjectHeader`]; destruction
//! is deterministic, driven by an atomic reference count and a per-object
//! deleter. There is no cycle collector: reference cycles must be broken
//! explicitly before the last handle drops.

pub mod extern_obj;
pub mod header;
pub mod refs;

pub use extern_obj::{alloc_extern_object, delete_extern_object};
pub use header::{dec_ref, inc_ref, Deleter, ObjectHeader, ObjectType};
pub use refs::{InstanceOf, Obj, ObjectRef, Ref};
