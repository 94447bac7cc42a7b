//! Structural Algorithms
//!
//! Equality, hashing, copying, and serialization over registered types.
//! All of them see objects through the reflected-field protocol and the
//! shared topological walk.

pub mod copy;
pub mod eq;
pub mod hash;
pub mod json;
pub mod path;
pub mod serialize;
pub mod visit;

pub use copy::{copy_deep, copy_replace, copy_shallow};
pub use eq::{structural_equal, structural_equal_fail_reason};
pub use hash::structural_hash;
pub use json::json_loads;
pub use path::ObjectPath;
pub use serialize::{json_deserialize, json_serialize};
