//! # polyrt - Embeddable Polyglot Object Runtime
//!
//! A minimal foundation for compilers and IR libraries that need a
//! uniform value representation shared across language boundaries:
//!
//! - **Values**: [`value::Any`] / [`value::AnyView`] carry scalars,
//!   pointers, strings, tensors, callables, and reference-counted heap
//!   objects in one 16-byte cell.
//! - **Objects**: every heap object starts with a 16-byte header
//!   (`type_index`, atomic refcount, deleter); destruction is
//!   deterministic and cycles are the user's obligation to break.
//! - **Registry**: one process-wide table of registered types with
//!   ancestor chains for O(1) subtype tests, reflected fields, method
//!   tables, and named vtables.
//! - **Containers**: [`containers::List`], [`containers::Dict`] (open
//!   addressing with quadratic probing), [`containers::Str`],
//!   [`containers::Func`], [`containers::Tensor`].
//! - **Structural algorithms**: equality with binding-variable
//!   semantics, hashing, shallow/deep copy, and a JSON-style
//!   serialization format.
//!
//! ## Quick Start
//!
//! ```rust
//! use polyrt::containers::List;
//! use polyrt::structure::{json_deserialize, json_serialize, structural_equal};
//! use polyrt::value::Any;
//!
//! let list = List::new();
//! list.push(Any::from(1i64));
//! list.push(Any::from("hello"));
//!
//! let text = json_serialize(Any::from(&list).view()).unwrap();
//! let back = json_deserialize(&text).unwrap();
//! assert!(structural_equal(Any::from(&list).view(), back.view(), true, false).unwrap());
//! ```
//!
//! ## Threading
//!
//! Reference-count updates are atomic, so ownership of any object may be
//! transferred across threads. Container payloads are not internally
//! synchronized; shared mutation requires external serialization.

pub mod config;
pub mod containers;
pub mod error;
pub mod object;
pub mod registry;
pub mod structure;
pub mod util;
pub mod value;

pub use error::{Result, RtError};
pub use object::{Obj, ObjectRef, Ref};
pub use value::{Any, AnyView};

/// Crate version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version_not_empty() {
        assert!(!super::VERSION.is_empty());
    }
}
