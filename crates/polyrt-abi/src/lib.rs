//! Polyrt C ABI
//!
//! The embedding surface of the runtime: a fixed set of exported
//! functions covering type registration and lookup, vtable access,
//! field/method registration, global functions, value refcounting,
//! function creation and safe calls, error creation and inspection, and
//! extern-object lifecycle.
//!
//! Every function returns 0 on success, -1 on a generic failure (a
//! message string is parked in the thread-local last-error slot), and -2
//! on a typed error (an error object is parked there). Callers retrieve
//! the pending error with `polyrt_last_error_take`.

mod api;
mod ctypes;

pub use api::*;
pub use ctypes::{CTypeField, CTypeInfo, CTypeMethod};
