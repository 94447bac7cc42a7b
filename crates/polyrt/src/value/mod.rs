//! Value Layer - Uniform Representation of Every Supported Value
//!
//! A value is a 16-byte tagged cell ([`AnyRaw`]) holding either an
//! on-stack POD (bool, int, float, pointer, dtype, device, borrowed
//! string) or a pointer to a reference-counted heap object. [`Any`] owns
//! its cell; [`AnyView`] borrows one.

pub mod any;
pub mod convert;
pub mod device;
pub mod dtype;
pub mod raw;
pub mod ty;

pub use any::{Any, AnyView};
pub use convert::{TryFromAny, TypeNamed};
pub use device::{device_type, Device, DEVICE_CPU};
pub use dtype::{code as dtype_code, DataType, DTYPE_F32, DTYPE_F64, DTYPE_I64};
pub use raw::{AnyRaw, RawValue};
