//! Error Module - Runtime Error Types
//!
//! Every fallible runtime operation returns [`Result<T>`]. The error value
//! carries an open-ended kind string (the conventional kinds are listed as
//! constants below), a message, and a traceback of `(file, line, function)`
//! frames: `throw!` records the raise site, and `rethrow!` appends one
//! frame per propagation site it passes through (dispatch boundaries, the
//! ABI capture point), up to the configured traceback limit.
//!
//! Errors cross the ABI boundary as heap [`ErrorObj`] objects; within the
//! process they propagate as ordinary `Result` values.

use std::fmt;

use thiserror::Error;

use crate::config;
use crate::object::{ObjectHeader, ObjectType, Ref};
use crate::value::ty;

/// Conventional error kinds. The set is open: any string is a legal kind.
pub mod kind {
    pub const TYPE_ERROR: &str = "TypeError";
    pub const VALUE_ERROR: &str = "ValueError";
    pub const KEY_ERROR: &str = "KeyError";
    pub const INDEX_ERROR: &str = "IndexError";
    pub const RUNTIME_ERROR: &str = "RuntimeError";
    pub const INTERNAL_ERROR: &str = "InternalError";
}

/// One traceback frame: where an error was raised or re-raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", line {}, in {}", self.file, self.line, self.function)
    }
}

/// Main error type for all runtime operations
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RtError {
    /// Error kind string, e.g. `"TypeError"`
    pub kind: String,
    /// Human-readable message naming the failing operation and types
    pub message: String,
    /// Traceback frames, innermost first
    pub frames: Vec<Frame>,
}

impl RtError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RtError { kind: kind.into(), message: message.into(), frames: Vec::new() }
    }

    /// Construct with one traceback frame. Used by the `throw!` macro.
    pub fn with_frame(
        kind: &str,
        message: String,
        file: &'static str,
        line: u32,
        function: &'static str,
    ) -> Self {
        RtError {
            kind: kind.to_string(),
            message,
            frames: vec![Frame { file, line, function }],
        }
    }

    /// Append a re-raise frame, respecting the configured traceback
    /// limit. Called by `rethrow!` and by the boundaries that move errors
    /// between representations (foreign-call re-entry, the ABI capture
    /// slot).
    pub fn push_frame(&mut self, file: &'static str, line: u32, function: &'static str) {
        let limit = config::current().traceback_limit;
        if self.frames.len() < limit {
            self.frames.push(Frame { file, line, function });
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        RtError::new(kind::TYPE_ERROR, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        RtError::new(kind::VALUE_ERROR, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        RtError::new(kind::KEY_ERROR, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        RtError::new(kind::INDEX_ERROR, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RtError::new(kind::INTERNAL_ERROR, message)
    }

    /// Render the traceback block, innermost frame last, mirroring the
    /// conventional interpreter format.
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.frames.iter().rev() {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out
    }

    /// Move this error into its heap-object form for the ABI boundary.
    pub fn into_object(self) -> Ref<ErrorObj> {
        ErrorObj::new(self.kind, self.message, self.frames)
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RtError>;

/// Heap form of an error: `(kind, message, traceback)`.
///
/// The ABI extracts its content as a flat string list
/// `[kind, message, file0, line0, func0, file1, ...]`.
#[repr(C)]
pub struct ErrorObj {
    pub(crate) header: ObjectHeader,
    pub kind: String,
    pub message: String,
    pub frames: Vec<Frame>,
}

unsafe impl ObjectType for ErrorObj {
    const TYPE_KEY: &'static str = "object.Error";
    fn type_index() -> i32 {
        ty::ERROR
    }
}

impl ErrorObj {
    pub fn new(kind: String, message: String, frames: Vec<Frame>) -> Ref<ErrorObj> {
        Ref::new(ErrorObj {
            header: ObjectHeader::new_for::<ErrorObj>(),
            kind,
            message,
            frames,
        })
    }

    pub fn to_error(&self) -> RtError {
        RtError {
            kind: self.kind.clone(),
            message: self.message.clone(),
            frames: self.frames.clone(),
        }
    }

    /// Flat `(file, line, function)` triples as strings, traceback order.
    pub fn info_strings(&self) -> Vec<String> {
        let mut out = vec![self.kind.clone(), self.message.clone()];
        for frame in &self.frames {
            out.push(frame.file.to_string());
            out.push(frame.line.to_string());
            out.push(frame.function.to_string());
        }
        out
    }
}

impl fmt::Display for ErrorObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Build an [`RtError`] with a traceback frame at the invocation site.
#[macro_export]
macro_rules! rt_err {
    ($kind:ident, $($arg:tt)*) => {
        $crate::error::RtError::with_frame(
            stringify!($kind),
            format!($($arg)*),
            file!(),
            line!(),
            module_path!(),
        )
    };
}

/// Early-return with an error built like `rt_err!`.
#[macro_export]
macro_rules! throw {
    ($kind:ident, $($arg:tt)*) => {
        return Err($crate::rt_err!($kind, $($arg)*))
    };
}

/// Ensure a condition holds, otherwise `throw!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $kind:ident, $($arg:tt)*) => {
        if !$cond {
            $crate::throw!($kind, $($arg)*);
        }
    };
}

/// Propagate a `Result` like `?`, appending a traceback frame for this
/// re-raise site to the error on the way out.
#[macro_export]
macro_rules! rethrow {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(mut err) => {
                err.push_frame(file!(), line!(), module_path!());
                return Err(err);
            }
        }
    };
}
