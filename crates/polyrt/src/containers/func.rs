//! Func - Callable Object
//!
//! A function object carries two calling surfaces: `call` propagates
//! errors as ordinary `Result`s within the process, and `safe_call`
//! captures them (and panics) into the return slot with a status code,
//! for use when control crosses a language boundary.
//!
//! Typed construction wraps a host closure in thunks that convert each
//! argument through the value layer, synthesizing precise diagnostics
//! from the function's signature string on mismatch.

use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{ErrorObj, Result, RtError};
use crate::object::{Deleter, InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::registry;
use crate::value::convert::{conversion_error, TryFromAny, TypeNamed};
use crate::value::{ty, Any, AnyRaw, AnyView};

/// ABI calling convention: `(self, argc, argv, ret) -> status` where
/// status 0 is success, -1 a generic failure (message string in `ret`),
/// -2 a typed error (error object in `ret`).
pub type SafeCallFn =
    unsafe extern "C" fn(*const c_void, i32, *const AnyRaw, *mut AnyRaw) -> i32;

type HostClosure = Box<dyn Fn(&[AnyView<'_>]) -> Result<Any> + Send + Sync>;

enum FuncBody {
    Host(HostClosure),
    Foreign {
        self_ptr: *mut c_void,
        deleter: Option<Deleter>,
        safe_call: SafeCallFn,
    },
}

#[repr(C)]
pub struct FuncObj {
    pub(crate) header: ObjectHeader,
    /// ABI-facing entry point; always valid to invoke with `self` being
    /// this object.
    pub safe_call: SafeCallFn,
    body: FuncBody,
}

unsafe impl ObjectType for FuncObj {
    const TYPE_KEY: &'static str = "object.Func";
    fn type_index() -> i32 {
        ty::FUNC
    }
}

unsafe impl InstanceOf<Obj> for FuncObj {}

unsafe extern "C" fn host_safe_call(
    self_ptr: *const c_void,
    num_args: i32,
    args: *const AnyRaw,
    ret: *mut AnyRaw,
) -> i32 {
    let func = &*(self_ptr as *const FuncObj);
    let args: Vec<AnyView<'_>> = (0..num_args as usize)
        .map(|i| AnyView::from_raw(*args.add(i)))
        .collect();
    let mut out = Any::none();
    let code = func.safe_call_impl(&args, &mut out);
    *ret = out.into_raw();
    code
}

impl FuncObj {
    fn alloc(body: FuncBody) -> Ref<FuncObj> {
        Ref::new(FuncObj {
            header: ObjectHeader::new_for::<FuncObj>(),
            safe_call: host_safe_call,
            body,
        })
    }

    /// Invoke, propagating errors to the caller.
    pub fn call(&self, args: &[AnyView<'_>]) -> Result<Any> {
        match &self.body {
            FuncBody::Host(f) => f(args),
            FuncBody::Foreign { self_ptr, safe_call, .. } => {
                let raw_args: Vec<AnyRaw> = args.iter().map(|v| *v.raw()).collect();
                let mut ret = AnyRaw::none();
                let code = unsafe {
                    safe_call(*self_ptr, raw_args.len() as i32, raw_args.as_ptr(), &mut ret)
                };
                let ret = unsafe { Any::from_raw(ret) };
                match code {
                    0 => Ok(ret),
                    -2 => match ret.cast::<Ref<ErrorObj>>() {
                        Ok(err) => {
                            // Re-entry into Rust is a re-raise site.
                            let mut err = err.to_error();
                            err.push_frame(file!(), line!(), module_path!());
                            Err(err)
                        }
                        Err(_) => Err(RtError::internal("foreign call reported an error without an error object")),
                    },
                    _ => {
                        let message = ret
                            .cast::<String>()
                            .unwrap_or_else(|_| "foreign call failed".to_string());
                        Err(RtError::new("RuntimeError", message))
                    }
                }
            }
        }
    }

    /// Invoke, capturing errors and panics into `ret`. Returns 0 on
    /// success, -2 for a runtime error (error object in `ret`), -1 for a
    /// host panic (message string in `ret`).
    pub fn safe_call_impl(&self, args: &[AnyView<'_>], ret: &mut Any) -> i32 {
        match catch_unwind(AssertUnwindSafe(|| self.call(args))) {
            Ok(Ok(value)) => {
                *ret = value;
                0
            }
            Ok(Err(err)) => {
                *ret = Any::from(err.into_object());
                -2
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic during function call".to_string());
                *ret = Any::from(message);
                -1
            }
        }
    }
}

impl Drop for FuncObj {
    fn drop(&mut self) {
        if let FuncBody::Foreign { self_ptr, deleter: Some(deleter), .. } = self.body {
            unsafe { deleter(self_ptr) };
        }
    }
}

/// Map an argument-conversion failure to the calling-convention
/// diagnostic.
pub(crate) fn convert_arg<T: TryFromAny + TypeNamed>(
    args: &[AnyView<'_>],
    index: usize,
    signature: &str,
) -> Result<T> {
    match args[index].cast::<T>() {
        Ok(v) => Ok(v),
        Err(_) => Err(RtError::type_error(format!(
            "Mismatched type on argument #{index} when calling: `{signature}`. \
             Expected `{}` but got `{}`",
            T::type_str(),
            registry::type_key(args[index].type_index())
        ))),
    }
}

fn check_arg_count(actual: usize, expected: usize, signature: &str) -> Result<()> {
    if actual != expected {
        return Err(RtError::type_error(format!(
            "Mismatched number of arguments when calling: `{signature}`. \
             Expected {expected} but got {actual} arguments"
        )));
    }
    Ok(())
}

/// Return-value adapter for typed functions.
pub trait IntoRet {
    fn into_ret(self) -> Any;
}

macro_rules! impl_into_ret {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoRet for $ty {
            fn into_ret(self) -> Any {
                Any::from(self)
            }
        }
    )*};
}

impl_into_ret!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64,
    String, &'static str, Any,
    crate::value::DataType, crate::value::Device,
    crate::containers::Str, crate::containers::List, crate::containers::Dict, Func,
);

impl IntoRet for () {
    fn into_ret(self) -> Any {
        Any::none()
    }
}

impl<T: ObjectType> IntoRet for Ref<T> {
    fn into_ret(self) -> Any {
        Any::from(self)
    }
}

impl<T: Into<Any>> IntoRet for Option<T> {
    fn into_ret(self) -> Any {
        Any::from(self)
    }
}

/// A host closure with statically known parameter and return types.
pub trait TypedFn<Args, R>: Send + Sync + 'static {
    fn signature() -> String;
    fn invoke(&self, args: &[AnyView<'_>], signature: &str) -> Result<Any>;
}

macro_rules! impl_typed_fn {
    ($len:expr; $($idx:tt $arg:ident),*) => {
        impl<F, R, $($arg),*> TypedFn<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoRet + TypeNamed,
            $($arg: TryFromAny + TypeNamed,)*
        {
            fn signature() -> String {
                let params: Vec<String> = vec![$(format!("{}: {}", $idx, $arg::type_str())),*];
                format!("({}) -> {}", params.join(", "), R::type_str())
            }

            #[allow(unused_variables)]
            fn invoke(&self, args: &[AnyView<'_>], signature: &str) -> Result<Any> {
                check_arg_count(args.len(), $len, signature)?;
                let ret = self($(convert_arg::<$arg>(args, $idx, signature)?),*);
                Ok(ret.into_ret())
            }
        }
    };
}

impl_typed_fn!(0;);
impl_typed_fn!(1; 0 A0);
impl_typed_fn!(2; 0 A0, 1 A1);
impl_typed_fn!(3; 0 A0, 1 A1, 2 A2);
impl_typed_fn!(4; 0 A0, 1 A1, 2 A2, 3 A3);
impl_typed_fn!(5; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4);
impl_typed_fn!(6; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5);
impl_typed_fn!(7; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6);
impl_typed_fn!(8; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7);

/// Strong handle to a [`FuncObj`].
#[repr(transparent)]
#[derive(Clone)]
pub struct Func {
    obj: Ref<FuncObj>,
}

impl Func {
    /// Wrap an untyped host closure.
    pub fn new(f: impl Fn(&[AnyView<'_>]) -> Result<Any> + Send + Sync + 'static) -> Func {
        Func { obj: FuncObj::alloc(FuncBody::Host(Box::new(f))) }
    }

    /// Wrap a typed host closure; arguments are converted per parameter
    /// type and mismatches report against the signature string.
    pub fn from_typed<Args, R, F: TypedFn<Args, R>>(f: F) -> Func {
        let signature = F::signature();
        Func::new(move |args| f.invoke(args, &signature))
    }

    /// Adopt a foreign callable from across the ABI.
    ///
    /// # Safety
    ///
    /// `safe_call` must follow the safe-call convention for the lifetime
    /// of the object, and `deleter` (if any) must be safe to invoke once
    /// on `self_ptr`.
    pub unsafe fn from_foreign(
        self_ptr: *mut c_void,
        deleter: Option<Deleter>,
        safe_call: SafeCallFn,
    ) -> Func {
        Func { obj: FuncObj::alloc(FuncBody::Foreign { self_ptr, deleter, safe_call }) }
    }

    pub(crate) fn from_obj(obj: Ref<FuncObj>) -> Func {
        debug_assert!(!obj.is_null());
        Func { obj }
    }

    pub fn obj(&self) -> &Ref<FuncObj> {
        &self.obj
    }

    pub fn call(&self, args: &[AnyView<'_>]) -> Result<Any> {
        self.obj.call(args)
    }
}

impl Deref for Func {
    type Target = FuncObj;
    fn deref(&self) -> &FuncObj {
        &self.obj
    }
}

// A function object is immutable after construction; host bodies are
// `Sync` closures and foreign bodies promise reentrancy as part of the
// safe-call contract. Registry tables share `Func`s across threads.
unsafe impl Sync for Func {}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({:p})", self.obj.as_ptr())
    }
}

impl From<Func> for Any {
    fn from(func: Func) -> Any {
        Any::from(func.obj)
    }
}

impl From<&Func> for Any {
    fn from(func: &Func) -> Any {
        Any::from(func.obj.clone())
    }
}

impl TryFromAny for Func {
    fn try_from_any(raw: &AnyRaw) -> Result<Func> {
        if raw.type_index == ty::FUNC {
            let obj = unsafe { Ref::from_raw(raw.obj_ptr() as *mut FuncObj) };
            Ok(Func::from_obj(obj))
        } else {
            Err(conversion_error(raw, &Func::type_str()))
        }
    }
}

impl TypeNamed for Func {
    fn type_str() -> String {
        "object.Func".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untyped_call() {
        let func = Func::new(|args| {
            let mut total = 0i64;
            for arg in args {
                total += arg.cast::<i64>()?;
            }
            Ok(Any::from(total))
        });
        let ret = func
            .call(&[AnyView::from(1i64), AnyView::from(2i64), AnyView::from(3i64)])
            .unwrap();
        assert_eq!(ret.cast::<i64>().unwrap(), 6);
    }

    #[test]
    fn test_typed_signature() {
        fn sig<Args, R, F: TypedFn<Args, R>>(_f: &F) -> String {
            F::signature()
        }
        let f = |_a: i64, _b: f64, _c: String, _d: f64| 0.0f64;
        assert_eq!(sig(&f), "(0: int, 1: float, 2: str, 3: float) -> float");
    }

    #[test]
    fn test_typed_argument_mismatch() {
        let func = Func::from_typed(|a: i64, b: f64, _c: String, d: f64| a as f64 + b + d);
        let err = func
            .call(&[
                AnyView::from(1.0f64),
                AnyView::from(2i64),
                AnyView::from("x"),
                AnyView::from(4i64),
            ])
            .unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert_eq!(
            err.message,
            "Mismatched type on argument #0 when calling: \
             `(0: int, 1: float, 2: str, 3: float) -> float`. \
             Expected `int` but got `float`"
        );
    }

    #[test]
    fn test_typed_argument_count_mismatch() {
        let func = Func::from_typed(|a: i64, b: f64, _c: String, d: f64| a as f64 + b + d);
        let err = func
            .call(&[AnyView::from(1i64), AnyView::from(2i64), AnyView::from("x")])
            .unwrap_err();
        assert_eq!(
            err.message,
            "Mismatched number of arguments when calling: \
             `(0: int, 1: float, 2: str, 3: float) -> float`. \
             Expected 4 but got 3 arguments"
        );
    }

    #[test]
    fn test_typed_success() {
        let func = Func::from_typed(|a: i64, b: f64, c: String, d: f64| {
            format!("{a} {b} {c} {d}")
        });
        let ret = func
            .call(&[
                AnyView::from(1i64),
                AnyView::from(2.5f64),
                AnyView::from("x"),
                AnyView::from(4i64),
            ])
            .unwrap();
        assert_eq!(ret.cast::<String>().unwrap(), "1 2.5 x 4");
    }

    #[test]
    fn test_safe_call_captures_error() {
        let func = Func::from_typed(|v: i64| v);
        let mut ret = Any::none();
        let code = func.safe_call_impl(&[AnyView::from("nope")], &mut ret);
        assert_eq!(code, -2);
        let err = ret.cast::<Ref<ErrorObj>>().unwrap();
        assert_eq!(err.kind, "TypeError");
    }

    #[test]
    fn test_safe_call_captures_panic() {
        let func = Func::new(|_args| panic!("deliberate"));
        let mut ret = Any::none();
        let code = func.safe_call_impl(&[], &mut ret);
        assert_eq!(code, -1);
        assert_eq!(ret.cast::<String>().unwrap(), "deliberate");
    }

    #[test]
    fn test_void_return_is_none() {
        let func = Func::from_typed(|_v: i64| ());
        let ret = func.call(&[AnyView::from(1i64)]).unwrap();
        assert!(ret.is_none());
    }
}
