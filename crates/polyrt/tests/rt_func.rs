//! Function-object calling conventions and argument diagnostics.

use polyrt::containers::Func;
use polyrt::error::ErrorObj;
use polyrt::object::Ref;
use polyrt::registry;
use polyrt::value::{Any, AnyView};

fn typed_f() -> Func {
    Func::from_typed(|a: i64, b: f64, c: String, d: f64| a as f64 + b + c.len() as f64 + d)
}

/// `(i64, f64, str, f64) -> f64` invoked as `f(1.0, 2, "x", 4)` reports
/// the first mismatched argument against the full signature.
#[test]
fn test_argument_type_mismatch_message() {
    let err = typed_f()
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
fn test_argument_count_mismatch_message() {
    let err = typed_f()
        .call(&[AnyView::from(1i64), AnyView::from(2i64), AnyView::from("x")])
        .unwrap_err();
    assert_eq!(err.kind, "TypeError");
    assert_eq!(
        err.message,
        "Mismatched number of arguments when calling: \
         `(0: int, 1: float, 2: str, 3: float) -> float`. \
         Expected 4 but got 3 arguments"
    );
}

#[test]
fn test_successful_typed_call_with_widening() {
    // Int arguments widen into float parameters
    let ret = typed_f()
        .call(&[
            AnyView::from(1i64),
            AnyView::from(2i64),
            AnyView::from("xy"),
            AnyView::from(4.5f64),
        ])
        .unwrap();
    assert_eq!(ret.cast::<f64>().unwrap(), 1.0 + 2.0 + 2.0 + 4.5);
}

#[test]
fn test_safe_call_reports_error_object() {
    let mut ret = Any::none();
    let code = typed_f().safe_call_impl(&[AnyView::from("wrong")], &mut ret);
    assert_eq!(code, -2);
    let err = ret.cast::<Ref<ErrorObj>>().unwrap();
    assert_eq!(err.kind, "TypeError");
    assert!(err.message.contains("Mismatched number of arguments"));
}

#[test]
fn test_func_through_global_registry() {
    let table = registry::global();
    table
        .set_global_func("rt_func.concat", Func::from_typed(|a: String, b: String| format!("{a}{b}")), false)
        .unwrap();
    let func = table.get_global_func("rt_func.concat").unwrap();
    let ret = func.call(&[AnyView::from("poly"), AnyView::from("rt")]).unwrap();
    assert_eq!(ret.cast::<String>().unwrap(), "polyrt");
    assert!(table.get_global_func("rt_func.missing").is_none());
}

#[test]
fn test_func_dispatch_through_vtable() {
    let table = registry::global();
    let vtable = table.get_vtable("rt_func.__describe__");
    vtable
        .set_func(
            polyrt::value::ty::INT,
            Func::from_typed(|v: i64| format!("int:{v}")),
            polyrt::registry::OverrideMode::Reject,
        )
        .unwrap();
    vtable
        .set_func(
            polyrt::value::ty::STR,
            Func::from_typed(|v: String| format!("str:{v}")),
            polyrt::registry::OverrideMode::Reject,
        )
        .unwrap();
    let ret = vtable.call(&[AnyView::from(5i64)]).unwrap();
    assert_eq!(ret.cast::<String>().unwrap(), "int:5");
    let s = Any::from("hi");
    let ret = vtable.call(&[s.view()]).unwrap();
    assert_eq!(ret.cast::<String>().unwrap(), "str:hi");
    // No entry for floats
    let err = vtable.call(&[AnyView::from(1.5f64)]).unwrap_err();
    assert_eq!(err.kind, "TypeError");
    assert!(err.message.contains("rt_func.__describe__"));
}

#[test]
fn test_untyped_variadic_func() {
    let func = Func::new(|args: &[AnyView<'_>]| {
        let mut total = 0.0;
        for arg in args {
            total += arg.cast::<f64>()?;
        }
        Ok(Any::from(total))
    });
    let ret = func
        .call(&[AnyView::from(1i64), AnyView::from(2.5f64), AnyView::from(3i64)])
        .unwrap();
    assert_eq!(ret.cast::<f64>().unwrap(), 6.5);
}
