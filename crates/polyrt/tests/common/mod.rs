//! Shared fixtures: a tiny expression IR registered against the runtime.
//!
//! `Var` is a binding variable (its name is identity-irrelevant and not
//! reflected), `Add` a plain two-child node, and `Let` binds its `var`
//! field for the scope of the comparison.

use std::sync::Once;

use polyrt::containers::Func;
use polyrt::object::{Obj, Ref};
use polyrt::registry::{StructureKind, TypeBuilder};
use polyrt::value::{Any, AnyView};
use polyrt::{define_object, ensure, reflect_field};

define_object! {
    /// A named binding variable. The name is diagnostic only.
    pub struct VarObj : Obj ["ir.Var"] {
        pub name: Any,
    }
}

define_object! {
    pub struct AddObj : Obj ["ir.Add"] {
        pub a: Any,
        pub b: Any,
    }
}

define_object! {
    /// `let var = value in body`
    pub struct LetObj : Obj ["ir.Let"] {
        pub var: Any,
        pub value: Any,
        pub body: Any,
    }
}

static REGISTER: Once = Once::new();

pub fn register_ir_types() {
    REGISTER.call_once(|| {
        TypeBuilder::new::<VarObj>()
            .structure(StructureKind::Var, &[])
            .init(Func::new(|_args: &[AnyView<'_>]| {
                Ok(Any::from(VarObj::create(Any::none())))
            }))
            .register()
            .expect("ir.Var registration");

        let builder = TypeBuilder::new::<AddObj>();
        let builder = reflect_field!(builder, AddObj, a);
        let builder = reflect_field!(builder, AddObj, b);
        builder
            .structure(StructureKind::NoBind, &[])
            .init(Func::new(|args: &[AnyView<'_>]| {
                ensure!(args.len() == 2, TypeError, "ir.Add takes 2 arguments");
                Ok(Any::from(AddObj::create(args[0].to_owned_any(), args[1].to_owned_any())))
            }))
            .register()
            .expect("ir.Add registration");

        let builder = TypeBuilder::new::<LetObj>();
        let builder = reflect_field!(builder, LetObj, var);
        let builder = reflect_field!(builder, LetObj, value);
        let builder = reflect_field!(builder, LetObj, body);
        builder
            .structure(StructureKind::NoBind, &["var"])
            .init(Func::new(|args: &[AnyView<'_>]| {
                ensure!(args.len() == 3, TypeError, "ir.Let takes 3 arguments");
                Ok(Any::from(LetObj::create(
                    args[0].to_owned_any(),
                    args[1].to_owned_any(),
                    args[2].to_owned_any(),
                )))
            }))
            .register()
            .expect("ir.Let registration");
    });
}

pub fn var(name: &str) -> Ref<VarObj> {
    register_ir_types();
    VarObj::create(Any::from(name))
}

pub fn add(a: impl Into<Any>, b: impl Into<Any>) -> Ref<AddObj> {
    register_ir_types();
    AddObj::create(a.into(), b.into())
}

pub fn let_in(v: &Ref<VarObj>, value: impl Into<Any>, body: impl Into<Any>) -> Ref<LetObj> {
    register_ir_types();
    LetObj::create(Any::from(v), value.into(), body.into())
}
