//! VTables - Name-Keyed Dispatch Tables
//!
//! A vtable maps `type_index -> Func` under a string name (`"__str__"`,
//! `"__init__"`, ...). Lookup optionally walks the ancestor chain from the
//! deepest parent to the root, which is how derived types inherit methods.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::containers::Func;
use crate::error::Result;
use crate::registry;
use crate::value::{Any, AnyView};

/// Policy applied when a slot is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMode {
    /// Fail with a `KeyError`.
    Reject,
    Overwrite,
    /// Keep the existing entry.
    SkipIfExists,
}

impl OverrideMode {
    pub fn from_i32(v: i32) -> Option<OverrideMode> {
        Some(match v {
            0 => OverrideMode::Reject,
            1 => OverrideMode::Overwrite,
            2 => OverrideMode::SkipIfExists,
            _ => return None,
        })
    }
}

pub struct VTable {
    name: String,
    table: RwLock<FxHashMap<i32, Func>>,
}

impl VTable {
    pub fn new(name: impl Into<String>) -> VTable {
        VTable { name: name.into(), table: RwLock::new(FxHashMap::default()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct-slot lookup without the ancestor walk or error mapping.
    pub fn try_get_func(&self, type_index: i32) -> Option<Func> {
        self.table.read().get(&type_index).cloned()
    }

    /// Resolve the function for `type_index`, walking `type_ancestors`
    /// deepest-first when `allow_ancestor` is set.
    pub fn get_func(&self, type_index: i32, allow_ancestor: bool) -> Result<Func> {
        if let Some(func) = self.try_get_func(type_index) {
            return Ok(func);
        }
        if allow_ancestor {
            if let Some(info) = registry::type_info(type_index) {
                for ancestor in info.type_ancestors.iter().rev() {
                    if let Some(func) = self.try_get_func(*ancestor) {
                        return Ok(func);
                    }
                }
            }
        }
        crate::throw!(
            TypeError,
            "Function `{}` for type: {} is not defined in the vtable",
            self.name,
            registry::type_key(type_index)
        )
    }

    pub fn set_func(&self, type_index: i32, func: Func, mode: OverrideMode) -> Result<()> {
        let mut table = self.table.write();
        if table.contains_key(&type_index) {
            match mode {
                OverrideMode::Reject => crate::throw!(
                    KeyError,
                    "VTable `{}` already has an entry for type: {}",
                    self.name,
                    registry::type_key(type_index)
                ),
                OverrideMode::SkipIfExists => return Ok(()),
                OverrideMode::Overwrite => {}
            }
        }
        log::trace!("vtable `{}`: set func for type_index {}", self.name, type_index);
        table.insert(type_index, func);
        Ok(())
    }

    /// Dispatch on the first argument's runtime type.
    pub fn call(&self, args: &[AnyView<'_>]) -> Result<Any> {
        crate::ensure!(
            !args.is_empty(),
            TypeError,
            "VTable `{}` requires at least one argument to dispatch on",
            self.name
        );
        let func = self.get_func(args[0].type_index(), true)?;
        Ok(crate::rethrow!(func.call(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ty;

    #[test]
    fn test_set_and_get() {
        let vtable = VTable::new("test_set_and_get");
        let func = Func::from_typed(|x: i64| x + 1);
        vtable.set_func(ty::INT, func, OverrideMode::Reject).unwrap();
        let got = vtable.get_func(ty::INT, false).unwrap();
        assert_eq!(got.call(&[AnyView::from(1i64)]).unwrap().cast::<i64>().unwrap(), 2);
    }

    #[test]
    fn test_missing_slot_is_type_error() {
        let vtable = VTable::new("test_missing_slot");
        let err = vtable.get_func(ty::INT, true).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("test_missing_slot"));
        assert!(err.message.contains("int"));
    }

    #[test]
    fn test_override_modes() {
        let vtable = VTable::new("test_override_modes");
        let one = Func::from_typed(|| 1i64);
        let two = Func::from_typed(|| 2i64);
        vtable.set_func(ty::INT, one, OverrideMode::Reject).unwrap();
        // Reject refuses a second registration
        let err = vtable.set_func(ty::INT, two.clone(), OverrideMode::Reject).unwrap_err();
        assert_eq!(err.kind, "KeyError");
        // SkipIfExists keeps the first
        vtable.set_func(ty::INT, two.clone(), OverrideMode::SkipIfExists).unwrap();
        let got = vtable.get_func(ty::INT, false).unwrap();
        assert_eq!(got.call(&[]).unwrap().cast::<i64>().unwrap(), 1);
        // Overwrite replaces it
        vtable.set_func(ty::INT, two, OverrideMode::Overwrite).unwrap();
        let got = vtable.get_func(ty::INT, false).unwrap();
        assert_eq!(got.call(&[]).unwrap().cast::<i64>().unwrap(), 2);
    }
}
