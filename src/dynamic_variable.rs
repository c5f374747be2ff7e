//! Thread-local boolean switches with dynamic scope.
//!
//! These select between display variants in places where no argument can be threaded through,
//! such as [`std::fmt::Display`] implementations.

/// Restores a switch to its previous state when dropped, so that a panic inside the scope does
/// not leave the switch set.
pub(crate) struct Restore {
    var: &'static std::thread::LocalKey<std::cell::Cell<bool>>,
    old: bool,
}

impl Restore {
    pub(crate) fn set(var: &'static std::thread::LocalKey<std::cell::Cell<bool>>) -> Self {
        let old = var.with(|v| v.replace(true));
        Self { var, old }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        let old = self.old;
        self.var.with(|v| v.set(old));
    }
}

/// `dynamic_variable!(VAR, with_VAR_set, if_VAR_set)` defines a switch `VAR`, a public
/// `with_VAR_set(f)` that runs `f` with the switch on, and a private
/// `if_VAR_set(then_f, else_f)` that branches on it.
macro_rules! dynamic_variable {
    ($varname:ident, $with_var_set:ident, $if_var_set:ident) => {
        thread_local! {
            static $varname: std::cell::Cell<bool> = std::cell::Cell::new(false);
        }
        #[allow(non_snake_case)]
        pub fn $with_var_set<T>(f: impl FnOnce() -> T) -> T {
            let _restore = $crate::dynamic_variable::Restore::set(&$varname);
            f()
        }
        #[allow(non_snake_case)]
        fn $if_var_set<T>(then_f: impl FnOnce() -> T, else_f: impl FnOnce() -> T) -> T {
            if $varname.with(|v| v.get()) {
                then_f()
            } else {
                else_f()
            }
        }
    };
}

pub(crate) use dynamic_variable;

#[cfg(test)]
mod test {
    use super::dynamic_variable;

    dynamic_variable!(VERBOSE, with_VERBOSE_set, if_VERBOSE_set);

    fn describe() -> &'static str {
        if_VERBOSE_set(|| "verbose", || "terse")
    }

    #[test]
    fn nested_scopes_restore_the_outer_state() {
        assert_eq!(describe(), "terse");
        with_VERBOSE_set(|| {
            assert_eq!(describe(), "verbose");
            with_VERBOSE_set(|| assert_eq!(describe(), "verbose"));
            assert_eq!(describe(), "verbose");
        });
        assert_eq!(describe(), "terse");
    }

    #[test]
    fn panics_do_not_leak_the_switch() {
        let r = std::panic::catch_unwind(|| with_VERBOSE_set(|| panic!("inside")));
        assert!(r.is_err());
        assert_eq!(describe(), "terse");
    }
}
