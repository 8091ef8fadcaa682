//! Scope guards for rollback and cleanup.
//!
//! A guard runs its action when it goes out of scope,
//! including when a panic unwinds through it.
//! Guards used for rollback can be dismissed once
//! the guarded operation has committed.

#![warn(missing_docs)]

use std::mem::ManuallyDrop;

/// Runs an action when dropped, unless dismissed.
#[must_use = "the action runs immediately if the guard is not bound"]
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
    armed: bool,
}

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    /// Create a guard that performs `f` on drop.
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f), armed: true}
    }

    /// Disarm the guard so that its action never runs.
    ///
    /// The action is dropped without being called.
    pub fn dismiss(mut self)
    {
        self.armed = false;
    }

    /// Whether the action will run on drop.
    pub fn is_armed(&self) -> bool
    {
        self.armed
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        if self.armed {
            f();
        }
    }
}

/// Create a guard that performs `f` on drop.
///
/// Equivalent to [`ScopeExit::new`], but reads better at call sites
/// that keep the guard around to [`dismiss`] it later.
///
/// [`dismiss`]: `ScopeExit::dismiss`
pub fn guard<F>(f: F) -> ScopeExit<F>
    where F: FnOnce()
{
    ScopeExit::new(f)
}

/// Define an anonymous scope guard.
///
/// The code passed to this macro is performed at the end of the scope.
/// It is performed when the scope ends or when a panic passes through.
/// Use [`guard`] instead when the action must be cancellable.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::Cell;
/// let x = Cell::new(0);
/// {
///     scope_exit! { x.set(1); }
///     x.set(2);
/// }
/// assert_eq!(x.get(), 1);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest, std::cell::Cell};

    #[test]
    fn dismissed_guard_does_not_run()
    {
        let ran = Cell::new(false);
        let g = guard(|| ran.set(true));
        assert!(g.is_armed());
        g.dismiss();
        assert!(!ran.get());
    }

    #[test]
    fn guard_runs_on_panic()
    {
        let ran = Cell::new(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope_exit! { ran.set(true); }
            panic!("unwinding");
        }));
        assert!(result.is_err());
        assert!(ran.get());
    }

    proptest!
    {
        #[test]
        fn guards_run_in_reverse_order(n in 0usize .. 32)
        {
            let log = std::cell::RefCell::new(Vec::new());
            {
                let mut guards = Vec::new();
                for i in 0 .. n {
                    let log = &log;
                    guards.push(guard(move || log.borrow_mut().push(i)));
                }
                while let Some(g) = guards.pop() {
                    drop(g);
                }
            }
            let expected: Vec<usize> = (0 .. n).rev().collect();
            assert_eq!(*log.borrow(), expected);
        }
    }
}
