//! Process environment switches for the `vm16` binary.
//!
//! | Variable | Effect |
//! |---|---|
//! | `VM16_TRACE=1` | `run` prints one `trace addr: word  disassembly` line per executed instruction to stderr, same as `--trace` |
//!
//! Only `main` reads these. [`crate::RunState`] takes the trace switch through
//! [`crate::RunState::set_trace`], so library users and unit tests never need [`init`].

use std::{cell::RefCell, ffi::OsStr};

#[derive(Clone, Copy)]
struct Env {
    /// Any value other than `1` leaves tracing to the `--trace` flag.
    trace_enabled: bool,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

/// Read configuration from the process environment. Call once, before any getter.
pub fn init() {
    let value = Env {
        trace_enabled: var_is("VM16_TRACE", "1"),
    };
    set_env(value);
}

/// `VM16_TRACE=1` was set. Combined with `--trace` by `run`, either one enables tracing.
///
/// Panics if [`init`] has not been called on this thread.
pub fn is_trace_enabled() -> bool {
    with_env(|env| env.trace_enabled)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
