//! Platform facility: the thin layer that isolates the rest of the
//! workspace from naming `std::sync`/`std::thread` directly.
//!
//! Unlike the teacher workspace this crate wraps, there is no `no_std`
//! fallback here — the core's concurrency model (OS threads, a queue
//! mutex and condition variable) is inherently a `std` feature, and the
//! spec this workspace implements does not ask for `no_std`/wasm support.
//! The `std` feature flag is kept only so the rest of the workspace can
//! wire `default-features = false` + `"talon_os/std"` the same way the
//! teacher wires its own platform crate.

#[cfg(not(feature = "std"))]
compile_error!("talon_os requires the `std` feature; there is no no_std fallback");

pub mod backoff;
pub mod mem;
pub mod sync;
pub mod thread;
