//! Link-layer drivers. `pair` is a portable, in-memory loopback usable in
//! tests and examples without OS tap support. `tap` is the real Linux
//! `/dev/net/tun` driver, gated behind the `tap` feature so `cargo test`
//! never needs root or kernel tun support.

pub mod pair;

#[cfg(all(target_os = "linux", feature = "tap"))]
pub mod tap;
