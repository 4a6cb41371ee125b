//! # Observability & Tracing
//!
//! Every component logs through `tracing` with structured fields, so a single
//! actor's life can be followed by filtering on its address.
//!
//! ## What gets logged
//!
//! | Level | Events |
//! |-------|--------|
//! | `info` | runner, timer and line start/stop |
//! | `debug` | actor resumed, spawned, finished, evicted; messages dropped for missing actors |
//! | `trace` | checkpoint firings, store round trips, line departures |
//! | `warn` | messages dropped for unregistered prefixes, stale snapshots, retried store failures |
//! | `error` | actors discarded after failing, actors lost because the store refused them |
//!
//! ## Usage
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Follow every turn
//! RUST_LOG=actor_framework::runner=debug cargo run
//!
//! # Everything, including checkpoints
//! RUST_LOG=trace cargo run
//! ```
//!
//! With `RUST_LOG=debug` a single echo round trip looks like:
//!
//! ```text
//! INFO Runner started prefix="runner" workers=4
//! DEBUG Resuming actor address=runner:echo destination=runner:echo checkpoint=false
//! DEBUG Scheduled to=runner:echo delay_ms=250
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Call once at startup. Panics if a global subscriber is already set; tests that
/// want logs should use [`try_setup_tracing`].
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`] but returns `false` instead of panicking when a subscriber
/// is already installed.
pub fn try_setup_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
