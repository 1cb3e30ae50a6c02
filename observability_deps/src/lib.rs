//! Re-export of the tracing facade used across the workspace.
//!
//! Every crate in this workspace logs through `observability_deps::tracing`
//! rather than depending on `tracing` directly. That guarantees a single
//! version of the facade across the dependency graph and leaves one place to
//! tweak compile-time level filtering if it is ever needed.

pub use tracing;
