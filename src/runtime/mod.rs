//! The runtime half of the interpreter: values are reached through
//! references, scopes chain per invocation, and sealed rods execute
//! against an executive state.

pub mod ctx;
pub mod error;
pub mod executive;
pub mod function;
pub mod global;
pub mod hooks;
pub mod loader;
pub mod ops;
pub mod reference;
