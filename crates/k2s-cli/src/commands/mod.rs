//! CLI command implementations.

pub mod publish;
pub mod status;
pub mod sync;
