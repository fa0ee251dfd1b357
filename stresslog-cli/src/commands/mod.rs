//! CLI command implementations.

pub mod dump;
pub mod info;
pub mod record;
