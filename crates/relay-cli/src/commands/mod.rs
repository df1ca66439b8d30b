//! CLI command implementations

pub mod chat;
pub mod check;
pub mod download;
pub mod serve;
pub mod spawn;
