//! Ranging Requestor (client) role: segment reassembly and the RAS-CP
//! write/indicate handshake (§4.5).

mod context;
mod core;

pub use context::RreqContext;
pub use core::GetResult;
