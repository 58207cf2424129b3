//! Ranging Responder (server) role: RAS-CP command handling and the
//! segmented streamer (§4.4).

mod context;
mod core;
mod work;

pub use context::RrspContext;
