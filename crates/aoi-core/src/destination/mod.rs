//! Destination-side core: per-frame processing (`receiver`) and the
//! scheduling/pacing event loop (`engine`) that ties receiver, scheduler,
//! and age meter together.

pub mod engine;
pub mod receiver;
