//! Engine internals: cache resolution, metadata probes, transfers, and
//! snapshot fan-out. Callers use the re-exports at the crate root rather
//! than reaching into these modules.

pub mod client;
pub mod config;
pub mod disk;
pub mod errors;
pub mod fetch;
pub mod lock;
pub mod materialize;
pub mod metadata;
pub mod progress;
pub mod snapshot;
pub mod transfer;
