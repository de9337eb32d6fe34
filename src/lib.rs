//! HLS edge relay.
//!
//! Fetches HLS resources from an origin on behalf of a player. Manifests are
//! rewritten while they stream so every child reference routes back through
//! the relay; segments and other media pass through byte for byte.

pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod relay;
pub mod server;
