pub mod health;
pub mod hls;
pub mod media;
pub mod metrics;
