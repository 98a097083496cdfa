pub mod artifact;
pub mod bar_source;
pub mod cache;
pub mod config;
pub mod error;
pub mod flags;
pub mod indicators;
pub mod market_data;
pub mod pipeline;
pub mod scoring;
pub mod sectors;
pub mod signals;
pub mod stats;
