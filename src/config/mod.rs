// src/config/mod.rs
pub mod ingest;

pub use ingest::{
    load_config_default, load_config_from, FlightConfig, HotelConfig, HttpConfig, IngestConfig,
    RateLimitConfig, SchedulerConfig,
};
