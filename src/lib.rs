//! Background task orchestration for remote-sensing workflows.

pub mod config;
pub mod error;
pub mod history;
pub mod params;
pub mod raster;
pub mod table;
pub mod tasks;
pub mod worker;
