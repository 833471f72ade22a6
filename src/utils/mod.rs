pub mod config;

pub use config::ReporterConfig;
