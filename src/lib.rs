pub mod db;
pub mod prom_metrics;
pub mod server;
pub mod summary;
