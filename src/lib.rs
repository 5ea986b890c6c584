pub mod caption;
pub mod config;
