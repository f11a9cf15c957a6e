pub mod acquire;
pub mod config;
pub mod date;
pub mod engine;
pub mod integrity;
pub mod logging;
pub mod parser;
pub mod record;
pub mod report;
pub mod store;
