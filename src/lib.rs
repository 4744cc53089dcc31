pub mod cli;
pub mod config;
pub mod db;
pub mod http;
pub mod model;
pub mod payload;
pub mod query;
