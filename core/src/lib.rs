pub mod aggregate;
pub mod db;
pub mod healthconnect;
pub mod healthkit;
pub mod merge;
pub mod models;
pub mod service;
pub mod source;
pub mod store;
