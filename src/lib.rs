pub mod api;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod device_cache;
pub mod entities;
pub mod hub;
pub mod schluter;
pub mod setup;
pub mod store;
