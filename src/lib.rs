pub mod agent;
pub mod auth;
pub mod config;
mod entity;
pub mod error;
pub mod http;
pub mod markdown;
pub mod message;
pub mod models;
pub mod store;
pub mod tools;
pub mod utils;
