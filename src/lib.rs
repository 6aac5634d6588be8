// Library exports for testing
pub mod auth;
pub mod config;
pub mod handlers;
pub mod inference;
pub mod middleware;
pub mod models;
pub mod state;
pub mod storage;
pub mod tracker;
