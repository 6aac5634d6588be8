pub mod activity;
pub mod auth;
