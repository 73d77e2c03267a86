pub mod api;
pub mod app;
pub mod app_config;
pub mod common;
pub mod vc;
