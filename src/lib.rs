pub mod models;
pub mod ranking;
pub mod repositories;
pub mod services;
pub mod settings;
