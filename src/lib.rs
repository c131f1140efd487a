pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod flowers;
pub mod images;
pub mod sites;
pub mod state;
pub mod storage;
pub mod validation;
