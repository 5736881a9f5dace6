pub mod cache;
pub mod config;
pub mod db;
pub mod feed;
pub mod models;
pub mod search;
