pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod documents;
pub mod errors;
pub mod models;
pub mod routes;
pub mod state;
pub mod sync;
