pub mod config;
pub mod error;
pub mod images;
pub mod pagination;
pub mod search;
pub mod search_clients;
pub mod service;
pub mod store;
pub mod sync;
pub mod validation;
pub mod web_server;
