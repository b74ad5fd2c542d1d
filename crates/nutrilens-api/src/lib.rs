pub mod auth;
pub mod chat;
pub mod error;
pub mod images;
pub mod middleware;
pub mod state;
pub mod title;
pub mod users;
pub mod vision;
