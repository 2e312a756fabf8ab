//! Route handler modules for the cotask-web REST API.

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod profiles;
pub mod relationships;
pub mod resources;
pub mod shares;
pub mod tasks;
pub mod websocket;
