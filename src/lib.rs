pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod label_repo;
pub mod mail_repo;
pub mod models;
pub mod remote;
pub mod sync;
pub mod undo;
pub mod user_repo;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
