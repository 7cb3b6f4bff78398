//! LearnHub Shared Types and Utilities
//!
//! This crate contains the domain vocabulary and database helpers shared by the
//! support-chat API and its storage layer.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
