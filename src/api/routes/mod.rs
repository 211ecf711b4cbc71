//! API Routes
//!
//! Route handlers organized by functionality.

pub mod devices;
pub mod export;
pub mod health;
pub mod ingest;
pub mod overview;
pub mod readings;
