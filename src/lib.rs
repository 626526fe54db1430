pub mod aggregate;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod extras;
pub mod fake_feed;
pub mod over;
pub mod persist;
pub mod result;
pub mod state;
pub mod store;
