// Public API for integration tests and potential library usage

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod types;
pub mod ws;
