pub mod config;
pub mod engine;
pub mod error;
pub mod impulse;
pub mod logging;
pub mod machine;
pub mod pending;
pub mod ui;
