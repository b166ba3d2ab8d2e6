pub mod commands;
pub mod context;
pub mod input;
pub mod progress;
