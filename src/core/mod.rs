pub mod config;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod security;
