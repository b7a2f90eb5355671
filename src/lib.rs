pub mod core;
pub mod importer;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;
pub mod vector;
