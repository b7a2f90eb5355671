pub mod alerts;
pub mod health;
pub mod import;
pub mod messages;
pub mod reembed;
pub mod search;
