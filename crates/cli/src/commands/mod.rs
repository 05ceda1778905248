pub mod allocate;
pub mod chat;
pub mod config_cmd;
pub mod feedback;
pub mod models;
