pub mod aggregate;
pub mod app;
pub mod cli;
pub mod config;
pub mod event;
pub mod process_guard;
pub mod server;
pub mod session;
pub mod store;
pub mod tracker;
pub mod ui;
pub mod util;
