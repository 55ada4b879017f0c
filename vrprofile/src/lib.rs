pub mod cli;
pub mod command;
pub mod config;
pub mod embedded;
pub mod engine;
pub mod error;
pub mod history;
pub mod launcher;
pub mod ledger;
pub mod lock;
pub mod locations;
pub mod module;
pub mod process;
pub mod registry;
pub mod statistics;
pub mod store;
pub mod transfer;
pub mod utils;

pub use engine::Engine;
pub use error::{Error, Result};
