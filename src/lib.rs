pub mod browser;
pub mod cli;
pub mod figma;
pub mod load_config;
pub mod pipeline;
pub mod server;
pub mod storage;

pub use cli::{run, Cli, Commands};
