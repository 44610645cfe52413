pub mod cli;
pub mod config;
pub mod format;
pub mod poll;
pub mod remote;
pub mod retry;
pub mod sink;
pub mod state;
