//! Directory-watching work pool that completes chat workbooks.
//!
//! Files dropped into `<root>/in` are staged into `<root>/.cache`, expanded
//! into one conversation per column, completed concurrently against a
//! rate-limited API with retries, and delivered to `<root>/out`.

pub mod anthropic;
pub mod cli;
pub mod command;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod shared;
pub mod ui;
pub mod workbook;

#[cfg(test)]
pub(crate) mod testing;
