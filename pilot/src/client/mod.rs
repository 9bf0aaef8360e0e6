pub mod cli;
#[allow(clippy::module_inception)]
pub mod client;
/// All subcommands are handled in here.
mod commands;
mod display;

pub use commands::handle_command;
