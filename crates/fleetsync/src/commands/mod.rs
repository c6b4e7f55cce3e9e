//! Command handlers.

mod devices;
mod register;
mod watch;

use fleetsync_core::Synchronizer;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a parsed command to its handler.
pub async fn dispatch(
    command: Command,
    sync: &Synchronizer,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        Command::Devices(args) => devices::handle(sync, args, global).await,
        Command::Watch(args) => watch::handle(sync, args, global).await,
        Command::Register { udid } => register::register(sync, &udid, global).await,
        Command::Deregister { udid } => register::deregister(sync, &udid, global).await,
    }
}
