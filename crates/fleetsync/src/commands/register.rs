//! Device registration and release.

use fleetsync_core::Synchronizer;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn register(
    sync: &Synchronizer,
    udid: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let security_id = sync.register_device(udid).await?;
    output::print_output(
        &format!("registered {udid} (security id {security_id})"),
        global.quiet,
    );
    Ok(())
}

pub async fn deregister(
    sync: &Synchronizer,
    udid: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    sync.deregister_device(udid).await?;
    output::print_output(&format!("released {udid}"), global.quiet);
    Ok(())
}
