//! Fleet listing.

use std::sync::Arc;

use tabled::Tabled;

use fleetsync_core::{Device, Synchronizer};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "UDID")]
    udid: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Manufacturer")]
    manufacturer: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "OS")]
    os: String,
    #[tabled(rename = "Registered To")]
    registered_to: String,
    #[tabled(rename = "Host")]
    host: String,
}

impl From<&Arc<Device>> for DeviceRow {
    fn from(d: &Arc<Device>) -> Self {
        Self {
            udid: d.udid.clone(),
            model: d.model.clone().unwrap_or_default(),
            manufacturer: d.manufacturer.clone().unwrap_or_default(),
            state: d.state.map(|s| format!("{s:?}")).unwrap_or_default(),
            os: d.os_version.clone().unwrap_or_default(),
            registered_to: d.registered_to.clone().unwrap_or_default(),
            host: d.host_ip.clone().unwrap_or_default(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    sync: &Synchronizer,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // One-shot listing uses an explicit snapshot fetch rather than
    // waiting for the bootstrap merge to land.
    sync.refresh().await?;

    let fleet = sync.fleet().latest();
    let devices: Vec<Arc<Device>> = fleet
        .iter()
        .filter(|d| match args.state.as_deref() {
            Some(wanted) => d
                .state
                .is_some_and(|s| format!("{s:?}").eq_ignore_ascii_case(wanted)),
            None => true,
        })
        .cloned()
        .collect();

    let rendered = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow::from(d),
        |d| d.udid.clone(),
    );
    output::print_output(&rendered, global.quiet);
    Ok(())
}
