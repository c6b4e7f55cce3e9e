//! Live fleet watch: follow the change feed and print replica updates.

use owo_colors::OwoColorize;

use fleetsync_core::{ConnectionState, Synchronizer};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    sync: &Synchronizer,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut fleet = sync.fleet();
    let mut states = sync.connection_state();

    output::print_output("watching fleet (ctrl-c to stop)", global.quiet);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| CliError::Internal(format!("signal handler: {e}")))?;
                break;
            }

            snapshot = fleet.changed() => {
                let Some(snapshot) = snapshot else { break };
                let stamp = chrono::Utc::now().format("%H:%M:%S");
                let line = format!(
                    "{stamp}  fleet: {} device(s): {}",
                    snapshot.len(),
                    snapshot
                        .iter()
                        .map(|d| d.display_name().to_owned())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                output::print_output(&line, global.quiet);
            }

            state = states.changed(), if args.connection_events => {
                let Some(state) = state else { break };
                let line = match state {
                    ConnectionState::Connected => format!("feed: {}", "connected".green()),
                    ConnectionState::Reconnecting { attempt } => {
                        format!("feed: {} (attempt {attempt})", "reconnecting".yellow())
                    }
                    ConnectionState::Failed => format!("feed: {}", "gave up".red()),
                    ConnectionState::Connecting => "feed: connecting".to_owned(),
                    ConnectionState::Disconnected => format!("feed: {}", "disconnected".red()),
                };
                output::print_output(&line, global.quiet);

                if state == ConnectionState::Failed {
                    return Err(CliError::FeedUnavailable {
                        reason: "reconnection budget exhausted".into(),
                    });
                }
            }
        }
    }

    Ok(())
}
