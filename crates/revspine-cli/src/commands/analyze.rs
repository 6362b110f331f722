//! Analysis command with progress following

use std::time::Duration;

use anyhow::{bail, Result};
use revspine_core::{SessionService, SessionStatus};

pub fn cmd_analyze(
    svc: &SessionService,
    session_id: &str,
    bypass_review: bool,
    no_wait: bool,
) -> Result<()> {
    let handle = match svc.analyze(session_id, bypass_review) {
        Ok(handle) => handle,
        Err(revspine_core::Error::IdentityReviewRequired) => {
            bail!(
                "identity review required: decide the pending matches with \
                 'revspine identity', or pass --bypass-review to treat them as unmatched"
            )
        }
        Err(e) => return Err(e.into()),
    };

    println!("Analysis started for session {}", session_id);
    if no_wait {
        println!("Follow it with: revspine status");
        return Ok(());
    }

    // Follow the processing log until the run reaches a terminal state
    let mut printed = 0usize;
    loop {
        let status = svc.status(session_id)?;
        for entry in status.processing.log.iter().skip(printed) {
            println!("   [{}] {}", entry.step, entry.message);
        }
        printed = status.processing.log.len();

        match status.status {
            SessionStatus::Processing => std::thread::sleep(Duration::from_millis(100)),
            SessionStatus::Completed => break,
            SessionStatus::Error => {
                let cause = status
                    .processing
                    .error
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("analysis failed: {}", cause);
            }
            other => bail!("analysis stopped in state {}", other),
        }
    }
    handle.wait();

    let dashboard = svc.dashboard(session_id)?;
    println!();
    println!(
        "Structural integrity: {} ({})",
        dashboard.score.score, dashboard.score.band
    );
    println!("See the full picture with: revspine dashboard");
    Ok(())
}
