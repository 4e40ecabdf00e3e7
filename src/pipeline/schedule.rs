//! Repeats runs until cancelled.
//!
//! - `RetriesExhausted` restarts the whole run at once
//! - a finished run sleeps `pause_general_secs` before the next one
//! - single-pass mode stops after the first finished run

use crate::error::Result;
use crate::pipeline::orchestrator::{Orchestrator, RunError, RunReport};

/// Run until cancelled, or once in single-pass mode. Returns the number of finished runs.
pub async fn run_forever(orchestrator: &mut Orchestrator) -> Result<usize> {
    let control = orchestrator.control().clone();
    let one_time = orchestrator.config().run.one_time_start;
    let pause = orchestrator.config().run.pause_general();
    let mut finished = 0;
    let mut restarts = 0u64;

    while !control.is_cancelled() {
        match orchestrator.run().await {
            Ok(RunReport { cancelled: true, .. }) => break,
            Ok(report) => {
                finished += 1;
                log::info!(
                    "Run {} finished: {} new ads, {} exported",
                    finished,
                    report.kept,
                    report.exported
                );
                if one_time {
                    log::info!("Single-pass mode, stopping");
                    break;
                }
                log::info!("Next run in {}s", pause.as_secs());
                if !control.sleep(pause).await {
                    break;
                }
            }
            Err(RunError::RetriesExhausted(e)) => {
                restarts += 1;
                log::warn!("Restarting run from the first URL (restart #{}): {}", restarts, e);
            }
            Err(RunError::Fatal(e)) => {
                log::error!("Run aborted: {}", e);
                return Err(e);
            }
        }
    }

    log::info!("Scheduler stopped after {} finished runs", finished);
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ad;
    use crate::pipeline::testkit::{Harness, ScriptedPage};

    fn one_ad() -> Vec<Ad> {
        vec![Ad {
            id: 1,
            title: "стол".to_string(),
            price: Some(100),
            ..Ad::default()
        }]
    }

    #[tokio::test]
    async fn test_single_pass_stops_after_one_run() {
        let harness = Harness::new(|config| config.run.one_time_start = true);
        let mut orchestrator = harness.orchestrator(vec![ScriptedPage::ok(one_ad())]).await;

        assert_eq!(run_forever(&mut orchestrator).await.unwrap(), 1);
        assert_eq!(harness.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_run_is_restarted() {
        let harness = Harness::new(|config| {
            config.run.one_time_start = true;
            config.run.max_retries = 1;
        });
        let mut orchestrator = harness
            .orchestrator(vec![ScriptedPage::status(500), ScriptedPage::ok(one_ad())])
            .await;

        assert_eq!(run_forever(&mut orchestrator).await.unwrap(), 1);
        assert_eq!(harness.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_does_not_run() {
        let harness = Harness::new(|_| {});
        let mut orchestrator = harness.orchestrator(vec![ScriptedPage::ok(one_ad())]).await;
        harness.control().cancel();

        assert_eq!(run_forever(&mut orchestrator).await.unwrap(), 0);
        assert!(harness.requested().is_empty());
    }
}
