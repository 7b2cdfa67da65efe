//! Console presentation for the kiosk binary

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::controller::ScannerHandle;
use crate::model::{ScanOutcome, Severity};

/// One line describing an outcome for the operator
pub fn render_outcome(outcome: &ScanOutcome) -> String {
    match outcome {
        ScanOutcome::Accepted { action, subject_name, occurred_at, cooldown_seconds } => {
            let mut line = format!(
                "{} registered for {} at {}",
                action,
                subject_name,
                occurred_at.format("%H:%M:%S")
            );
            if *cooldown_seconds > 0 {
                line.push_str(&format!(" (next scan in {cooldown_seconds}s)"));
            }
            line
        }
        ScanOutcome::Rejected { message, cooldown_seconds_remaining: Some(left), .. } => {
            format!("{message} ({left}s left)")
        }
        ScanOutcome::Rejected { message, .. } => message.clone(),
    }
}

/// Print outcomes and cooldown countdowns until the engine goes away
pub async fn present(handle: ScannerHandle, mut outcomes: mpsc::UnboundedReceiver<ScanOutcome>) {
    let mut cooldown = handle.watch_cooldown();
    let mut phase = handle.watch_phase();

    loop {
        tokio::select! {
            outcome = outcomes.recv() => {
                let Some(outcome) = outcome else { break };
                let line = render_outcome(&outcome);
                match outcome.severity() {
                    Severity::Success => info!("✅ {}", line),
                    Severity::Warning => warn!("⏳ {}", line),
                    Severity::Error => error!("❌ {}", line),
                }
            }
            changed = cooldown.changed() => {
                if changed.is_err() { break; }
                let state = *cooldown.borrow_and_update();
                if state.active {
                    info!("Cooldown: {}s", state.remaining_seconds);
                }
            }
            changed = phase.changed() => {
                if changed.is_err() { break; }
                let current = *phase.borrow_and_update();
                info!("Scanner is {:?}", current);
            }
        }
    }
}
