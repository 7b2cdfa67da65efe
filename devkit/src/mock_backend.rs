/*!
Mock attendance backend

Scripted `AttendanceBackend` for exercising the scan engine without HTTP:
- Replies are queued in order; an empty script answers with a check-in
- Every call is recorded along with the actor that made it
- `hold()` parks calls until `release()` so tests can observe the
  Submitting phase and count concurrent calls
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use timeclock_scanner::{ActorIdentity, AttendanceAction, AttendanceBackend, BackendError, ScanResponse};
use tokio::sync::Semaphore;

/// One recorded `process_scan` call
#[derive(Debug, Clone)]
pub struct RecordedScan {
    pub payload: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
}

#[derive(Default)]
struct BackendLedger {
    script: VecDeque<Result<ScanResponse, BackendError>>,
    calls: Vec<RecordedScan>,
    in_flight: usize,
    max_in_flight: usize,
    held: bool,
}

#[derive(Clone)]
pub struct MockBackend {
    ledger: Arc<Mutex<BackendLedger>>,
    gate: Arc<Semaphore>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(BackendLedger::default())),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Queue the next reply
    pub fn reply(&self, response: ScanResponse) -> &Self {
        self.ledger.lock().script.push_back(Ok(response));
        self
    }

    /// Queue a failure
    pub fn fail(&self, error: BackendError) -> &Self {
        self.ledger.lock().script.push_back(Err(error));
        self
    }

    /// Park every following call until `release`
    pub fn hold(&self) {
        self.ledger.lock().held = true;
    }

    /// Let `n` parked (or future) calls through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<RecordedScan> {
        self.ledger.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.ledger.lock().calls.len()
    }

    pub fn in_flight(&self) -> usize {
        self.ledger.lock().in_flight
    }

    pub fn max_in_flight(&self) -> usize {
        self.ledger.lock().max_in_flight
    }

    /// Wait until at least `count` calls were made
    pub async fn wait_for_calls(&self, count: usize, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if self.call_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.call_count() >= count
    }

    // Response builders shaped like the attendance service

    pub fn check_in(name: &str, cooldown_seconds: u32) -> ScanResponse {
        Self::accepted(AttendanceAction::CheckIn, name, cooldown_seconds)
    }

    pub fn check_out(name: &str, cooldown_seconds: u32) -> ScanResponse {
        Self::accepted(AttendanceAction::CheckOut, name, cooldown_seconds)
    }

    fn accepted(action: AttendanceAction, name: &str, cooldown_seconds: u32) -> ScanResponse {
        let verb = match action {
            AttendanceAction::CheckIn => "Check-in",
            AttendanceAction::CheckOut => "Check-out",
        };
        ScanResponse {
            success: true,
            action: Some(action),
            employee_name: Some(name.to_string()),
            time: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
            message: format!("{verb} successful for {name}"),
            cooldown_seconds: Some(cooldown_seconds),
        }
    }

    pub fn cooldown(seconds: u32) -> ScanResponse {
        ScanResponse {
            success: false,
            message: format!("Please wait {seconds} seconds before scanning again"),
            cooldown_seconds: Some(seconds),
            ..Default::default()
        }
    }

    pub fn denied(message: &str) -> ScanResponse {
        ScanResponse {
            success: false,
            message: message.to_string(),
            ..Default::default()
        }
    }
}

/// Decrements the in-flight count even if the call is dropped mid-wait
struct InFlightGuard(Arc<Mutex<BackendLedger>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ledger = self.0.lock();
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl AttendanceBackend for MockBackend {
    async fn process_scan(
        &self,
        payload: &str,
        actor: &ActorIdentity,
    ) -> Result<ScanResponse, BackendError> {
        let held = {
            let mut ledger = self.ledger.lock();
            ledger.calls.push(RecordedScan {
                payload: payload.to_string(),
                user_id: actor.user_id.clone(),
                tenant_id: actor.tenant_id.clone(),
            });
            ledger.in_flight += 1;
            ledger.max_in_flight = ledger.max_in_flight.max(ledger.in_flight);
            ledger.held
        };
        let _guard = InFlightGuard(self.ledger.clone());
        log::info!("🧪 [MOCK] process_scan({}) for {}", payload, actor.user_id);

        if held {
            match self.gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(BackendError::Network("mock backend closed".into())),
            }
        }

        let next = self.ledger.lock().script.pop_front();
        next.unwrap_or_else(|| Ok(Self::check_in("Jan Kowalski", 5)))
    }
}
