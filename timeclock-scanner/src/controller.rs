//! Scan session controller
//!
//! One task owns the session state machine and is the only writer of what
//! the user sees. It selects over four channels:
//! - commands from the presentation layer (start, stop, switch, shutdown)
//! - camera events from the frame pump (decoded payloads, lost stream)
//! - cooldown ticks from the governor's ticker
//! - settled submissions from the single in-flight backend call
//!
//! ```text
//! Idle --start--> Capturing --decoded--> Submitting --ok, cooldown>0--> CooldownHold
//!                     ^                      |                               |
//!                     +------ ok / error ----+                               |
//!                     +-------------------- timer expired -------------------+
//! any --stop--> Idle
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::backend::AttendanceBackend;
use crate::camera::{CameraAdapter, CameraEvent, Decoder, FrameSource};
use crate::classifier::{Classified, ScanClassifier};
use crate::config::ScannerConfig;
use crate::cooldown::{CooldownGovernor, CooldownTick, TickResult};
use crate::error::{CameraError, CommandError};
use crate::model::{CameraState, CooldownState, Facing, Phase, RejectReason, ScanAttempt, ScanOutcome, Severity};
use crate::session::SharedSession;

const COMMAND_BUFFER: usize = 16;
const TICK_BUFFER: usize = 4;

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

#[derive(Debug)]
pub enum Command {
    Start { reply: Reply<()> },
    Stop { reply: Reply<()> },
    SwitchCamera { reply: Reply<()> },
    Shutdown,
}

#[derive(Debug)]
struct Settled {
    id: Uuid,
    classified: Classified,
}

#[derive(Debug)]
struct InFlight {
    id: Uuid,
    started: Instant,
}

/// Camera switch requested while a submission was in flight
#[derive(Debug)]
struct QueuedSwitch {
    facing: Facing,
    replies: Vec<Reply<()>>,
}

/// Everything the controller needs, injected at construction
pub struct ScannerDeps {
    pub session: SharedSession,
    pub backend: Arc<dyn AttendanceBackend>,
    pub source: Arc<dyn FrameSource>,
    pub decoder: Arc<dyn Decoder>,
}

pub struct ScanSessionController {
    session: SharedSession,
    classifier: Arc<ScanClassifier>,
    camera: CameraAdapter,
    cooldown: CooldownGovernor,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    in_flight: Option<InFlight>,
    pending: Option<ScanAttempt>,
    queued_switch: Option<QueuedSwitch>,
    /// Last local cooldown rejection as (payload, remaining seconds)
    last_cooldown_notice: Option<(String, u32)>,
    settled_tx: mpsc::Sender<Settled>,
    outcomes_tx: mpsc::UnboundedSender<ScanOutcome>,
    pending_max_age: Duration,
    payload_prefix: Option<String>,
}

struct Inbox {
    commands: mpsc::Receiver<Command>,
    camera: mpsc::Receiver<CameraEvent>,
    ticks: mpsc::Receiver<CooldownTick>,
    settled: mpsc::Receiver<Settled>,
}

/// Running scan engine
pub struct Scanner {
    pub handle: ScannerHandle,
    /// Outcomes in the order submissions were issued
    pub outcomes: mpsc::UnboundedReceiver<ScanOutcome>,
    pub task: JoinHandle<()>,
}

/// Spawn the controller task and return its handle and outcome stream
pub fn spawn_scanner(config: &ScannerConfig, deps: ScannerDeps) -> Scanner {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (camera_tx, camera_rx) = mpsc::channel(config.camera.decode_buffer.max(1));
    let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);
    let (settled_tx, settled_rx) = mpsc::channel(1);
    let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

    let classifier = Arc::new(ScanClassifier::new(deps.backend, config.scan.cooldown_markers.clone()));
    let camera = CameraAdapter::new(deps.source, deps.decoder, config.camera.facing, camera_tx);
    let cooldown = CooldownGovernor::new(tick_tx);

    let handle = ScannerHandle {
        commands: commands_tx,
        phase: phase_rx,
        cooldown: cooldown.subscribe(),
        camera: camera.subscribe(),
    };

    let controller = ScanSessionController {
        session: deps.session,
        classifier,
        camera,
        cooldown,
        phase: Phase::Idle,
        phase_tx,
        in_flight: None,
        pending: None,
        queued_switch: None,
        last_cooldown_notice: None,
        settled_tx,
        outcomes_tx,
        pending_max_age: Duration::from_millis(config.scan.pending_max_age_ms),
        payload_prefix: config.scan.payload_prefix.clone(),
    };

    let inbox = Inbox {
        commands: commands_rx,
        camera: camera_rx,
        ticks: tick_rx,
        settled: settled_rx,
    };

    let task = tokio::spawn(controller.run(inbox));
    Scanner { handle, outcomes: outcomes_rx, task }
}

impl ScanSessionController {
    async fn run(mut self, mut inbox: Inbox) {
        info!("Scan session controller started for {}", self.session.actor().user_id);

        loop {
            // Commands go first so a switch or stop overtakes decodes already queued
            tokio::select! {
                biased;
                command = inbox.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(settled) = inbox.settled.recv() => self.handle_settled(settled).await,
                Some(tick) = inbox.ticks.recv() => self.handle_tick(tick),
                Some(event) = inbox.camera.recv() => self.handle_camera_event(event).await,
            }
        }

        self.stop_session().await;
        // An in-flight outcome is still delivered before the task ends
        if self.in_flight.is_some() {
            if let Some(settled) = inbox.settled.recv().await {
                self.handle_settled(settled).await;
            }
        }
        self.cooldown.cancel();
        info!("Scan session controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop_session().await;
                let _ = reply.send(Ok(()));
            }
            Command::SwitchCamera { reply } => self.switch_camera(reply).await,
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) -> Result<(), CommandError> {
        if !self.session.is_valid() {
            return Err(CommandError::SessionInvalidated);
        }
        if self.phase != Phase::Idle {
            return Ok(());
        }

        let facing = self.camera.state().facing;
        self.camera.start(facing).await?;
        let phase = self.running_phase();
        self.set_phase(phase);
        Ok(())
    }

    /// Tear the session down: cancel the tick, release the camera. An
    /// in-flight submission is left to settle.
    async fn stop_session(&mut self) {
        self.cooldown.cancel();
        self.last_cooldown_notice = None;
        self.camera.stop().await;
        self.pending = None;
        self.keep_queued_switch_as_preference().await;
        self.set_phase(Phase::Idle);
    }

    /// With the camera down a queued switch only changes the facing used by
    /// the next `start`. Its callers are answered now.
    async fn keep_queued_switch_as_preference(&mut self) {
        if let Some(queued) = self.queued_switch.take() {
            let _ = self.camera.switch(queued.facing).await;
            for reply in queued.replies {
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn switch_camera(&mut self, reply: Reply<()>) {
        if self.phase == Phase::Submitting {
            let current = self.camera.state().facing;
            let queued = self.queued_switch.get_or_insert_with(|| QueuedSwitch {
                facing: current,
                replies: Vec::new(),
            });
            queued.facing = queued.facing.opposite();
            queued.replies.push(reply);
            debug!("Camera switch queued until the submission settles");
            return;
        }

        let facing = self.camera.state().facing.opposite();
        let result = self.apply_switch(facing).await;
        let _ = reply.send(result.map_err(CommandError::from));
    }

    async fn apply_switch(&mut self, facing: Facing) -> Result<(), CameraError> {
        if self.phase == Phase::Idle {
            return self.camera.switch(facing).await;
        }
        if self.camera.state().facing == facing && self.camera.state().running {
            return Ok(());
        }

        self.pending = None;
        if let Err(e) = self.camera.switch(facing).await {
            self.set_phase(Phase::Idle);
            return Err(e);
        }
        let phase = self.running_phase();
        self.set_phase(phase);
        Ok(())
    }

    async fn handle_camera_event(&mut self, event: CameraEvent) {
        match event {
            CameraEvent::Decoded(attempt) => {
                if self.camera.current_epoch() != Some(attempt.stream_epoch) {
                    debug!("Discarding payload from released stream {}", attempt.stream_epoch);
                    return;
                }
                match self.phase {
                    Phase::Idle => {}
                    Phase::Submitting => {
                        // Only the freshest decode is kept while the slot is busy
                        self.pending = Some(attempt);
                    }
                    Phase::Capturing | Phase::CooldownHold => self.try_submit(attempt),
                }
            }
            CameraEvent::StreamEnded { epoch } => {
                if self.camera.on_stream_ended(epoch).await {
                    self.pending = None;
                    self.keep_queued_switch_as_preference().await;
                    self.set_phase(Phase::Idle);
                }
            }
        }
    }

    /// The single gate in front of the backend.
    ///
    /// During a cooldown the remaining time is reported in whole seconds and
    /// only drops at each tick, so a rescan right after arming reports the
    /// full armed duration. The same payload is reported once per second.
    fn try_submit(&mut self, attempt: ScanAttempt) {
        if self.cooldown.is_active() {
            let remaining = self.cooldown.state().remaining_seconds;
            let notice = (attempt.payload, remaining);
            if self.last_cooldown_notice.as_ref() == Some(&notice) {
                trace!("Repeated decode during cooldown suppressed");
                return;
            }
            self.last_cooldown_notice = Some(notice);
            self.deliver(ScanOutcome::cooldown(
                format!("Please wait {remaining} seconds before the next scan"),
                Some(remaining),
            ));
            return;
        }
        if self.in_flight.is_some() {
            self.pending = Some(attempt);
            return;
        }
        if let Some(reason) = self.validate_payload(&attempt.payload) {
            self.deliver(ScanOutcome::rejected(RejectReason::Malformed, reason));
            return;
        }

        let id = Uuid::new_v4();
        info!("Submitting scan {} ({})", id, attempt.payload);
        self.in_flight = Some(InFlight { id, started: Instant::now() });
        self.set_phase(Phase::Submitting);

        let classifier = self.classifier.clone();
        let actor = self.session.actor().clone();
        let settled_tx = self.settled_tx.clone();
        tokio::spawn(async move {
            let classified = classifier.classify(&attempt, &actor).await;
            if settled_tx.send(Settled { id, classified }).await.is_err() {
                warn!("Scan {} settled after the controller stopped", id);
            }
        });
    }

    fn validate_payload(&self, payload: &str) -> Option<String> {
        let prefix = self.payload_prefix.as_deref()?;
        if payload.starts_with(prefix) && payload.len() > prefix.len() {
            None
        } else {
            Some(format!("Unrecognised badge code: {payload}"))
        }
    }

    async fn handle_settled(&mut self, settled: Settled) {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.id == settled.id => {
                debug!("Scan {} settled in {:?}", settled.id, in_flight.started.elapsed());
            }
            other => {
                error!("Settled scan {} does not match the in-flight slot", settled.id);
                self.in_flight = other;
                return;
            }
        }

        let Classified { outcome, session_expired } = settled.classified;

        if session_expired {
            self.deliver(outcome);
            self.session.invalidate();
            self.stop_session().await;
            return;
        }

        // Arm before delivery so nobody sees "accepted" without a cooldown
        let cooldown = outcome.server_cooldown();
        if cooldown > 0 {
            self.cooldown.arm(cooldown);
            self.last_cooldown_notice = None;
        }
        self.deliver(outcome);

        if self.phase == Phase::Idle {
            self.pending = None;
            self.keep_queued_switch_as_preference().await;
            return;
        }

        if let Some(queued) = self.queued_switch.take() {
            let result = self.apply_switch(queued.facing).await;
            for reply in queued.replies {
                let _ = reply.send(result.clone().map_err(CommandError::from));
            }
            if self.phase == Phase::Idle {
                return;
            }
        }

        let phase = self.running_phase();
        self.set_phase(phase);

        if let Some(attempt) = self.pending.take() {
            let fresh = attempt.observed.elapsed() <= self.pending_max_age
                && self.camera.current_epoch() == Some(attempt.stream_epoch);
            if fresh && phase == Phase::Capturing {
                self.try_submit(attempt);
            } else {
                debug!("Dropping stale pending payload");
            }
        }
    }

    fn handle_tick(&mut self, tick: CooldownTick) {
        match self.cooldown.on_tick(tick) {
            TickResult::Expired => {
                if self.phase == Phase::CooldownHold {
                    info!("Cooldown over, ready to scan");
                    self.set_phase(Phase::Capturing);
                }
            }
            TickResult::Counting(remaining) => debug!("Cooldown: {}s left", remaining),
            TickResult::Stale => {}
        }
    }

    /// Phase of a running camera given the submission slot and cooldown
    fn running_phase(&self) -> Phase {
        if self.in_flight.is_some() {
            Phase::Submitting
        } else if self.cooldown.is_active() {
            Phase::CooldownHold
        } else {
            Phase::Capturing
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Phase {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn deliver(&self, outcome: ScanOutcome) {
        match (&outcome, outcome.severity()) {
            (ScanOutcome::Accepted { action, subject_name, .. }, _) => {
                info!("Scan accepted: {} for {}", action, subject_name)
            }
            (ScanOutcome::Rejected { reason, message, .. }, Severity::Warning) => {
                info!("Scan rejected ({:?}): {}", reason, message)
            }
            (ScanOutcome::Rejected { reason, message, .. }, _) => {
                warn!("Scan rejected ({:?}): {}", reason, message)
            }
        }
        if self.outcomes_tx.send(outcome).is_err() {
            debug!("No presentation layer attached, outcome dropped from view");
        }
    }
}

/// Cloneable handle used by the presentation layer
#[derive(Clone)]
pub struct ScannerHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
    cooldown: watch::Receiver<CooldownState>,
    camera: watch::Receiver<CameraState>,
}

impl ScannerHandle {
    pub async fn start(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn switch_camera(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::SwitchCamera { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn cooldown(&self) -> CooldownState {
        *self.cooldown.borrow()
    }

    pub fn camera(&self) -> CameraState {
        *self.camera.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    pub fn watch_cooldown(&self) -> watch::Receiver<CooldownState> {
        self.cooldown.clone()
    }

    pub fn watch_camera(&self) -> watch::Receiver<CameraState> {
        self.camera.clone()
    }

    async fn request<F>(&self, make: F) -> Result<(), CommandError>
    where
        F: FnOnce(Reply<()>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CommandError::EngineStopped)?;
        rx.await.map_err(|_| CommandError::EngineStopped)?
    }
}
