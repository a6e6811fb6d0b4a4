//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Background loops: the scan loop, the state-telemetry loop, and the
//! idle frame-streaming loop.
//!
//! Each kind runs at most once. Starting a running kind stops and joins the
//! old instance first; stopping signals a [`CancelToken`] and waits up to the
//! configured join timeout for the task to report its exit.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thermoscan_common::{Direction, SessionConfig};
use thermoscan_motion::normalize_degrees;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::CommandError;
use crate::rig::{Rig, RigState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    Scan,
    Telemetry,
    Stream,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::Scan => "scan",
            LoopKind::Telemetry => "telemetry",
            LoopKind::Stream => "stream",
        }
    }
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Running,
    /// Cancelled, but the task has not reported its exit yet.
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{kind} loop did not exit within {timeout:?}; refusing to start another")]
    StillStopping { kind: LoopKind, timeout: Duration },
}

/// Cooperative cancellation signal shared between a loop and its owner.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`; returns `true` if cancelled first.
    pub async fn sleep_or_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    /// Absolute angle the sweep starts from, folded into `[0, 360)`.
    pub offset: f64,
    /// Degrees per iteration.
    pub step: f64,
    pub wait: Duration,
    pub direction: Direction,
    /// Keep rotating in one direction instead of sweeping back and forth.
    pub continuous: bool,
    /// Search for the zero reference before moving to `offset`.
    pub calibrate: bool,
    /// Search budget for the pre-scan calibration, degrees.
    pub prudence: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            offset: 0.0,
            step: 5.0,
            wait: Duration::from_millis(100),
            direction: Direction::Forward,
            continuous: false,
            calibrate: true,
            prudence: 180.0,
        }
    }
}

/// Signals exit when dropped, including on panic or runtime shutdown.
struct ExitGuard(watch::Sender<bool>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Holds a flag raised for as long as it lives.
struct RaisedFlag<'a>(&'a AtomicBool);

impl<'a> RaisedFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RaisedFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct LoopSlot {
    generation: u64,
    token: CancelToken,
    exited: watch::Receiver<bool>,
    _handle: JoinHandle<()>,
}

struct Shared {
    rig: Arc<Rig>,
    config: SessionConfig,
    scan: Mutex<Option<LoopSlot>>,
    telemetry: Mutex<Option<LoopSlot>>,
    stream: Mutex<Option<LoopSlot>>,
    /// Serializes stop-spawn-install per kind across cloned managers.
    lifecycle: [AsyncMutex<()>; 3],
    generation: AtomicU64,
    scan_active: AtomicBool,
}

impl Shared {
    fn slot(&self, kind: LoopKind) -> &Mutex<Option<LoopSlot>> {
        match kind {
            LoopKind::Scan => &self.scan,
            LoopKind::Telemetry => &self.telemetry,
            LoopKind::Stream => &self.stream,
        }
    }

    fn lifecycle(&self, kind: LoopKind) -> &AsyncMutex<()> {
        match kind {
            LoopKind::Scan => &self.lifecycle[0],
            LoopKind::Telemetry => &self.lifecycle[1],
            LoopKind::Stream => &self.lifecycle[2],
        }
    }

    fn state(&self, kind: LoopKind) -> SessionState {
        let guard = self.slot(kind).lock();
        match guard.as_ref() {
            None => SessionState::Stopped,
            Some(slot) if *slot.exited.borrow() => SessionState::Stopped,
            Some(slot) if slot.token.is_cancelled() => SessionState::Stopping,
            Some(_) => SessionState::Running,
        }
    }

    fn snapshot(&self) -> RigState {
        self.rig.state(
            self.state(LoopKind::Scan) == SessionState::Running,
            self.state(LoopKind::Stream) == SessionState::Running,
        )
    }

    fn publish_state(&self) {
        let topic = self.rig.topics().state();
        if let Err(err) = self.rig.publisher().publish(&topic, &self.snapshot(), true) {
            error!(error = %err, "error when publishing the state");
        }
    }
}

/// Owner of the three background loops.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(rig: Arc<Rig>, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                rig,
                config,
                scan: Mutex::new(None),
                telemetry: Mutex::new(None),
                stream: Mutex::new(None),
                lifecycle: [AsyncMutex::new(()), AsyncMutex::new(()), AsyncMutex::new(())],
                generation: AtomicU64::new(0),
                scan_active: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self, kind: LoopKind) -> SessionState {
        self.shared.state(kind)
    }

    pub fn snapshot(&self) -> RigState {
        self.shared.snapshot()
    }

    pub fn publish_state(&self) {
        self.shared.publish_state()
    }

    /// Whether a scan task is alive, including while it is stopping.
    pub fn scan_active(&self) -> bool {
        self.shared.scan_active.load(Ordering::SeqCst)
    }

    pub async fn start_scan(&self, params: ScanParams) -> Result<(), SessionError> {
        self.start(LoopKind::Scan, move |shared, token| run_scan(shared, params, token))
            .await
    }

    pub async fn start_telemetry(&self, interval: Option<Duration>) -> Result<(), SessionError> {
        let interval = interval.unwrap_or(self.shared.config.telemetry_interval);
        self.start(LoopKind::Telemetry, move |shared, token| {
            run_telemetry(shared, interval, token)
        })
        .await
    }

    pub async fn start_stream(&self, interval: Option<Duration>) -> Result<(), SessionError> {
        let interval = interval.unwrap_or(self.shared.config.stream_interval);
        self.start(LoopKind::Stream, move |shared, token| {
            run_stream(shared, interval, token)
        })
        .await
    }

    async fn start<F, Fut>(&self, kind: LoopKind, body: F) -> Result<(), SessionError>
    where
        F: FnOnce(Arc<Shared>, CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _lifecycle = self.shared.lifecycle(kind).lock().await;
        if self.stop_slot(kind).await == SessionState::Stopping {
            return Err(SessionError::StillStopping {
                kind,
                timeout: self.shared.config.join_timeout,
            });
        }
        let token = CancelToken::new();
        let (exit_tx, exited) = watch::channel(false);
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);
        let task = body(Arc::clone(&self.shared), token.clone());
        let handle = tokio::spawn(async move {
            let _guard = ExitGuard(exit_tx);
            task.await;
        });
        *self.shared.slot(kind).lock() = Some(LoopSlot {
            generation,
            token,
            exited,
            _handle: handle,
        });
        info!(session = kind.as_str(), "session loop started");
        Ok(())
    }

    /// Signal the loop and wait up to the join timeout for it to exit.
    ///
    /// Stopping a stopped loop is a no-op. Returns
    /// [`SessionState::Stopping`] when the join timed out.
    pub async fn stop(&self, kind: LoopKind) -> SessionState {
        let _lifecycle = self.shared.lifecycle(kind).lock().await;
        self.stop_slot(kind).await
    }

    async fn stop_slot(&self, kind: LoopKind) -> SessionState {
        let (generation, token, mut exited) = {
            let guard = self.shared.slot(kind).lock();
            match guard.as_ref() {
                Some(slot) => (slot.generation, slot.token.clone(), slot.exited.clone()),
                None => return SessionState::Stopped,
            }
        };
        token.cancel();
        let timeout = self.shared.config.join_timeout;
        let joined = tokio::time::timeout(timeout, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !joined {
            warn!(session = kind.as_str(), ?timeout, "session loop did not exit within the join timeout");
            return SessionState::Stopping;
        }
        let mut guard = self.shared.slot(kind).lock();
        if guard.as_ref().map(|slot| slot.generation) == Some(generation) {
            *guard = None;
        }
        info!(session = kind.as_str(), "session loop stopped");
        SessionState::Stopped
    }

    pub async fn stop_all(&self) {
        for kind in [LoopKind::Scan, LoopKind::Stream, LoopKind::Telemetry] {
            self.stop(kind).await;
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("scan", &self.state(LoopKind::Scan))
            .field("telemetry", &self.state(LoopKind::Telemetry))
            .field("stream", &self.state(LoopKind::Stream))
            .finish()
    }
}

async fn run_scan(shared: Arc<Shared>, params: ScanParams, token: CancelToken) {
    let rig = Arc::clone(&shared.rig);
    let _active = RaisedFlag::raise(&shared.scan_active);
    info!(
        offset = params.offset,
        step = params.step,
        direction = %params.direction,
        continuous = params.continuous,
        "scan started"
    );

    if params.calibrate {
        let prudence = params.prudence;
        let outcome = rig
            .run_motion(move |controller| controller.calibrate(prudence, Direction::Backward))
            .await;
        rig.record_calibration(&outcome);
        if let Err(err) = outcome {
            warn!(error = %err, "pre-scan calibration failed; scanning without a fresh zero reference");
        }
    }

    if !token.is_cancelled() {
        let offset = normalize_degrees(params.offset);
        match rig.run_motion(move |controller| controller.go_to(offset)).await {
            Ok(report) => {
                rig.record_move(&report);
                sweep(&rig, &params, report.position, &token).await;
            }
            Err(err) => error!(error = %err, offset, "scan could not reach its start offset"),
        }
    }

    rig.checkpoint();
    info!(position = rig.position().get(), "scan finished");
}

async fn sweep(rig: &Arc<Rig>, params: &ScanParams, start: f64, token: &CancelToken) {
    let step_degrees = rig.controller().step_degrees();
    let full_turn = (360.0 / step_degrees).round() as i64;
    // Unwrapped distance from zero, in steps.
    let mut swept = (start / step_degrees).round() as i64;
    let mut direction = params.direction;
    let step = params.step;

    loop {
        if token.is_cancelled() {
            break;
        }
        if !params.continuous {
            if direction == Direction::Forward && swept >= full_turn {
                direction = Direction::Backward;
                debug!("sweep reached a full turn; reversing");
            } else if direction == Direction::Backward && swept <= 0 {
                direction = Direction::Forward;
                debug!("sweep returned to zero; reversing");
            }
        }

        match rig
            .run_motion(move |controller| controller.rotate_relative(step, direction))
            .await
        {
            Ok(report) => {
                rig.record_move(&report);
                let steps = report.steps as i64;
                swept += match direction {
                    Direction::Forward => steps,
                    Direction::Backward => -steps,
                };
            }
            Err(CommandError::Busy) => warn!("motor busy; skipping this scan step"),
            Err(err) => {
                error!(error = %err, "scan step failed; stopping scan");
                break;
            }
        }

        let frames = Arc::clone(rig.frames());
        match tokio::task::spawn_blocking(move || frames.publish_all()).await {
            Ok(summary) => debug!(
                published = summary.published,
                failed = summary.failed,
                "scan frames published"
            ),
            Err(err) => warn!(error = %err, "frame sweep task failed"),
        }

        if token.sleep_or_cancelled(params.wait).await {
            break;
        }
    }
}

async fn run_telemetry(shared: Arc<Shared>, interval: Duration, token: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => shared.publish_state(),
        }
    }
    debug!("telemetry loop exited");
}

async fn run_stream(shared: Arc<Shared>, interval: Duration, token: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if shared.scan_active.load(Ordering::SeqCst) {
                    continue;
                }
                let frames = Arc::clone(shared.rig.frames());
                if let Err(err) = tokio::task::spawn_blocking(move || frames.publish_all()).await {
                    warn!(error = %err, "stream sweep task failed");
                }
            }
        }
    }
    debug!("stream loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_reports_cancellation() {
        let token = CancelToken::new();
        assert!(!token.sleep_or_cancelled(Duration::from_millis(5)).await);
        token.cancel();
        assert!(token.sleep_or_cancelled(Duration::from_secs(30)).await);
    }

    #[test]
    fn raised_flag_lowers_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _raised = RaisedFlag::raise(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
