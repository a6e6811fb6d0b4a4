//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use thermoscan_common::{Direction, RigConfig};
use thermoscan_core::{
    LoopKind, Rig, RigHardware, ScanParams, SessionError, SessionManager, SessionState,
};
use thermoscan_hal::{HardwareError, SimulatedHardware, StepperDriver};
use thermoscan_msg::{InMemoryTransport, Publisher, Topics};

/// Stepper that tracks concurrent callers and can be held shut.
#[derive(Clone)]
struct ProbeStepper {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicU64>,
    entered: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    delay: Duration,
}

impl ProbeStepper {
    fn new(delay: Duration, open: bool) -> Self {
        Self {
            active: Arc::default(),
            peak: Arc::default(),
            calls: Arc::default(),
            entered: Arc::default(),
            open: Arc::new(AtomicBool::new(open)),
            delay,
        }
    }

    fn release_gate(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    async fn wait_until_entered(&self) {
        while !self.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl StepperDriver for ProbeStepper {
    fn step(&mut self, _direction: Direction) -> Result<(), HardwareError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.store(true, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {}
}

struct Harness {
    sessions: SessionManager,
    rig: Arc<Rig>,
    transport: Arc<InMemoryTransport>,
    topics: Topics,
    _dir: TempDir,
}

fn harness(stepper: Option<ProbeStepper>, join_timeout: Duration) -> Harness {
    let dir = tempdir().unwrap();
    let mut config = RigConfig::default();
    config.motion.settle_interval = Duration::ZERO;
    config.persistence.position_log = dir.path().join("absolute_position.csv");
    config.session.telemetry_interval = Duration::from_millis(10);
    config.session.stream_interval = Duration::from_millis(10);
    config.session.join_timeout = join_timeout;

    let simulated = SimulatedHardware::from_config(&config).unwrap();
    let mut hardware = RigHardware::from(simulated);
    if let Some(stepper) = stepper {
        hardware.stepper = Box::new(stepper);
    }
    let topics = Topics::new(config.transport.topic_root.clone());
    let transport = Arc::new(InMemoryTransport::new());
    let publisher = Publisher::new(topics.clone()).with_transport(transport.clone());
    let session_config = config.session.clone();
    let rig = Arc::new(Rig::new(config, hardware, publisher).unwrap());
    Harness {
        sessions: SessionManager::new(rig.clone(), session_config),
        rig,
        transport,
        topics,
        _dir: dir,
    }
}

fn quick_scan() -> ScanParams {
    ScanParams {
        step: 9.0,
        wait: Duration::from_millis(2),
        calibrate: false,
        ..ScanParams::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn telemetry_publishes_retained_state() {
    let h = harness(None, Duration::from_secs(2));

    h.sessions.start_telemetry(None).await.unwrap();
    assert_eq!(h.sessions.state(LoopKind::Telemetry), SessionState::Running);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.sessions.stop(LoopKind::Telemetry).await, SessionState::Stopped);

    let states = h.transport.on_topic(&h.topics.state());
    assert!(states.len() >= 2, "only {} state messages", states.len());
    let last = states.last().unwrap();
    assert!(last.retain);
    assert_eq!(last.payload["running"], false);
    assert_eq!(last.payload["streaming"], false);
    assert_eq!(last.payload["switch_state"], true);
    assert_eq!(last.payload["position"], 0.0);

    let count = h.transport.on_topic(&h.topics.state()).len();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.transport.on_topic(&h.topics.state()).len(), count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_a_stopped_loop_is_a_no_op() {
    let h = harness(None, Duration::from_secs(2));

    for kind in [LoopKind::Scan, LoopKind::Telemetry, LoopKind::Stream] {
        assert_eq!(h.sessions.stop(kind).await, SessionState::Stopped);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_publishes_frames_while_idle() {
    let h = harness(None, Duration::from_secs(2));

    h.sessions.start_stream(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.sessions.stop(LoopKind::Stream).await;

    assert!(!h.transport.on_topic(&h.topics.frame("camera0", 0x30)).is_empty());
    assert!(h.rig.metrics().frames_total("camera0") >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_stays_quiet_while_a_scan_owns_the_rig() {
    let stepper = ProbeStepper::new(Duration::ZERO, false);
    let h = harness(Some(stepper.clone()), Duration::from_secs(2));

    h.sessions.start_scan(quick_scan()).await.unwrap();
    stepper.wait_until_entered().await;
    assert!(h.sessions.scan_active());
    h.sessions.start_stream(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.transport.on_topic(&h.topics.frame("camera0", 0x30)).is_empty());
    assert!(h.sessions.snapshot().running);
    assert!(h.sessions.snapshot().streaming);

    stepper.release_gate();
    h.sessions.stop_all().await;
    assert!(!h.sessions.scan_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restarting_a_scan_never_overlaps_motion() {
    let stepper = ProbeStepper::new(Duration::from_millis(1), true);
    let h = harness(Some(stepper.clone()), Duration::from_secs(2));

    for _ in 0..5 {
        h.sessions.start_scan(quick_scan()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    assert_eq!(h.sessions.stop(LoopKind::Scan).await, SessionState::Stopped);

    assert!(stepper.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(stepper.peak.load(Ordering::SeqCst), 1);
    assert_eq!(h.sessions.state(LoopKind::Scan), SessionState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scan_starts_leave_one_stoppable_loop() {
    let stepper = ProbeStepper::new(Duration::from_millis(1), true);
    let h = harness(Some(stepper.clone()), Duration::from_secs(2));
    let other = h.sessions.clone();

    let (first, second) = tokio::join!(
        h.sessions.start_scan(quick_scan()),
        other.start_scan(quick_scan())
    );
    first.unwrap();
    second.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.sessions.stop(LoopKind::Scan).await, SessionState::Stopped);
    assert!(!h.sessions.scan_active());

    let calls = stepper.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(stepper.calls.load(Ordering::SeqCst), calls);
    assert_eq!(stepper.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn motion_during_a_scan_is_rejected_as_busy() {
    let stepper = ProbeStepper::new(Duration::ZERO, false);
    let h = harness(Some(stepper.clone()), Duration::from_secs(2));

    h.sessions.start_scan(quick_scan()).await.unwrap();
    stepper.wait_until_entered().await;

    let outcome = h
        .rig
        .run_motion(|controller| controller.rotate_relative(10.0, Direction::Backward))
        .await;
    assert!(matches!(outcome, Err(thermoscan_core::CommandError::Busy)));

    stepper.release_gate();
    assert_eq!(h.sessions.stop(LoopKind::Scan).await, SessionState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wedged_scan_reports_stopping_and_blocks_restart() {
    let stepper = ProbeStepper::new(Duration::ZERO, false);
    let h = harness(Some(stepper.clone()), Duration::from_millis(50));

    h.sessions.start_scan(quick_scan()).await.unwrap();
    stepper.wait_until_entered().await;

    assert_eq!(h.sessions.stop(LoopKind::Scan).await, SessionState::Stopping);
    assert_eq!(h.sessions.state(LoopKind::Scan), SessionState::Stopping);
    assert!(matches!(
        h.sessions.start_scan(quick_scan()).await,
        Err(SessionError::StillStopping { kind: LoopKind::Scan, .. })
    ));

    stepper.release_gate();
    let mut state = h.sessions.state(LoopKind::Scan);
    for _ in 0..200 {
        if state == SessionState::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        state = h.sessions.state(LoopKind::Scan);
    }
    assert_eq!(state, SessionState::Stopped);
    assert!(h.rig.position().log().last().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweep_reverses_at_a_full_turn() {
    let h = harness(None, Duration::from_secs(2));
    let params = ScanParams {
        offset: 351.0,
        step: 9.0,
        wait: Duration::from_millis(5),
        calibrate: false,
        continuous: false,
        direction: Direction::Forward,
        ..ScanParams::default()
    };

    h.sessions.start_scan(params).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    h.sessions.stop(LoopKind::Scan).await;

    // go_to(351) is 390 steps, one more forward iteration reaches the full
    // turn, and everything after that runs backward.
    let metrics = h.rig.metrics();
    assert_eq!(metrics.steps_total(Direction::Forward), 400);
    let backward = metrics.steps_total(Direction::Backward);
    assert!(backward > 0 && backward < 400, "backward {backward}");
    assert!((h.rig.position().get() - (360.0 - backward as f64 * 0.9).rem_euclid(360.0)).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offset_beyond_a_full_turn_is_folded_before_sweeping() {
    let h = harness(None, Duration::from_secs(2));
    let params = ScanParams {
        offset: 400.0,
        step: 9.0,
        wait: Duration::from_millis(5),
        calibrate: false,
        continuous: false,
        direction: Direction::Forward,
        ..ScanParams::default()
    };

    h.sessions.start_scan(params).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.sessions.stop(LoopKind::Scan).await;

    // go_to(40) lands at 39.6 after 44 steps; the sweep keeps going forward.
    let metrics = h.rig.metrics();
    assert_eq!(metrics.steps_total(Direction::Backward), 0);
    let forward = metrics.steps_total(Direction::Forward);
    assert!(forward > 44 && forward < 400, "forward {forward}");
    assert!((h.rig.position().get() - forward as f64 * 0.9).abs() < 1e-6);
}
