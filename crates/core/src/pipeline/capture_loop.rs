use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::attention::domain::attention_evaluator::evaluate;
use crate::attention::domain::signal_filter::{Passthrough, SignalFilter};
use crate::capture::domain::frame_source::{EndOfStream, FrameSource, ReleaseHandle};
use crate::detection::domain::detector::Detector;
use crate::detection::domain::two_stage_scan;
use crate::pipeline::dispatcher::{DispatchError, Dispatcher};
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::shared::cancellation::CancellationToken;
use crate::shared::constants::{DEFAULT_FRAME_INTERVAL, DEFAULT_MAX_CONSECUTIVE_FAILURES};
use crate::shared::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Pause between iterations.
    pub frame_interval: Duration,
    /// Consecutive detection errors after which the detector is given up on.
    pub max_consecutive_failures: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Running,
    Stopping,
    /// Terminal: the device has been released.
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EndOfStream,
    StopRequested,
    ConsumerGone,
    DetectorFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames_read: usize,
    pub empty_frames: usize,
    pub detection_failures: usize,
    pub signals_dispatched: usize,
    pub exit: ExitReason,
}

#[derive(Error, Debug)]
pub enum CaptureJoinError {
    #[error("capture thread panicked: {0}")]
    Panicked(String),
}

/// Shared view of the loop's state, readable from any thread.
#[derive(Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(CaptureState::Running as u8)))
    }

    fn get(&self) -> CaptureState {
        match self.0.load(Ordering::SeqCst) {
            0 => CaptureState::Running,
            1 => CaptureState::Stopping,
            _ => CaptureState::Stopped,
        }
    }

    fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Releases the device and marks the loop stopped however `run` exits,
/// including by unwinding out of a panicking detector.
struct ReleaseOnExit {
    release: ReleaseHandle,
    state: StateCell,
}

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        self.state.set(CaptureState::Stopping);
        self.release.release();
        self.state.set(CaptureState::Stopped);
    }
}

enum Tick {
    Dispatched,
    DetectionFailed(Box<dyn std::error::Error>),
    ConsumerGone,
}

/// Read → detect → evaluate → dispatch, one frame at a time.
///
/// The loop owns the frame source and the detector for its whole life and
/// never waits on the presentation side. It ends on end of stream, on a
/// cancelled token, when the consumer is gone, or when the detector keeps
/// failing, and in every case releases the device exactly once.
pub struct CaptureLoop {
    source: FrameSource,
    detector: Box<dyn Detector>,
    dispatcher: Dispatcher,
    token: CancellationToken,
    config: CaptureConfig,
    filter: Box<dyn SignalFilter>,
    logger: Box<dyn PipelineLogger>,
    state: StateCell,
}

impl CaptureLoop {
    pub fn new(
        source: FrameSource,
        detector: Box<dyn Detector>,
        dispatcher: Dispatcher,
        token: CancellationToken,
        config: CaptureConfig,
    ) -> Self {
        Self {
            source,
            detector,
            dispatcher,
            token,
            config,
            filter: Box::new(Passthrough),
            logger: Box::new(NullPipelineLogger),
            state: StateCell::new(),
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn SignalFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    /// Runs the loop on a dedicated `capture` thread.
    pub fn spawn(self) -> std::io::Result<CaptureHandle> {
        let state = self.state.clone();
        let token = self.token.clone();
        let release = self.source.release_handle();
        let thread = thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())?;
        Ok(CaptureHandle {
            state,
            token,
            release,
            thread,
        })
    }

    /// Runs the loop on the calling thread until it stops.
    pub fn run(mut self) -> CaptureReport {
        let _guard = ReleaseOnExit {
            release: self.source.release_handle(),
            state: self.state.clone(),
        };
        log::info!("Capture started on {}", self.source.label());

        let mut report = CaptureReport {
            frames_read: 0,
            empty_frames: 0,
            detection_failures: 0,
            signals_dispatched: 0,
            exit: ExitReason::EndOfStream,
        };
        let mut consecutive_failures = 0u32;

        report.exit = loop {
            if self.token.is_cancelled() {
                break ExitReason::StopRequested;
            }

            let read_started = Instant::now();
            let frame = match self.source.read_next() {
                Ok(frame) => frame,
                Err(EndOfStream) if self.token.is_cancelled() => break ExitReason::StopRequested,
                Err(EndOfStream) => break ExitReason::EndOfStream,
            };
            self.logger.timing("read", elapsed_ms(read_started));
            report.frames_read += 1;
            self.logger.progress(report.frames_read);

            if frame.is_empty() {
                log::trace!("Skipping empty frame #{}", frame.index());
                report.empty_frames += 1;
            } else {
                match self.process(frame) {
                    Tick::Dispatched => {
                        consecutive_failures = 0;
                        report.signals_dispatched += 1;
                    }
                    Tick::DetectionFailed(e) => {
                        consecutive_failures += 1;
                        report.detection_failures += 1;
                        log::warn!(
                            "Detection failed ({consecutive_failures} in a row), skipping: {e}"
                        );
                        if consecutive_failures >= self.config.max_consecutive_failures {
                            log::error!(
                                "Detector failed {consecutive_failures} frames in a row; stopping"
                            );
                            break ExitReason::DetectorFailed;
                        }
                    }
                    Tick::ConsumerGone => {
                        log::info!("Presentation side has gone away; stopping capture");
                        break ExitReason::ConsumerGone;
                    }
                }
            }

            if !self.token.sleep(self.config.frame_interval) {
                break ExitReason::StopRequested;
            }
        };

        self.state.set(CaptureState::Stopping);
        self.logger.info(&format!(
            "Capture stopped ({:?}) after {} frames, {} signals dispatched",
            report.exit, report.frames_read, report.signals_dispatched
        ));
        self.logger.summary();
        report
    }

    fn process(&mut self, frame: Frame) -> Tick {
        let started = Instant::now();
        let result = match two_stage_scan::scan(self.detector.as_mut(), &frame) {
            Ok(result) => result,
            Err(e) => return Tick::DetectionFailed(e),
        };
        self.logger.timing("detect", elapsed_ms(started));
        self.logger.metric("faces", result.face_count() as f64);

        let attentive = self.filter.filter(evaluate(&result));
        match self.dispatcher.post(attentive, frame) {
            Ok(sequence) => {
                log::trace!("Posted #{sequence}: attentive={attentive}");
                self.logger
                    .metric("queue_depth", self.dispatcher.queue_depth() as f64);
                Tick::Dispatched
            }
            Err(DispatchError::Closed) => Tick::ConsumerGone,
        }
    }
}

/// Control over a capture loop running on its own thread.
pub struct CaptureHandle {
    state: StateCell,
    token: CancellationToken,
    release: ReleaseHandle,
    thread: JoinHandle<CaptureReport>,
}

impl CaptureHandle {
    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    /// Requests a stop and releases the device. Safe to call repeatedly and
    /// while a read is in flight; the loop notices within one iteration.
    pub fn stop(&self) {
        log::debug!("Stop requested");
        self.token.cancel();
        self.release.release();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<CaptureReport, CaptureJoinError> {
        self.thread
            .join()
            .map_err(|payload| CaptureJoinError::Panicked(panic_message(payload.as_ref())))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attention::domain::signal_filter::ConfirmationWindow;
    use crate::capture::domain::camera_device::CameraDevice;
    use crate::detection::domain::detector::FaceCrop;
    use crate::pipeline::dispatcher::{self, DispatchReceiver};
    use crate::shared::region::Region;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use crossbeam_channel::{Receiver, Sender};

    /// What a scripted frame shows the detector.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum Scene {
        NoFace,
        FaceWithoutEyes,
        FaceWithEyes,
        DetectorError,
        DetectorPanic,
        Blank,
    }

    impl Scene {
        fn tag(self) -> u8 {
            match self {
                Scene::NoFace => 0,
                Scene::FaceWithoutEyes => 1,
                Scene::FaceWithEyes => 2,
                Scene::DetectorError => 3,
                Scene::DetectorPanic => 4,
                Scene::Blank => 5,
            }
        }
    }

    /// Camera that plays back a fixed list of scenes, then ends.
    pub(crate) struct ScriptedCamera {
        scenes: VecDeque<Scene>,
        next_index: usize,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedCamera {
        pub(crate) fn new(scenes: Vec<Scene>, releases: Arc<AtomicUsize>) -> Self {
            Self {
                scenes: scenes.into(),
                next_index: 0,
                releases,
            }
        }
    }

    impl CameraDevice for ScriptedCamera {
        fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
            let Some(scene) = self.scenes.pop_front() else {
                return Ok(None);
            };
            let index = self.next_index;
            self.next_index += 1;
            if scene == Scene::Blank {
                return Ok(Some(Frame::empty(index)));
            }
            Ok(Some(Frame::new(vec![scene.tag(); 20 * 20 * 3], 20, 20, 3, index)))
        }

        fn release(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted camera".into()
        }
    }

    /// Reads the scene tag out of the frame's first pixel.
    pub(crate) struct SceneDetector {
        pub(crate) full_frame_eye_checks: Arc<AtomicUsize>,
    }

    impl SceneDetector {
        pub(crate) fn new() -> Self {
            Self {
                full_frame_eye_checks: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Detector for SceneDetector {
        fn detect_faces(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<Region>, Box<dyn std::error::Error>> {
            match frame.data()[0] {
                0 => Ok(vec![]),
                3 => Err("classifier fault".into()),
                4 => panic!("classifier crashed"),
                _ => Ok(vec![Region::new(5, 5, 10, 10)]),
            }
        }

        fn detect_eyes(&mut self, face: &FaceCrop) -> Result<bool, Box<dyn std::error::Error>> {
            if face.image().width() == 20 {
                self.full_frame_eye_checks.fetch_add(1, Ordering::SeqCst);
            }
            Ok(face.image().data()[0] == 2)
        }
    }

    /// Camera whose reads block until the test opens the gate.
    struct GatedCamera {
        entered: Sender<()>,
        gate: Receiver<()>,
        releases: Arc<AtomicUsize>,
        release_log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CameraDevice for GatedCamera {
        fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            self.release_log.lock().unwrap().push("read returned");
            Ok(Some(Frame::new(vec![0u8; 20 * 20 * 3], 20, 20, 3, 0)))
        }

        fn release(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.release_log.lock().unwrap().push("released");
            Ok(())
        }

        fn describe(&self) -> String {
            "gated camera".into()
        }
    }

    pub(crate) fn fast_config() -> CaptureConfig {
        CaptureConfig {
            frame_interval: Duration::ZERO,
            max_consecutive_failures: 3,
        }
    }

    pub(crate) fn scripted_loop(
        scenes: Vec<Scene>,
        capacity: usize,
    ) -> (CaptureLoop, DispatchReceiver, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = FrameSource::new(Box::new(ScriptedCamera::new(scenes, releases.clone())));
        let (tx, rx) = dispatcher::channel(capacity);
        let capture = CaptureLoop::new(
            source,
            Box::new(SceneDetector::new()),
            tx,
            CancellationToken::new(),
            fast_config(),
        );
        (capture, rx, releases)
    }

    fn posted(rx: &DispatchReceiver) -> Vec<bool> {
        rx.drain().updates.iter().map(|u| u.attentive).collect()
    }

    #[test]
    fn test_signals_follow_scenes_in_order() {
        let (capture, rx, releases) = scripted_loop(
            vec![Scene::NoFace, Scene::FaceWithoutEyes, Scene::FaceWithEyes],
            64,
        );
        let report = capture.run();

        assert_eq!(posted(&rx), vec![false, false, true]);
        assert_eq!(report.exit, ExitReason::EndOfStream);
        assert_eq!(report.frames_read, 3);
        assert_eq!(report.signals_dispatched, 3);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_is_stopped_after_run() {
        let (capture, _rx, _) = scripted_loop(vec![Scene::NoFace], 64);
        let state = capture.state.clone();
        assert_eq!(capture.state(), CaptureState::Running);
        capture.run();
        assert_eq!(state.get(), CaptureState::Stopped);
    }

    #[test]
    fn test_blank_frames_are_skipped() {
        let (capture, rx, _) = scripted_loop(
            vec![Scene::Blank, Scene::FaceWithEyes, Scene::Blank, Scene::NoFace],
            64,
        );
        let report = capture.run();
        assert_eq!(posted(&rx), vec![true, false]);
        assert_eq!(report.empty_frames, 2);
        assert_eq!(report.frames_read, 4);
        assert_eq!(report.detection_failures, 0);
    }

    #[test]
    fn test_eye_checks_never_see_the_full_frame() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = FrameSource::new(Box::new(ScriptedCamera::new(
            vec![Scene::FaceWithEyes, Scene::FaceWithoutEyes],
            releases,
        )));
        let detector = SceneDetector::new();
        let full_frame_checks = detector.full_frame_eye_checks.clone();
        let (tx, _rx) = dispatcher::channel(8);
        let token = CancellationToken::new();
        CaptureLoop::new(source, Box::new(detector), tx, token, fast_config()).run();
        assert_eq!(full_frame_checks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detection_error_skips_frame_without_dispatch() {
        let (capture, rx, _) = scripted_loop(
            vec![Scene::NoFace, Scene::DetectorError, Scene::FaceWithEyes],
            64,
        );
        let report = capture.run();
        assert_eq!(posted(&rx), vec![false, true]);
        assert_eq!(report.detection_failures, 1);
        assert_eq!(report.exit, ExitReason::EndOfStream);
    }

    #[test]
    fn test_repeated_detection_errors_stop_the_loop() {
        let (capture, rx, releases) = scripted_loop(
            vec![
                Scene::DetectorError,
                Scene::DetectorError,
                Scene::FaceWithEyes,
                Scene::DetectorError,
                Scene::DetectorError,
                Scene::DetectorError,
                Scene::NoFace,
            ],
            64,
        );
        let report = capture.run();
        assert_eq!(report.exit, ExitReason::DetectorFailed);
        assert_eq!(report.detection_failures, 5);
        assert_eq!(posted(&rx), vec![true]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consumer_gone_ends_capture() {
        let (capture, rx, releases) = scripted_loop(vec![Scene::NoFace; 5], 64);
        drop(rx);
        let report = capture.run();
        assert_eq!(report.exit, ExitReason::ConsumerGone);
        assert_eq!(report.frames_read, 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_is_applied_before_dispatch() {
        let (capture, rx, _) = scripted_loop(
            vec![
                Scene::NoFace,
                Scene::FaceWithEyes,
                Scene::NoFace,
                Scene::NoFace,
                Scene::NoFace,
            ],
            64,
        );
        let capture = capture.with_filter(Box::new(ConfirmationWindow::new(3).unwrap()));
        capture.run();
        assert_eq!(posted(&rx), vec![true, true, true, true, false]);
    }

    #[test]
    fn test_cancelled_before_start_reads_nothing() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = FrameSource::new(Box::new(ScriptedCamera::new(
            vec![Scene::NoFace],
            releases.clone(),
        )));
        let (tx, _rx) = dispatcher::channel(8);
        let token = CancellationToken::new();
        token.cancel();
        let detector = Box::new(SceneDetector::new());
        let report = CaptureLoop::new(source, detector, tx, token, fast_config()).run();
        assert_eq!(report.exit, ExitReason::StopRequested);
        assert_eq!(report.frames_read, 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_during_in_flight_read() {
        let releases = Arc::new(AtomicUsize::new(0));
        let release_log = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
        let source = FrameSource::new(Box::new(GatedCamera {
            entered: entered_tx,
            gate: gate_rx,
            releases: releases.clone(),
            release_log: release_log.clone(),
        }));
        let (tx, _rx) = dispatcher::channel(8);
        let config = CaptureConfig {
            frame_interval: Duration::from_secs(60),
            max_consecutive_failures: 3,
        };
        let detector = Box::new(SceneDetector::new());
        let handle = CaptureLoop::new(source, detector, tx, CancellationToken::new(), config)
            .spawn()
            .unwrap();

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.state(), CaptureState::Running);
        handle.stop();
        handle.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        gate_tx.send(()).unwrap();
        let report = handle.join().unwrap();

        assert_eq!(report.exit, ExitReason::StopRequested);
        assert_eq!(report.signals_dispatched, 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(*release_log.lock().unwrap(), vec!["read returned", "released"]);
    }

    #[test]
    fn test_stop_interrupts_inter_frame_sleep() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = FrameSource::new(Box::new(ScriptedCamera::new(
            vec![Scene::NoFace; 3],
            releases.clone(),
        )));
        let (tx, rx) = dispatcher::channel(8);
        let config = CaptureConfig {
            frame_interval: Duration::from_secs(60),
            max_consecutive_failures: 3,
        };
        let detector = Box::new(SceneDetector::new());
        let handle = CaptureLoop::new(source, detector, tx, CancellationToken::new(), config)
            .spawn()
            .unwrap();

        assert_eq!(
            rx.wait(Duration::from_secs(5)),
            crate::pipeline::dispatcher::WaitOutcome::Ready
        );
        let started = Instant::now();
        handle.stop();
        let report = handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(report.exit, ExitReason::StopRequested);
        assert_eq!(report.frames_read, 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detector_panic_still_releases_device() {
        let (capture, _rx, releases) = scripted_loop(vec![Scene::NoFace, Scene::DetectorPanic], 8);
        let handle = capture.spawn().unwrap();
        let state = handle.state.clone();
        let err = handle.join().unwrap_err();
        assert!(err.to_string().contains("classifier crashed"));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), CaptureState::Stopped);
    }
}
