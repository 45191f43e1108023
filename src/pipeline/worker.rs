//! 摄像头工作线程 (CameraWorker)
//!
//! 状态: Uninitialized → Running → Stopping → Stopped
//! 只有帧来源打开且区域加载成功的摄像头才会进入 Running

use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{ControlCommand, PublishedFrame, WorkerState};
use crate::annotate::{Annotator, FrameStatus};
use crate::config::{AppConfig, CameraConfig};
use crate::detection::{validate_detections, Detector, ObjectLifecycleTracker, TrackId};
use crate::error::MonitorError;
use crate::input::FrameSource;
use crate::recording::RecordingManager;
use crate::speed::SpeedEstimator;
use crate::zone::ZoneEngine;

/// 所有工作线程共享的组件
#[derive(Clone)]
pub struct WorkerContext {
    pub zones: Arc<ZoneEngine>,
    pub tracker: Arc<ObjectLifecycleTracker>,
    pub speed: Arc<SpeedEstimator>,
    pub recording: Arc<RecordingManager>,
    pub annotator: Annotator,
    pub config: Arc<AppConfig>,
    pub stop: Arc<AtomicBool>,
}

/// 工作线程与显示循环之间共享的状态
pub struct WorkerShared {
    pub camera_id: String,
    state: Mutex<WorkerState>,
    latest: Mutex<Option<PublishedFrame>>,
    frames_processed: AtomicU64,
}

impl WorkerShared {
    pub fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            state: Mutex::new(WorkerState::Uninitialized),
            latest: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        debug!(camera = %self.camera_id, "工作线程状态: {:?}", state);
    }

    /// 取走最新发布的帧 (没有新帧时返回 None)
    pub fn take_latest(&self) -> Option<PublishedFrame> {
        self.latest.lock().take()
    }

    fn publish(&self, frame: PublishedFrame) {
        *self.latest.lock() = Some(frame);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }
}

/// 线程结束通知 (包括panic)
struct DoneGuard {
    tx: Sender<String>,
    camera_id: String,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.camera_id.clone());
    }
}

pub struct CameraWorker {
    camera: CameraConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    ctx: WorkerContext,
    shared: Arc<WorkerShared>,
    commands: Receiver<ControlCommand>,

    fps: f64,
    frame_index: u64,
    detection_active: bool,
    detector_enabled: bool,
    recording_active: bool,
    main_requested: bool,
}

impl CameraWorker {
    /// Uninitialized → 就绪: 加载区域, 失败时该摄像头被跳过
    pub fn initialize(
        camera: CameraConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        ctx: WorkerContext,
        commands: Receiver<ControlCommand>,
    ) -> Result<Self, MonitorError> {
        let shared = Arc::new(WorkerShared::new(&camera.id));

        ctx.zones
            .load(&camera.id, &camera.zone_file, camera.zone_length_m)
            .map_err(|e| MonitorError::from_zone(&camera.id, e))?;

        let fps = source
            .fps()
            .filter(|f| *f > 0.0)
            .unwrap_or(if camera.fps > 0.0 { camera.fps } else { ctx.config.video.fps });

        info!(camera = %camera.id, "✓ 摄像头初始化完成 ({:.1} fps)", fps);
        Ok(Self {
            detection_active: camera.detection_active,
            detector_enabled: ctx.config.auto_detection_enabled,
            recording_active: camera.recording_active,
            main_requested: false,
            camera,
            source,
            detector,
            ctx,
            shared,
            commands,
            fps,
            frame_index: 0,
        })
    }

    pub fn shared(&self) -> Arc<WorkerShared> {
        Arc::clone(&self.shared)
    }

    pub fn camera_id(&self) -> &str {
        &self.camera.id
    }

    /// 工作线程主循环, `done` 在线程结束时收到摄像头ID
    pub fn run(mut self, done: Sender<String>) {
        let _guard = DoneGuard {
            tx: done,
            camera_id: self.camera.id.clone(),
        };
        self.shared.set_state(WorkerState::Running);
        info!(camera = %self.camera.id, "▶️ 工作线程启动");

        let pacing = Duration::from_millis(self.ctx.config.video.pacing_ms);
        while !self.ctx.stop.load(Ordering::SeqCst) {
            self.drain_commands();

            let mut frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(camera = %self.camera.id, "⏏️ 视频源结束");
                    break;
                }
                Err(e) => {
                    // 取帧失败: 仅终止本摄像头
                    error!(camera = %self.camera.id, "❌ {}", e);
                    break;
                }
            };

            self.process_frame(&mut frame);
            self.shared.publish(PublishedFrame {
                frame,
                frame_index: self.frame_index,
                timestamp: self.now(),
            });
            self.frame_index += 1;
            self.shared.frames_processed.fetch_add(1, Ordering::Relaxed);

            if !pacing.is_zero() {
                std::thread::sleep(pacing);
            }
        }

        self.shared.set_state(WorkerState::Stopping);
        let CameraWorker { source, shared, camera, .. } = self;
        drop(source);
        shared.set_state(WorkerState::Stopped);
        info!(camera = %camera.id, "⏹️ 工作线程结束");
    }

    /// 逻辑时钟: 帧序号 / 帧率
    fn now(&self) -> f64 {
        self.frame_index as f64 / self.fps
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply_command(cmd);
        }
    }

    fn apply_command(&mut self, cmd: ControlCommand) {
        debug!(camera = %self.camera.id, "📨 命令: {:?}", cmd);
        match cmd {
            ControlCommand::StartDetection => {
                self.detection_active = true;
                self.detector_enabled = true;
            }
            ControlCommand::StopDetection => {
                self.detection_active = false;
                self.detector_enabled = false;
            }
            ControlCommand::StartRecording => {
                self.recording_active = true;
                self.main_requested = true;
            }
            ControlCommand::StopRecording => {
                self.recording_active = false;
                self.main_requested = false;
            }
            ControlCommand::Exit => self.ctx.stop.store(true, Ordering::SeqCst),
        }
    }

    /// 单帧处理
    pub fn process_frame(&mut self, frame: &mut RgbImage) {
        let camera_id = self.camera.id.clone();
        let now = self.now();
        let (width, height) = frame.dimensions();

        self.ctx.zones.render(&camera_id, frame);

        if self.detection_active && self.detector_enabled {
            self.detect_and_track(&camera_id, frame, now);
        }

        let stats = self.ctx.tracker.statistics(&camera_id);
        self.ctx.annotator.draw_status(
            frame,
            &FrameStatus {
                camera_id: &camera_id,
                detection_on: self.detection_active && self.detector_enabled,
                recording_on: self.recording_active,
                total: stats.active_count,
                in_zone: stats.in_zone_count,
            },
        );

        if self.recording_active {
            if self.main_requested {
                self.main_requested = false;
                self.ctx
                    .recording
                    .start_main(&camera_id, width, height, self.fps);
            }
            self.ctx.recording.write_main(&camera_id, frame);
        }
    }

    fn detect_and_track(&mut self, camera_id: &str, frame: &mut RgbImage, now: f64) {
        let frame_index = self.frame_index;
        let raw = match self.detector.detect(frame_index, frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(camera = camera_id, "⚠️ 检测失败: {}", e);
                Vec::new()
            }
        };
        let config = &self.ctx.config;
        let detections = validate_detections(camera_id, &raw, |id| config.class_name(id));
        let zone_length = self.ctx.zones.zone_length(camera_id).unwrap_or(0.0);
        let (width, height) = frame.dimensions();

        let mut active: HashSet<TrackId> = HashSet::with_capacity(detections.len());
        let mut overlays = Vec::with_capacity(detections.len());

        for det in &detections {
            active.insert(det.track_id.clone());
            let is_inside = self.ctx.zones.contains(camera_id, det.center());
            self.ctx.tracker.update(camera_id, det, now, is_inside);

            let state = self.ctx.tracker.get(camera_id, &det.track_id);
            let speed = self.ctx.speed.speed_info(&state, now, zone_length);

            // 首次进入区域时开始单目标录像 (每个目标只录一次)
            if is_inside && self.recording_active && !state.recorded {
                let started = self.ctx.recording.start_per_object(
                    camera_id,
                    &det.track_id,
                    width,
                    height,
                    self.fps,
                );
                if started {
                    self.ctx.tracker.mark_recorded(camera_id, &det.track_id);
                }
            }
            self.ctx
                .recording
                .write_per_object(camera_id, &det.track_id, frame, &state);

            overlays.push((det.track_id.clone(), state, speed));
        }

        for (track_id, state, speed) in &overlays {
            self.ctx.annotator.draw_track(frame, track_id, state, speed);
        }

        let timeout = self.ctx.config.video.track_timeout_s;
        for track_id in self.ctx.tracker.evict_stale(camera_id, now, timeout) {
            self.ctx.recording.stop_per_object(camera_id, &track_id);
        }
        self.ctx.recording.cleanup_inactive(camera_id, &active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detection::RawDetection;
    use crate::recording::{RecordingError, RecordingSettings, SinkFactory, VideoSink};
    use crossbeam_channel::unbounded;
    use crate::detection::ReplayDetector;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::path::{Path, PathBuf};

    struct FixedSource(usize);

    impl FrameSource for FixedSource {
        fn fps(&self) -> Option<f64> {
            Some(1.0)
        }
        fn read(&mut self) -> Result<Option<RgbImage>, MonitorError> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(RgbImage::new(100, 100)))
        }
    }

    struct ScriptDetector(VecDeque<Vec<RawDetection>>);

    impl Detector for ScriptDetector {
        fn detect(
            &mut self,
            _frame_index: u64,
            _frame: &RgbImage,
        ) -> Result<Vec<RawDetection>, MonitorError> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        opened: Mutex<Vec<PathBuf>>,
        written: Arc<AtomicU64>,
    }

    struct NullSink(Arc<AtomicU64>);

    impl VideoSink for NullSink {
        fn write(&mut self, _frame: &RgbImage) -> Result<(), RecordingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn finish(self: Box<Self>) -> Result<(), RecordingError> {
            Ok(())
        }
    }

    impl SinkFactory for CountingFactory {
        fn extension(&self) -> &'static str {
            "null"
        }
        fn open(
            &self,
            path: &Path,
            _w: u32,
            _h: u32,
            _fps: f64,
        ) -> Result<Box<dyn VideoSink>, RecordingError> {
            self.opened.lock().push(path.to_path_buf());
            Ok(Box::new(NullSink(Arc::clone(&self.written))))
        }
        fn save_snapshot(&self, _path: &Path, _frame: &RgbImage) -> Result<(), RecordingError> {
            Ok(())
        }
    }

    fn context(factory: Arc<CountingFactory>) -> WorkerContext {
        let zones = ZoneEngine::default();
        zones.insert("cam1", crate::zone::Zone::new(
            vec![(20.0, 20.0), (80.0, 20.0), (80.0, 80.0), (20.0, 80.0)],
            10.0,
        ));
        let config = AppConfig::default();
        let recording = RecordingManager::new(
            true,
            RecordingSettings::from_config(&config),
            factory,
            Arc::new(ManualClock::new()),
            Annotator::default(),
        );
        WorkerContext {
            zones: Arc::new(zones),
            tracker: Arc::new(ObjectLifecycleTracker::new()),
            speed: Arc::new(SpeedEstimator::default()),
            recording: Arc::new(recording),
            annotator: Annotator::default(),
            config: Arc::new(config),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn worker(ctx: WorkerContext, script: Vec<Vec<RawDetection>>) -> CameraWorker {
        let (_tx, rx) = unbounded();
        let camera = CameraConfig {
            id: "cam1".to_string(),
            ..Default::default()
        };
        let shared = Arc::new(WorkerShared::new("cam1"));
        CameraWorker {
            detection_active: true,
            detector_enabled: true,
            recording_active: true,
            main_requested: false,
            camera,
            source: Box::new(FixedSource(0)),
            detector: Box::new(ScriptDetector(script.into())),
            ctx,
            shared,
            commands: rx,
            fps: 1.0,
            frame_index: 0,
        }
    }

    fn raw(id: serde_json::Value, cx: f32) -> RawDetection {
        RawDetection {
            track_id: Some(id),
            class_id: 0,
            confidence: 0.9,
            bbox: [cx - 5.0, 45.0, cx + 5.0, 55.0],
        }
    }

    fn step(w: &mut CameraWorker) -> RgbImage {
        let mut frame = RgbImage::new(100, 100);
        w.process_frame(&mut frame);
        w.frame_index += 1;
        frame
    }

    #[test]
    fn test_per_object_recording_once_per_track() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory.clone());
        let script = vec![
            vec![raw(json!(1), 10.0)],
            vec![raw(json!(1), 50.0)],
            vec![raw(json!(1), 60.0)],
            vec![],
            vec![raw(json!(1), 60.0)],
        ];
        let mut w = worker(ctx.clone(), script);
        for _ in 0..3 {
            step(&mut w);
        }
        assert!(ctx.recording.has_per_object("cam1", &TrackId::Int(1)));
        step(&mut w); // 目标消失 → 录像停止
        assert!(!ctx.recording.has_per_object("cam1", &TrackId::Int(1)));
        step(&mut w); // 再次出现也不会重新录像
        assert!(!ctx.recording.has_per_object("cam1", &TrackId::Int(1)));
        assert_eq!(factory.opened.lock().len(), 1);
    }

    #[test]
    fn test_invalid_track_ids_do_not_stop_processing() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory);
        let script = vec![vec![raw(json!([1]), 50.0), raw(json!("b"), 50.0)]];
        let mut w = worker(ctx.clone(), script);
        step(&mut w);
        let stats = ctx.tracker.statistics("cam1");
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.in_zone_count, 1);
    }

    #[test]
    fn test_detection_off_skips_tracking() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory.clone());
        let mut w = worker(ctx.clone(), vec![vec![raw(json!(1), 50.0)]]);
        w.apply_command(ControlCommand::StopDetection);
        w.apply_command(ControlCommand::StartRecording);

        for _ in 0..3 {
            let frame = step(&mut w);
            // 区域轮廓照常绘制
            assert_eq!(frame.get_pixel(50, 20).0[1], 255);
        }
        assert_eq!(ctx.tracker.statistics("cam1").active_count, 0);
        // 主录像照常写入
        assert!(ctx.recording.has_main("cam1"));
        assert_eq!(factory.written.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.recording.status().per_object, 0);
    }

    #[test]
    fn test_replay_stays_aligned_after_detection_toggle() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory);
        let frames = BTreeMap::from([
            (0, vec![raw(json!(9), 50.0)]),
            (2, vec![raw(json!(1), 50.0)]),
        ]);
        let mut w = worker(ctx.clone(), vec![]);
        w.detector = Box::new(ReplayDetector::new(frames));

        w.apply_command(ControlCommand::StopDetection);
        step(&mut w);
        step(&mut w);
        w.apply_command(ControlCommand::StartDetection);
        step(&mut w);

        assert_eq!(w.frame_index, 3);
        let stats = ctx.tracker.statistics("cam1");
        assert_eq!(stats.active_count, 1);
        assert!(ctx.tracker.get("cam1", &TrackId::Int(1)).in_zone);
        assert!(!ctx.tracker.get("cam1", &TrackId::Int(9)).in_zone);
    }

    #[test]
    fn test_start_recording_opens_main_once() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory.clone());
        let mut w = worker(ctx.clone(), vec![]);
        step(&mut w);
        assert!(!ctx.recording.has_main("cam1"));
        w.apply_command(ControlCommand::StartRecording);
        step(&mut w);
        step(&mut w);
        assert!(ctx.recording.has_main("cam1"));
        assert_eq!(factory.opened.lock().len(), 1);
    }

    #[test]
    fn test_run_publishes_frames_and_stops() {
        let factory = Arc::new(CountingFactory::default());
        let ctx = context(factory);
        let (cmd_tx, cmd_rx) = unbounded();
        let camera = CameraConfig {
            id: "cam1".to_string(),
            zone_file: PathBuf::from("/nonexistent/zone.json"),
            ..Default::default()
        };
        // 区域文件不存在 → 初始化失败
        assert!(CameraWorker::initialize(
            camera,
            Box::new(FixedSource(3)),
            Box::new(ScriptDetector(VecDeque::new())),
            ctx.clone(),
            cmd_rx.clone(),
        )
        .is_err());

        let mut w = worker(ctx, vec![]);
        w.source = Box::new(FixedSource(3));
        w.commands = cmd_rx;
        let shared = w.shared();
        assert_eq!(shared.state(), WorkerState::Uninitialized);

        cmd_tx.send(ControlCommand::StartRecording).unwrap();
        let (done_tx, done_rx) = unbounded();
        w.run(done_tx);

        assert_eq!(done_rx.recv().unwrap(), "cam1");
        assert_eq!(shared.state(), WorkerState::Stopped);
        assert_eq!(shared.frames_processed(), 3);
        let latest = shared.take_latest().unwrap();
        assert_eq!(latest.frame_index, 2);
        assert!(shared.take_latest().is_none());
    }
}
