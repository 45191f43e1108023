//! 录像会话管理 (RecordingManager)
//!
//! 两类会话:
//! - Main:      每个摄像头一个, 只由控制命令启动/停止
//! - PerObject: 每个 (摄像头, 跟踪ID) 一个, 时长上限到达后自动结束,
//!              首帧写入时保存一张快照
//!
//! 会话表按摄像头分区加锁, 打开/写入失败只记录日志, 不影响处理循环

use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::sink::{SinkFactory, VideoSink};
use crate::annotate::Annotator;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::detection::{TrackId, TrackState};
use crate::gen_time_string;

/// 录像参数
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub video_dir: PathBuf,
    pub image_dir: PathBuf,
    pub per_object_duration: Duration,
    pub save_snapshots: bool,
}

impl RecordingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            video_dir: config.output.video_dir.clone(),
            image_dir: config.output.image_dir.clone(),
            per_object_duration: Duration::from_secs_f64(
                config.video.per_object_duration_s.max(0.0),
            ),
            save_snapshots: config.output.save_snapshots,
        }
    }
}

/// 录像状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStatus {
    pub enabled: bool,
    pub main: usize,
    pub per_object: usize,
}

struct Session {
    sink: Box<dyn VideoSink>,
    path: PathBuf,
    started: Duration,
    frames: u64,
}

impl Session {
    fn write(&mut self, frame: &RgbImage) {
        match self.sink.write(frame) {
            Ok(()) => self.frames += 1,
            Err(e) => warn!(path = %self.path.display(), "⚠️ 写入录像帧失败: {}", e),
        }
    }

    fn close(self, elapsed: Duration) {
        let frames = self.frames;
        let path = self.path;
        match self.sink.finish() {
            Ok(()) => info!(
                path = %path.display(),
                "⏹️ 录像结束 ({:.1}s, {} 帧)",
                elapsed.as_secs_f64(),
                frames
            ),
            Err(e) => warn!(path = %path.display(), "⚠️ 关闭录像失败: {}", e),
        }
    }
}

struct ObjectSession {
    session: Session,
    snapshot_taken: bool,
}

#[derive(Default)]
struct CameraRecordings {
    main: Option<Session>,
    objects: HashMap<TrackId, ObjectSession>,
}

type Partition = Arc<Mutex<CameraRecordings>>;

pub struct RecordingManager {
    enabled: AtomicBool,
    settings: RecordingSettings,
    factory: Arc<dyn SinkFactory>,
    clock: Arc<dyn Clock>,
    annotator: Annotator,
    cameras: RwLock<HashMap<String, Partition>>,
}

/// 文件名中只保留安全字符
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

impl RecordingManager {
    pub fn new(
        enabled: bool,
        settings: RecordingSettings,
        factory: Arc<dyn SinkFactory>,
        clock: Arc<dyn Clock>,
        annotator: Annotator,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            settings,
            factory,
            clock,
            annotator,
            cameras: RwLock::new(HashMap::new()),
        }
    }

    fn partition(&self, camera_id: &str) -> Partition {
        if let Some(p) = self.cameras.read().get(camera_id) {
            return Arc::clone(p);
        }
        Arc::clone(self.cameras.write().entry(camera_id.to_string()).or_default())
    }

    fn existing_partition(&self, camera_id: &str) -> Option<Partition> {
        self.cameras.read().get(camera_id).map(Arc::clone)
    }

    fn all_partitions(&self) -> Vec<(String, Partition)> {
        self.cameras
            .read()
            .iter()
            .map(|(id, p)| (id.clone(), Arc::clone(p)))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 全局录像开关, 关闭时停止所有会话
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!("🎥 录像: {}", if enabled { "启用" } else { "禁用" });
        if !enabled {
            self.stop_all();
        }
    }

    fn open_session(&self, path: PathBuf, width: u32, height: u32, fps: f64) -> Option<Session> {
        match self.factory.open(&path, width, height, fps) {
            Ok(sink) => Some(Session {
                sink,
                path,
                started: self.clock.now(),
                frames: 0,
            }),
            Err(e) => {
                // SinkOpenFailure: 只跳过该会话
                warn!(path = %path.display(), "❌ 无法创建录像文件: {}", e);
                None
            }
        }
    }

    // ========== Main ==========

    pub fn start_main(&self, camera_id: &str, width: u32, height: u32, fps: f64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let partition = self.partition(camera_id);
        let mut rec = partition.lock();
        if rec.main.is_some() {
            return true;
        }

        let filename = format!(
            "main_{}_{}.{}",
            sanitize(camera_id),
            gen_time_string("_"),
            self.factory.extension()
        );
        let path = self.settings.video_dir.join(filename);
        match self.open_session(path, width, height, fps) {
            Some(session) => {
                info!(camera = camera_id, path = %session.path.display(), "🔴 主录像开始");
                rec.main = Some(session);
                true
            }
            None => false,
        }
    }

    pub fn write_main(&self, camera_id: &str, frame: &RgbImage) {
        if let Some(partition) = self.existing_partition(camera_id) {
            if let Some(session) = partition.lock().main.as_mut() {
                session.write(frame);
            }
        }
    }

    pub fn stop_main(&self, camera_id: &str) {
        let Some(partition) = self.existing_partition(camera_id) else {
            return;
        };
        let session = partition.lock().main.take();
        if let Some(session) = session {
            let elapsed = self.clock.now().saturating_sub(session.started);
            session.close(elapsed);
        }
    }

    pub fn has_main(&self, camera_id: &str) -> bool {
        self.existing_partition(camera_id)
            .map(|p| p.lock().main.is_some())
            .unwrap_or(false)
    }

    // ========== PerObject ==========

    pub fn start_per_object(
        &self,
        camera_id: &str,
        track_id: &TrackId,
        width: u32,
        height: u32,
        fps: f64,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let partition = self.partition(camera_id);
        let mut rec = partition.lock();
        if rec.objects.contains_key(track_id) {
            return true;
        }

        let filename = format!(
            "object_{}_{}_{}.{}",
            sanitize(camera_id),
            sanitize(&track_id.to_string()),
            gen_time_string("_"),
            self.factory.extension()
        );
        let path = self.settings.video_dir.join(filename);
        match self.open_session(path, width, height, fps) {
            Some(session) => {
                info!(camera = camera_id, track = %track_id, "🎬 目标录像开始");
                rec.objects.insert(
                    track_id.clone(),
                    ObjectSession {
                        session,
                        snapshot_taken: false,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// 写入单目标录像: 标注 → 写帧 → 首帧快照 → 时长检查
    pub fn write_per_object(
        &self,
        camera_id: &str,
        track_id: &TrackId,
        frame: &RgbImage,
        state: &TrackState,
    ) {
        let Some(partition) = self.existing_partition(camera_id) else {
            return;
        };
        let mut rec = partition.lock();
        let Some(obj) = rec.objects.get_mut(track_id) else {
            return;
        };

        let mut annotated = frame.clone();
        self.annotator.draw_object(&mut annotated, track_id, state);
        obj.session.write(&annotated);

        if !obj.snapshot_taken {
            obj.snapshot_taken = true;
            if self.settings.save_snapshots {
                self.save_snapshot(camera_id, track_id, &annotated);
            }
        }

        let elapsed = self.clock.now().saturating_sub(obj.session.started);
        if elapsed >= self.settings.per_object_duration {
            if let Some(obj) = rec.objects.remove(track_id) {
                debug!(camera = camera_id, track = %track_id, "⏱️ 目标录像达到时长上限");
                obj.session.close(elapsed);
            }
        }
    }

    fn save_snapshot(&self, camera_id: &str, track_id: &TrackId, frame: &RgbImage) {
        let filename = format!(
            "object_{}_{}_{}.jpg",
            sanitize(camera_id),
            sanitize(&track_id.to_string()),
            gen_time_string("_")
        );
        let path = self.settings.image_dir.join(filename);
        match self.factory.save_snapshot(&path, frame) {
            Ok(()) => info!(camera = camera_id, track = %track_id, path = %path.display(), "📸 快照已保存"),
            Err(e) => warn!(path = %path.display(), "⚠️ 快照保存失败: {}", e),
        }
    }

    pub fn stop_per_object(&self, camera_id: &str, track_id: &TrackId) {
        let Some(partition) = self.existing_partition(camera_id) else {
            return;
        };
        let obj = partition.lock().objects.remove(track_id);
        if let Some(obj) = obj {
            let elapsed = self.clock.now().saturating_sub(obj.session.started);
            obj.session.close(elapsed);
        }
    }

    pub fn has_per_object(&self, camera_id: &str, track_id: &TrackId) -> bool {
        self.existing_partition(camera_id)
            .map(|p| p.lock().objects.contains_key(track_id))
            .unwrap_or(false)
    }

    /// 停止本帧未出现目标的录像
    pub fn cleanup_inactive(&self, camera_id: &str, active: &HashSet<TrackId>) {
        let Some(partition) = self.existing_partition(camera_id) else {
            return;
        };
        let inactive: Vec<ObjectSession> = {
            let mut rec = partition.lock();
            let gone: Vec<TrackId> = rec
                .objects
                .keys()
                .filter(|id| !active.contains(*id))
                .cloned()
                .collect();
            gone.iter().filter_map(|id| rec.objects.remove(id)).collect()
        };
        let now = self.clock.now();
        for obj in inactive {
            let elapsed = now.saturating_sub(obj.session.started);
            obj.session.close(elapsed);
        }
    }

    /// 停止全部会话 (关闭时调用)
    pub fn stop_all(&self) {
        let now = self.clock.now();
        let mut stopped = 0;
        for (_, partition) in self.all_partitions() {
            let (main, objects) = {
                let mut rec = partition.lock();
                (rec.main.take(), std::mem::take(&mut rec.objects))
            };
            if let Some(session) = main {
                let elapsed = now.saturating_sub(session.started);
                session.close(elapsed);
                stopped += 1;
            }
            for (_, obj) in objects {
                let elapsed = now.saturating_sub(obj.session.started);
                obj.session.close(elapsed);
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("⏹️ 已停止全部录像 ({} 个会话)", stopped);
        }
    }

    pub fn status(&self) -> RecordingStatus {
        let mut status = RecordingStatus {
            enabled: self.is_enabled(),
            ..Default::default()
        };
        for (_, partition) in self.all_partitions() {
            let rec = partition.lock();
            status.main += rec.main.is_some() as usize;
            status.per_object += rec.objects.len();
        }
        status
    }
}
