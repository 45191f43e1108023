//! 调度器 (Orchestrator)
//!
//! 每路摄像头一个工作线程, 主线程运行显示/控制循环。
//! 关闭时设置全局停止标志, 在超时内等待各线程结束, 超时的线程被放弃 (记录日志)

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::viewer::Viewer;
use super::worker::{CameraWorker, WorkerContext, WorkerShared};
use super::{ControlCommand, WorkerState};
use crate::annotate::Annotator;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, CameraConfig};
use crate::detection::{Detector, NullDetector, ObjectLifecycleTracker, ReplayDetector, TrackId};
use crate::error::MonitorError;
use crate::input::{open_source, FrameSource};
use crate::recording::{FileSinkFactory, RecordingManager, RecordingSettings, SinkFactory};
use crate::speed::SpeedEstimator;
use crate::zone::ZoneEngine;

/// 最终统计: 单个已完成目标
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedReport {
    pub track_id: TrackId,
    pub class_name: String,
    pub dwell_seconds: f64,
    pub average_speed_kmh: f64,
}

/// 最终统计: 单路摄像头
#[derive(Debug, Clone, PartialEq)]
pub struct CameraReport {
    pub camera_id: String,
    pub completed: Vec<CompletedReport>,
}

struct WorkerHandle {
    shared: Arc<WorkerShared>,
    commands: Sender<ControlCommand>,
    thread: Option<JoinHandle<()>>,
}

pub struct Orchestrator {
    ctx: WorkerContext,
    workers: Vec<WorkerHandle>,
    done_tx: Sender<String>,
    done_rx: Receiver<String>,
}

impl Orchestrator {
    pub fn new(config: AppConfig, factory: Arc<dyn SinkFactory>, clock: Arc<dyn Clock>) -> Self {
        let annotator = Annotator::from_font_file(config.font_path.as_deref());
        let recording = RecordingManager::new(
            config.recording_enabled,
            RecordingSettings::from_config(&config),
            factory,
            clock,
            annotator.clone(),
        );
        let (done_tx, done_rx) = unbounded();
        let ctx = WorkerContext {
            zones: Arc::new(ZoneEngine::new(config.zone_style.clone())),
            tracker: Arc::new(ObjectLifecycleTracker::new()),
            speed: Arc::new(SpeedEstimator::new(config.speed_estimation_enabled)),
            recording: Arc::new(recording),
            annotator,
            config: Arc::new(config),
            stop: Arc::new(AtomicBool::new(false)),
        };
        Self {
            ctx,
            workers: Vec::new(),
            done_tx,
            done_rx,
        }
    }

    /// 文件录像 + 系统时钟
    pub fn from_config(config: AppConfig) -> Self {
        let factory = Arc::new(FileSinkFactory::new(config.video.backend));
        Self::new(config, factory, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    pub fn tracker(&self) -> &Arc<ObjectLifecycleTracker> {
        &self.ctx.tracker
    }

    pub fn recording(&self) -> &Arc<RecordingManager> {
        &self.ctx.recording
    }

    pub fn speed(&self) -> &Arc<SpeedEstimator> {
        &self.ctx.speed
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.stop)
    }

    pub fn request_stop(&self) {
        self.ctx.stop.store(true, Ordering::SeqCst);
    }

    /// 成功启动的摄像头
    pub fn active_cameras(&self) -> Vec<String> {
        self.workers
            .iter()
            .map(|w| w.shared.camera_id.clone())
            .collect()
    }

    /// 按配置启动所有摄像头, 返回成功启动的数量
    pub fn start(&mut self) -> usize {
        let cameras: Vec<CameraConfig> = self
            .ctx
            .config
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        for camera in cameras {
            let id = camera.id.clone();
            let result = open_source(&camera).and_then(|source| {
                let detector = Self::open_detector(&camera)?;
                self.spawn_camera(camera, source, detector)
            });
            if let Err(e) = result {
                // 摄像头被跳过, 其余继续
                error!(camera = %id, "✗ 摄像头未启动: {}", e);
            }
        }

        info!("📹 已启动 {} 路摄像头", self.workers.len());
        self.workers.len()
    }

    fn open_detector(camera: &CameraConfig) -> Result<Box<dyn Detector>, MonitorError> {
        match &camera.detections {
            Some(path) => Ok(Box::new(ReplayDetector::load(&camera.id, path)?)),
            None => {
                warn!(camera = %camera.id, "⚠️ 未配置检测结果, 使用空检测器");
                Ok(Box::new(NullDetector))
            }
        }
    }

    /// 初始化并启动单路摄像头工作线程
    pub fn spawn_camera(
        &mut self,
        camera: CameraConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
    ) -> Result<(), MonitorError> {
        if self.workers.iter().any(|w| w.shared.camera_id == camera.id) {
            return Err(MonitorError::Config(format!("duplicate camera id {}", camera.id)));
        }

        let (cmd_tx, cmd_rx) = unbounded();
        let worker = CameraWorker::initialize(camera, source, detector, self.ctx.clone(), cmd_rx)?;
        let shared = worker.shared();
        let done = self.done_tx.clone();

        let thread = thread::Builder::new()
            .name(format!("camera-{}", worker.camera_id()))
            .spawn(move || worker.run(done))
            .map_err(|e| MonitorError::Config(format!("failed to spawn worker: {}", e)))?;

        self.workers.push(WorkerHandle {
            shared,
            commands: cmd_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn broadcast(&self, cmd: ControlCommand) {
        for worker in &self.workers {
            // 线程已结束时发送失败, 忽略
            let _ = worker.commands.send(cmd);
        }
    }

    /// 处理控制命令 (广播到所有摄像头)
    pub fn handle_command(&self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::StartDetection => {
                self.broadcast(cmd);
                info!("✓ 所有摄像头: 检测已开启");
            }
            ControlCommand::StopDetection => {
                self.broadcast(cmd);
                info!("✗ 所有摄像头: 检测已关闭");
            }
            ControlCommand::StartRecording => {
                // 先开启录像, 工作线程收到命令后在下一帧启动主录像
                self.ctx.recording.set_enabled(true);
                self.broadcast(cmd);
                info!("✓ 所有摄像头: 录像已开启");
            }
            ControlCommand::StopRecording => {
                self.broadcast(cmd);
                for worker in &self.workers {
                    self.ctx.recording.stop_main(&worker.shared.camera_id);
                }
                self.ctx.recording.set_enabled(false);
                info!("✗ 所有摄像头: 录像已关闭");
            }
            ControlCommand::Exit => {
                info!("🛑 收到退出命令, 正在停止...");
                self.broadcast(cmd);
                self.request_stop();
            }
        }
    }

    fn all_stopped(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.shared.state() == WorkerState::Stopped)
    }

    /// 显示/控制循环: 直到退出命令、停止标志或所有视频源结束
    pub fn run(&mut self, commands: Option<Receiver<ControlCommand>>, viewer: &mut Viewer) {
        if self.workers.is_empty() {
            warn!("没有可用的摄像头");
            return;
        }
        let interval = Duration::from_millis(self.ctx.config.video.display_interval_ms.max(1));
        let mut commands = commands;

        while !self.ctx.stop.load(Ordering::SeqCst) {
            let mut input_closed = false;
            match &commands {
                Some(rx) => match rx.recv_timeout(interval) {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => input_closed = true,
                },
                None => thread::sleep(interval),
            }
            if input_closed {
                // 控制输入结束不影响运行
                commands = None;
            }

            // 先读状态再取帧, 保证最后一帧也能显示
            let finished = self.all_stopped();
            for worker in &self.workers {
                if let Some(frame) = worker.shared.take_latest() {
                    viewer.show(&worker.shared.camera_id, &frame);
                }
            }

            if finished {
                info!("所有视频源已结束");
                break;
            }
        }
    }

    /// 协作式关闭: 有界等待工作线程, 停止所有录像; 返回被放弃的摄像头
    pub fn shutdown(&mut self) -> Vec<String> {
        info!("🧹 正在清理资源...");
        self.request_stop();

        let timeout = Duration::from_millis(self.ctx.config.video.join_timeout_ms);
        let deadline = Instant::now() + timeout;
        let mut pending: HashSet<String> = self
            .workers
            .iter()
            .filter(|w| w.thread.is_some())
            .map(|w| w.shared.camera_id.clone())
            .collect();

        while !pending.is_empty() {
            match self.done_rx.recv_deadline(deadline) {
                Ok(id) => {
                    pending.remove(&id);
                }
                Err(_) => break,
            }
        }

        let mut abandoned = Vec::new();
        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            let id = &worker.shared.camera_id;
            if pending.contains(id) {
                error!(camera = %id, "⚠️ 工作线程未在 {:?} 内结束, 已放弃", timeout);
                abandoned.push(id.clone());
                drop(thread);
            } else if thread.join().is_err() {
                error!(camera = %id, "❌ 工作线程异常退出");
            }
        }

        self.ctx.recording.stop_all();
        abandoned
    }

    /// 最终统计 (每路摄像头的已完成目标与平均速度)
    pub fn final_report(&self) -> Vec<CameraReport> {
        self.workers
            .iter()
            .map(|w| {
                let camera_id = w.shared.camera_id.clone();
                let zone_length = self.ctx.zones.zone_length(&camera_id).unwrap_or(0.0);
                let stats = self.ctx.tracker.statistics(&camera_id);
                let completed = stats
                    .completed_list
                    .into_iter()
                    .map(|c| CompletedReport {
                        average_speed_kmh: self.ctx.speed.average_speed(zone_length, c.dwell_seconds),
                        track_id: c.track_id,
                        class_name: c.class_name,
                        dwell_seconds: c.dwell_seconds,
                    })
                    .collect();
                CameraReport {
                    camera_id,
                    completed,
                }
            })
            .collect()
    }

    pub fn print_final_report(reports: &[CameraReport]) {
        info!("{}", "=".repeat(60));
        info!("最终统计");
        info!("{}", "=".repeat(60));
        for report in reports {
            info!("摄像头 {}:", report.camera_id);
            if report.completed.is_empty() {
                info!("  未检测到通过区域的目标");
                continue;
            }
            info!("  完成通过: {}", report.completed.len());
            info!("  {:>4} | {:<8} | {:>8} | {:>12}", "ID", "类别", "时间(s)", "速度(km/h)");
            info!("  {}", "-".repeat(44));
            for c in &report.completed {
                info!(
                    "  {:>4} | {:<8} | {:>7.2}s | {:>8.1}km/h",
                    c.track_id.to_string(),
                    c.class_name,
                    c.dwell_seconds,
                    c.average_speed_kmh
                );
            }
        }
        info!("{}", "=".repeat(60));
    }
}
