/// 多路摄像头处理流水线 (Camera Pipeline)
///
/// 每路摄像头一个工作线程, 主线程负责显示与控制:
/// - Worker:       取帧 → 区域 → 检测 → 跟踪/测速/录像 → 标注 → 发布
/// - Orchestrator: 启动工作线程, 广播控制命令, 有界等待关闭, 最终统计
/// - Control:      标准输入按键 → 控制命令
/// - Viewer:       显示循环 (缩放预览, 显示帧率)
pub mod control;
pub mod orchestrator;
pub mod viewer;
pub mod worker;

use image::RgbImage;

pub use control::{parse_command, spawn_stdin_reader};
pub use orchestrator::{CameraReport, CompletedReport, Orchestrator};
pub use viewer::Viewer;
pub use worker::{CameraWorker, WorkerContext, WorkerShared};

// ========== 消息类型定义 ==========

/// 控制命令 (广播到所有摄像头)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    StartDetection,
    StopDetection,
    StartRecording,
    StopRecording,
    Exit,
}

/// 工作线程状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Running,
    Stopping,
    Stopped,
}

/// 工作线程发布的最新帧 (独立拷贝)
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub frame: RgbImage,
    pub frame_index: u64,
    pub timestamp: f64, // 逻辑时钟 (秒)
}
