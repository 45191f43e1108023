//! 错误分类
//! Error taxonomy shared by the camera pipeline
//!
//! 所有错误只影响单个摄像头/单个会话/单条检测, 不会终止调度器

use std::path::PathBuf;
use thiserror::Error;

use crate::zone::LoadError;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// 摄像头或区域文件无法打开, 该摄像头被跳过
    #[error("camera {camera}: source unavailable ({resource}): {reason}")]
    SourceUnavailable {
        camera: String,
        resource: String,
        reason: String,
    },

    /// 区域文件无法解析, 该摄像头被跳过
    #[error("camera {camera}: malformed data in {path}: {reason}")]
    MalformedData {
        camera: String,
        path: PathBuf,
        reason: String,
    },

    /// 录像文件无法创建, 仅跳过该录像会话
    #[error("cannot open recording sink {path}: {reason}")]
    SinkOpenFailure { path: PathBuf, reason: String },

    /// 检测器返回的跟踪ID不可用, 仅丢弃该条检测
    #[error("invalid track identity: {0}")]
    InvalidTrackIdentity(String),

    /// 取帧失败, 该摄像头工作线程终止
    #[error("camera {camera}: frame acquisition failed: {reason}")]
    FrameAcquisitionFailure { camera: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    pub fn from_zone(camera: &str, err: LoadError) -> Self {
        match err {
            LoadError::NotFound(path) => MonitorError::SourceUnavailable {
                camera: camera.to_string(),
                resource: path.display().to_string(),
                reason: "zone file not found".to_string(),
            },
            LoadError::MalformedData { path, reason } => MonitorError::MalformedData {
                camera: camera.to_string(),
                path,
                reason,
            },
        }
    }
}
