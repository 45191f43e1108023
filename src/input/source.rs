//! 帧来源 (Frame sources)
//!
//! `FrameSource::read` 返回 `Ok(None)` 表示流结束, `Err` 表示取帧失败;
//! 两者对工作线程都是终止条件

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::CameraConfig;
use crate::error::MonitorError;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

pub trait FrameSource: Send {
    /// 源自带的帧率 (未知时返回 None, 使用配置值)
    fn fps(&self) -> Option<f64> {
        None
    }

    fn read(&mut self) -> Result<Option<RgbImage>, MonitorError>;
}

/// 图片序列: 目录下按文件名排序的帧
pub struct ImageSequenceSource {
    camera_id: String,
    frames: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(camera_id: &str, dir: &Path) -> Result<Self, MonitorError> {
        let unavailable = |reason: &str| MonitorError::SourceUnavailable {
            camera: camera_id.to_string(),
            resource: dir.display().to_string(),
            reason: reason.to_string(),
        };
        if !dir.is_dir() {
            return Err(unavailable("not a directory"));
        }

        let mut frames: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(unavailable("no frames found"));
        }
        info!(camera = camera_id, path = %dir.display(), "📂 图片序列: {} 帧", frames.len());
        Ok(Self {
            camera_id: camera_id.to_string(),
            frames,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<RgbImage>, MonitorError> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let frame = image::open(path).map_err(|e| MonitorError::FrameAcquisitionFailure {
            camera: self.camera_id.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        debug!(camera = %self.camera_id, "🖼️ 读取帧 {}", path.display());
        Ok(Some(frame.to_rgb8()))
    }
}

/// 按配置打开摄像头的帧来源
pub fn open_source(camera: &CameraConfig) -> Result<Box<dyn FrameSource>, MonitorError> {
    let path = Path::new(&camera.source);
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(&camera.id, path)?));
    }

    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(super::camera::FfmpegSource::open(
            &camera.id,
            &camera.source,
        )?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(MonitorError::SourceUnavailable {
            camera: camera.id.clone(),
            resource: camera.source.clone(),
            reason: "not a frame directory (stream sources need the `ffmpeg` feature)".to_string(),
        })
    }
}
