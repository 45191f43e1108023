//! 系统配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::MonitorError;

/// 单个摄像头配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub id: String,
    pub source: String,            // 帧目录, 或 (ffmpeg特性) 视频文件/RTSP地址
    pub zone_file: PathBuf,        // 区域标注文件 (JSON)
    pub zone_length_m: f64,        // 区域实际长度 (米)
    pub enabled: bool,
    pub detection_active: bool,    // 初始是否检测
    pub recording_active: bool,    // 初始是否录像
    pub fps: f64,                  // 源不报告帧率时使用
    pub detections: Option<PathBuf>, // 回放检测结果 (JSON lines)
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: "cam1".to_string(),
            source: "data/videos/cam1".to_string(),
            zone_file: PathBuf::from("data/polygons/cam1.json"),
            zone_length_m: 8.0,
            enabled: true,
            detection_active: true,
            recording_active: true,
            fps: 30.0,
            detections: None,
        }
    }
}

/// 录像编码后端
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingBackend {
    Mjpeg,
    Ffmpeg,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub fps: f64,
    pub per_object_duration_s: f64, // 单目标录像时长上限
    pub track_timeout_s: f64,       // 跟踪过期时间
    pub pacing_ms: u64,             // 每帧固定延时 (0 = 不限速)
    pub display_interval_ms: u64,   // 显示循环轮询间隔
    pub join_timeout_ms: u64,       // 关闭时等待工作线程的上限
    pub resize_factor: f32,         // 预览缩放系数
    pub backend: RecordingBackend,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            per_object_duration_s: 10.0,
            track_timeout_s: 30.0,
            pacing_ms: 0,
            display_interval_ms: 15,
            join_timeout_ms: 3000,
            resize_factor: 0.5,
            backend: RecordingBackend::Mjpeg,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub video_dir: PathBuf,
    pub image_dir: PathBuf,
    pub preview_dir: Option<PathBuf>,
    pub save_snapshots: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            video_dir: PathBuf::from("data/outputs/object_videos"),
            image_dir: PathBuf::from("data/outputs/object_images"),
            preview_dir: None,
            save_snapshots: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneStyle {
    pub line_color: [u8; 3],
    pub line_thickness: u32,
    pub fill_alpha: f32, // 0 = 不填充
}

impl Default for ZoneStyle {
    fn default() -> Self {
        Self {
            line_color: [0, 255, 0],
            line_thickness: 2,
            fill_alpha: 0.3,
        }
    }
}

/// 控制按键 (每个命令一个字符)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlKeys {
    pub start_detection: char,
    pub stop_detection: char,
    pub start_recording: char,
    pub stop_recording: char,
    pub exit: char,
}

impl Default for ControlKeys {
    fn default() -> Self {
        Self {
            start_detection: 'f',
            stop_detection: 'g',
            start_recording: 'r',
            stop_recording: 't',
            exit: 'q',
        }
    }
}

/// 系统参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cameras: Vec<CameraConfig>,

    // === 功能开关 ===
    pub speed_estimation_enabled: bool,
    pub recording_enabled: bool,
    pub auto_detection_enabled: bool,

    pub video: VideoSettings,
    pub output: OutputSettings,
    pub zone_style: ZoneStyle,
    pub controls: ControlKeys,

    pub class_names: HashMap<u32, String>,
    pub font_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cameras: vec![CameraConfig::default()],
            speed_estimation_enabled: true,
            recording_enabled: true,
            auto_detection_enabled: true,
            video: VideoSettings::default(),
            output: OutputSettings::default(),
            zone_style: ZoneStyle::default(),
            controls: ControlKeys::default(),
            class_names: HashMap::from([(0, "Car".to_string())]),
            font_path: None,
        }
    }
}

impl AppConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json).map_err(|e| {
                    MonitorError::Config(format!("{}: {}", path.display(), e))
                })?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                Ok(config)
            }
            // 文件存在但无法读取 (权限/编码): 不覆盖
            Err(e) => Err(MonitorError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    pub fn class_name(&self, class_id: u32) -> String {
        self.class_names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// 创建输出目录
    pub fn create_directories(&self) -> std::io::Result<()> {
        let mut dirs = vec![&self.output.video_dir, &self.output.image_dir];
        if let Some(preview) = &self.output.preview_dir {
            dirs.push(preview);
        }
        for dir in dirs {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                info!("📁 目录已创建: {}", dir.display());
            }
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前配置:");
        info!(
            "  摄像头: {} 路 (启用 {})",
            self.cameras.len(),
            self.cameras.iter().filter(|c| c.enabled).count()
        );
        info!(
            "  速度估计: {} | 录像: {} | 自动检测: {}",
            self.speed_estimation_enabled, self.recording_enabled, self.auto_detection_enabled
        );
        info!(
            "  单目标录像上限: {:.1}s | 跟踪过期: {:.1}s",
            self.video.per_object_duration_s, self.video.track_timeout_s
        );
    }
}
