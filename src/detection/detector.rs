//! 检测器 (Detector)
//! 职责: 帧 → 带跟踪ID的检测结果
//!
//! 检测模型本身不在本crate内, 这里只定义接口与回放实现

use image::RgbImage;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::types::{Detection, RawDetection};
use crate::error::MonitorError;

/// 检测器接口: 每帧返回原始检测 (跟踪ID未校验)
///
/// `frame_index` 是视频源的帧序号; 检测关闭期间的帧不会调用 `detect`
pub trait Detector: Send {
    fn detect(&mut self, frame_index: u64, frame: &RgbImage)
        -> Result<Vec<RawDetection>, MonitorError>;
}

/// 空检测器 (未配置检测结果时使用)
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(
        &mut self,
        _frame_index: u64,
        _frame: &RgbImage,
    ) -> Result<Vec<RawDetection>, MonitorError> {
        Ok(Vec::new())
    }
}

/// 回放文件中的一行
#[derive(Debug, Deserialize)]
struct ReplayLine {
    frame: u64,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// 回放检测器: 按帧序号读取预先记录的跟踪结果 (JSON lines)
///
/// ```text
/// {"frame": 0, "detections": [{"track_id": 1, "class_id": 0, "confidence": 0.9, "bbox": [10, 10, 50, 40]}]}
/// ```
pub struct ReplayDetector {
    frames: BTreeMap<u64, Vec<RawDetection>>,
}

impl ReplayDetector {
    pub fn new(frames: BTreeMap<u64, Vec<RawDetection>>) -> Self {
        Self { frames }
    }

    pub fn load(camera_id: &str, path: &Path) -> Result<Self, MonitorError> {
        let text = fs::read_to_string(path).map_err(|e| MonitorError::SourceUnavailable {
            camera: camera_id.to_string(),
            resource: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let detector = Self::parse(camera_id, path.to_path_buf(), &text)?;
        info!(
            camera = camera_id,
            path = %path.display(),
            "📼 回放检测已加载: {} 帧",
            detector.frames.len()
        );
        Ok(detector)
    }

    fn parse(camera_id: &str, path: PathBuf, text: &str) -> Result<Self, MonitorError> {
        let mut frames = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: ReplayLine =
                serde_json::from_str(line).map_err(|e| MonitorError::MalformedData {
                    camera: camera_id.to_string(),
                    path: path.clone(),
                    reason: format!("line {}: {}", lineno + 1, e),
                })?;
            frames
                .entry(parsed.frame)
                .or_insert_with(Vec::new)
                .extend(parsed.detections);
        }
        Ok(Self::new(frames))
    }
}

impl Detector for ReplayDetector {
    fn detect(
        &mut self,
        frame_index: u64,
        _frame: &RgbImage,
    ) -> Result<Vec<RawDetection>, MonitorError> {
        // 丢弃已经过去的帧 (包括检测关闭期间跳过的帧)
        let later = self.frames.split_off(&(frame_index + 1));
        let mut passed = std::mem::replace(&mut self.frames, later);
        Ok(passed.remove(&frame_index).unwrap_or_default())
    }
}

/// 边界校验: 跟踪ID不可用的检测被丢弃并记录日志
pub fn validate_detections(
    camera_id: &str,
    raw: &[RawDetection],
    class_name: impl Fn(u32) -> String,
) -> Vec<Detection> {
    raw.iter()
        .filter_map(|r| match Detection::from_raw(r, class_name(r.class_id)) {
            Ok(det) => Some(det),
            Err(e) => {
                warn!(camera = camera_id, "⚠️ 丢弃检测: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::TrackId;
    use serde_json::json;

    #[test]
    fn test_replay_by_frame_index() {
        let text = r#"
{"frame": 0, "detections": [{"track_id": 1, "class_id": 0, "confidence": 0.9, "bbox": [0, 0, 10, 10]}]}
{"frame": 2, "detections": [{"track_id": "b", "bbox": [5, 5, 15, 15]}]}
"#;
        let mut det = ReplayDetector::parse("cam1", PathBuf::from("r.jsonl"), text).unwrap();
        let frame = RgbImage::new(4, 4);
        assert_eq!(det.detect(0, &frame).unwrap().len(), 1);
        assert!(det.detect(1, &frame).unwrap().is_empty());
        let third = det.detect(2, &frame).unwrap();
        assert_eq!(third[0].track_id, Some(json!("b")));
        assert!(det.detect(3, &frame).unwrap().is_empty());
    }

    #[test]
    fn test_replay_after_skipped_frames() {
        let text = r#"
{"frame": 0, "detections": [{"track_id": 9, "bbox": [0, 0, 10, 10]}]}
{"frame": 1, "detections": [{"track_id": 9, "bbox": [0, 0, 10, 10]}]}
{"frame": 3, "detections": [{"track_id": 1, "bbox": [0, 0, 10, 10]}]}
"#;
        let mut det = ReplayDetector::parse("cam1", PathBuf::from("r.jsonl"), text).unwrap();
        let frame = RgbImage::new(4, 4);
        // 第0-2帧未检测, 第3帧仍对应第3帧的记录
        let dets = det.detect(3, &frame).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].track_id, Some(json!(1)));
        assert!(det.frames.is_empty());
        assert!(det.detect(1, &frame).unwrap().is_empty());
    }

    #[test]
    fn test_replay_bad_line() {
        let err = ReplayDetector::parse("cam1", PathBuf::from("r.jsonl"), "{\"frame\": }")
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::MalformedData { .. }));
    }

    #[test]
    fn test_replay_missing_file() {
        let err = ReplayDetector::load("cam1", Path::new("/nonexistent/replay.jsonl"))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_invalid_ids_are_skipped() {
        let raw = vec![
            RawDetection {
                track_id: Some(json!(3)),
                bbox: [0.0, 0.0, 1.0, 1.0],
                ..Default::default()
            },
            RawDetection {
                track_id: Some(json!([1, 2])),
                bbox: [0.0, 0.0, 1.0, 1.0],
                ..Default::default()
            },
            RawDetection {
                track_id: None,
                bbox: [0.0, 0.0, 1.0, 1.0],
                ..Default::default()
            },
        ];
        let valid = validate_detections("cam1", &raw, |_| "Car".to_string());
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].track_id, TrackId::Int(3));
        assert_eq!(valid[0].class_name, "Car");
    }
}
