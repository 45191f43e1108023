/// 检测系统 (Detection System)
///
/// - Detector: 检测器接口 (外部黑盒) 与回放实现
/// - Types:    检测边界数据结构, 跟踪ID校验
/// - Tracker:  目标区域生命周期跟踪
pub mod detector;
pub mod tracker;
pub mod types;

pub use detector::{validate_detections, Detector, NullDetector, ReplayDetector};
pub use tracker::{CompletedTrack, ObjectLifecycleTracker, TrackState, TrackStatistics};
pub use types::{BBox, Detection, RawDetection, TrackId};
