/// 录像系统 (Recording System)
///
/// - Sink:    录像文件输出 (MJPEG / ffmpeg管道) 与快照
/// - Manager: 主录像与单目标录像会话
pub mod manager;
pub mod sink;

pub use manager::{RecordingManager, RecordingSettings, RecordingStatus};
pub use sink::{FileSinkFactory, RecordingError, SinkFactory, VideoSink};
