/// 视频输入系统 (Video Input System)
///
/// - Source:      帧来源接口, 图片序列目录
/// - FfmpegSource: RTSP/视频文件解码 (需要 `ffmpeg` 特性)
/// - Filter:      YUV → RGB 帧转换
#[cfg(feature = "ffmpeg")]
pub mod camera;
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
pub mod source;

#[cfg(feature = "ffmpeg")]
pub use camera::FfmpegSource;
pub use source::{open_source, FrameSource, ImageSequenceSource};
