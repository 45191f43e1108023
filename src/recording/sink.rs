//! 录像输出 (Video sinks)
//!
//! - MjpegSink:      逐帧JPEG拼接的 .mjpeg 文件, 纯Rust实现
//! - FfmpegPipeSink: 原始RGB帧通过管道送入 ffmpeg 命令行编码为 .mp4

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use thiserror::Error;

use crate::config::RecordingBackend;

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame size {got:?} does not match sink size {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("encoder exited with {0}")]
    Encoder(String),
}

/// 已打开的录像输出
pub trait VideoSink: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError>;
    /// 关闭并刷新输出
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

/// 录像输出工厂
pub trait SinkFactory: Send + Sync {
    /// 录像文件扩展名 (不含点)
    fn extension(&self) -> &'static str;

    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, RecordingError>;

    /// 保存单张快照 (JPEG)
    fn save_snapshot(&self, path: &Path, frame: &RgbImage) -> Result<(), RecordingError> {
        frame.save_with_format(path, ImageFormat::Jpeg)?;
        Ok(())
    }
}

fn check_size(expected: (u32, u32), frame: &RgbImage) -> Result<(), RecordingError> {
    let got = frame.dimensions();
    if got != expected {
        return Err(RecordingError::FrameSize { expected, got });
    }
    Ok(())
}

// ========== MJPEG ==========

pub struct MjpegSink {
    writer: BufWriter<File>,
    size: (u32, u32),
}

impl MjpegSink {
    pub fn create(path: &Path, width: u32, height: u32) -> Result<Self, RecordingError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            size: (width, height),
        })
    }
}

impl VideoSink for MjpegSink {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        check_size(self.size, frame)?;
        let mut encoder = JpegEncoder::new_with_quality(&mut self.writer, JPEG_QUALITY);
        encoder.encode_image(frame)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        self.writer.flush()?;
        Ok(())
    }
}

// ========== ffmpeg 管道 ==========

pub struct FfmpegPipeSink {
    child: Child,
    stdin: Option<ChildStdin>,
    size: (u32, u32),
}

impl FfmpegPipeSink {
    pub fn spawn(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self, RecordingError> {
        let mut child = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &format!("{}", fps)])
            .args(["-i", "-"])
            .args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            size: (width, height),
        })
    }
}

impl VideoSink for FfmpegPipeSink {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        check_size(self.size, frame)?;
        match self.stdin.as_mut() {
            Some(stdin) => Ok(stdin.write_all(frame.as_raw())?),
            None => Err(RecordingError::Encoder("stdin closed".to_string())),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        // 关闭stdin让ffmpeg结束编码
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            return Err(RecordingError::Encoder(status.to_string()));
        }
        Ok(())
    }
}

/// 按配置的后端创建文件输出
#[derive(Debug, Clone, Copy)]
pub struct FileSinkFactory {
    backend: RecordingBackend,
}

impl FileSinkFactory {
    pub fn new(backend: RecordingBackend) -> Self {
        Self { backend }
    }
}

impl SinkFactory for FileSinkFactory {
    fn extension(&self) -> &'static str {
        match self.backend {
            RecordingBackend::Mjpeg => "mjpeg",
            RecordingBackend::Ffmpeg => "mp4",
        }
    }

    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        if width == 0 || height == 0 {
            return Err(RecordingError::FrameSize {
                expected: (width, height),
                got: (width, height),
            });
        }
        Ok(match self.backend {
            RecordingBackend::Mjpeg => Box::new(MjpegSink::create(path, width, height)?),
            RecordingBackend::Ffmpeg => Box::new(FfmpegPipeSink::spawn(path, width, height, fps)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_sink_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mjpeg");
        let factory = FileSinkFactory::new(RecordingBackend::Mjpeg);
        let mut sink = factory.open(&path, 32, 24, 30.0).unwrap();
        let frame = RgbImage::from_pixel(32, 24, image::Rgb([200, 10, 10]));
        sink.write(&frame).unwrap();
        sink.write(&frame).unwrap();
        sink.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // 两个JPEG起始标记
        let soi = bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count();
        assert_eq!(soi, 2);
    }

    #[test]
    fn test_frame_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileSinkFactory::new(RecordingBackend::Mjpeg);
        let mut sink = factory.open(&dir.path().join("a.mjpeg"), 32, 24, 30.0).unwrap();
        let err = sink.write(&RgbImage::new(16, 16)).unwrap_err();
        assert!(matches!(err, RecordingError::FrameSize { .. }));
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let factory = FileSinkFactory::new(RecordingBackend::Mjpeg);
        assert!(factory
            .open(Path::new("/nonexistent/dir/a.mjpeg"), 32, 24, 30.0)
            .is_err());
    }

    #[test]
    fn test_snapshot_is_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        let factory = FileSinkFactory::new(RecordingBackend::Mjpeg);
        factory.save_snapshot(&path, &RgbImage::new(8, 8)).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 8);
    }
}
