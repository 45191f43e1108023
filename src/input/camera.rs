//! FFmpeg 输入 - RTSP流 / 视频文件 / 本地摄像头
//!
//! 解码在 ez-ffmpeg 的调度线程中进行, 帧通过有界队列交给工作线程

use super::decode_filter::DecodeFilter;
use super::source::FrameSource;
use crate::error::MonitorError;
use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::info;

/// 解码队列长度 (满时丢弃新帧)
const FRAME_QUEUE: usize = 4;

pub struct FfmpegSource {
    camera_id: String,
    rx: Receiver<RgbImage>,
    scheduler: Option<FfmpegScheduler<Running>>,
}

impl FfmpegSource {
    pub fn open(camera_id: &str, url: &str) -> Result<Self, MonitorError> {
        let unavailable = |reason: String| MonitorError::SourceUnavailable {
            camera: camera_id.to_string(),
            resource: url.to_string(),
            reason,
        };

        let (tx, rx) = bounded(FRAME_QUEUE);
        let filter = DecodeFilter::new(camera_id, tx);

        // 构建帧处理管线
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let mut input = Input::new(url);
        if url.starts_with("rtsp://") {
            input = input.set_input_opts([("rtsp_transport", "tcp")].into());
        }

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_descs(["format=yuv420p"].into())
            .output(out)
            .build()
            .map_err(|e| unavailable(format!("构建失败: {}", e)))?;
        let scheduler = ctx
            .start()
            .map_err(|e| unavailable(format!("启动失败: {}", e)))?;

        info!(camera = camera_id, "✅ FFmpeg输入已连接: {}", url);
        Ok(Self {
            camera_id: camera_id.to_string(),
            rx,
            scheduler: Some(scheduler),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>, MonitorError> {
        // 发送端随解码结束而关闭
        match self.rx.recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(_) => {
                let ended_cleanly = self
                    .scheduler
                    .take()
                    .map(|s| s.wait().is_ok())
                    .unwrap_or(true);
                if ended_cleanly {
                    Ok(None)
                } else {
                    Err(MonitorError::FrameAcquisitionFailure {
                        camera: self.camera_id.clone(),
                        reason: "decoder stopped with an error".to_string(),
                    })
                }
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
    }
}
