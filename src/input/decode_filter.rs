/// FFmpeg解码过滤器: 视频流 → RGB帧
/// FFmpeg decode filter module
use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct DecodeFilter {
    camera_id: String,
    tx: Sender<RgbImage>,
    count: usize,
    last: Instant,
    dropped_frames: usize, // 丢弃的帧数 (损坏或队列已满)
    total_frames: usize,
}

impl DecodeFilter {
    pub fn new(camera_id: &str, tx: Sender<RgbImage>) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            tx,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, why: &str) -> Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!(camera = %self.camera_id, "⚠️ 丢弃帧 #{}: {}", self.total_frames, why);
        }
        Ok(None)
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!(camera = %self.camera_id, "✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            return self.drop_frame("空帧/损坏帧");
        }

        // SAFETY: 指针已检查非空, 帧在本函数内有效
        let (w, h, planes, y_stride, uv_stride) = unsafe {
            let raw = &*frame.as_ptr();
            (
                raw.width as usize,
                raw.height as usize,
                [raw.data[0], raw.data[1], raw.data[2]],
                raw.linesize[0] as usize,
                raw.linesize[1] as usize,
            )
        };

        if w == 0 || h == 0 || w > 4096 || h > 4096 {
            return self.drop_frame("非法分辨率");
        }
        if planes.iter().any(|p| p.is_null()) || y_stride < w || uv_stride < w / 2 {
            return self.drop_frame("YUV平面异常");
        }

        // SAFETY: 平面指针与步长来自同一个有效的 YUV420P 帧
        let rgb = unsafe { yuv420p_to_rgb(planes, y_stride, uv_stride, w, h) };
        let Some(image) = RgbImage::from_raw(w as u32, h as u32, rgb) else {
            return self.drop_frame("缓冲区大小不匹配");
        };

        match self.tx.try_send(image) {
            Ok(()) => self.count += 1,
            Err(TrySendError::Full(_)) => self.dropped_frames += 1,
            // 接收端已关闭: 结束解码
            Err(TrySendError::Disconnected(_)) => return Err("frame receiver closed".to_string()),
        }

        if self.last.elapsed().as_secs_f64() >= 5.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            debug!(
                camera = %self.camera_id,
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{}",
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(camera = %self.camera_id, "✅ 解码线程退出");
    }
}

/// BT.601 YUV420P → RGB24 (定点系数 ×128)
unsafe fn yuv420p_to_rgb(
    planes: [*mut u8; 3],
    y_stride: usize,
    uv_stride: usize,
    width: usize,
    height: usize,
) -> Vec<u8> {
    let [y_plane, u_plane, v_plane] = planes;
    let mut buffer = vec![0u8; width * height * 3];
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
    buffer
}
