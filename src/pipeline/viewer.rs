//! 显示循环 (无窗口)
//!
//! 将每路摄像头的最新帧按比例缩小; 配置了预览目录时写出 `<camera>.jpg`,
//! 并定期记录各路显示帧率

use fast_image_resize as fr;
use image::RgbImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::PublishedFrame;

const RATE_LOG_INTERVAL: Duration = Duration::from_secs(5);

struct DisplayRate {
    count: u64,
    last: Instant,
}

pub struct Viewer {
    resize_factor: f32,
    preview_dir: Option<PathBuf>,
    resizer: fr::Resizer,
    rates: HashMap<String, DisplayRate>,
}

impl Viewer {
    pub fn new(resize_factor: f32, preview_dir: Option<PathBuf>) -> Self {
        let resize_factor = if resize_factor > 0.0 && resize_factor <= 1.0 {
            resize_factor
        } else {
            1.0
        };
        Self {
            resize_factor,
            preview_dir,
            resizer: fr::Resizer::new(),
            rates: HashMap::new(),
        }
    }

    /// 显示一帧
    pub fn show(&mut self, camera_id: &str, published: &PublishedFrame) {
        let preview = match self.downscale(&published.frame) {
            Ok(img) => img,
            Err(e) => {
                warn!(camera = camera_id, "⚠️ 预览缩放失败: {}", e);
                return;
            }
        };

        if let Some(dir) = &self.preview_dir {
            let path = dir.join(format!("{}.jpg", camera_id));
            if let Err(e) = preview.save_with_format(&path, image::ImageFormat::Jpeg) {
                warn!(camera = camera_id, path = %path.display(), "⚠️ 写入预览失败: {}", e);
            }
        }

        let rate = self.rates.entry(camera_id.to_string()).or_insert(DisplayRate {
            count: 0,
            last: Instant::now(),
        });
        rate.count += 1;
        let elapsed = rate.last.elapsed();
        if elapsed >= RATE_LOG_INTERVAL {
            let fps = rate.count as f64 / elapsed.as_secs_f64();
            info!(
                camera = camera_id,
                "🖥️ 显示 {:.1}fps | 帧#{} | t={:.1}s",
                fps,
                published.frame_index,
                published.timestamp
            );
            rate.count = 0;
            rate.last = Instant::now();
        }
    }

    /// 按 resize_factor 缩小 (fast_image_resize, 双线性)
    pub fn downscale(&mut self, frame: &RgbImage) -> Result<RgbImage, String> {
        let (w, h) = frame.dimensions();
        let dst_w = ((w as f32 * self.resize_factor) as u32).max(1);
        let dst_h = ((h as f32 * self.resize_factor) as u32).max(1);
        if (dst_w, dst_h) == (w, h) {
            return Ok(frame.clone());
        }

        let src = fr::images::Image::from_vec_u8(w, h, frame.as_raw().clone(), fr::PixelType::U8x3)
            .map_err(|e| e.to_string())?;
        let mut dst = fr::images::Image::new(dst_w, dst_h, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .map_err(|e| e.to_string())?;

        RgbImage::from_raw(dst_w, dst_h, dst.into_vec())
            .ok_or_else(|| "buffer size mismatch".to_string())
    }
}
