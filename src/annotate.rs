//! 帧标注 - 检测框、目标标签与状态栏
//!
//! 未配置字体时只绘制检测框和状态色块, 不绘制文字

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

use crate::detection::{BBox, TrackId, TrackState};
use crate::speed::SpeedInfo;

// ========== 颜色 (RGB) ==========
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// 状态栏内容
#[derive(Debug, Clone)]
pub struct FrameStatus<'a> {
    pub camera_id: &'a str,
    pub detection_on: bool,
    pub recording_on: bool,
    pub total: usize,
    pub in_zone: usize,
}

#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// 从字体文件加载, 失败时退化为无文字模式
    pub fn from_font_file(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => {
                info!(path = %path.display(), "🔤 标注字体已加载");
                Self::new(Some(font))
            }
            Err(e) => {
                warn!(path = %path.display(), "⚠️ 字体加载失败, 不绘制文字: {}", e);
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 目标检测框 + 标签
    ///
    /// 区域内: 红色粗框, 显示已停留时间与实时速度;
    /// 已通过: 显示总时间与平均速度
    pub fn draw_track(
        &self,
        frame: &mut RgbImage,
        track_id: &TrackId,
        state: &TrackState,
        speed: &SpeedInfo,
    ) {
        let Some(bbox) = state.bbox else {
            return;
        };
        let (color, thickness) = if state.in_zone { (RED, 3) } else { (BLUE, 2) };
        draw_box(frame, &bbox, color, thickness);

        let x = bbox.x1 as i32;
        let y = bbox.y1 as i32;
        self.draw_label(frame, &format!("ID:{} {}", track_id, state.class_name), x, y - 20, color);

        if state.in_zone {
            self.draw_label(
                frame,
                &format!("Time: {:.1}s", speed.time_in_zone),
                x,
                bbox.y2 as i32 + 4,
                YELLOW,
            );
            if speed.current_speed > 0.0 {
                self.draw_label(
                    frame,
                    &format!("Speed: {:.1} km/h", speed.current_speed),
                    x,
                    bbox.y2 as i32 + 24,
                    YELLOW,
                );
            }
        } else if state.dwell_seconds > 0.0 {
            self.draw_label(
                frame,
                &format!("Total: {:.1}s", state.dwell_seconds),
                x,
                bbox.y2 as i32 + 4,
                GREEN,
            );
            if speed.average_speed > 0.0 {
                self.draw_label(
                    frame,
                    &format!("Avg: {:.1} km/h", speed.average_speed),
                    x,
                    bbox.y2 as i32 + 24,
                    GREEN,
                );
            }
        }
    }

    /// 单目标录像中的标注: 红框 + ID/类别
    pub fn draw_object(&self, frame: &mut RgbImage, track_id: &TrackId, state: &TrackState) {
        if let Some(bbox) = state.bbox {
            draw_box(frame, &bbox, RED, 3);
            self.draw_label(
                frame,
                &format!("ID:{} {}", track_id, state.class_name),
                bbox.x1 as i32,
                bbox.y1 as i32 - 20,
                YELLOW,
            );
        }
    }

    /// 左上角状态栏
    pub fn draw_status(&self, frame: &mut RgbImage, status: &FrameStatus) {
        let on_off = |on: bool| if on { "ON" } else { "OFF" };

        // 状态指示块: 检测/录像
        let det_color = if status.detection_on { GREEN } else { RED };
        let rec_color = if status.recording_on { RED } else { WHITE };
        fill_rect(frame, 10, 10, 14, 14, det_color);
        fill_rect(frame, 10, 34, 14, 14, rec_color);

        self.draw_label(frame, &format!("Detection: {}", on_off(status.detection_on)), 30, 8, det_color);
        self.draw_label(frame, &format!("Recording: {}", on_off(status.recording_on)), 30, 32, rec_color);
        self.draw_label(frame, &format!("Camera: {}", status.camera_id), 10, 56, WHITE);
        self.draw_label(
            frame,
            &format!("Total: {} | In zone: {}", status.total, status.in_zone),
            10,
            80,
            WHITE,
        );
    }

    fn draw_label(&self, frame: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            let y = y.max(0);
            draw_text_mut(frame, color, x.max(0), y, PxScale::from(18.0), font, text);
        }
    }
}

/// 粗边框 (多层空心矩形)
pub fn draw_box(frame: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let x1 = bbox.x1.clamp(0.0, w - 1.0) as i32;
    let y1 = bbox.y1.clamp(0.0, h - 1.0) as i32;
    let x2 = bbox.x2.clamp(0.0, w - 1.0) as i32;
    let y2 = bbox.y2.clamp(0.0, h - 1.0) as i32;

    for t in 0..thickness as i32 {
        let bw = x2 - x1 - 2 * t;
        let bh = y2 - y1 - 2 * t;
        if bw <= 0 || bh <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(bw as u32 + 1, bh as u32 + 1);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

fn fill_rect(frame: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    draw_filled_rect_mut(frame, Rect::at(x, y).of_size(w, h), color);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(in_zone: bool) -> TrackState {
        TrackState {
            in_zone,
            bbox: Some(BBox::new(10.0, 10.0, 40.0, 30.0)),
            class_name: "Car".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_box_color_follows_zone_membership() {
        let annotator = Annotator::default();
        let mut frame = RgbImage::new(64, 48);
        annotator.draw_track(&mut frame, &TrackId::Int(1), &state(true), &SpeedInfo::default());
        assert_eq!(*frame.get_pixel(10, 10), RED);
        assert_eq!(*frame.get_pixel(12, 12), RED); // 第三层

        let mut frame = RgbImage::new(64, 48);
        annotator.draw_track(&mut frame, &TrackId::Int(1), &state(false), &SpeedInfo::default());
        assert_eq!(*frame.get_pixel(10, 10), BLUE);
        assert_eq!(*frame.get_pixel(12, 12), BLACK);
    }

    #[test]
    fn test_box_outside_frame_is_clamped() {
        let mut frame = RgbImage::new(20, 20);
        draw_box(&mut frame, &BBox::new(-50.0, -50.0, 500.0, 500.0), GREEN, 2);
        assert_eq!(*frame.get_pixel(0, 0), GREEN);
        assert_eq!(*frame.get_pixel(19, 19), GREEN);

        // 退化框不绘制
        let mut frame = RgbImage::new(20, 20);
        draw_box(&mut frame, &BBox::new(5.0, 5.0, 5.0, 5.0), GREEN, 2);
        assert!(frame.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn test_status_indicators() {
        let annotator = Annotator::default();
        let mut frame = RgbImage::new(64, 64);
        annotator.draw_status(
            &mut frame,
            &FrameStatus {
                camera_id: "cam1",
                detection_on: true,
                recording_on: false,
                total: 2,
                in_zone: 1,
            },
        );
        assert_eq!(*frame.get_pixel(12, 12), GREEN);
        assert_eq!(*frame.get_pixel(12, 36), WHITE);
    }

    #[test]
    fn test_missing_font_falls_back() {
        let annotator = Annotator::from_font_file(Some(Path::new("/nonexistent/font.ttf")));
        assert!(!annotator.has_font());
    }
}
