//! 监控区域 (Zone Engine)
//!
//! 每个摄像头一个多边形区域, 加载后不可变:
//! - 从标注文件 (annotations[].segmentation) 解析多边形
//! - 射线法判断点是否在区域内
//! - 在帧上绘制区域轮廓与半透明填充

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ZoneStyle;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("zone file not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed zone file {path}: {reason}")]
    MalformedData { path: PathBuf, reason: String },
}

/// 区域标注文件格式 (COCO风格)
#[derive(Debug, Deserialize)]
struct ZoneDocument {
    #[serde(default)]
    annotations: Vec<ZoneAnnotation>,
}

#[derive(Debug, Deserialize)]
struct ZoneAnnotation {
    #[serde(default)]
    segmentation: Vec<Vec<f64>>,
}

/// 单个摄像头的监控区域
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    points: Vec<(f64, f64)>,
    length_m: f64, // 区域实际长度, 仅用于速度换算
}

impl Zone {
    pub fn new(points: Vec<(f64, f64)>, length_m: f64) -> Self {
        Self { points, length_m }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }

    /// 偶奇射线法
    ///
    /// 水平射线从点向右; 边仅在 `min_y < y <= max_y` 时计数,
    /// 共享顶点不会被重复统计
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let (mut p1x, mut p1y) = self.points[0];
        for i in 1..=n {
            let (p2x, p2y) = self.points[i % n];
            if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
                // 条件 y 严格落在 (min_y, max_y] 内, 因此 p1y != p2y
                let xinters = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
                if p1x == p2x || x <= xinters {
                    inside = !inside;
                }
            }
            p1x = p2x;
            p1y = p2y;
        }
        inside
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}

/// 解析标注文件内容为多边形顶点
pub fn parse_zone(path: &Path, json: &str) -> Result<Vec<(f64, f64)>, LoadError> {
    let malformed = |reason: String| LoadError::MalformedData {
        path: path.to_path_buf(),
        reason,
    };

    let doc: ZoneDocument =
        serde_json::from_str(json).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let segmentation = doc
        .annotations
        .first()
        .and_then(|a| a.segmentation.first())
        .ok_or_else(|| malformed("no annotation with a segmentation".to_string()))?;

    if segmentation.len() % 2 != 0 {
        return Err(malformed(format!(
            "segmentation has an odd number of values ({})",
            segmentation.len()
        )));
    }

    let mut points: Vec<(f64, f64)> = segmentation
        .chunks_exact(2)
        .map(|xy| (xy[0], xy[1]))
        .collect();

    // 去掉重复的闭合点
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    if points.len() < 3 {
        return Err(malformed(format!(
            "polygon needs at least 3 points, got {}",
            points.len()
        )));
    }
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(malformed("non-finite coordinate".to_string()));
    }

    Ok(points)
}

/// 区域引擎: 按摄像头保存区域
///
/// 区域只在摄像头初始化时写入一次, 之后只读
pub struct ZoneEngine {
    zones: RwLock<HashMap<String, Zone>>,
    style: ZoneStyle,
}

impl Default for ZoneEngine {
    fn default() -> Self {
        Self::new(ZoneStyle::default())
    }
}

impl ZoneEngine {
    pub fn new(style: ZoneStyle) -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            style,
        }
    }

    /// 从文件加载区域
    pub fn load(&self, camera_id: &str, source: &Path, length_m: f64) -> Result<(), LoadError> {
        let json = match fs::read_to_string(source) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::NotFound(source.to_path_buf()));
            }
            Err(e) => {
                return Err(LoadError::MalformedData {
                    path: source.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let points = parse_zone(source, &json)?;
        info!(camera = camera_id, "📐 区域已加载: {} 个顶点", points.len());
        self.insert(camera_id, Zone::new(points, length_m));
        Ok(())
    }

    pub fn insert(&self, camera_id: &str, zone: Zone) {
        self.zones.write().insert(camera_id.to_string(), zone);
    }

    /// 未加载区域的摄像头: 永远不在区域内
    pub fn contains(&self, camera_id: &str, point: (f64, f64)) -> bool {
        match self.zones.read().get(camera_id) {
            Some(zone) => zone.contains(point.0, point.1),
            None => false,
        }
    }

    pub fn bounds(&self, camera_id: &str) -> Option<(i32, i32, i32, i32)> {
        self.zones.read().get(camera_id).map(|zone| {
            let (min_x, min_y, max_x, max_y) = zone.bounds();
            (min_x as i32, min_y as i32, max_x as i32, max_y as i32)
        })
    }

    pub fn zone_length(&self, camera_id: &str) -> Option<f64> {
        self.zones.read().get(camera_id).map(Zone::length_m)
    }

    /// 绘制区域轮廓 (可选半透明填充)
    pub fn render(&self, camera_id: &str, frame: &mut RgbImage) {
        let zones = self.zones.read();
        let Some(zone) = zones.get(camera_id) else {
            return;
        };
        let color = Rgb(self.style.line_color);

        if self.style.fill_alpha > 0.0 {
            fill_translucent(frame, zone.points(), color, self.style.fill_alpha);
        }

        let n = zone.points().len();
        let thickness = self.style.line_thickness.max(1) as i32;
        for i in 0..n {
            let (x1, y1) = zone.points()[i];
            let (x2, y2) = zone.points()[(i + 1) % n];
            // 粗线: 在两个方向上平移多次绘制
            for d in -(thickness / 2)..=((thickness - 1) / 2) {
                let d = d as f32;
                draw_line_segment_mut(
                    frame,
                    (x1 as f32 + d, y1 as f32),
                    (x2 as f32 + d, y2 as f32),
                    color,
                );
                draw_line_segment_mut(
                    frame,
                    (x1 as f32, y1 as f32 + d),
                    (x2 as f32, y2 as f32 + d),
                    color,
                );
            }
        }
    }
}

fn fill_translucent(frame: &mut RgbImage, points: &[(f64, f64)], color: Rgb<u8>, alpha: f32) {
    let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let p = Point::new(x.round() as i32, y.round() as i32);
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }
    if poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() < 3 {
        warn!("⚠️ 区域多边形退化, 跳过填充");
        return;
    }

    let mut overlay = frame.clone();
    draw_polygon_mut(&mut overlay, &poly, color);

    let alpha = alpha.clamp(0.0, 1.0);
    for (dst, src) in frame.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            dst.0[c] = (src.0[c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha)).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Zone {
        Zone::new(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)], 8.0)
    }

    #[test]
    fn test_point_inside_and_outside() {
        let zone = square();
        assert!(zone.contains(5.0, 5.0));
        assert!(!zone.contains(15.0, 5.0));
        assert!(!zone.contains(-1.0, 5.0));
        assert!(!zone.contains(5.0, 11.0));
    }

    #[test]
    fn test_shared_vertex_counted_once() {
        // 射线穿过顶点 (10, 5) 时只计一次
        let diamond = Zone::new(
            vec![(5.0, 0.0), (10.0, 5.0), (5.0, 10.0), (0.0, 5.0)],
            1.0,
        );
        assert!(diamond.contains(5.0, 5.0));
        assert!(!diamond.contains(11.0, 5.0));
        assert!(!diamond.contains(-1.0, 5.0));
    }

    #[test]
    fn test_concave_polygon() {
        // U 形
        let u = Zone::new(
            vec![
                (0.0, 0.0),
                (3.0, 0.0),
                (3.0, 10.0),
                (7.0, 10.0),
                (7.0, 0.0),
                (10.0, 0.0),
                (10.0, 12.0),
                (0.0, 12.0),
            ],
            1.0,
        );
        assert!(u.contains(1.5, 5.0));
        assert!(!u.contains(5.0, 5.0));
        assert!(u.contains(5.0, 11.0));
    }

    #[test]
    fn test_parse_segmentation() {
        let json = r#"{"annotations":[{"segmentation":[[0,0,10,0,10,10,0,10]]}]}"#;
        let pts = parse_zone(Path::new("z.json"), json).unwrap();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[2], (10.0, 10.0));
    }

    #[test]
    fn test_parse_drops_closing_point() {
        let json = r#"{"annotations":[{"segmentation":[[0,0,10,0,10,10,0,0]]}]}"#;
        let pts = parse_zone(Path::new("z.json"), json).unwrap();
        assert_eq!(pts.len(), 3);
    }

    #[test]
    fn test_parse_rejects_bad_documents() {
        let cases = [
            "not json",
            r#"{"annotations":[]}"#,
            r#"{"annotations":[{"segmentation":[[0,0,1,1]]}]}"#,
            r#"{"annotations":[{"segmentation":[[0,0,1,1,2]]}]}"#,
            r#"{"images":[]}"#,
        ];
        for json in cases {
            assert!(
                matches!(
                    parse_zone(Path::new("z.json"), json),
                    Err(LoadError::MalformedData { .. })
                ),
                "accepted: {}",
                json
            );
        }
    }

    #[test]
    fn test_engine_without_zone_is_never_inside() {
        let engine = ZoneEngine::default();
        assert!(!engine.contains("cam9", (5.0, 5.0)));
        assert!(engine.bounds("cam9").is_none());
    }

    #[test]
    fn test_engine_load_missing_file() {
        let engine = ZoneEngine::default();
        let err = engine
            .load("cam1", Path::new("/definitely/not/here.json"), 8.0)
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_engine_load_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone.json");
        fs::write(
            &path,
            r#"{"annotations":[{"segmentation":[[10,20,110,20,110,220,10,220]]}]}"#,
        )
        .unwrap();

        let engine = ZoneEngine::default();
        engine.load("cam1", &path, 8.0).unwrap();
        assert!(engine.contains("cam1", (60.0, 120.0)));
        assert!(!engine.contains("cam2", (60.0, 120.0)));
        assert_eq!(engine.bounds("cam1"), Some((10, 20, 110, 220)));
        assert_eq!(engine.zone_length("cam1"), Some(8.0));
    }

    #[test]
    fn test_render_draws_outline_and_fill() {
        let engine = ZoneEngine::default();
        engine.insert("cam1", square());
        let mut frame = RgbImage::new(20, 20);
        engine.render("cam1", &mut frame);
        // 轮廓为绿色
        assert_eq!(frame.get_pixel(5, 0).0[1], 255);
        // 内部被半透明填充
        let inner = frame.get_pixel(5, 5).0;
        assert!(inner[1] > 0 && inner[1] < 255);
        // 区域外不变
        assert_eq!(frame.get_pixel(15, 15).0, [0, 0, 0]);
    }

    #[test]
    fn test_render_without_zone_is_noop() {
        let engine = ZoneEngine::default();
        let mut frame = RgbImage::new(8, 8);
        engine.render("cam1", &mut frame);
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
