/// 检测边界数据结构定义
/// Data structures at the detector boundary
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::MonitorError;

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 获取中心点
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// 跟踪ID: 整数或字符串
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Int(i64),
    Text(String),
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::Int(id) => write!(f, "{}", id),
            TrackId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        TrackId::Int(id)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        TrackId::Text(id.to_string())
    }
}

impl TryFrom<&Value> for TrackId {
    type Error = MonitorError;

    /// 接受整数/字符串, 以及带 `id` 字段的对象; 其他一律拒绝
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(id) => Ok(TrackId::Int(id)),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(TrackId::Int(f as i64))
                    }
                    _ => Err(MonitorError::InvalidTrackIdentity(value.to_string())),
                },
            },
            Value::String(s) if !s.is_empty() => Ok(TrackId::Text(s.clone())),
            Value::Object(map) => match map.get("id") {
                Some(inner) if !inner.is_object() => TrackId::try_from(inner),
                _ => Err(MonitorError::InvalidTrackIdentity(value.to_string())),
            },
            _ => Err(MonitorError::InvalidTrackIdentity(value.to_string())),
        }
    }
}

/// 检测器原始输出 (未校验)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub track_id: Option<Value>,
    #[serde(default)]
    pub class_id: u32,
    #[serde(default)]
    pub confidence: f32,
    pub bbox: [f32; 4], // x1, y1, x2, y2
}

/// 已校验的检测 (带可用跟踪ID)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub track_id: TrackId,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    /// 边界校验: 缺少或无效的跟踪ID → InvalidTrackIdentity
    pub fn from_raw(raw: &RawDetection, class_name: String) -> Result<Self, MonitorError> {
        let track_id = match &raw.track_id {
            Some(value) => TrackId::try_from(value)?,
            None => {
                return Err(MonitorError::InvalidTrackIdentity(
                    "missing track_id".to_string(),
                ))
            }
        };
        let [x1, y1, x2, y2] = raw.bbox;
        Ok(Self {
            track_id,
            class_id: raw.class_id,
            class_name,
            confidence: raw.confidence.clamp(0.0, 1.0),
            bbox: BBox::new(x1, y1, x2, y2),
        })
    }

    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn track_id_accepts_int_string_and_wrapped() {
        assert_eq!(TrackId::try_from(&json!(7)).unwrap(), TrackId::Int(7));
        assert_eq!(TrackId::try_from(&json!(7.0)).unwrap(), TrackId::Int(7));
        assert_eq!(
            TrackId::try_from(&json!("car-3")).unwrap(),
            TrackId::Text("car-3".into())
        );
        assert_eq!(TrackId::try_from(&json!({"id": 12})).unwrap(), TrackId::Int(12));
    }

    #[test]
    fn track_id_rejects_unusable_values() {
        for value in [
            json!(null),
            json!(1.5),
            json!(""),
            json!([1, 2]),
            json!(true),
            json!({"name": 3}),
            json!({"id": {"id": 3}}),
        ] {
            assert!(
                matches!(
                    TrackId::try_from(&value),
                    Err(MonitorError::InvalidTrackIdentity(_))
                ),
                "accepted {}",
                value
            );
        }
    }

    #[test]
    fn detection_without_track_id_is_rejected() {
        let raw = RawDetection {
            track_id: None,
            bbox: [0.0, 0.0, 10.0, 10.0],
            ..Default::default()
        };
        assert!(Detection::from_raw(&raw, "Car".into()).is_err());
    }

    #[test]
    fn detection_center() {
        let raw = RawDetection {
            track_id: Some(json!(1)),
            class_id: 0,
            confidence: 0.9,
            bbox: [10.0, 20.0, 30.0, 60.0],
        };
        let det = Detection::from_raw(&raw, "Car".into()).unwrap();
        assert_eq!(det.center(), (20.0, 40.0));
        assert_eq!(det.track_id.to_string(), "1");
    }
}
