//! 速度估计
//! Speed from zone traversal time and calibrated zone length

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::detection::TrackState;

/// m/s → km/h
const MPS_TO_KMH: f64 = 3.6;

/// 单个目标的速度信息
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedInfo {
    pub current_speed: f64, // 区域内实时速度 (km/h)
    pub average_speed: f64, // 完整通过后的平均速度 (km/h)
    pub time_in_zone: f64,  // 当前区域内停留时间 (s)
}

pub struct SpeedEstimator {
    enabled: AtomicBool,
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SpeedEstimator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!("🚗 速度估计: {}", if enabled { "启用" } else { "禁用" });
    }

    fn convert(distance_m: f64, seconds: f64) -> f64 {
        (distance_m / seconds) * MPS_TO_KMH
    }

    /// 仍在区域内时的速度
    pub fn instantaneous_speed(&self, zone_length_m: f64, now: f64, enter_time: Option<f64>) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        match enter_time {
            Some(enter) if now > enter => Self::convert(zone_length_m, now - enter),
            _ => 0.0,
        }
    }

    pub fn average_speed(&self, zone_length_m: f64, dwell_seconds: f64) -> f64 {
        if !self.is_enabled() || dwell_seconds <= 0.0 {
            return 0.0;
        }
        Self::convert(zone_length_m, dwell_seconds)
    }

    pub fn speed_info(&self, state: &TrackState, now: f64, zone_length_m: f64) -> SpeedInfo {
        if !self.is_enabled() {
            return SpeedInfo::default();
        }

        let mut info = SpeedInfo::default();
        if state.in_zone {
            if let Some(enter) = state.enter_time {
                info.time_in_zone = (now - enter).max(0.0);
                info.current_speed = self.instantaneous_speed(zone_length_m, now, Some(enter));
            }
        }
        info.average_speed = self.average_speed(zone_length_m, state.dwell_seconds);
        info
    }
}
