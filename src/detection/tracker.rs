//! 目标生命周期跟踪
//! Per-camera, per-track zone membership and dwell timers
//!
//! 状态按摄像头分区: 外层表只在新摄像头出现时写入,
//! 每个分区有独立的锁, 单帧更新只锁自己摄像头的分区

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{BBox, Detection, TrackId};

// ========== 公共数据结构 ==========

/// 单个跟踪目标的状态
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackState {
    pub in_zone: bool,
    pub enter_time: Option<f64>,
    pub exit_time: Option<f64>,
    /// 最近一次完整通过区域的时长, 未完成前为 0
    pub dwell_seconds: f64,
    pub last_seen: f64,

    /// 最近一次检测结果
    pub bbox: Option<BBox>,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,

    /// 是否已经为该目标录制过单目标录像
    pub recorded: bool,
}

/// 已完成通过的目标
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedTrack {
    pub track_id: TrackId,
    pub class_name: String,
    pub dwell_seconds: f64,
}

/// 摄像头统计
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackStatistics {
    pub active_count: usize,
    pub in_zone_count: usize,
    pub completed_count: usize,
    pub completed_list: Vec<CompletedTrack>,
}

type Partition = Arc<Mutex<HashMap<TrackId, TrackState>>>;

#[derive(Default)]
pub struct ObjectLifecycleTracker {
    cameras: RwLock<HashMap<String, Partition>>,
}

impl ObjectLifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建摄像头分区
    fn partition(&self, camera_id: &str) -> Partition {
        if let Some(p) = self.cameras.read().get(camera_id) {
            return Arc::clone(p);
        }
        let mut cameras = self.cameras.write();
        Arc::clone(cameras.entry(camera_id.to_string()).or_default())
    }

    fn existing_partition(&self, camera_id: &str) -> Option<Partition> {
        self.cameras.read().get(camera_id).map(Arc::clone)
    }

    /// 更新目标状态 (首次出现时创建)
    pub fn update(&self, camera_id: &str, detection: &Detection, now: f64, is_inside: bool) {
        let partition = self.partition(camera_id);
        let mut tracks = partition.lock();
        let track_id = &detection.track_id;

        let state = tracks.entry(track_id.clone()).or_insert_with(|| {
            debug!(camera = camera_id, track = %track_id, "🆕 新目标");
            TrackState::default()
        });

        state.bbox = Some(detection.bbox);
        state.class_id = detection.class_id;
        state.class_name = detection.class_name.clone();
        state.confidence = detection.confidence;
        state.last_seen = now;

        if is_inside && !state.in_zone {
            // 进入区域
            state.in_zone = true;
            state.enter_time = Some(now);
            info!(camera = camera_id, track = %track_id, "➡️ 目标进入区域 t={:.2}s", now);
        } else if !is_inside && state.in_zone {
            // 离开区域
            state.in_zone = false;
            state.exit_time = Some(now);
            if let Some(enter) = state.enter_time.take() {
                state.dwell_seconds = now - enter;
            }
            info!(
                camera = camera_id,
                track = %track_id,
                "⬅️ 目标离开区域, 停留 {:.1}s",
                state.dwell_seconds
            );
        }
    }

    /// 获取目标状态, 未见过的目标返回空状态 (不会创建条目)
    pub fn get(&self, camera_id: &str, track_id: &TrackId) -> TrackState {
        self.existing_partition(camera_id)
            .and_then(|p| p.lock().get(track_id).cloned())
            .unwrap_or_default()
    }

    /// 标记目标已录制, 目标不存在时返回 false
    pub fn mark_recorded(&self, camera_id: &str, track_id: &TrackId) -> bool {
        match self.existing_partition(camera_id) {
            Some(p) => match p.lock().get_mut(track_id) {
                Some(state) => {
                    state.recorded = true;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// 清除超过 `timeout` 秒未出现的目标, 返回被清除的ID
    pub fn evict_stale(&self, camera_id: &str, now: f64, timeout: f64) -> BTreeSet<TrackId> {
        let Some(partition) = self.existing_partition(camera_id) else {
            return BTreeSet::new();
        };
        let mut tracks = partition.lock();

        let evicted: BTreeSet<TrackId> = tracks
            .iter()
            .filter(|(_, state)| now - state.last_seen > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for track_id in &evicted {
            tracks.remove(track_id);
            debug!(camera = camera_id, track = %track_id, "🗑️ 目标已从缓存清除");
        }
        evicted
    }

    pub fn statistics(&self, camera_id: &str) -> TrackStatistics {
        let Some(partition) = self.existing_partition(camera_id) else {
            return TrackStatistics::default();
        };
        let tracks = partition.lock();

        let mut completed_list: Vec<CompletedTrack> = tracks
            .iter()
            .filter(|(_, state)| state.dwell_seconds > 0.0)
            .map(|(id, state)| CompletedTrack {
                track_id: id.clone(),
                class_name: state.class_name.clone(),
                dwell_seconds: state.dwell_seconds,
            })
            .collect();
        completed_list.sort_by(|a, b| a.track_id.cmp(&b.track_id));

        TrackStatistics {
            active_count: tracks.len(),
            in_zone_count: tracks.values().filter(|s| s.in_zone).count(),
            completed_count: completed_list.len(),
            completed_list,
        }
    }

    /// 当前目标数量
    pub fn track_count(&self, camera_id: &str) -> usize {
        self.existing_partition(camera_id)
            .map(|p| p.lock().len())
            .unwrap_or(0)
    }
}
