#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 帧标注 (检测框/状态栏)
pub mod clock; // 会话计时时钟
pub mod config; // 配置参数
pub mod detection; // 检测边界与目标生命周期
pub mod error; // 错误分类
pub mod input; // 视频输入系统
pub mod pipeline; // 摄像头工作线程与调度
pub mod recording; // 录像与快照
pub mod speed; // 速度估计
pub mod zone; // 监控区域

pub use crate::config::{AppConfig, CameraConfig};
pub use crate::detection::{ObjectLifecycleTracker, TrackId, TrackState};
pub use crate::error::MonitorError;
pub use crate::pipeline::{ControlCommand, Orchestrator};
pub use crate::recording::RecordingManager;
pub use crate::speed::SpeedEstimator;
pub use crate::zone::ZoneEngine;

/// 生成文件名时间戳, 例如 `20250925_110932_123456`
///
/// 微秒部分保证同一秒内多次创建的文件名不冲突
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!("%Y%m%d{}%H%M%S{}%6f", delimiter, delimiter);
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_string_uses_delimiter() {
        let s = gen_time_string("_");
        let parts: Vec<&str> = s.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
    }
}
