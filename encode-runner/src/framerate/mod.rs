// 帧率控制 - 抽帧和时间戳模块
//
// 输入源以参考帧率提供原始帧，编码目标帧率可以更低（并可在运行时改变）。
//
// # 核心组件
//
// - `FrameTimer`: 按保留间隔决定每个输入帧保留还是丢弃
// - `PresentationClock`: 为保留的帧生成单调递增的显示时间戳
//
// # 规则
//
// 1. rank(n) = floor(n / keep_interval)，当 rank(i) == rank(i+1) 时丢弃第 i 帧
// 2. keep_interval <= 1 时保留所有帧（不复制帧）
// 3. pts = base + kept_index * 1_000_000 / target_fps（微秒）

pub mod timer;
pub mod timestamp;

// 重新导出核心类型
pub use timer::{FrameTimer, PacingDecision};
pub use timestamp::PresentationClock;

/// 固定的起始时间戳偏移（微秒）
pub const DEFAULT_BASE_PTS_OFFSET_US: i64 = 132;
