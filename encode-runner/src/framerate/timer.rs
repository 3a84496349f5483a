// 抽帧控制器实现
//
// 根据参考帧率和目标帧率决定输入帧的取舍，并为保留的帧分配时间戳。

use super::timestamp::PresentationClock;
use tracing::{debug, info, warn};

/// 单个输入帧的取舍结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingDecision {
    Keep,
    Drop,
}

/// 抽帧控制器
///
/// 输入帧按参考帧率到达。保留间隔 `keep_interval = reference_fps / target_fps`，
/// 只有 FPS 事件会改变它。
#[derive(Debug, Clone)]
pub struct FrameTimer {
    /// 参考帧率（输入源）
    reference_fps: f64,
    /// 目标帧率（编码）
    target_fps: f64,
    /// 保留间隔
    keep_interval: f64,
    /// 已读取的输入帧数
    frames_read: u64,
    /// 保留的帧数
    frames_kept: u64,
    /// 丢弃的帧数
    frames_skipped: u64,
    clock: PresentationClock,
}

impl FrameTimer {
    pub fn new(reference_fps: f64, target_fps: f64, base_pts_offset_us: i64) -> Self {
        let reference_fps = if reference_fps > 0.0 { reference_fps } else { 30.0 };
        let target_fps = if target_fps > 0.0 { target_fps } else { reference_fps };
        let keep_interval = reference_fps / target_fps;

        info!(
            "Creating FrameTimer: reference={:.2}fps, target={:.2}fps, keep_interval={:.3}",
            reference_fps, target_fps, keep_interval
        );

        Self {
            reference_fps,
            target_fps,
            keep_interval,
            frames_read: 0,
            frames_kept: 0,
            frames_skipped: 0,
            clock: PresentationClock::new(target_fps, base_pts_offset_us),
        }
    }

    pub fn reference_fps(&self) -> f64 {
        self.reference_fps
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn keep_interval(&self) -> f64 {
        self.keep_interval
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn frames_kept(&self) -> u64 {
        self.frames_kept
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    fn rank(&self, frame: u64) -> u64 {
        (frame as f64 / self.keep_interval).floor() as u64
    }

    /// Whether input frame `input_index` survives decimation. Pure.
    pub fn is_kept(&self, input_index: u64) -> bool {
        if self.keep_interval <= 1.0 {
            return true;
        }
        self.rank(input_index) != self.rank(input_index + 1)
    }

    /// 对刚读取的输入帧做出取舍并更新计数
    pub fn decide(&mut self, input_index: u64) -> PacingDecision {
        self.frames_read += 1;

        if self.is_kept(input_index) {
            self.frames_kept += 1;
            PacingDecision::Keep
        } else {
            self.frames_skipped += 1;
            debug!(
                "Dropping input frame {} (keep_interval={:.3})",
                input_index, self.keep_interval
            );
            PacingDecision::Drop
        }
    }

    /// 为下一个保留帧分配时间戳（微秒）
    pub fn next_pts(&mut self) -> i64 {
        self.clock.next_pts()
    }

    /// 更新目标帧率
    ///
    /// 只影响之后的取舍判断和时间戳。
    pub fn set_target_fps(&mut self, fps: f64) {
        if fps <= 0.0 {
            warn!("Ignoring target frame rate {:.2}", fps);
            return;
        }

        let old_interval = self.keep_interval;
        self.target_fps = fps;
        self.keep_interval = self.reference_fps / fps;
        self.clock.set_frame_rate(fps);

        info!(
            "Target FPS updated to {:.2} (keep_interval {:.3} -> {:.3})",
            fps, old_interval, self.keep_interval
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decisions(timer: &mut FrameTimer, frames: u64) -> Vec<PacingDecision> {
        (0..frames).map(|i| timer.decide(i)).collect()
    }

    #[test]
    fn test_equal_rates_keep_everything() {
        let mut timer = FrameTimer::new(30.0, 30.0, 132);
        assert_eq!(timer.keep_interval(), 1.0);
        assert!(decisions(&mut timer, 50).iter().all(|d| *d == PacingDecision::Keep));
        assert_eq!(timer.frames_skipped(), 0);
    }

    #[test]
    fn test_upsampling_never_duplicates() {
        let mut timer = FrameTimer::new(15.0, 60.0, 132);
        assert!(timer.keep_interval() < 1.0);
        decisions(&mut timer, 20);
        assert_eq!(timer.frames_kept(), 20);
    }

    #[test]
    fn test_half_rate_keeps_odd_frames() {
        let mut timer = FrameTimer::new(30.0, 15.0, 132);
        let result = decisions(&mut timer, 6);
        assert_eq!(
            result,
            vec![
                PacingDecision::Drop,
                PacingDecision::Keep,
                PacingDecision::Drop,
                PacingDecision::Keep,
                PacingDecision::Drop,
                PacingDecision::Keep,
            ]
        );
        assert_eq!(timer.frames_read(), 6);
        assert_eq!(timer.frames_kept(), 3);
        assert_eq!(timer.frames_skipped(), 3);
    }

    #[test]
    fn test_pts_follow_kept_index() {
        let mut timer = FrameTimer::new(30.0, 10.0, 132);
        let mut pts = Vec::new();
        for i in 0..9 {
            if timer.decide(i) == PacingDecision::Keep {
                pts.push(timer.next_pts());
            }
        }
        assert_eq!(pts, vec![132, 100_132, 200_132]);
    }

    #[test]
    fn test_fps_change_affects_later_frames_only() {
        let mut timer = FrameTimer::new(30.0, 30.0, 0);
        assert!(timer.is_kept(0));
        timer.set_target_fps(10.0);
        assert_eq!(timer.keep_interval(), 3.0);
        assert!(!timer.is_kept(30));
        assert!(timer.is_kept(32));
        assert_eq!(timer.target_fps(), 10.0);
    }

    #[test]
    fn test_invalid_target_ignored() {
        let mut timer = FrameTimer::new(30.0, 15.0, 0);
        timer.set_target_fps(0.0);
        assert_eq!(timer.keep_interval(), 2.0);
    }

    proptest! {
        #[test]
        fn prop_kept_count_matches_interval(
            reference in 1u32..120,
            target in 1u32..120,
            frames in 0u64..2000,
        ) {
            let mut timer = FrameTimer::new(reference as f64, target as f64, 132);
            decisions(&mut timer, frames);

            let interval = timer.keep_interval();
            let expected = if interval <= 1.0 {
                frames
            } else {
                (frames as f64 / interval).floor() as u64
            };
            let kept = timer.frames_kept();
            prop_assert!(kept + 1 >= expected && kept <= expected + 1,
                "kept {} expected {} (interval {})", kept, expected, interval);
            prop_assert_eq!(timer.frames_kept() + timer.frames_skipped(), frames);
        }

        #[test]
        fn prop_decisions_are_deterministic(
            reference in 1u32..120,
            target in 1u32..120,
            frames in 0u64..500,
        ) {
            let mut a = FrameTimer::new(reference as f64, target as f64, 132);
            let mut b = FrameTimer::new(reference as f64, target as f64, 132);
            prop_assert_eq!(decisions(&mut a, frames), decisions(&mut b, frames));
        }

        #[test]
        fn prop_pts_strictly_increasing(
            target in 1u32..240,
            frames in 2u64..300,
        ) {
            let mut timer = FrameTimer::new(240.0, target as f64, 132);
            let mut last = None;
            for _ in 0..frames {
                let pts = timer.next_pts();
                if let Some(prev) = last {
                    prop_assert!(pts > prev);
                }
                last = Some(pts);
            }
        }
    }
}
