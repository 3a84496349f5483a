// 显示时间戳生成
//
// 时间戳按帧率分段：每次帧率变化开启新的一段，
// 段内 pts = segment_start + index * 1_000_000 / fps，保证无漂移且严格递增。

use tracing::{debug, info, warn};

/// 为保留的帧生成显示时间戳（微秒）
#[derive(Debug, Clone)]
pub struct PresentationClock {
    /// 基准时间戳（微秒）
    base_us: i64,
    /// 当前段起点（微秒）
    segment_start_us: i64,
    /// 当前段内已生成的帧数
    segment_frames: u64,
    /// 当前帧率
    frame_rate: f64,
    /// 上一个时间戳
    last_pts: Option<i64>,
    /// 总帧数
    frame_count: u64,
}

impl PresentationClock {
    pub fn new(frame_rate: f64, base_us: i64) -> Self {
        let frame_rate = if frame_rate > 0.0 { frame_rate } else { 30.0 };

        debug!(
            "Creating PresentationClock: fps={:.2}, base={}us",
            frame_rate, base_us
        );

        Self {
            base_us,
            segment_start_us: base_us,
            segment_frames: 0,
            frame_rate,
            last_pts: None,
            frame_count: 0,
        }
    }

    pub fn base_us(&self) -> i64 {
        self.base_us
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }

    /// Offset of the `index`-th frame of a segment.
    fn offset_us(&self, index: u64) -> i64 {
        if self.frame_rate.fract() == 0.0 {
            // Integral rates use exact integer arithmetic
            (index as i64 * 1_000_000) / self.frame_rate as i64
        } else {
            (index as f64 * 1_000_000.0 / self.frame_rate).floor() as i64
        }
    }

    /// 生成下一个时间戳
    ///
    /// The first frame sits exactly at the base offset (132 us by default),
    /// not one frame interval after it. Reports from encoders that count
    /// from one are shifted by `1_000_000 / fps` against these.
    pub fn next_pts(&mut self) -> i64 {
        let pts = self.segment_start_us + self.offset_us(self.segment_frames);

        self.segment_frames += 1;
        self.frame_count += 1;
        self.last_pts = Some(pts);
        pts
    }

    /// 更新帧率
    ///
    /// 后续帧以新的帧间隔接在上一个时间戳之后。
    pub fn set_frame_rate(&mut self, new_fps: f64) {
        if new_fps <= 0.0 {
            warn!("Ignoring non-positive frame rate {:.2}", new_fps);
            return;
        }

        let old_fps = self.frame_rate;
        self.frame_rate = new_fps;

        match self.last_pts {
            Some(last) => {
                self.segment_start_us = last;
                self.segment_frames = 1;
            }
            None => {
                self.segment_start_us = self.base_us;
                self.segment_frames = 0;
            }
        }

        info!(
            "Presentation clock: {:.2} -> {:.2} fps, segment starts at {}us",
            old_fps, new_fps, self.segment_start_us
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pts_is_base() {
        let mut clock = PresentationClock::new(30.0, 132);
        assert_eq!(clock.next_pts(), 132);
        assert_eq!(clock.next_pts(), 132 + 33_333);
        assert_eq!(clock.next_pts(), 132 + 66_666);
        assert_eq!(clock.frame_count(), 3);
    }

    #[test]
    fn test_no_drift_over_long_run() {
        let mut clock = PresentationClock::new(30.0, 0);
        let mut last = 0;
        for _ in 0..=300 {
            last = clock.next_pts();
        }
        // 300 frames @ 30fps = exactly 10 s
        assert_eq!(last, 10_000_000);
    }

    #[test]
    fn test_fractional_rate() {
        let mut clock = PresentationClock::new(29.97, 0);
        clock.next_pts();
        assert_eq!(clock.next_pts(), 33_366);
    }

    #[test]
    fn test_rate_change_starts_new_segment() {
        let mut clock = PresentationClock::new(30.0, 132);
        clock.next_pts();
        let before = clock.next_pts();
        assert_eq!(before, 33_465);

        clock.set_frame_rate(10.0);
        assert_eq!(clock.next_pts(), before + 100_000);
        assert_eq!(clock.next_pts(), before + 200_000);
    }

    #[test]
    fn test_rate_change_before_first_frame() {
        let mut clock = PresentationClock::new(30.0, 132);
        clock.set_frame_rate(15.0);
        assert_eq!(clock.next_pts(), 132);
        assert_eq!(clock.next_pts(), 132 + 66_666);
    }

    #[test]
    fn test_invalid_rate_ignored() {
        let mut clock = PresentationClock::new(30.0, 0);
        clock.set_frame_rate(0.0);
        clock.set_frame_rate(-5.0);
        assert_eq!(clock.frame_rate(), 30.0);
    }
}
