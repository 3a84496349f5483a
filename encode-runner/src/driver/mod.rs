// 编码驱动 - 编码循环状态机
//
// 驱动一个编码设备完成一次编码会话：
// Initializing -> Running -> Draining -> Stopped
//
// # 核心组件
//
// - `CodecDriver`: 解析编码器名称并运行会话
// - `EncodeSession`: 单次会话的全部状态，离开作用域时释放资源
// - `StopHandle`: 跨线程请求提前结束（下一帧带 END_OF_STREAM）

pub mod output;
pub mod session;

pub use output::output_filename;
pub use session::EncodeSession;

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::statistics::FrameStatistics;
use common::{CodecInfo, DeviceFactory, FrameSource, MediaFormat, MuxerFactory};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// 请求会话提前结束
///
/// A request stays set for every later `CodecDriver::run` on the same
/// driver until `reset` is called.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the next session runs to its budget.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// 一次编码会话的输入
#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Codec identifier, matched case-insensitively against device names
    pub codec: String,
    /// Encoder configuration
    pub format: MediaFormat,
    /// Frame rate the source delivers frames at
    pub reference_fps: f64,
    pub reference_width: u32,
    pub reference_height: u32,
    /// Submission budget
    pub total_frames: u64,
    pub input_path: PathBuf,
    /// Runtime event script
    pub dynamic: String,
    pub ltr_count: i32,
    pub hier_layers: i32,
    pub output_dir: PathBuf,
}

impl EncodeJob {
    /// Bytes of one raw 4:2:0 reference frame
    pub fn frame_bytes(&self) -> usize {
        self.reference_width as usize * self.reference_height as usize * 3 / 2
    }
}

/// 会话结果
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub codec_name: String,
    pub transitions: Vec<DriverState>,
    pub frames_read: u64,
    pub frames_submitted: u64,
    pub frames_skipped: u64,
    pub frames_encoded: u64,
    pub dropped_outputs: u64,
    /// Whether the end-of-stream marker came back from the device
    pub drained: bool,
    pub output_path: Option<PathBuf>,
}

/// 编码驱动
pub struct CodecDriver {
    devices: Arc<dyn DeviceFactory>,
    muxers: Arc<dyn MuxerFactory>,
    config: DriverConfig,
    stop: StopHandle,
}

impl CodecDriver {
    pub fn new(
        devices: Arc<dyn DeviceFactory>,
        muxers: Arc<dyn MuxerFactory>,
        config: DriverConfig,
    ) -> Self {
        Self {
            devices,
            muxers,
            config,
            stop: StopHandle::new(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 按名称子串（不区分大小写）查找编码器
    pub fn resolve_codec(&self, id: &str) -> Result<CodecInfo, DriverError> {
        resolve_codec(&self.devices.codec_infos(), id)
    }

    /// 运行一次编码会话
    ///
    /// Resources are released on every exit path, including errors.
    pub fn run(
        &mut self,
        job: &EncodeJob,
        source: Box<dyn FrameSource>,
        stats: &mut FrameStatistics,
    ) -> Result<SessionSummary, DriverError> {
        info!(
            "Starting encode session: codec='{}', budget={} frames",
            job.codec, job.total_frames
        );

        let mut session = EncodeSession::new(
            self.devices.as_ref(),
            self.muxers.as_ref(),
            &self.config,
            self.stop.clone(),
            job,
            source,
            stats,
        );

        let result = session.execute();
        session.teardown();

        match result {
            Ok(()) => {
                let summary = session.summary();
                info!(
                    "✓ Session finished: {} submitted, {} skipped, {} encoded",
                    summary.frames_submitted, summary.frames_skipped, summary.frames_encoded
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Encode session failed: {}", e);
                Err(e)
            }
        }
    }
}

pub(crate) fn resolve_codec(infos: &[CodecInfo], id: &str) -> Result<CodecInfo, DriverError> {
    let needle = id.to_lowercase();
    let matches: Vec<&CodecInfo> = infos
        .iter()
        .filter(|info| info.name.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(DriverError::NoMatchingCodec(id.to_string())),
        [single] => Ok((*single).clone()),
        several => {
            // An exact name wins over partial matches
            if let Some(exact) = several
                .iter()
                .find(|info| info.name.eq_ignore_ascii_case(id))
            {
                return Ok((*exact).clone());
            }
            Err(DriverError::AmbiguousCodec {
                id: id.to_string(),
                candidates: several.iter().map(|info| info.name.clone()).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos() -> Vec<CodecInfo> {
        ["hw.avc.encoder", "hw.hevc.encoder", "hw.vp8.encoder", "hw.vp8.encoder.secure"]
            .iter()
            .map(|name| CodecInfo {
                name: name.to_string(),
                mime: "video/any".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_resolve_case_insensitive() {
        assert_eq!(resolve_codec(&infos(), "AVC").unwrap().name, "hw.avc.encoder");
        assert_eq!(resolve_codec(&infos(), "hevc").unwrap().name, "hw.hevc.encoder");
    }

    #[test]
    fn test_resolve_no_match() {
        let err = resolve_codec(&infos(), "av1").unwrap_err();
        assert_eq!(err.to_string(), "No matching codecs to: av1");
    }

    #[test]
    fn test_resolve_ambiguous() {
        let err = resolve_codec(&infos(), "encoder").unwrap_err();
        match err {
            DriverError::AmbiguousCodec { candidates, .. } => assert_eq!(candidates.len(), 4),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_resolve_exact_name_wins() {
        assert_eq!(
            resolve_codec(&infos(), "hw.vp8.encoder").unwrap().name,
            "hw.vp8.encoder"
        );
    }

    #[test]
    fn test_stop_handle_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stop_requested());
        clone.request_stop();
        assert!(handle.is_stop_requested());

        handle.reset();
        assert!(!clone.is_stop_requested());
    }

    #[test]
    fn test_frame_bytes() {
        let job = EncodeJob {
            codec: "avc".to_string(),
            format: MediaFormat::new(),
            reference_fps: 30.0,
            reference_width: 1280,
            reference_height: 720,
            total_frames: 0,
            input_path: PathBuf::new(),
            dynamic: String::new(),
            ltr_count: 1,
            hier_layers: 0,
            output_dir: PathBuf::new(),
        };
        assert_eq!(job.frame_bytes(), 1_382_400);
    }
}
