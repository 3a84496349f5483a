// 测试执行
//
// 把一个 `TestDefinition` 变成 `EncodeJob`，运行编码会话，
// 然后把统计报告写到输出目录下的 `<id>.json`。

use crate::driver::{CodecDriver, EncodeJob, SessionSummary};
use crate::error::DriverError;
use crate::statistics::FrameStatistics;
use crate::test_definition::{DefinitionError, TestDefinition};
use common::FrameSource;
use device_simulator::{PatternFrameSource, YuvFileSource};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid test definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Failed to write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// 一个测试的结果
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub title: String,
    pub stats_id: String,
    pub report_path: PathBuf,
    pub summary: SessionSummary,
}

/// Session input for `test`, writing encoded output into `output_dir`
pub fn build_job(test: &TestDefinition, output_dir: &Path) -> Result<EncodeJob, RunError> {
    let test = test.clone().with_defaults();
    let (reference_width, reference_height) = test.input_resolution()?;

    Ok(EncodeJob {
        codec: test.configure.codec.clone(),
        format: test.build_media_format()?,
        reference_fps: test.input_framerate(),
        reference_width,
        reference_height,
        total_frames: test.playout_frames(),
        input_path: test
            .input
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("pattern")),
        dynamic: test.runtime.dynamic.clone(),
        ltr_count: test.configure.ltr_count.unwrap_or(1),
        hier_layers: test.configure.hier_layers.unwrap_or(0),
        output_dir: output_dir.to_path_buf(),
    })
}

fn frame_source(test: &TestDefinition) -> Box<dyn FrameSource> {
    match &test.input.path {
        Some(_) => Box::new(YuvFileSource::new()),
        None => Box::new(PatternFrameSource::new(None)),
    }
}

/// 运行一个测试并写出报告
pub fn run_test(
    driver: &mut CodecDriver,
    test: &TestDefinition,
    output_dir: &Path,
) -> Result<TestOutcome, RunError> {
    let normalized = test.clone().with_defaults();
    let title = normalized.title();
    let job = build_job(&normalized, output_dir)?;

    let mut stats = FrameStatistics::new(
        &title,
        &normalized.configure.codec,
        normalized.report_settings()?,
    );

    info!("Running test '{}' ({})", title, stats.id());
    let summary = driver.run(&job, frame_source(&normalized), &mut stats)?;

    fs::create_dir_all(output_dir).map_err(|source| RunError::Report {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let report_path = output_dir.join(format!("{}.json", stats.id()));
    let file = File::create(&report_path).map_err(|source| RunError::Report {
        path: report_path.clone(),
        source,
    })?;
    stats.write_json(BufWriter::new(file))?;

    info!(
        "✓ Test '{}': {} frames, average bitrate {} bps, report {}",
        title,
        stats.encoded_frame_count(),
        stats.average_bitrate(),
        report_path.display()
    );

    Ok(TestOutcome {
        title,
        stats_id: stats.id().to_string(),
        report_path,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::test_definition::{ConfigureSettings, InputSettings, RuntimeSettings};
    use common::keys;
    use device_simulator::{MemoryMuxerFactory, SimulatedDeviceFactory};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn small_test(codec: &str) -> TestDefinition {
        TestDefinition {
            description: format!("{} smoke", codec),
            input: InputSettings {
                path: None,
                resolution: Some("64x48".to_string()),
                framerate: Some(30.0),
                playout_frames: Some(12),
            },
            configure: ConfigureSettings {
                codec: codec.to_string(),
                bitrate: Some("200k".to_string()),
                ..ConfigureSettings::default()
            },
            runtime: RuntimeSettings::default(),
        }
    }

    #[test]
    fn test_build_job_uses_defaults() {
        let job = build_job(&small_test("avc"), Path::new("/tmp/out")).unwrap();
        assert_eq!(job.reference_width, 64);
        assert_eq!(job.reference_height, 48);
        assert_eq!(job.total_frames, 12);
        assert_eq!(job.ltr_count, 1);
        assert_eq!(job.format.get_integer(keys::BIT_RATE), Some(200_000));
        assert_eq!(job.input_path, PathBuf::from("pattern"));
    }

    #[test]
    fn test_build_job_rejects_bad_resolution() {
        let mut test = small_test("avc");
        test.input.resolution = Some("wide".to_string());
        assert!(matches!(
            build_job(&test, Path::new("out")),
            Err(RunError::Definition(DefinitionError::InvalidResolution(_)))
        ));
    }

    #[test]
    fn test_run_writes_report() {
        let dir = TempDir::new().unwrap();
        let muxers = MemoryMuxerFactory::new();
        let mut driver = CodecDriver::new(
            Arc::new(SimulatedDeviceFactory::new()),
            Arc::new(muxers.clone()),
            DriverConfig::default(),
        );

        let outcome = run_test(&mut driver, &small_test("avc"), dir.path()).unwrap();
        assert_eq!(outcome.summary.frames_submitted, 12);
        assert!(outcome.report_path.exists());

        let text = std::fs::read_to_string(&outcome.report_path).unwrap();
        let report: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(report["id"], outcome.stats_id.as_str());
        assert_eq!(report["framecount"], 12);
        assert_eq!(report["frames"][0]["pts"], 132);
    }
}
