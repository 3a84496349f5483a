// 测试用例定义
//
// 每个测试描述输入源、编码器配置和运行时动态脚本。
// 缺省值在加载后通过 `with_defaults` 补齐，再由 `build_media_format`
// 生成编码器使用的 MediaFormat。

use crate::statistics::ReportSettings;
use common::{keys, BitrateMode, MediaFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_RESOLUTION: &str = "1280x720";
pub const DEFAULT_FRAMERATE: f64 = 30.0;
pub const DEFAULT_PLAYOUT_FRAMES: u64 = 300;
pub const DEFAULT_BITRATE: &str = "1 Mbps";
pub const DEFAULT_I_FRAME_INTERVAL: i32 = 10;
pub const DEFAULT_MIME: &str = "video/avc";

#[derive(Error, Debug, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid resolution '{0}', expected <width>x<height>")]
    InvalidResolution(String),

    #[error("Invalid magnitude '{0}'")]
    InvalidMagnitude(String),

    #[error("Invalid value '{value}' for parameter {key}")]
    InvalidParameter { key: String, value: String },
}

/// 输入源设置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSettings {
    /// 原始 YUV 文件；缺省时使用合成图案
    pub path: Option<PathBuf>,
    pub resolution: Option<String>,
    pub framerate: Option<f64>,
    /// 提交帧数上限
    pub playout_frames: Option<u64>,
}

/// configure 参数值的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Long,
    Float,
    String,
}

/// 额外的编码器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureParameter {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub value: String,
}

/// 编码器设置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigureSettings {
    pub codec: String,
    pub mime: Option<String>,
    pub bitrate: Option<String>,
    pub bitrate_mode: Option<BitrateMode>,
    pub framerate: Option<f64>,
    pub i_frame_interval: Option<i32>,
    pub resolution: Option<String>,
    pub quality: Option<i32>,
    pub color_range: Option<i32>,
    pub color_standard: Option<i32>,
    pub color_transfer: Option<i32>,
    pub ltr_count: Option<i32>,
    pub hier_layers: Option<i32>,
    pub parameters: Vec<ConfigureParameter>,
}

/// 运行时设置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// 动态事件脚本，例如 "fps-10-15:bit-20-500"
    #[serde(default)]
    pub dynamic: String,
}

/// 一个测试用例
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestDefinition {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub configure: ConfigureSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl TestDefinition {
    /// 补齐最基本的设置
    pub fn with_defaults(mut self) -> Self {
        let input = &mut self.input;
        let resolution = input
            .resolution
            .get_or_insert_with(|| DEFAULT_RESOLUTION.to_string())
            .clone();
        let framerate = *input.framerate.get_or_insert(DEFAULT_FRAMERATE);
        input.playout_frames.get_or_insert(DEFAULT_PLAYOUT_FRAMES);

        let config = &mut self.configure;
        config.mime.get_or_insert_with(|| DEFAULT_MIME.to_string());
        config
            .bitrate
            .get_or_insert_with(|| DEFAULT_BITRATE.to_string());
        config.framerate.get_or_insert(framerate);
        config.i_frame_interval.get_or_insert(DEFAULT_I_FRAME_INTERVAL);
        config.resolution.get_or_insert(resolution);
        config.ltr_count.get_or_insert(1);
        self
    }

    pub fn input_resolution(&self) -> Result<(u32, u32), DefinitionError> {
        parse_resolution(self.input.resolution.as_deref().unwrap_or(DEFAULT_RESOLUTION))
    }

    pub fn encode_resolution(&self) -> Result<(u32, u32), DefinitionError> {
        match self.configure.resolution.as_deref() {
            Some(resolution) => parse_resolution(resolution),
            None => self.input_resolution(),
        }
    }

    pub fn input_framerate(&self) -> f64 {
        self.input.framerate.unwrap_or(DEFAULT_FRAMERATE)
    }

    pub fn encode_framerate(&self) -> f64 {
        self.configure.framerate.unwrap_or_else(|| self.input_framerate())
    }

    pub fn playout_frames(&self) -> u64 {
        self.input.playout_frames.unwrap_or(DEFAULT_PLAYOUT_FRAMES)
    }

    pub fn bitrate_bps(&self) -> Result<u64, DefinitionError> {
        magnitude_to_int(self.configure.bitrate.as_deref().unwrap_or(DEFAULT_BITRATE))
    }

    pub fn i_frame_interval(&self) -> i32 {
        self.configure
            .i_frame_interval
            .unwrap_or(DEFAULT_I_FRAME_INTERVAL)
    }

    /// Title used in logs and reports
    pub fn title(&self) -> String {
        if self.description.is_empty() {
            self.configure.codec.clone()
        } else {
            self.description.clone()
        }
    }

    /// 生成编码器 MediaFormat
    pub fn build_media_format(&self) -> Result<MediaFormat, DefinitionError> {
        let config = &self.configure;
        let (width, height) = self.encode_resolution()?;
        let mut format = MediaFormat::video(
            config.mime.as_deref().unwrap_or(DEFAULT_MIME),
            width,
            height,
        );

        let bitrate = self.bitrate_bps()?;
        format.set_integer(keys::BIT_RATE, bitrate.min(i32::MAX as u64) as i32);
        format.set_float(keys::FRAME_RATE, self.encode_framerate() as f32);
        if let Some(mode) = config.bitrate_mode {
            format.set_integer(keys::BITRATE_MODE, mode as i32);
        }
        if let Some(quality) = config.quality {
            format.set_integer(keys::QUALITY, quality);
        }
        format.set_integer(keys::I_FRAME_INTERVAL, self.i_frame_interval());
        if let Some(range) = config.color_range {
            format.set_integer(keys::COLOR_RANGE, range);
        }
        if let Some(transfer) = config.color_transfer {
            format.set_integer(keys::COLOR_TRANSFER, transfer);
        }
        if let Some(standard) = config.color_standard {
            format.set_integer(keys::COLOR_STANDARD, standard);
        }

        for param in &config.parameters {
            let invalid = || DefinitionError::InvalidParameter {
                key: param.key.clone(),
                value: param.value.clone(),
            };
            match param.kind {
                ParameterType::Int => {
                    let value = magnitude_to_int(&param.value).map_err(|_| invalid())?;
                    let value = i32::try_from(value).map_err(|_| invalid())?;
                    format.set_integer(&param.key, value);
                }
                ParameterType::Long => {
                    let value = param.value.trim().parse::<i64>().map_err(|_| invalid())?;
                    format.set_long(&param.key, value);
                }
                ParameterType::Float => {
                    let value = param.value.trim().parse::<f32>().map_err(|_| invalid())?;
                    format.set_float(&param.key, value);
                }
                ParameterType::String => format.set_string(&param.key, &param.value),
            }
        }

        Ok(format)
    }

    /// Settings block of the statistics report
    pub fn report_settings(&self) -> Result<ReportSettings, DefinitionError> {
        let (width, height) = self.encode_resolution()?;
        let gop = self.i_frame_interval() as f64;
        let extras: BTreeMap<String, String> = self
            .configure
            .parameters
            .iter()
            .map(|param| (param.key.clone(), param.value.clone()))
            .collect();

        Ok(ReportSettings {
            codec: self.configure.codec.clone(),
            gop,
            fps: self.encode_framerate(),
            bitrate: self.bitrate_bps()?,
            meanbitrate: 0,
            width,
            height,
            encmode: self
                .configure
                .bitrate_mode
                .map(|mode| mode.name().to_string())
                .unwrap_or_default(),
            keyrate: gop,
            extras,
        })
    }
}

/// "1280x720" -> (1280, 720)
pub fn parse_resolution(text: &str) -> Result<(u32, u32), DefinitionError> {
    let invalid = || DefinitionError::InvalidResolution(text.to_string());
    let (w, h) = text.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// 解析带量级的数值："500 kbps" -> 500000，"2M" -> 2000000
pub fn magnitude_to_int(text: &str) -> Result<u64, DefinitionError> {
    let invalid = || DefinitionError::InvalidMagnitude(text.to_string());

    let mut value = text.trim();
    if let Some(index) = value.find("bps") {
        if index > 0 {
            value = value[..index].trim();
        }
    }
    if value.is_empty() {
        return Ok(0);
    }

    let (digits, multiplier) = if let Some(number) = value.strip_suffix('k') {
        (number, 1_000)
    } else if let Some(number) = value.strip_suffix('M') {
        (number, 1_000_000)
    } else {
        (value, 1)
    };

    let number = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    number.checked_mul(multiplier).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_to_int() {
        assert_eq!(magnitude_to_int("500 kbps"), Ok(500_000));
        assert_eq!(magnitude_to_int("2M"), Ok(2_000_000));
        assert_eq!(magnitude_to_int("1 Mbps"), Ok(1_000_000));
        assert_eq!(magnitude_to_int("64000"), Ok(64_000));
        assert_eq!(magnitude_to_int(" 750k "), Ok(750_000));
        assert_eq!(magnitude_to_int(""), Ok(0));
        assert!(magnitude_to_int("fast").is_err());
        assert!(magnitude_to_int("1.5M").is_err());
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_resolution("640X480"), Ok((640, 480)));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
    }

    #[test]
    fn test_defaults_follow_input() {
        let test = TestDefinition {
            input: InputSettings {
                resolution: Some("640x360".to_string()),
                framerate: Some(60.0),
                ..InputSettings::default()
            },
            configure: ConfigureSettings {
                codec: "avc".to_string(),
                ..ConfigureSettings::default()
            },
            ..TestDefinition::default()
        }
        .with_defaults();

        assert_eq!(test.configure.resolution.as_deref(), Some("640x360"));
        assert_eq!(test.configure.framerate, Some(60.0));
        assert_eq!(test.configure.bitrate.as_deref(), Some(DEFAULT_BITRATE));
        assert_eq!(test.configure.i_frame_interval, Some(10));
        assert_eq!(test.playout_frames(), DEFAULT_PLAYOUT_FRAMES);
    }

    #[test]
    fn test_build_media_format() {
        let mut test = TestDefinition::default();
        test.configure.codec = "hevc".to_string();
        test.configure.mime = Some("video/hevc".to_string());
        test.configure.bitrate = Some("500 kbps".to_string());
        test.configure.bitrate_mode = Some(BitrateMode::Vbr);
        test.configure.resolution = Some("320x240".to_string());
        test.configure.parameters = vec![
            ConfigureParameter {
                key: "vendor.intra-refresh".to_string(),
                kind: ParameterType::Int,
                value: "2k".to_string(),
            },
            ConfigureParameter {
                key: "vendor.profile".to_string(),
                kind: ParameterType::String,
                value: "main".to_string(),
            },
        ];
        let format = test.with_defaults().build_media_format().unwrap();

        assert_eq!(format.get_string(keys::MIME), Some("video/hevc"));
        assert_eq!(format.get_integer(keys::WIDTH), Some(320));
        assert_eq!(format.get_integer(keys::BIT_RATE), Some(500_000));
        assert_eq!(format.get_integer(keys::BITRATE_MODE), Some(1));
        assert_eq!(format.get_number(keys::FRAME_RATE), Some(30.0));
        assert_eq!(format.get_integer(keys::I_FRAME_INTERVAL), Some(10));
        assert_eq!(format.get_integer("vendor.intra-refresh"), Some(2000));
        assert_eq!(format.get_string("vendor.profile"), Some("main"));
    }

    #[test]
    fn test_invalid_parameter_rejected() {
        let mut test = TestDefinition::default().with_defaults();
        test.configure.parameters.push(ConfigureParameter {
            key: "vendor.ratio".to_string(),
            kind: ParameterType::Float,
            value: "abc".to_string(),
        });
        assert!(matches!(
            test.build_media_format(),
            Err(DefinitionError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_report_settings() {
        let mut test = TestDefinition::default();
        test.configure.codec = "vp8".to_string();
        test.configure.bitrate_mode = Some(BitrateMode::Cbr);
        let settings = test.with_defaults().report_settings().unwrap();
        assert_eq!(settings.codec, "vp8");
        assert_eq!(settings.encmode, "cbr");
        assert_eq!((settings.width, settings.height), (1280, 720));
        assert_eq!(settings.bitrate, 1_000_000);
        assert_eq!(settings.gop, 10.0);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let text = r#"
            description = "bitrate ramp"

            [input]
            framerate = 30.0
            playout_frames = 60

            [configure]
            codec = "avc"
            bitrate = "2M"
            bitrate_mode = "cbr_fd"

            [[configure.parameters]]
            key = "vendor.qp-max"
            type = "int"
            value = "40"

            [runtime]
            dynamic = "bit-30-500"
        "#;
        let test: TestDefinition = toml::from_str(text).unwrap();
        assert_eq!(test.configure.bitrate_mode, Some(BitrateMode::CbrFd));
        assert_eq!(test.configure.parameters[0].kind, ParameterType::Int);
        assert_eq!(test.runtime.dynamic, "bit-30-500");
        assert_eq!(test.playout_frames(), 60);
    }
}
