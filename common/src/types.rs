use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 格式键名
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const BIT_RATE: &str = "bitrate";
    pub const BITRATE_MODE: &str = "bitrate-mode";
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    pub const STRIDE: &str = "stride";
    pub const SLICE_HEIGHT: &str = "slice-height";
    pub const QUALITY: &str = "quality";
    pub const COLOR_RANGE: &str = "color-range";
    pub const COLOR_STANDARD: &str = "color-standard";
    pub const COLOR_TRANSFER: &str = "color-transfer";

    // Vendor extensions for long-term reference control
    pub const LTR_NUM_FRAMES: &str = "vendor.qti-ext-enc-ltr-count.num-ltr-frames";
    pub const LTR_MARK_FRAME: &str = "vendor.qti-ext-enc-ltr.mark-frame";
    pub const LTR_USE_FRAME: &str = "vendor.qti-ext-enc-ltr.use-frame";
    pub const HIER_STRUCT_LAYERS: &str = "vendor.qti-ext-enc-hier-struct.layers";
}

/// A single typed format value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Str(String),
}

impl FormatValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FormatValue::Int(v) => Some(*v as f64),
            FormatValue::Long(v) => Some(*v as f64),
            FormatValue::Float(v) => Some(*v as f64),
            FormatValue::Str(_) => None,
        }
    }
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int(v) => write!(f, "{}", v),
            FormatValue::Long(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Keyed description of a codec or stream format.
///
/// Used both as the configuration handed to a device and as the
/// format a device reports for its input and output ports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        let mut format = Self::new();
        format.set_string(keys::MIME, mime);
        format.set_integer(keys::WIDTH, width as i32);
        format.set_integer(keys::HEIGHT, height as i32);
        format
    }

    pub fn set_integer(&mut self, key: &str, value: i32) {
        self.entries.insert(key.to_string(), FormatValue::Int(value));
    }

    pub fn set_long(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Long(value));
    }

    pub fn set_float(&mut self, key: &str, value: f32) {
        self.entries.insert(key.to_string(), FormatValue::Float(value));
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), FormatValue::Str(value.to_string()));
    }

    pub fn set(&mut self, key: &str, value: FormatValue) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn get_integer(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(FormatValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Any numeric value, whatever type it was stored with.
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(FormatValue::as_f64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy `key` from `other` unless this format already carries it.
    /// Returns true when a value was inserted.
    pub fn fill_from(&mut self, other: &MediaFormat, key: &str) -> bool {
        if self.contains_key(key) {
            return false;
        }
        match other.get(key) {
            Some(value) => {
                self.entries.insert(key.to_string(), value.clone());
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// 缓冲区标志位
pub mod buffer_flags {
    pub const KEY_FRAME: u32 = 0b0000_0001;
    pub const CODEC_CONFIG: u32 = 0b0000_0010;
    pub const END_OF_STREAM: u32 = 0b0000_0100;
}

/// Metadata attached to a buffer crossing the codec boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: u32,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: u32) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags & buffer_flags::KEY_FRAME != 0
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags & buffer_flags::CODEC_CONFIG != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & buffer_flags::END_OF_STREAM != 0
    }
}

/// Result of polling a device's output side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Nothing ready within the timeout
    TryAgainLater,
    /// The device changed its output format; query it again
    FormatChanged,
    /// An output slot holding data (or a marker) is ready
    Buffer { index: usize, info: BufferInfo },
}

/// A parameter changed on a running device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecParameter {
    VideoBitrate(u32),
    LtrMarkFrame(i32),
    LtrUseFrame(i32),
    RequestSyncFrame,
}

impl CodecParameter {
    pub fn key(&self) -> &'static str {
        match self {
            CodecParameter::VideoBitrate(_) => "video-bitrate",
            CodecParameter::LtrMarkFrame(_) => keys::LTR_MARK_FRAME,
            CodecParameter::LtrUseFrame(_) => keys::LTR_USE_FRAME,
            CodecParameter::RequestSyncFrame => "request-sync",
        }
    }
}

/// Name and supported type of an available encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub name: String,
    pub mime: String,
}

/// Output container family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
}

impl ContainerFormat {
    /// VP8/VP9 encoders go into WebM, everything else into MP4.
    pub fn for_codec(codec_name: &str) -> Self {
        if codec_name.to_lowercase().contains("vp") {
            ContainerFormat::Webm
        } else {
            ContainerFormat::Mp4
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }
}

/// Rate control mode, numbered as the encoder expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateMode {
    Cq = 0,
    Vbr = 1,
    Cbr = 2,
    CbrFd = 3,
}

impl BitrateMode {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(BitrateMode::Cq),
            1 => Some(BitrateMode::Vbr),
            2 => Some(BitrateMode::Cbr),
            3 => Some(BitrateMode::CbrFd),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BitrateMode::Cq => "cq",
            BitrateMode::Vbr => "vbr",
            BitrateMode::Cbr => "cbr",
            BitrateMode::CbrFd => "cbr_fd",
        }
    }
}
