// 帧统计模块
//
// 本模块记录每一帧的编码/解码耗时和大小，包括：
// - 按 pts 索引的编码帧账本和解码帧账本（两者互不合并）
// - 平均码率计算
// - JSON 报告和 CSV 行输出

use chrono::{DateTime, Utc};
use common::MediaFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// 单帧记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub pts: i64,
    pub size: u64,
    pub is_key_frame: bool,
    pub flags: u32,
    pub start_time_ns: u64,
    pub stop_time_ns: Option<u64>,
}

impl FrameRecord {
    /// 处理耗时（纳秒），未结束的帧为0
    pub fn processing_time_ns(&self) -> u64 {
        self.stop_time_ns
            .map(|stop| stop.saturating_sub(self.start_time_ns))
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.stop_time_ns.is_some()
    }
}

/// 按 pts 排序的帧账本
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    records: BTreeMap<i64, FrameRecord>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一帧；相同 pts 的旧记录被替换
    pub fn start_frame(&mut self, pts: i64, size: u64, flags: u32, now_ns: u64) {
        self.records.insert(
            pts,
            FrameRecord {
                pts,
                size,
                is_key_frame: false,
                flags,
                start_time_ns: now_ns,
                stop_time_ns: None,
            },
        );
    }

    /// 结束一帧；未知 pts 不做任何事。返回是否找到记录。
    pub fn stop_frame(&mut self, pts: i64, now_ns: u64) -> bool {
        match self.records.get_mut(&pts) {
            Some(record) => {
                record.stop_time_ns = Some(now_ns.max(record.start_time_ns));
                true
            }
            None => {
                debug!("No open frame for pts {}", pts);
                false
            }
        }
    }

    fn record_mut(&mut self, pts: i64) -> Option<&mut FrameRecord> {
        self.records.get_mut(&pts)
    }

    pub fn get(&self, pts: i64) -> Option<&FrameRecord> {
        self.records.get(&pts)
    }

    /// 按 pts 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 平均码率（bps）
    ///
    /// 最后一帧的大小不计入，时长取首尾 pts 之差。
    pub fn average_bitrate(&self) -> u64 {
        if self.records.len() < 2 {
            return 0;
        }

        let (Some(first), Some(last)) = (self.records.values().next(), self.records.values().last())
        else {
            return 0;
        };

        let elapsed_s = (last.pts - first.pts) as f64 / 1_000_000.0;
        if elapsed_s <= 0.0 {
            return 0;
        }

        let total: u64 = self.records.values().map(|r| r.size).sum::<u64>() - last.size;
        (8.0 * total as f64 / elapsed_s).round() as u64
    }
}

/// 报告中的编码设置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportSettings {
    pub codec: String,
    pub gop: f64,
    pub fps: f64,
    pub bitrate: u64,
    pub meanbitrate: u64,
    pub width: u32,
    pub height: u32,
    pub encmode: String,
    pub keyrate: f64,
    /// 额外的 configure 参数
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedFrameEntry {
    pub frame: usize,
    pub iframe: u8,
    pub size: u64,
    pub pts: i64,
    pub proctime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodedFrameEntry {
    pub frame: usize,
    pub flags: u32,
    pub size: u64,
    pub pts: i64,
    pub proctime: u64,
}

/// 会话统计报告（JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub id: String,
    pub description: String,
    pub test: String,
    pub date: DateTime<Utc>,
    pub proctime: u64,
    pub framecount: usize,
    pub encodedfile: String,
    pub settings: ReportSettings,
    pub encoder_media_format: MediaFormat,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub decoder_media_format: Option<MediaFormat>,
    pub frames: Vec<EncodedFrameEntry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub decoded_frames: Option<Vec<DecodedFrameEntry>>,
}

/// 会话统计
pub struct FrameStatistics {
    id: String,
    description: String,
    test: String,
    date: DateTime<Utc>,
    epoch: Instant,
    start_ns: Option<u64>,
    stop_ns: Option<u64>,
    encoded_file: String,
    settings: ReportSettings,
    encoder_format: MediaFormat,
    decoder_format: Option<MediaFormat>,
    encoding: FrameLedger,
    decoding: FrameLedger,
}

impl FrameStatistics {
    pub fn new(description: &str, test: &str, settings: ReportSettings) -> Self {
        Self {
            id: format!("encapp_{}", Uuid::new_v4()),
            description: description.to_string(),
            test: test.to_string(),
            date: Utc::now(),
            epoch: Instant::now(),
            start_ns: None,
            stop_ns: None,
            encoded_file: String::new(),
            settings,
            encoder_format: MediaFormat::new(),
            decoder_format: None,
            encoding: FrameLedger::new(),
            decoding: FrameLedger::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub fn start(&mut self) {
        self.start_ns = Some(self.now_ns());
    }

    pub fn stop(&mut self) {
        self.stop_ns = Some(self.now_ns());
    }

    /// 会话总处理时间（纳秒）
    pub fn processing_time_ns(&self) -> u64 {
        match (self.start_ns, self.stop_ns) {
            (Some(start), Some(stop)) => stop.saturating_sub(start),
            _ => 0,
        }
    }

    pub fn start_encoding_frame(&mut self, pts: i64) {
        let now = self.now_ns();
        self.encoding.start_frame(pts, 0, 0, now);
    }

    pub fn stop_encoding_frame(&mut self, pts: i64, size: u64, is_key_frame: bool) {
        let now = self.now_ns();
        if self.encoding.stop_frame(pts, now) {
            if let Some(record) = self.encoding.record_mut(pts) {
                record.size = size;
                record.is_key_frame = is_key_frame;
            }
        }
    }

    pub fn start_decoding_frame(&mut self, pts: i64, size: u64, flags: u32) {
        let now = self.now_ns();
        self.decoding.start_frame(pts, size, flags, now);
    }

    pub fn stop_decoding_frame(&mut self, pts: i64) {
        let now = self.now_ns();
        self.decoding.stop_frame(pts, now);
    }

    pub fn set_encoded_file(&mut self, name: &str) {
        self.encoded_file = name.to_string();
    }

    pub fn set_codec(&mut self, codec: &str) {
        self.settings.codec = codec.to_string();
    }

    pub fn set_encoder_format(&mut self, format: MediaFormat) {
        self.encoder_format = format;
    }

    pub fn set_decoder_format(&mut self, format: MediaFormat) {
        self.decoder_format = Some(format);
    }

    pub fn encoding(&self) -> &FrameLedger {
        &self.encoding
    }

    pub fn decoding(&self) -> &FrameLedger {
        &self.decoding
    }

    pub fn encoded_frame_count(&self) -> usize {
        self.encoding.len()
    }

    pub fn average_bitrate(&self) -> u64 {
        self.encoding.average_bitrate()
    }

    pub fn to_report(&self) -> StatisticsReport {
        let mut settings = self.settings.clone();
        settings.meanbitrate = self.average_bitrate();

        let frames = self
            .encoding
            .iter()
            .enumerate()
            .map(|(frame, record)| EncodedFrameEntry {
                frame,
                iframe: u8::from(record.is_key_frame),
                size: record.size,
                pts: record.pts,
                proctime: record.processing_time_ns(),
            })
            .collect();

        let decoded_frames = (!self.decoding.is_empty()).then(|| {
            self.decoding
                .iter()
                .filter(|record| record.processing_time_ns() > 0)
                .enumerate()
                .map(|(frame, record)| DecodedFrameEntry {
                    frame,
                    flags: record.flags,
                    size: record.size,
                    pts: record.pts,
                    proctime: record.processing_time_ns(),
                })
                .collect()
        });

        let decoder_media_format = if self.decoding.is_empty() {
            None
        } else {
            Some(self.decoder_format.clone().unwrap_or_default())
        };

        StatisticsReport {
            id: self.id.clone(),
            description: self.description.clone(),
            test: self.test.clone(),
            date: self.date,
            proctime: self.processing_time_ns(),
            framecount: self.encoded_frame_count(),
            encodedfile: self.encoded_file.clone(),
            settings,
            encoder_media_format: self.encoder_format.clone(),
            decoder_media_format,
            frames,
            decoded_frames,
        }
    }

    /// 以缩进 JSON 写出报告
    pub fn write_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, &self.to_report())
    }

    /// 每个编码帧一行：id, index, iframe, size, pts, proctime
    pub fn csv_lines(&self) -> Vec<String> {
        self.encoding
            .iter()
            .enumerate()
            .map(|(index, record)| {
                format!(
                    "{}, {}, {}, {}, {}, {}",
                    self.id,
                    index,
                    record.is_key_frame,
                    record.size,
                    record.pts,
                    record.processing_time_ns()
                )
            })
            .collect()
    }
}
