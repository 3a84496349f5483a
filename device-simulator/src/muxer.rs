// 封装器
//
// ElementaryStreamMuxer 将编码后的样本按顺序写入文件（单轨道）；
// MemoryMuxerFactory 只记录写入的样本，用于测试。

use common::{BufferInfo, CodecError, ContainerFormat, MediaFormat, Muxer, MuxerFactory, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Writes samples of track 0 back to back into a single file
pub struct ElementaryStreamMuxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    samples: u64,
    bytes: u64,
}

impl ElementaryStreamMuxer {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .map_err(|e| CodecError::Sink(format!("Failed to create {}: {}", path.display(), e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            samples: 0,
            bytes: 0,
        })
    }
}

impl Muxer for ElementaryStreamMuxer {
    fn write_sample(&mut self, track_index: usize, data: &[u8], _info: &BufferInfo) -> Result<()> {
        if track_index != 0 {
            return Err(CodecError::Sink(format!("unknown track {}", track_index)));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CodecError::Sink("muxer already stopped".to_string()))?;

        writer.write_all(data)?;
        self.samples += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush()?;
                info!(
                    "✓ Wrote {} samples ({} bytes) to {}",
                    self.samples,
                    self.bytes,
                    self.path.display()
                );
                Ok(())
            }
            None => Err(CodecError::Sink("muxer already stopped".to_string())),
        }
    }

    fn release(&mut self) {
        self.writer = None;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElementaryStreamMuxerFactory;

impl MuxerFactory for ElementaryStreamMuxerFactory {
    fn create(
        &self,
        path: &Path,
        container: ContainerFormat,
        format: &MediaFormat,
    ) -> Result<Box<dyn Muxer>> {
        debug!("Creating {:?} sink {} for [{}]", container, path.display(), format);
        Ok(Box::new(ElementaryStreamMuxer::create(path)?))
    }
}

/// One sample observed by a memory muxer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxedSample {
    pub track: usize,
    pub presentation_time_us: i64,
    pub size: usize,
    pub flags: u32,
}

/// Everything the memory muxers created by one factory have seen
#[derive(Debug, Clone, Default)]
pub struct MuxLog {
    pub created: Vec<(PathBuf, ContainerFormat, MediaFormat)>,
    pub samples: Vec<MuxedSample>,
    pub stopped: u32,
    pub released: u32,
}

/// Factory whose muxers only record what they are given
#[derive(Debug, Clone, Default)]
pub struct MemoryMuxerFactory {
    log: Arc<Mutex<MuxLog>>,
}

impl MemoryMuxerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MuxLog {
        lock(&self.log).clone()
    }
}

fn lock(log: &Mutex<MuxLog>) -> std::sync::MutexGuard<'_, MuxLog> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MemoryMuxer {
    log: Arc<Mutex<MuxLog>>,
}

impl Muxer for MemoryMuxer {
    fn write_sample(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if track_index != 0 {
            return Err(CodecError::Sink(format!("unknown track {}", track_index)));
        }
        lock(&self.log).samples.push(MuxedSample {
            track: track_index,
            presentation_time_us: info.presentation_time_us,
            size: data.len(),
            flags: info.flags,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        lock(&self.log).stopped += 1;
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.log).released += 1;
    }
}

impl MuxerFactory for MemoryMuxerFactory {
    fn create(
        &self,
        path: &Path,
        container: ContainerFormat,
        format: &MediaFormat,
    ) -> Result<Box<dyn Muxer>> {
        lock(&self.log)
            .created
            .push((path.to_path_buf(), container, format.clone()));
        Ok(Box::new(MemoryMuxer {
            log: Arc::clone(&self.log),
        }))
    }
}
