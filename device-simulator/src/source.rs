// 原始帧源
//
// YuvFileSource 从 YUV 文件顺序读取定长帧；
// PatternFrameSource 生成测试图案，无需输入文件。

use common::{CodecError, FrameSource, Result};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use tracing::{debug, info};

/// Reads consecutive frames from a raw YUV file
#[derive(Default)]
pub struct YuvFileSource {
    reader: Option<BufReader<File>>,
    bytes_read: u64,
}

impl YuvFileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for YuvFileSource {
    fn open(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| {
            CodecError::Source(format!("Failed to open {}: {}", path.display(), e))
        })?;
        info!("Opened frame source {}", path.display());
        self.reader = Some(BufReader::new(file));
        self.bytes_read = 0;
        Ok(())
    }

    fn fill(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CodecError::Source("frame source is not open".to_string()))?;

        let mut filled = 0;
        while filled < buffer.len() {
            match reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.bytes_read += filled as u64;
        Ok(filled)
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Closed frame source after {} bytes", self.bytes_read);
        }
    }
}

/// Synthesizes frames: a moving luma gradient over neutral chroma
pub struct PatternFrameSource {
    total_frames: Option<u64>,
    produced: u64,
    opened: bool,
}

impl PatternFrameSource {
    /// `total_frames` of `None` never runs dry.
    pub fn new(total_frames: Option<u64>) -> Self {
        Self {
            total_frames,
            produced: 0,
            opened: false,
        }
    }
}

impl FrameSource for PatternFrameSource {
    fn open(&mut self, path: &Path) -> Result<()> {
        debug!("Pattern source ignores path {}", path.display());
        self.opened = true;
        self.produced = 0;
        Ok(())
    }

    fn fill(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(CodecError::Source("frame source is not open".to_string()));
        }
        if self.total_frames.is_some_and(|total| self.produced >= total) {
            return Ok(0);
        }

        // 4:2:0 layout: luma takes two thirds of the frame
        let luma = buffer.len() * 2 / 3;
        let shift = self.produced as usize;
        for (i, byte) in buffer[..luma].iter_mut().enumerate() {
            *byte = ((i + shift) & 0xff) as u8;
        }
        buffer[luma..].fill(128);

        self.produced += 1;
        Ok(buffer.len())
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
