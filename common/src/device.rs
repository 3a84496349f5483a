use crate::error::Result;
use crate::types::{
    BufferInfo, CodecInfo, CodecParameter, ContainerFormat, MediaFormat, OutputEvent,
};
use std::path::Path;
use std::time::Duration;

/// Buffer-exchange interface of an encoder device.
///
/// Input and output are bounded slot queues. Dequeue calls block for at
/// most `timeout` and report "not ready" instead of failing when no slot
/// is available.
pub trait CodecDevice: Send {
    fn name(&self) -> &str;
    fn configure(&mut self, format: &MediaFormat) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn input_format(&self) -> MediaFormat;
    fn output_format(&self) -> MediaFormat;

    /// Index of a free input slot, `None` on timeout.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent>;
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;
    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    /// Apply live parameters; all entries take effect together.
    fn set_parameters(&mut self, params: &[CodecParameter]) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
    fn release(&mut self);
}

/// Enumerates and instantiates encoder devices by name
pub trait DeviceFactory: Send + Sync {
    fn codec_infos(&self) -> Vec<CodecInfo>;
    fn create_by_name(&self, name: &str) -> Result<Box<dyn CodecDevice>>;
}

/// Sequential supplier of fixed-size raw frames
pub trait FrameSource: Send {
    fn open(&mut self, path: &Path) -> Result<()>;
    /// Fill `buffer` with the next frame. Returns the number of bytes
    /// written; 0 means the source is exhausted.
    fn fill(&mut self, buffer: &mut [u8]) -> Result<usize>;
    fn close(&mut self);
}

/// Container writer fed with encoded samples
pub trait Muxer: Send {
    fn write_sample(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn release(&mut self);
}

/// Creates started muxers with a single video track (track 0)
pub trait MuxerFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        container: ContainerFormat,
        format: &MediaFormat,
    ) -> Result<Box<dyn Muxer>>;
}
