// 编码会话
//
// 一次会话的全部可变状态都在 `EncodeSession` 中：设备、封装器、帧源、
// 抽帧器、事件调度器和计数器。每轮循环最多提交一帧、取出一个输出，
// 均以 poll_timeout 为上限阻塞。

use super::output::output_filename;
use super::{resolve_codec, DriverState, EncodeJob, SessionSummary, StopHandle};
use crate::config::DriverConfig;
use crate::dynamic::{DynamicEventScheduler, ParameterChange};
use crate::error::DriverError;
use crate::framerate::{FrameTimer, PacingDecision};
use crate::statistics::FrameStatistics;
use common::{
    buffer_flags, keys, BufferInfo, CodecDevice, CodecError, CodecParameter, ContainerFormat,
    DeviceFactory, FrameSource, MediaFormat, Muxer, MuxerFactory, OutputEvent,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Keys vendor encoders tend to leave out of their output format
const SINK_FORMAT_KEYS: [&str; 3] = [keys::FRAME_RATE, keys::BITRATE_MODE, keys::I_FRAME_INTERVAL];

pub struct EncodeSession<'a> {
    devices: &'a dyn DeviceFactory,
    muxers: &'a dyn MuxerFactory,
    config: &'a DriverConfig,
    stop: StopHandle,
    job: &'a EncodeJob,
    stats: &'a mut FrameStatistics,

    device: Option<Box<dyn CodecDevice>>,
    device_started: bool,
    sink: Option<Box<dyn Muxer>>,
    source: Option<Box<dyn FrameSource>>,

    state: DriverState,
    transitions: Vec<DriverState>,
    torn_down: bool,

    codec_name: String,
    configured_format: MediaFormat,
    is_vp: bool,
    sync_interval: u64,
    output_path: Option<PathBuf>,

    timer: FrameTimer,
    scheduler: DynamicEventScheduler,

    submission_open: bool,
    frames_read: u64,
    frames_submitted: u64,
    buffers_queued: u64,
    frames_encoded: u64,
    dropped_outputs: u64,
    drained: bool,
    last_progress: Instant,
}

impl<'a> EncodeSession<'a> {
    pub fn new(
        devices: &'a dyn DeviceFactory,
        muxers: &'a dyn MuxerFactory,
        config: &'a DriverConfig,
        stop: StopHandle,
        job: &'a EncodeJob,
        source: Box<dyn FrameSource>,
        stats: &'a mut FrameStatistics,
    ) -> Self {
        let target_fps = job
            .format
            .get_number(keys::FRAME_RATE)
            .unwrap_or(job.reference_fps);

        Self {
            devices,
            muxers,
            config,
            stop,
            job,
            stats,
            device: None,
            device_started: false,
            sink: None,
            source: Some(source),
            state: DriverState::Initializing,
            transitions: vec![DriverState::Initializing],
            torn_down: false,
            codec_name: job.codec.clone(),
            configured_format: job.format.clone(),
            is_vp: false,
            sync_interval: 0,
            output_path: None,
            timer: FrameTimer::new(job.reference_fps, target_fps, config.base_pts_offset_us),
            scheduler: DynamicEventScheduler::parse(&job.dynamic),
            submission_open: true,
            frames_read: 0,
            frames_submitted: 0,
            buffers_queued: 0,
            frames_encoded: 0,
            dropped_outputs: 0,
            drained: false,
            last_progress: Instant::now(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        if self.state == next {
            return;
        }
        info!("Session state: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    fn device(&mut self) -> Result<&mut Box<dyn CodecDevice>, DriverError> {
        self.device
            .as_mut()
            .ok_or_else(|| DriverError::Device(CodecError::InvalidState("no device".to_string())))
    }

    /// Initialize, then run the encode loop until Stopped.
    pub fn execute(&mut self) -> Result<(), DriverError> {
        self.stats.start();
        let result = self.initialize().and_then(|()| self.encode_loop());
        self.stats.stop();
        result
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        let job = self.job;

        if let Some(source) = self.source.as_mut() {
            source
                .open(&job.input_path)
                .map_err(|source| DriverError::SourceOpen {
                    path: job.input_path.display().to_string(),
                    source,
                })?;
        }

        let info = resolve_codec(&self.devices.codec_infos(), &job.codec)?;
        self.codec_name = info.name.clone();
        self.is_vp = info.name.to_lowercase().contains(".vp");
        self.stats.set_codec(&info.name);
        info!("Using codec {} ({})", info.name, info.mime);

        let device = self
            .devices
            .create_by_name(&info.name)
            .map_err(|source| DriverError::DeviceCreate {
                name: info.name.clone(),
                source,
            })?;
        self.device = Some(device);

        let mut format = job.format.clone();
        format.set_string(keys::MIME, &info.mime);
        if self.scheduler.uses_ltr() {
            format.set_integer(keys::LTR_NUM_FRAMES, job.ltr_count);
        }
        if job.hier_layers > 0 {
            format.set_integer(keys::HIER_STRUCT_LAYERS, job.hier_layers);
        }
        info!("Configure: {}", format);

        let name = info.name.clone();
        let device = self.device()?;
        device
            .configure(&format)
            .map_err(|e| DriverError::Configure {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        device.start().map_err(|e| DriverError::Start {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        self.device_started = true;

        let input_format = self.device()?.input_format();
        let width = input_format.get_integer(keys::WIDTH).unwrap_or(0);
        let height = input_format.get_integer(keys::HEIGHT).unwrap_or(0);
        let stride = input_format.get_integer(keys::STRIDE).unwrap_or(width);
        let slice_height = input_format.get_integer(keys::SLICE_HEIGHT).unwrap_or(height);
        info!(
            "Input format: {}x{}, stride {}, slice height {}",
            width, height, stride, slice_height
        );

        let frame_rate = format.get_number(keys::FRAME_RATE).unwrap_or(0.0);
        let i_frame_interval = format.get_number(keys::I_FRAME_INTERVAL).unwrap_or(0.0);
        self.sync_interval = if self.is_vp && i_frame_interval > 0.0 {
            (frame_rate * i_frame_interval).round() as u64
        } else {
            0
        };

        self.configured_format = format;
        let output_format = self.device()?.output_format();
        self.stats.set_encoder_format(output_format);

        // VP encoders never emit a codec-config buffer
        if self.is_vp {
            self.create_sink()?;
        }

        Ok(())
    }

    fn encode_loop(&mut self) -> Result<(), DriverError> {
        if self.job.total_frames == 0 {
            self.submission_open = false;
            self.transition(DriverState::Draining);
        } else {
            self.transition(DriverState::Running);
        }
        self.last_progress = Instant::now();

        while self.state != DriverState::Stopped {
            let mut progressed = false;

            if self.state == DriverState::Running {
                if self.submission_open {
                    progressed |= self.submit_frame()?;
                }
                if !self.submission_open {
                    self.transition(DriverState::Draining);
                }
            }

            if self.state == DriverState::Draining && self.buffers_queued == 0 {
                // Nothing was ever handed to the device
                self.drained = true;
                self.transition(DriverState::Stopped);
                break;
            }

            progressed |= self.drain_output()?;

            if progressed {
                self.last_progress = Instant::now();
            } else if self.last_progress.elapsed() >= self.config.idle_timeout {
                let idle_ms = self.config.idle_timeout.as_millis() as u64;
                match self.state {
                    DriverState::Running => return Err(DriverError::Stalled { idle_ms }),
                    DriverState::Draining => {
                        warn!(
                            "No end-of-stream from {} after {} ms, giving up drain",
                            self.codec_name, idle_ms
                        );
                        self.drained = false;
                        self.transition(DriverState::Stopped);
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Submit at most one kept frame. Returns true when a buffer was queued.
    fn submit_frame(&mut self) -> Result<bool, DriverError> {
        let poll_timeout = self.config.poll_timeout;
        let Some(index) = self.device()?.dequeue_input_buffer(poll_timeout)? else {
            return Ok(false);
        };

        let frame_bytes = self.job.frame_bytes();
        loop {
            let read = self.read_frame(index, frame_bytes)?;

            if read == 0 {
                info!(
                    "Frame source exhausted after {} frames, signalling end of stream",
                    self.frames_read
                );
                let pts = self.timer.next_pts();
                self.queue_with_retry(index, 0, pts, buffer_flags::END_OF_STREAM)?;
                self.buffers_queued += 1;
                self.submission_open = false;
                return Ok(true);
            }

            let input_index = self.frames_read;
            self.frames_read += 1;

            if self.config.events_on_dropped_frames {
                self.apply_due_events(input_index)?;
            }
            if self.timer.decide(input_index) == PacingDecision::Drop {
                // Reuse the same slot for the next frame
                continue;
            }
            if !self.config.events_on_dropped_frames {
                self.apply_due_events(input_index)?;
            }

            if self.sync_interval > 0
                && self.frames_submitted > 0
                && self.frames_submitted % self.sync_interval == 0
            {
                debug!("Requesting sync frame at submitted frame {}", self.frames_submitted);
                self.device()?
                    .set_parameters(&[CodecParameter::RequestSyncFrame])?;
            }

            let pts = self.timer.next_pts();
            let last_budgeted = self.frames_submitted + 1 >= self.job.total_frames;
            let stop_requested = self.stop.is_stop_requested();
            let end_of_stream = last_budgeted || stop_requested;
            let flags = if end_of_stream {
                buffer_flags::END_OF_STREAM
            } else {
                0
            };
            if stop_requested {
                info!("Stop requested, flagging frame {} as end of stream", input_index);
            }

            self.queue_with_retry(index, read, pts, flags)?;
            self.stats.start_encoding_frame(pts);
            self.frames_submitted += 1;
            self.buffers_queued += 1;
            debug!(
                "Queued input frame {} as #{} (pts {}, {} bytes)",
                input_index, self.frames_submitted, pts, read
            );

            if end_of_stream {
                self.submission_open = false;
            }
            return Ok(true);
        }
    }

    fn read_frame(&mut self, index: usize, frame_bytes: usize) -> Result<usize, DriverError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| DriverError::Device(CodecError::InvalidState("no device".to_string())))?;
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| DriverError::Device(CodecError::Source("source closed".to_string())))?;

        let slot = device.input_buffer(index)?;
        if slot.len() < frame_bytes {
            return Err(DriverError::FrameTooLarge {
                frame_bytes,
                slot_bytes: slot.len(),
            });
        }
        Ok(source.fill(&mut slot[..frame_bytes])?)
    }

    fn apply_due_events(&mut self, input_index: u64) -> Result<(), DriverError> {
        let changes = self.scheduler.advance(input_index);
        if changes.is_empty() {
            return Ok(());
        }

        let mut params = Vec::new();
        for change in changes {
            match change {
                ParameterChange::SetFrameRate(fps) => self.timer.set_target_fps(fps as f64),
                ParameterChange::Codec(param) => params.push(param),
            }
        }

        if !params.is_empty() {
            info!("Frame {}: applying {:?}", input_index, params);
            self.device()?.set_parameters(&params)?;
        }
        Ok(())
    }

    fn queue_with_retry(
        &mut self,
        index: usize,
        size: usize,
        pts: i64,
        flags: u32,
    ) -> Result<(), DriverError> {
        let policy = self.config.retry.clone();
        let device = self.device()?;
        let mut attempt = 0;

        loop {
            match device.queue_input_buffer(index, size, pts, flags) {
                Ok(()) => return Ok(()),
                Err(e) if policy.should_retry(&e, attempt) => {
                    let delay = policy.calculate_delay(attempt);
                    warn!(
                        "Queue of input buffer {} failed ({}), retry {} in {:?}",
                        index,
                        e,
                        attempt + 1,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(DriverError::QueueRetriesExhausted {
                        index,
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Handle at most one output event. Returns true on any progress.
    fn drain_output(&mut self) -> Result<bool, DriverError> {
        let poll_timeout = self.config.poll_timeout;
        let event = self.device()?.dequeue_output_buffer(poll_timeout)?;
        match event {
            OutputEvent::TryAgainLater => Ok(false),
            OutputEvent::FormatChanged => {
                let format = self.device()?.output_format();
                info!("Output format changed: {}", format);
                self.stats.set_encoder_format(format);
                Ok(true)
            }
            OutputEvent::Buffer { index, info } => {
                self.handle_output_buffer(index, info)?;
                Ok(true)
            }
        }
    }

    fn handle_output_buffer(&mut self, index: usize, info: BufferInfo) -> Result<(), DriverError> {
        if info.is_codec_config() {
            debug!("Codec config buffer ({} bytes)", info.size);
            self.device()?.release_output_buffer(index)?;
            return self.create_sink();
        }

        if info.is_end_of_stream() {
            if info.size > 0 {
                self.forward_sample(index, info)?;
            } else {
                self.device()?.release_output_buffer(index)?;
            }
            info!("End of stream received from {}", self.codec_name);
            self.drained = true;
            self.transition(DriverState::Stopped);
            return Ok(());
        }

        self.forward_sample(index, info)
    }

    /// Write an encoded payload to the sink and close its frame record.
    fn forward_sample(&mut self, index: usize, info: BufferInfo) -> Result<(), DriverError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| DriverError::Device(CodecError::InvalidState("no device".to_string())))?;

        let Some(sink) = self.sink.as_mut() else {
            device.release_output_buffer(index)?;
            self.dropped_outputs += 1;
            warn!(
                "Dropping {} byte payload (pts {}): no sink yet",
                info.size, info.presentation_time_us
            );
            return Ok(());
        };

        let written = match device.output_buffer(index) {
            Ok(data) => sink
                .write_sample(0, data, &info)
                .map_err(|e| DriverError::Sink(e.to_string())),
            Err(e) => Err(e.into()),
        };
        device.release_output_buffer(index)?;
        written?;

        if info.is_key_frame() {
            debug!("Output key frame @ {}", self.frames_encoded);
        }
        self.stats
            .stop_encoding_frame(info.presentation_time_us, info.size as u64, info.is_key_frame());
        self.frames_encoded += 1;
        Ok(())
    }

    /// Output format with the configured values the device left out
    fn sink_format(&mut self) -> Result<MediaFormat, DriverError> {
        let mut format = self.device()?.output_format();
        for key in SINK_FORMAT_KEYS {
            if format.fill_from(&self.configured_format, key) {
                debug!("Sink format: filled in missing {}", key);
            }
        }
        Ok(format)
    }

    /// Create the sink, replacing an existing one.
    fn create_sink(&mut self) -> Result<(), DriverError> {
        let format = self.sink_format()?;

        if let Some(mut previous) = self.sink.take() {
            info!("Replacing sink after new codec config");
            if let Err(e) = previous.stop() {
                warn!("Failed to stop previous sink: {}", e);
            }
            previous.release();
        }

        let filename = output_filename(&self.codec_name, &self.configured_format);
        let path = self.job.output_dir.join(&filename);
        let container = ContainerFormat::for_codec(&self.codec_name);

        let sink = self
            .muxers
            .create(&path, container, &format)
            .map_err(|e| DriverError::Sink(e.to_string()))?;
        info!("Sink created: {} ({:?})", path.display(), container);

        self.sink = Some(sink);
        self.stats.set_encoded_file(&filename);
        self.output_path = Some(path);
        Ok(())
    }

    /// Release device, then sink, then source. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut device) = self.device.take() {
            if self.device_started {
                if let Err(e) = device.stop() {
                    warn!("Failed to stop {}: {}", self.codec_name, e);
                }
            }
            device.release();
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.stop() {
                warn!("Failed to stop sink: {}", e);
            }
            sink.release();
        }

        if let Some(mut source) = self.source.take() {
            source.close();
        }

        self.transition(DriverState::Stopped);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            codec_name: self.codec_name.clone(),
            transitions: self.transitions.clone(),
            frames_read: self.frames_read,
            frames_submitted: self.frames_submitted,
            frames_skipped: self.timer.frames_skipped(),
            frames_encoded: self.frames_encoded,
            dropped_outputs: self.dropped_outputs,
            drained: self.drained,
            output_path: self.output_path.clone(),
        }
    }
}

impl Drop for EncodeSession<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}
