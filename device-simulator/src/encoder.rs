// 模拟编码器
//
// 以确定性的方式模拟硬件编码器的输入/输出缓冲区队列：
// - 有界的输入槽和输出槽（背压）
// - 可配置的流水线深度（编码延迟）
// - 编解码器配置数据（CSD）、输出格式变化、流结束标记
// - 故障注入（配置失败、启动失败、瞬时排队失败）

use bytes::BytesMut;
use common::{
    buffer_flags, keys, BufferInfo, CodecDevice, CodecError, CodecParameter, MediaFormat,
    OutputEvent, Result,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest payload the simulator emits for a coded frame
const MIN_FRAME_BYTES: usize = 32;
/// Fake parameter-set payload emitted as codec config
const CODEC_CONFIG_PAYLOAD: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1f, 0, 0, 0, 1, 0x68, 0xce];

/// Faults the simulated device injects
#[derive(Debug, Clone)]
pub struct FaultPlan {
    pub fail_configure: bool,
    pub fail_start: bool,
    /// Number of upcoming `queue_input_buffer` calls that fail transiently
    pub transient_queue_failures: u32,
    /// Leave frame-rate, bitrate-mode and i-frame-interval out of the
    /// reported output format, as several vendor encoders do
    pub omit_output_keys: bool,
    /// Never emit the end-of-stream marker
    pub suppress_end_of_stream: bool,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            fail_configure: false,
            fail_start: false,
            transient_queue_failures: 0,
            omit_output_keys: true,
            suppress_end_of_stream: false,
        }
    }
}

/// Slot queue dimensions
#[derive(Debug, Clone, Copy)]
pub struct SlotConfig {
    pub input_slots: usize,
    pub output_slots: usize,
    /// Inputs held back before the first output appears
    pub pipeline_depth: usize,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            pipeline_depth: 2,
        }
    }
}

/// Observable side effects of a simulated device
#[derive(Debug, Clone, Default)]
pub struct ProbeState {
    pub configured_format: Option<MediaFormat>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
    pub queued: Vec<BufferInfo>,
    pub parameters: Vec<CodecParameter>,
    pub queue_failures: u32,
    pub frames_encoded: u64,
    pub key_frames: u64,
    pub input_polls: u64,
    pub output_polls: u64,
}

/// Shared handle for inspecting a device after the driver has consumed it
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl DeviceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProbeState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut ProbeState)) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Uninitialized,
    Configured,
    Executing,
    Stopped,
    Released,
}

struct PendingInput {
    slot: usize,
    info: BufferInfo,
    /// Parameters set since the previous input, applied when this one is encoded
    params: Vec<CodecParameter>,
}

/// Deterministic stand-in for a hardware encoder
pub struct SimulatedEncoder {
    name: String,
    mime: String,
    emits_codec_config: bool,
    state: EncoderState,
    configured: MediaFormat,
    slots: SlotConfig,

    input_slots: Vec<BytesMut>,
    free_inputs: VecDeque<usize>,
    client_inputs: Vec<bool>,
    pending: VecDeque<PendingInput>,

    output_slots: Vec<BytesMut>,
    free_outputs: VecDeque<usize>,
    client_outputs: Vec<Option<BufferInfo>>,
    ready: VecDeque<(usize, BufferInfo)>,

    codec_config_emitted: bool,
    format_announced: bool,
    eos_received: bool,

    frames_encoded: u64,
    bitrate_bps: u32,
    frame_rate: f64,
    key_interval_frames: Option<u64>,
    sync_requested: bool,
    ltr_marked: BTreeSet<i32>,
    staged_params: Vec<CodecParameter>,

    faults: FaultPlan,
    probe: DeviceProbe,
}

impl SimulatedEncoder {
    pub fn new(
        name: &str,
        mime: &str,
        emits_codec_config: bool,
        slots: SlotConfig,
        faults: FaultPlan,
        probe: DeviceProbe,
    ) -> Self {
        let input_slots = slots.input_slots.max(1);
        let slots = SlotConfig {
            input_slots,
            output_slots: slots.output_slots.max(1),
            // Holding every input slot back would deadlock the exchange
            pipeline_depth: slots.pipeline_depth.min(input_slots - 1),
        };

        Self {
            name: name.to_string(),
            mime: mime.to_string(),
            emits_codec_config,
            state: EncoderState::Uninitialized,
            configured: MediaFormat::new(),
            slots,
            input_slots: Vec::new(),
            free_inputs: VecDeque::new(),
            client_inputs: Vec::new(),
            pending: VecDeque::new(),
            output_slots: Vec::new(),
            free_outputs: VecDeque::new(),
            client_outputs: Vec::new(),
            ready: VecDeque::new(),
            codec_config_emitted: false,
            format_announced: false,
            eos_received: false,
            frames_encoded: 0,
            bitrate_bps: 1_000_000,
            frame_rate: 30.0,
            key_interval_frames: None,
            sync_requested: false,
            ltr_marked: BTreeSet::new(),
            staged_params: Vec::new(),
            faults,
            probe,
        }
    }

    fn ensure_executing(&self, operation: &str) -> Result<()> {
        if self.state != EncoderState::Executing {
            return Err(CodecError::InvalidState(format!(
                "{} called in state {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }

    fn frame_bytes(&self, key_frame: bool) -> usize {
        let per_frame = (self.bitrate_bps as f64 / 8.0 / self.frame_rate.max(1.0)) as usize;
        let size = if key_frame { per_frame * 3 } else { per_frame };
        size.max(MIN_FRAME_BYTES)
    }

    fn is_next_key_frame(&mut self) -> bool {
        if self.frames_encoded == 0 || self.sync_requested {
            self.sync_requested = false;
            return true;
        }
        match self.key_interval_frames {
            Some(0) => true,
            Some(interval) => self.frames_encoded % interval == 0,
            None => false,
        }
    }

    fn apply_parameter(&mut self, param: CodecParameter) {
        match param {
            CodecParameter::VideoBitrate(bps) => {
                debug!("{}: bitrate {} -> {} bps", self.name, self.bitrate_bps, bps);
                self.bitrate_bps = bps;
            }
            CodecParameter::RequestSyncFrame => {
                self.sync_requested = true;
            }
            CodecParameter::LtrMarkFrame(slot) => {
                self.ltr_marked.insert(slot);
            }
            CodecParameter::LtrUseFrame(slot) => {
                if !self.ltr_marked.contains(&slot) {
                    warn!("{}: LTR slot {} referenced before being marked", self.name, slot);
                }
            }
        }
    }

    /// Move queued inputs through the simulated pipeline into output slots.
    fn pump(&mut self) {
        loop {
            if self.emits_codec_config && !self.codec_config_emitted && !self.pending.is_empty() {
                let Some(slot) = self.free_outputs.pop_front() else {
                    break;
                };
                let data = &mut self.output_slots[slot];
                data.clear();
                data.extend_from_slice(CODEC_CONFIG_PAYLOAD);
                let info = BufferInfo::new(CODEC_CONFIG_PAYLOAD.len(), 0, buffer_flags::CODEC_CONFIG);
                self.ready.push_back((slot, info));
                self.codec_config_emitted = true;
                debug!("{}: emitted codec config", self.name);
                continue;
            }

            if self.pending.len() <= self.slots.pipeline_depth && !self.eos_received {
                break;
            }
            if self.pending.is_empty() || self.free_outputs.is_empty() {
                break;
            }

            let Some(input) = self.pending.pop_front() else {
                break;
            };
            let Some(slot) = self.free_outputs.pop_front() else {
                self.pending.push_front(input);
                break;
            };

            for param in &input.params {
                self.apply_parameter(*param);
            }

            let end_of_stream = input.info.is_end_of_stream();
            let mut flags = 0;
            let mut size = 0;

            if input.info.size > 0 {
                let key_frame = self.is_next_key_frame();
                size = self.frame_bytes(key_frame);
                if key_frame {
                    flags |= buffer_flags::KEY_FRAME;
                }

                let data = &mut self.output_slots[slot];
                data.clear();
                data.resize(size, (self.frames_encoded & 0xff) as u8);
                data[..4].copy_from_slice(&[0, 0, 0, 1]);

                self.frames_encoded += 1;
                self.probe.update(|probe| {
                    probe.frames_encoded += 1;
                    if key_frame {
                        probe.key_frames += 1;
                    }
                });
            } else {
                self.output_slots[slot].clear();
            }

            self.free_inputs.push_back(input.slot);

            if end_of_stream && !self.faults.suppress_end_of_stream {
                flags |= buffer_flags::END_OF_STREAM;
            }

            if size == 0 && flags & buffer_flags::END_OF_STREAM == 0 {
                // Empty input without a marker produces no output
                self.free_outputs.push_back(slot);
                continue;
            }

            self.ready
                .push_back((slot, BufferInfo::new(size, input.info.presentation_time_us, flags)));
        }
    }
}

impl CodecDevice for SimulatedEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat) -> Result<()> {
        if self.state != EncoderState::Uninitialized {
            return Err(CodecError::InvalidState(format!(
                "configure called in state {:?}",
                self.state
            )));
        }
        if self.faults.fail_configure {
            return Err(CodecError::Configure(format!(
                "{} rejected the configuration",
                self.name
            )));
        }
        if let Some(mime) = format.get_string(keys::MIME) {
            if mime != self.mime {
                return Err(CodecError::Configure(format!(
                    "{} does not support {}",
                    self.name, mime
                )));
            }
        }

        let width = format.get_integer(keys::WIDTH).unwrap_or(0);
        let height = format.get_integer(keys::HEIGHT).unwrap_or(0);
        if width <= 0 || height <= 0 {
            return Err(CodecError::Configure(format!(
                "invalid resolution {}x{}",
                width, height
            )));
        }

        self.bitrate_bps = format
            .get_number(keys::BIT_RATE)
            .map(|b| b as u32)
            .unwrap_or(1_000_000);
        self.frame_rate = format.get_number(keys::FRAME_RATE).unwrap_or(30.0);
        self.key_interval_frames = format.get_number(keys::I_FRAME_INTERVAL).and_then(|interval| {
            if interval < 0.0 {
                None
            } else {
                Some((interval * self.frame_rate).round() as u64)
            }
        });

        let capacity = align16(width as usize) * align16(height as usize) * 3 / 2;
        self.input_slots = (0..self.slots.input_slots)
            .map(|_| {
                let mut slot = BytesMut::with_capacity(capacity);
                slot.resize(capacity, 0);
                slot
            })
            .collect();
        self.client_inputs = vec![false; self.slots.input_slots];
        self.output_slots = (0..self.slots.output_slots)
            .map(|_| BytesMut::with_capacity(capacity / 4))
            .collect();
        self.client_outputs = vec![None; self.slots.output_slots];

        self.configured = format.clone();
        self.state = EncoderState::Configured;
        self.probe.update(|probe| probe.configured_format = Some(format.clone()));

        info!(
            "{}: configured {}x{} @ {:.2}fps, {} bps",
            self.name, width, height, self.frame_rate, self.bitrate_bps
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Configured {
            return Err(CodecError::InvalidState(format!(
                "start called in state {:?}",
                self.state
            )));
        }
        if self.faults.fail_start {
            return Err(CodecError::Start(format!("{} failed to start", self.name)));
        }

        self.free_inputs = (0..self.input_slots.len()).collect();
        self.free_outputs = (0..self.output_slots.len()).collect();
        self.state = EncoderState::Executing;
        self.probe.update(|probe| probe.started = true);
        Ok(())
    }

    fn input_format(&self) -> MediaFormat {
        let width = self.configured.get_integer(keys::WIDTH).unwrap_or(0);
        let height = self.configured.get_integer(keys::HEIGHT).unwrap_or(0);
        let mut format = MediaFormat::video(&self.mime, width as u32, height as u32);
        format.set_integer(keys::STRIDE, align16(width.max(0) as usize) as i32);
        format.set_integer(keys::SLICE_HEIGHT, align16(height.max(0) as usize) as i32);
        format
    }

    fn output_format(&self) -> MediaFormat {
        let mut format = self.configured.clone();
        if self.faults.omit_output_keys {
            format.remove(keys::FRAME_RATE);
            format.remove(keys::BITRATE_MODE);
            format.remove(keys::I_FRAME_INTERVAL);
        }
        format
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.ensure_executing("dequeue_input_buffer")?;
        self.probe.update(|probe| probe.input_polls += 1);
        if self.eos_received {
            return Ok(None);
        }
        self.pump();

        match self.free_inputs.pop_front() {
            Some(index) => {
                self.client_inputs[index] = true;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        if !self.client_inputs.get(index).copied().unwrap_or(false) {
            return Err(CodecError::InvalidBufferIndex(index));
        }
        Ok(&mut self.input_slots[index][..])
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()> {
        self.ensure_executing("queue_input_buffer")?;
        if !self.client_inputs.get(index).copied().unwrap_or(false) {
            return Err(CodecError::InvalidBufferIndex(index));
        }

        if self.faults.transient_queue_failures > 0 {
            self.faults.transient_queue_failures -= 1;
            self.probe.update(|probe| probe.queue_failures += 1);
            return Err(CodecError::BufferNotReady(format!(
                "input slot {} is still owned by the hardware",
                index
            )));
        }

        if size > self.input_slots[index].len() {
            return Err(CodecError::InvalidState(format!(
                "queued {} bytes into a {} byte slot",
                size,
                self.input_slots[index].len()
            )));
        }

        let info = BufferInfo::new(size, presentation_time_us, flags);
        self.client_inputs[index] = false;
        self.pending.push_back(PendingInput {
            slot: index,
            info,
            params: std::mem::take(&mut self.staged_params),
        });
        if info.is_end_of_stream() {
            self.eos_received = true;
        }
        self.probe.update(|probe| probe.queued.push(info));

        self.pump();
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputEvent> {
        self.ensure_executing("dequeue_output_buffer")?;
        self.probe.update(|probe| probe.output_polls += 1);
        self.pump();

        if self.ready.is_empty() {
            return Ok(OutputEvent::TryAgainLater);
        }
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputEvent::FormatChanged);
        }

        match self.ready.pop_front() {
            Some((index, info)) => {
                self.client_outputs[index] = Some(info);
                Ok(OutputEvent::Buffer { index, info })
            }
            None => Ok(OutputEvent::TryAgainLater),
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        match self.client_outputs.get(index).copied().flatten() {
            Some(info) => Ok(&self.output_slots[index][info.offset..info.offset + info.size]),
            None => Err(CodecError::InvalidBufferIndex(index)),
        }
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        match self.client_outputs.get_mut(index) {
            Some(owned @ Some(_)) => {
                *owned = None;
                self.free_outputs.push_back(index);
                Ok(())
            }
            _ => Err(CodecError::InvalidBufferIndex(index)),
        }
    }

    fn set_parameters(&mut self, params: &[CodecParameter]) -> Result<()> {
        self.ensure_executing("set_parameters")?;

        // Takes effect from the next queued input, not the ones still in flight
        self.staged_params.extend_from_slice(params);

        let applied = params.to_vec();
        self.probe.update(|probe| probe.parameters.extend(applied));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            EncoderState::Configured | EncoderState::Executing => {
                self.pending.clear();
                self.ready.clear();
                self.staged_params.clear();
                self.state = EncoderState::Stopped;
                self.probe.update(|probe| probe.stopped = true);
                info!("{}: stopped after {} frames", self.name, self.frames_encoded);
                Ok(())
            }
            state => Err(CodecError::InvalidState(format!(
                "stop called in state {:?}",
                state
            ))),
        }
    }

    fn release(&mut self) {
        self.input_slots.clear();
        self.output_slots.clear();
        self.state = EncoderState::Released;
        self.probe.update(|probe| probe.released = true);
    }
}

fn align16(value: usize) -> usize {
    (value + 15) & !15
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured_encoder(faults: FaultPlan) -> (SimulatedEncoder, DeviceProbe) {
        let probe = DeviceProbe::new();
        let mut encoder = SimulatedEncoder::new(
            "sim.avc.encoder",
            "video/avc",
            true,
            SlotConfig::default(),
            faults,
            probe.clone(),
        );
        let mut format = MediaFormat::video("video/avc", 64, 48);
        format.set_integer(keys::BIT_RATE, 240_000);
        format.set_float(keys::FRAME_RATE, 30.0);
        format.set_integer(keys::I_FRAME_INTERVAL, 1);
        format.set_integer(keys::BITRATE_MODE, 2);
        encoder.configure(&format).unwrap();
        (encoder, probe)
    }

    fn queue_frame(encoder: &mut SimulatedEncoder, pts: i64, flags: u32) {
        let index = encoder
            .dequeue_input_buffer(Duration::from_millis(1))
            .unwrap()
            .expect("free input slot");
        let size = encoder.input_buffer(index).unwrap().len();
        encoder.queue_input_buffer(index, size, pts, flags).unwrap();
    }

    #[test]
    fn test_dequeue_before_start_fails() {
        let (mut encoder, _) = configured_encoder(FaultPlan::default());
        let result = encoder.dequeue_input_buffer(Duration::from_millis(1));
        assert!(matches!(result, Err(CodecError::InvalidState(_))));
    }

    #[test]
    fn test_configure_fault() {
        let probe = DeviceProbe::new();
        let mut encoder = SimulatedEncoder::new(
            "sim.avc.encoder",
            "video/avc",
            true,
            SlotConfig::default(),
            FaultPlan {
                fail_configure: true,
                ..FaultPlan::default()
            },
            probe.clone(),
        );
        let result = encoder.configure(&MediaFormat::video("video/avc", 64, 48));
        assert!(matches!(result, Err(CodecError::Configure(_))));
        assert!(probe.snapshot().configured_format.is_none());
    }

    #[test]
    fn test_mime_mismatch_rejected() {
        let mut encoder = SimulatedEncoder::new(
            "sim.vp8.encoder",
            "video/x-vnd.on2.vp8",
            false,
            SlotConfig::default(),
            FaultPlan::default(),
            DeviceProbe::new(),
        );
        let result = encoder.configure(&MediaFormat::video("video/avc", 64, 48));
        assert!(matches!(result, Err(CodecError::Configure(_))));
    }

    #[test]
    fn test_input_slots_are_bounded() {
        let (mut encoder, _) = configured_encoder(FaultPlan::default());
        encoder.start().unwrap();

        let mut handed_out = Vec::new();
        while let Some(index) = encoder.dequeue_input_buffer(Duration::from_millis(1)).unwrap() {
            handed_out.push(index);
        }
        assert_eq!(handed_out.len(), SlotConfig::default().input_slots);
    }

    #[test]
    fn test_pipeline_emits_config_format_then_frames() {
        let (mut encoder, probe) = configured_encoder(FaultPlan::default());
        encoder.start().unwrap();

        for i in 0..3 {
            queue_frame(&mut encoder, 132 + i * 33_333, 0);
        }

        let timeout = Duration::from_millis(1);
        assert_eq!(encoder.dequeue_output_buffer(timeout).unwrap(), OutputEvent::FormatChanged);

        let OutputEvent::Buffer { index, info } = encoder.dequeue_output_buffer(timeout).unwrap() else {
            panic!("expected codec config buffer");
        };
        assert!(info.is_codec_config());
        assert_eq!(encoder.output_buffer(index).unwrap(), CODEC_CONFIG_PAYLOAD);
        encoder.release_output_buffer(index).unwrap();

        let OutputEvent::Buffer { index, info } = encoder.dequeue_output_buffer(timeout).unwrap() else {
            panic!("expected first coded frame");
        };
        assert!(info.is_key_frame());
        assert_eq!(info.presentation_time_us, 132);
        // 240 kbps @ 30 fps = 1000 bytes, key frames triple it
        assert_eq!(info.size, 3000);
        encoder.release_output_buffer(index).unwrap();

        // pipeline depth 2 holds the remaining two frames back
        assert_eq!(encoder.dequeue_output_buffer(timeout).unwrap(), OutputEvent::TryAgainLater);
        assert_eq!(probe.snapshot().frames_encoded, 1);
    }

    #[test]
    fn test_end_of_stream_flushes_pipeline() {
        let (mut encoder, _) = configured_encoder(FaultPlan::default());
        encoder.start().unwrap();

        queue_frame(&mut encoder, 132, 0);
        queue_frame(&mut encoder, 33_465, buffer_flags::END_OF_STREAM);

        let timeout = Duration::from_millis(1);
        let mut frames = Vec::new();
        loop {
            match encoder.dequeue_output_buffer(timeout).unwrap() {
                OutputEvent::Buffer { index, info } => {
                    encoder.release_output_buffer(index).unwrap();
                    if info.is_codec_config() {
                        continue;
                    }
                    frames.push(info);
                    if info.is_end_of_stream() {
                        break;
                    }
                }
                OutputEvent::FormatChanged => continue,
                OutputEvent::TryAgainLater => panic!("pipeline stalled"),
            }
        }

        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_end_of_stream());
        assert_eq!(frames[1].presentation_time_us, 33_465);
        assert!(encoder.dequeue_input_buffer(timeout).unwrap().is_none());
    }

    #[test]
    fn test_transient_queue_failures_keep_slot() {
        let (mut encoder, probe) = configured_encoder(FaultPlan {
            transient_queue_failures: 2,
            ..FaultPlan::default()
        });
        encoder.start().unwrap();

        let index = encoder.dequeue_input_buffer(Duration::from_millis(1)).unwrap().unwrap();
        for _ in 0..2 {
            let err = encoder.queue_input_buffer(index, 10, 132, 0).unwrap_err();
            assert!(err.is_transient());
        }
        encoder.queue_input_buffer(index, 10, 132, 0).unwrap();

        let snapshot = probe.snapshot();
        assert_eq!(snapshot.queue_failures, 2);
        assert_eq!(snapshot.queued.len(), 1);
    }

    #[test]
    fn test_output_format_omits_vendor_gaps() {
        let (encoder, _) = configured_encoder(FaultPlan::default());
        let output = encoder.output_format();
        assert!(!output.contains_key(keys::FRAME_RATE));
        assert!(!output.contains_key(keys::I_FRAME_INTERVAL));
        assert!(output.contains_key(keys::BIT_RATE));

        let input = encoder.input_format();
        assert_eq!(input.get_integer(keys::STRIDE), Some(64));
        assert_eq!(input.get_integer(keys::SLICE_HEIGHT), Some(48));
    }

    #[test]
    fn test_sync_request_forces_key_frame() {
        let (mut encoder, probe) = configured_encoder(FaultPlan::default());
        encoder.start().unwrap();

        for i in 0..3 {
            queue_frame(&mut encoder, 132 + i, 0);
        }
        encoder.set_parameters(&[CodecParameter::RequestSyncFrame]).unwrap();
        queue_frame(&mut encoder, 200, buffer_flags::END_OF_STREAM);

        let timeout = Duration::from_millis(1);
        loop {
            match encoder.dequeue_output_buffer(timeout).unwrap() {
                OutputEvent::Buffer { index, .. } => encoder.release_output_buffer(index).unwrap(),
                OutputEvent::FormatChanged => {}
                OutputEvent::TryAgainLater => break,
            }
        }

        let snapshot = probe.snapshot();
        assert_eq!(snapshot.frames_encoded, 4);
        // first frame plus the requested sync frame
        assert_eq!(snapshot.key_frames, 2);
        assert_eq!(snapshot.parameters, vec![CodecParameter::RequestSyncFrame]);
    }

    #[test]
    fn test_bitrate_change_skips_frames_in_flight() {
        let (mut encoder, _) = configured_encoder(FaultPlan::default());
        encoder.start().unwrap();

        for i in 0..3 {
            queue_frame(&mut encoder, 132 + i, 0);
        }
        encoder
            .set_parameters(&[CodecParameter::VideoBitrate(480_000)])
            .unwrap();
        queue_frame(&mut encoder, 200, 0);
        queue_frame(&mut encoder, 300, buffer_flags::END_OF_STREAM);

        let timeout = Duration::from_millis(1);
        let mut sizes = Vec::new();
        loop {
            match encoder.dequeue_output_buffer(timeout).unwrap() {
                OutputEvent::Buffer { index, info } => {
                    encoder.release_output_buffer(index).unwrap();
                    if !info.is_codec_config() {
                        sizes.push((info.presentation_time_us, info.size));
                    }
                }
                OutputEvent::FormatChanged => {}
                OutputEvent::TryAgainLater => break,
            }
        }

        // Frames queued before the change keep the old rate
        assert_eq!(
            sizes,
            vec![(132, 3000), (133, 1000), (134, 1000), (200, 2000), (300, 2000)]
        );
    }
}
