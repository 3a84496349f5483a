// 设备注册表
//
// 列出可用的模拟编码器并按名称创建实例。

use crate::encoder::{DeviceProbe, FaultPlan, SimulatedEncoder, SlotConfig};
use common::{CodecDevice, CodecError, CodecInfo, DeviceFactory, Result};
use tracing::debug;

struct CodecEntry {
    name: &'static str,
    mime: &'static str,
    emits_codec_config: bool,
}

const CODECS: &[CodecEntry] = &[
    CodecEntry {
        name: "sim.avc.encoder",
        mime: "video/avc",
        emits_codec_config: true,
    },
    CodecEntry {
        name: "sim.hevc.encoder",
        mime: "video/hevc",
        emits_codec_config: true,
    },
    CodecEntry {
        name: "sim.vp8.encoder",
        mime: "video/x-vnd.on2.vp8",
        emits_codec_config: false,
    },
    CodecEntry {
        name: "sim.vp9.encoder",
        mime: "video/x-vnd.on2.vp9",
        emits_codec_config: false,
    },
];

/// Factory for simulated encoders.
///
/// Every device it creates shares the same fault plan, slot layout and
/// probe, so tests can configure a factory once and inspect the device
/// after the driver has released it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDeviceFactory {
    faults: FaultPlan,
    slots: SlotConfig,
    probe: DeviceProbe,
}

impl SimulatedDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_slots(mut self, slots: SlotConfig) -> Self {
        self.slots = slots;
        self
    }

    pub fn probe(&self) -> DeviceProbe {
        self.probe.clone()
    }
}

impl DeviceFactory for SimulatedDeviceFactory {
    fn codec_infos(&self) -> Vec<CodecInfo> {
        CODECS
            .iter()
            .map(|entry| CodecInfo {
                name: entry.name.to_string(),
                mime: entry.mime.to_string(),
            })
            .collect()
    }

    fn create_by_name(&self, name: &str) -> Result<Box<dyn CodecDevice>> {
        let entry = CODECS
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| CodecError::NotFound(name.to_string()))?;

        debug!("Creating simulated device {}", entry.name);
        Ok(Box::new(SimulatedEncoder::new(
            entry.name,
            entry.mime,
            entry.emits_codec_config,
            self.slots,
            self.faults.clone(),
            self.probe.clone(),
        )))
    }
}
