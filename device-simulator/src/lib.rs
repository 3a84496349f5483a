// 模拟编码设备
//
// 提供与真实硬件编码器相同缓冲区交换协议的确定性模拟实现，
// 以及原始帧源和封装器。

pub mod encoder;
pub mod registry;
pub mod source;
pub mod muxer;

pub use encoder::{DeviceProbe, FaultPlan, ProbeState, SimulatedEncoder, SlotConfig};
pub use registry::SimulatedDeviceFactory;
pub use source::{PatternFrameSource, YuvFileSource};
pub use muxer::{ElementaryStreamMuxer, ElementaryStreamMuxerFactory, MemoryMuxerFactory, MuxLog, MuxedSample};
