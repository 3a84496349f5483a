// 硬件编码器测试工具
//
// 按测试定义驱动编码设备：抽帧、时间戳、运行时参数调整、
// 输出封装以及逐帧统计。

pub mod config;
pub mod driver;
pub mod dynamic;
pub mod error;
pub mod framerate;
pub mod runner;
pub mod serde_helpers;
pub mod statistics;
pub mod test_definition;


pub use config::{AppConfig, ConfigError, ConfigManager, DriverConfig, EnvConfigOverride};
pub use driver::{CodecDriver, DriverState, EncodeJob, SessionSummary, StopHandle};
pub use dynamic::{DynamicEvent, DynamicEventScheduler, ParameterChange};
pub use error::{DriverError, RetryPolicy, RetryStrategy};
pub use framerate::{FrameTimer, PacingDecision, PresentationClock};
pub use runner::{run_test, RunError, TestOutcome};
pub use statistics::{FrameLedger, FrameStatistics, StatisticsReport};
pub use test_definition::TestDefinition;
