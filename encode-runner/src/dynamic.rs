// 动态事件调度器
//
// 解析运行时参数脚本（如 "fps-10-15:bit-20-500:key-40"），
// 并在指定的输入帧位置释放到期的参数变更。

use common::CodecParameter;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// 脚本命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicCommand {
    /// 目标帧率
    Fps,
    /// 码率（kbps）
    Bitrate,
    /// 标记长期参考帧
    LtrMark,
    /// 使用长期参考帧
    LtrUse,
    /// 强制关键帧
    ForceKey,
}

impl DynamicCommand {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "fps" => Some(Self::Fps),
            "bit" => Some(Self::Bitrate),
            "ltrm" => Some(Self::LtrMark),
            "ltru" => Some(Self::LtrUse),
            "key" => Some(Self::ForceKey),
            _ => None,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Fps => "fps",
            Self::Bitrate => "bit",
            Self::LtrMark => "ltrm",
            Self::LtrUse => "ltru",
            Self::ForceKey => "key",
        }
    }

    fn takes_argument(&self) -> bool {
        !matches!(self, Self::ForceKey)
    }
}

/// 一个已解析的脚本事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicEvent {
    pub trigger_frame: u64,
    pub command: DynamicCommand,
    pub argument: i64,
}

impl DynamicEvent {
    /// Effect of this event on the session
    pub fn to_change(&self) -> ParameterChange {
        match self.command {
            DynamicCommand::Fps => ParameterChange::SetFrameRate(self.argument.max(0) as u32),
            DynamicCommand::Bitrate => ParameterChange::Codec(CodecParameter::VideoBitrate(
                (self.argument.max(0) as u64 * 1000).min(u32::MAX as u64) as u32,
            )),
            DynamicCommand::LtrMark => {
                ParameterChange::Codec(CodecParameter::LtrMarkFrame(self.argument as i32))
            }
            DynamicCommand::LtrUse => {
                ParameterChange::Codec(CodecParameter::LtrUseFrame(self.argument as i32))
            }
            DynamicCommand::ForceKey => ParameterChange::Codec(CodecParameter::RequestSyncFrame),
        }
    }
}

impl fmt::Display for DynamicEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command.takes_argument() {
            write!(f, "{}-{}-{}", self.command.keyword(), self.trigger_frame, self.argument)
        } else {
            write!(f, "{}-{}", self.command.keyword(), self.trigger_frame)
        }
    }
}

/// 到期事件产生的变更
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
    /// 改变抽帧器的目标帧率
    SetFrameRate(u32),
    /// 发送给编码器的参数
    Codec(CodecParameter),
}

/// 动态事件调度器
///
/// 事件按触发帧升序保存，游标之前的事件已经发出。
#[derive(Debug, Clone, Default)]
pub struct DynamicEventScheduler {
    events: Vec<DynamicEvent>,
    cursor: usize,
}

impl DynamicEventScheduler {
    /// 解析脚本
    ///
    /// 无法识别的片段记录警告后忽略，解析本身不会失败。
    pub fn parse(script: &str) -> Self {
        let mut events: Vec<DynamicEvent> = script
            .split(':')
            .filter_map(|token| {
                let token = token.trim();
                if token.is_empty() {
                    if !script.trim().is_empty() {
                        warn!("Ignoring empty dynamic event token in '{}'", script);
                    }
                    return None;
                }
                parse_token(token)
            })
            .collect();

        // Vec::sort_by_key is stable: equal triggers keep script order
        events.sort_by_key(|event| event.trigger_frame);

        debug!("Parsed {} dynamic event(s) from '{}'", events.len(), script);
        Self { events, cursor: 0 }
    }

    pub fn from_events(mut events: Vec<DynamicEvent>) -> Self {
        events.sort_by_key(|event| event.trigger_frame);
        Self { events, cursor: 0 }
    }

    /// 返回所有触发帧 <= current_frame 的待处理事件，并将其移出队列
    pub fn advance(&mut self, current_frame: u64) -> Vec<ParameterChange> {
        let due = self.events[self.cursor..]
            .iter()
            .take_while(|event| event.trigger_frame <= current_frame)
            .count();
        if due == 0 {
            return Vec::new();
        }

        let fired = &self.events[self.cursor..self.cursor + due];
        for event in fired {
            debug!("Dynamic event {} due at frame {}", event, current_frame);
        }
        let changes = fired.iter().map(DynamicEvent::to_change).collect();
        self.cursor += due;
        changes
    }

    /// 脚本中是否包含 LTR 标记事件
    pub fn uses_ltr(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.command == DynamicCommand::LtrMark)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// 尚未发出的事件
    pub fn pending(&self) -> &[DynamicEvent] {
        &self.events[self.cursor..]
    }

    pub fn events(&self) -> &[DynamicEvent] {
        &self.events
    }
}

fn parse_token(token: &str) -> Option<DynamicEvent> {
    let mut fields = token.split('-');
    let keyword = fields.next().unwrap_or_default();

    let Some(command) = DynamicCommand::parse(keyword) else {
        warn!("Ignoring unknown dynamic command '{}'", token);
        return None;
    };

    let trigger_frame = match fields.next().map(str::parse::<u64>) {
        Some(Ok(frame)) => frame,
        _ => {
            warn!("Ignoring dynamic event '{}': missing or invalid frame number", token);
            return None;
        }
    };

    let argument = if command.takes_argument() {
        match fields.next().map(str::parse::<i64>) {
            Some(Ok(value)) => value,
            _ => {
                warn!("Ignoring dynamic event '{}': missing or invalid argument", token);
                return None;
            }
        }
    } else {
        0
    };

    Some(DynamicEvent {
        trigger_frame,
        command,
        argument,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_releases_due_events() {
        let mut scheduler = DynamicEventScheduler::parse("fps-10-15:bit-20-500");

        assert!(scheduler.advance(5).is_empty());
        assert_eq!(scheduler.advance(10), vec![ParameterChange::SetFrameRate(15)]);
        assert_eq!(
            scheduler.advance(25),
            vec![ParameterChange::Codec(CodecParameter::VideoBitrate(500_000))]
        );
        assert!(scheduler.is_exhausted());
        assert!(scheduler.advance(100).is_empty());
    }

    #[test]
    fn test_script_order_sorted_stably() {
        let scheduler = DynamicEventScheduler::parse("key-30:ltrm-5-1:bit-30-800:ltru-5-1");
        let rendered: Vec<String> = scheduler.events().iter().map(|e| e.to_string()).collect();
        assert_eq!(rendered, vec!["ltrm-5-1", "ltru-5-1", "key-30", "bit-30-800"]);
    }

    #[test]
    fn test_shared_trigger_applied_together() {
        let mut scheduler = DynamicEventScheduler::parse("ltrm-5-2:key-5:fps-9-10");
        assert_eq!(
            scheduler.advance(7),
            vec![
                ParameterChange::Codec(CodecParameter::LtrMarkFrame(2)),
                ParameterChange::Codec(CodecParameter::RequestSyncFrame),
            ]
        );
        assert_eq!(scheduler.pending().len(), 1);
    }

    #[test]
    fn test_late_advance_catches_up() {
        let mut scheduler = DynamicEventScheduler::parse("bit-1-100:bit-2-200:bit-3-300");
        assert_eq!(scheduler.advance(50).len(), 3);
        assert!(scheduler.advance(50).is_empty());
    }

    #[test]
    fn test_malformed_tokens_ignored() {
        let scheduler =
            DynamicEventScheduler::parse("fps-x-15::zoom-4-2:bit-10:key-3:ltru-8-abc:bit-12-64");
        let rendered: Vec<String> = scheduler.events().iter().map(|e| e.to_string()).collect();
        assert_eq!(rendered, vec!["key-3", "bit-12-64"]);
    }

    #[test]
    fn test_empty_script() {
        let mut scheduler = DynamicEventScheduler::parse("");
        assert!(scheduler.is_exhausted());
        assert!(scheduler.advance(0).is_empty());
        assert!(!scheduler.uses_ltr());
    }

    #[test]
    fn test_uses_ltr() {
        assert!(DynamicEventScheduler::parse("ltrm-10-1").uses_ltr());
        assert!(!DynamicEventScheduler::parse("ltru-10-1").uses_ltr());
    }

    #[test]
    fn test_no_event_returned_twice() {
        let mut scheduler = DynamicEventScheduler::parse("key-1:key-2:key-2:fps-4-5:bit-9-1");
        let total: usize = (0..20).map(|frame| scheduler.advance(frame).len()).sum();
        assert_eq!(total, 5);
    }
}
