//! 解出的帧：线格式记录收敛成的带标签变体
//!
//! 每帧恰好携带一个载荷。`Attachment`、`Avatar`、`Sticker`
//! 三种变体还隐含紧随其后的一段声明长度的加密数据。

use crate::format::wire;

/// 一帧解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Header(wire::Header),
    Version(wire::DatabaseVersion),
    Statement(wire::SqlStatement),
    Preference(wire::SharedPreference),
    KeyValue(wire::KeyValue),
    Attachment(wire::Attachment),
    Avatar(wire::Avatar),
    Sticker(wire::Sticker),
    End(bool),
}

/// 帧类别，用于统计与错误归因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameKind {
    Header,
    Version,
    Statement,
    Preference,
    KeyValue,
    Attachment,
    Avatar,
    Sticker,
    End,
}

impl FrameKind {
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Header => "header",
            FrameKind::Version => "version",
            FrameKind::Statement => "statement",
            FrameKind::Preference => "preference",
            FrameKind::KeyValue => "keyvalue",
            FrameKind::Attachment => "attachment",
            FrameKind::Avatar => "avatar",
            FrameKind::Sticker => "sticker",
            FrameKind::End => "end",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Frame {
    /// 把线格式记录收敛成带标签的变体
    ///
    /// 按固定顺序探测各可选字段，取第一个被填充的；
    /// 全部为空时返回 None（记录类型未知或来自更新的生产方）。
    pub fn from_wire(record: wire::BackupFrame) -> Option<Frame> {
        if let Some(header) = record.header {
            Some(Frame::Header(header))
        } else if let Some(version) = record.version {
            Some(Frame::Version(version))
        } else if let Some(statement) = record.statement {
            Some(Frame::Statement(statement))
        } else if let Some(preference) = record.preference {
            Some(Frame::Preference(preference))
        } else if let Some(key_value) = record.key_value {
            Some(Frame::KeyValue(key_value))
        } else if let Some(attachment) = record.attachment {
            Some(Frame::Attachment(attachment))
        } else if let Some(avatar) = record.avatar {
            Some(Frame::Avatar(avatar))
        } else if let Some(sticker) = record.sticker {
            Some(Frame::Sticker(sticker))
        } else {
            record.end.map(Frame::End)
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Header(_) => FrameKind::Header,
            Frame::Version(_) => FrameKind::Version,
            Frame::Statement(_) => FrameKind::Statement,
            Frame::Preference(_) => FrameKind::Preference,
            Frame::KeyValue(_) => FrameKind::KeyValue,
            Frame::Attachment(_) => FrameKind::Attachment,
            Frame::Avatar(_) => FrameKind::Avatar,
            Frame::Sticker(_) => FrameKind::Sticker,
            Frame::End(_) => FrameKind::End,
        }
    }

    /// 帧隐含的后续数据长度；非数据帧返回 None
    pub fn blob_length(&self) -> Option<u32> {
        match self {
            Frame::Attachment(a) => Some(a.length.unwrap_or(0)),
            Frame::Avatar(a) => Some(a.length.unwrap_or(0)),
            Frame::Sticker(s) => Some(s.length.unwrap_or(0)),
            _ => None,
        }
    }
}
