//! 帧分发：把解出的帧逐个交给一组可插拔的消费者回调
//!
//! 单帧内的调用顺序固定（测试依赖此顺序）：
//! 1. 先交给通用 `frame` 回调（用于记账，能看到所有帧及其偏移与长度）
//! 2. 再按变体调用恰好一个专用回调
//!
//! 携带附件数据的帧由回调通过一次性的 [`Blob`] 句柄决定
//! 真正写出还是跳过；未设置回调或回调未触碰句柄时，
//! 默认以跳过模式消耗数据，保证文件位置与计数器始终对齐。
//!
//! 任何回调报错都会终止遍历，并携带出错帧的类别上抛。
//! `End` 帧之后再出现帧只告警不报错（可能是拼接或畸形文件）。
//! 底层文件随 reader 的所有权在任何退出路径上关闭。

use std::io::Write;

use log::warn;

use crate::error::{ChatVaultError, Result};
use crate::format::frame::{Frame, FrameKind};
use crate::format::reader::BackupReader;
use crate::format::wire;

/// 附件数据的一次性句柄：要么流式写出，要么显式跳过
pub struct Blob<'r> {
    reader: &'r mut BackupReader,
    length: u32,
    consumed: &'r mut bool,
}

impl Blob<'_> {
    /// 声明的附件数据长度
    pub fn length(&self) -> u32 {
        self.length
    }

    /// 解密并写入 sink（校验 MAC）
    pub fn stream_to<W: Write + ?Sized>(self, sink: &mut W) -> Result<()> {
        *self.consumed = true;
        self.reader.read_blob(self.length, sink)
    }

    /// 跳过：不校验 MAC，只保持文件位置与计数器对齐
    pub fn skip(self) -> Result<()> {
        *self.consumed = true;
        self.reader.skip_blob(self.length)
    }
}

type FrameFn<'a> = dyn FnMut(&Frame, u64, u32) -> Result<()> + 'a;
type RecordFn<'a, T> = dyn FnMut(&T) -> Result<()> + 'a;
type BlobFn<'a, T> = dyn FnMut(&T, Blob<'_>) -> Result<()> + 'a;

/// 消费者集合。未设置的键表示「跳过」。
#[derive(Default)]
pub struct ConsumerSet<'a> {
    pub frame: Option<Box<FrameFn<'a>>>,
    pub attachment: Option<Box<BlobFn<'a, wire::Attachment>>>,
    pub avatar: Option<Box<BlobFn<'a, wire::Avatar>>>,
    pub sticker: Option<Box<BlobFn<'a, wire::Sticker>>>,
    pub preference: Option<Box<RecordFn<'a, wire::SharedPreference>>>,
    pub keyvalue: Option<Box<RecordFn<'a, wire::KeyValue>>>,
    pub statement: Option<Box<RecordFn<'a, wire::SqlStatement>>>,
}

/// 迭代整个备份文件，把每一帧路由给匹配的消费者
pub fn consume(reader: &mut BackupReader, fns: &mut ConsumerSet<'_>) -> Result<()> {
    let mut ended = false;
    let mut warned_trailing = false;

    while let Some((offset, length, frame)) = reader.next_frame()? {
        if ended && !warned_trailing {
            warn!("frame found after end marker (offset {offset:#x}); concatenated or malformed file?");
            warned_trailing = true;
        }

        let kind = frame.kind();
        if let Some(f) = fns.frame.as_mut() {
            f(&frame, offset, length).map_err(|e| tag(kind, e))?;
        }

        match &frame {
            Frame::Attachment(a) => {
                let length = a.length.unwrap_or(0);
                dispatch_blob(reader, fns.attachment.as_deref_mut(), a, length, kind)?;
            }
            Frame::Avatar(a) => {
                let length = a.length.unwrap_or(0);
                dispatch_blob(reader, fns.avatar.as_deref_mut(), a, length, kind)?;
            }
            Frame::Sticker(s) => {
                let length = s.length.unwrap_or(0);
                dispatch_blob(reader, fns.sticker.as_deref_mut(), s, length, kind)?;
            }
            Frame::Preference(p) => {
                if let Some(f) = fns.preference.as_mut() {
                    f(p).map_err(|e| tag(kind, e))?;
                }
            }
            Frame::KeyValue(kv) => {
                if let Some(f) = fns.keyvalue.as_mut() {
                    f(kv).map_err(|e| tag(kind, e))?;
                }
            }
            Frame::Statement(s) => {
                if let Some(f) = fns.statement.as_mut() {
                    f(s).map_err(|e| tag(kind, e))?;
                }
            }
            Frame::End(true) => ended = true,
            Frame::End(false) | Frame::Header(_) | Frame::Version(_) => {}
        }
    }

    Ok(())
}

// 附件数据必须被消耗，哪怕只是跳过，否则后续帧会错位
fn dispatch_blob<T>(
    reader: &mut BackupReader,
    handler: Option<&mut BlobFn<'_, T>>,
    record: &T,
    length: u32,
    kind: FrameKind,
) -> Result<()> {
    let mut consumed = false;

    if let Some(f) = handler {
        let blob = Blob {
            reader: &mut *reader,
            length,
            consumed: &mut consumed,
        };
        f(record, blob).map_err(|e| tag(kind, e))?;
    }

    if !consumed {
        reader.skip_blob(length).map_err(|e| tag(kind, e))?;
    }
    Ok(())
}

fn tag(kind: FrameKind, source: ChatVaultError) -> ChatVaultError {
    ChatVaultError::Consumer {
        kind: kind.name(),
        source: Box::new(source),
    }
}
