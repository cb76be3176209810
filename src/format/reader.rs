//! 备份帧读取与附件流式解密
//!
//! `BackupReader` 在一次运行中独占底层文件与会话密码学状态，
//! 按文件顺序产出帧：
//! - 帧：4 字节大端长度 | 密文本体 | 10 字节 MAC
//! - 附件数据紧随所属帧：密文 length 字节 | 10 字节 MAC（MAC 先混入 IV）
//!
//! 读取流程（严格顺序）：
//! 1. 引导头帧不经过解密与认证（此时密钥尚不存在），仅用于取得 iv/salt
//! 2. 之后的每一帧先整帧读入、校验 MAC，再推进计数器并就地解密
//! 3. 附件以最多 8 KiB 的块流式解密写出，内存占用与附件大小无关
//!
//! 注意：
//! - 跳过附件只移动文件位置并消耗一次计数，不校验 MAC
//! - 长度前缀处的干净 EOF 是正常结束；任何单元中途的 EOF 都视为截断

use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use ctr::cipher::StreamCipher;
use hmac::Mac;
use log::debug;
use prost::Message;

use crate::crypto::kdf;
use crate::crypto::session::{CipherSession, MAC_LEN};
use crate::error::{ChatVaultError, Result};
use crate::format::frame::Frame;
use crate::format::header;
use crate::format::wire;

/// 附件解密的流式缓冲区大小。
/// 实测继续增大不再缩短总耗时，8 KiB 已是内存与速度的平衡点。
pub const BLOB_CHUNK_SIZE: usize = 8192;

pub struct BackupReader {
    reader: BufReader<File>,
    session: CipherSession,
    salt: Vec<u8>,
    // 已读出的帧数，引导头记为第 0 帧
    ordinal: u64,
}

impl BackupReader {
    /// 打开备份文件：读取引导头、派生密钥并初始化会话
    ///
    /// 密钥派生要迭代 25 万轮哈希，本调用有可感知的耗时。
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header = header::read_header(&mut reader)?;
        debug!(
            "header ok: iv {} bytes, salt {} bytes, version {}",
            header.iv.len(),
            header.salt.len(),
            header.version
        );

        let keys = kdf::derive_keys(passphrase, &header.salt);
        let session = CipherSession::new(keys, header.iv);

        Ok(Self {
            reader,
            session,
            salt: header.salt,
            ordinal: 1,
        })
    }

    /// 引导头携带的 salt
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// 会话计数器当前值（诊断与测试用）
    pub fn counter(&self) -> u32 {
        self.session.counter()
    }

    /// 当前文件位置
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    /// 读出下一帧，返回（帧起始偏移，帧字节长度，解码结果）
    ///
    /// 返回 `None` 表示流在帧边界上正常结束。
    pub fn next_frame(&mut self) -> Result<Option<(u64, u32, Frame)>> {
        let offset = self.reader.stream_position()?;
        let ordinal = self.ordinal;

        let mut len_buf = [0u8; 4];
        match read_full(&mut self.reader, &mut len_buf)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Err(ChatVaultError::Truncated { ordinal, offset }),
            ReadOutcome::Full => {}
        }
        let frame_len = u32::from_be_bytes(len_buf);
        if (frame_len as usize) < MAC_LEN {
            return Err(ChatVaultError::Truncated { ordinal, offset });
        }

        let mut body = vec![0u8; frame_len as usize];
        self.reader
            .read_exact(&mut body)
            .map_err(|e| truncated_on_eof(e, ordinal, offset))?;

        let boundary = body.len() - MAC_LEN;
        let (ciphertext, tag) = body.split_at_mut(boundary);
        if !self.session.verify_frame_mac(ciphertext, tag) {
            return Err(ChatVaultError::Integrity {
                unit: "frame",
                ordinal,
                offset,
            });
        }

        let iv = self.session.next_unit_iv();
        let mut cipher = self.session.cipher(&iv);
        cipher.apply_keystream(ciphertext);

        let record = wire::BackupFrame::decode(&*ciphertext).map_err(|e| ChatVaultError::Decode {
            ordinal,
            offset,
            reason: e.to_string(),
        })?;
        let frame = Frame::from_wire(record)
            .ok_or(ChatVaultError::UnknownRecordType { ordinal, offset })?;

        self.ordinal += 1;
        Ok(Some((offset, frame_len, frame)))
    }

    /// 解密紧随当前帧的附件数据并流式写入 sink（校验 MAC）
    ///
    /// 长度为 0 的附件是合法的，此时 MAC 只覆盖 IV。
    pub fn read_blob<W: Write + ?Sized>(&mut self, length: u32, sink: &mut W) -> Result<()> {
        let offset = self.reader.stream_position()?;
        // 数据归属刚读出的那一帧
        let ordinal = self.ordinal.saturating_sub(1);

        let iv = self.session.next_unit_iv();
        let mut mac = self.session.mac();
        Mac::update(&mut mac, &iv);
        let mut cipher = self.session.cipher(&iv);

        let mut buf = [0u8; BLOB_CHUNK_SIZE];
        let mut remaining = length as usize;
        while remaining > 0 {
            let chunk = &mut buf[..remaining.min(BLOB_CHUNK_SIZE)];
            self.reader
                .read_exact(chunk)
                .map_err(|e| truncated_on_eof(e, ordinal, offset))?;

            Mac::update(&mut mac, chunk);
            cipher.apply_keystream(chunk);
            sink.write_all(chunk)?;

            remaining -= chunk.len();
        }

        let mut tag = [0u8; MAC_LEN];
        self.reader
            .read_exact(&mut tag)
            .map_err(|e| truncated_on_eof(e, ordinal, offset))?;
        if mac.verify_truncated_left(&tag).is_err() {
            return Err(ChatVaultError::Integrity {
                unit: "blob",
                ordinal,
                offset,
            });
        }

        Ok(())
    }

    /// 跳过附件数据：只推进文件位置与计数器，不校验 MAC
    pub fn skip_blob(&mut self, length: u32) -> Result<()> {
        let _ = self.session.next_unit_iv();
        self.reader
            .seek_relative(i64::from(length) + MAC_LEN as i64)?;
        Ok(())
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

// 与 read_exact 的区别：能区分「一个字节都没有」与「读了一半」
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}

fn truncated_on_eof(e: std::io::Error, ordinal: u64, offset: u64) -> ChatVaultError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ChatVaultError::Truncated { ordinal, offset }
    } else {
        ChatVaultError::Io(e)
    }
}
