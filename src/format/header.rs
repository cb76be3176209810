//! 备份文件引导头解析
//!
//! 文件首帧是整个备份的「格式锚点」：
//! - 4 字节大端长度前缀，后接一条未加密、未认证的线格式帧
//! - 必须解码为 Header 变体，携带 16 字节 IV 与变长 salt
//! - 此时密钥尚不存在，因此首帧不可能做 MAC 校验；
//!   口令错误要到首个加密帧才会暴露
//!
//! 校验规则：
//! - version 缺省视为 0；大于 0 的版本一律拒绝
//! - IV 必须恰好 16 字节
//! - salt 必须存在（允许为空字节串）
//!
//! Header 解析失败必须立即拒绝继续处理。

use std::io::Read;

use prost::Message;

use crate::crypto::session::IV_LEN;
use crate::error::{ChatVaultError, Result};
use crate::format::wire;

/// 引导头携带的密钥派生材料
#[derive(Debug, Clone)]
pub struct HeaderData {
    pub iv: [u8; IV_LEN],
    pub salt: Vec<u8>,
    pub version: u32,
}

/// 从输入流读取并校验引导头
pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<HeaderData> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|_| ChatVaultError::InvalidHeader("missing header frame"))?;
    let length = u32::from_be_bytes(len_buf);

    let mut encoded = vec![0u8; length as usize];
    reader
        .read_exact(&mut encoded)
        .map_err(|_| ChatVaultError::InvalidHeader("header frame shorter than declared length"))?;

    let record = wire::BackupFrame::decode(&encoded[..])
        .map_err(|_| ChatVaultError::InvalidHeader("header frame does not decode"))?;
    let header = record
        .header
        .ok_or(ChatVaultError::InvalidHeader("first frame is not a header"))?;

    let version = header.version.unwrap_or(0);
    if version != 0 {
        return Err(ChatVaultError::UnsupportedVersion(version));
    }

    let iv: [u8; IV_LEN] = header
        .iv
        .as_deref()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ChatVaultError::InvalidHeader("IV missing or not 16 bytes"))?;

    let salt = header
        .salt
        .ok_or(ChatVaultError::InvalidHeader("salt missing"))?;

    Ok(HeaderData { iv, salt, version })
}
