//! ChatVault 会话密码学状态
//!
//! `CipherSession` 持有整个备份文件生命周期内的全部可变密码学状态：
//! 两把派生密钥、16 字节 IV，以及嵌在 IV 高 4 字节中的大端计数器。
//!
//! 协议约定（严格顺序）：
//! - 每个解密单元（帧或附件数据）开始前，把当前计数器大端写回 IV 高 4 字节，
//!   然后计数器 +1；跳过的附件同样消耗一次计数
//! - 帧的 MAC 只覆盖密文本体；附件的 MAC 先混入该单元的 IV 再覆盖密文
//! - 完整性标签是 HMAC-SHA-256 输出的前 10 字节，比较必须为常数时间
//!
//! 计数器回绕视为文件畸形，不做防御。

use aes::Aes256;
use ctr::cipher::KeyIvInit;
use ctr::Ctr32BE;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::kdf::{FrameKeys, KEY_LEN};

/// 单元完整性标签长度（HMAC-SHA-256 截断）
pub const MAC_LEN: usize = 10;

/// IV 长度（AES-CTR 计数块）
pub const IV_LEN: usize = 16;

pub(crate) type Aes256Ctr = Ctr32BE<Aes256>;
pub(crate) type HmacSha256 = Hmac<Sha256>;

pub struct CipherSession {
    cipher_key: Zeroizing<[u8; KEY_LEN]>,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
    counter: u32,
}

impl CipherSession {
    /// 以派生密钥和备份头 IV 初始化会话
    ///
    /// 计数器初值取 IV 高 4 字节的大端解释。
    pub fn new(keys: FrameKeys, iv: [u8; IV_LEN]) -> Self {
        let counter = u32::from_be_bytes([iv[0], iv[1], iv[2], iv[3]]);
        Self {
            cipher_key: keys.cipher_key,
            mac_key: keys.mac_key,
            iv,
            counter,
        }
    }

    /// 当前计数器值（诊断与测试用）
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// 进入下一个解密单元：写回计数器并 +1，返回该单元使用的 IV
    pub(crate) fn next_unit_iv(&mut self) -> [u8; IV_LEN] {
        self.iv[..4].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.wrapping_add(1);
        self.iv
    }

    /// 为一个单元构造全新的 AES-256-CTR 流
    pub(crate) fn cipher(&self, iv: &[u8; IV_LEN]) -> Aes256Ctr {
        Aes256Ctr::new((&*self.cipher_key).into(), iv.into())
    }

    /// 全新的 HMAC-SHA-256 状态（每个单元重置）
    pub(crate) fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&*self.mac_key).expect("HMAC 接受任意长度密钥")
    }

    /// 校验帧 MAC：标签为前 10 字节截断，常数时间比较
    pub(crate) fn verify_frame_mac(&self, body: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac();
        Mac::update(&mut mac, body);
        mac.verify_truncated_left(tag).is_ok()
    }
}
