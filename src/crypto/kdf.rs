//! ChatVault 密钥派生函数（KDF）模块
//!
//! 本模块负责将用户输入的备份口令与备份头中的 salt，
//! 派生为帧解密所需的两把对称密钥。
//!
//! 派生流程由备份生产方固定，必须逐位兼容：
//! 1. 口令归一化：去除首尾空白，并删除中间的所有空格
//! 2. SHA-512 迭代 250,000 轮（首轮混入 salt），取前 32 字节作为 backup key
//! 3. HKDF-SHA-256 展开（salt 为 32 字节零，info 为 "Backup Export"），
//!    共 64 字节，前 32 字节为加密密钥，后 32 字节为 MAC 密钥
//!
//! 注意：
//! - 空格处理与生产方不一致是「密码正确却校验失败」的最常见原因
//! - salt 允许为空
//! - 口令错误不会在本模块报错，而是在首个加密帧的 MAC 校验时暴露
//!
//! 输出：
//! - 32 字节 AES-256-CTR 密钥 + 32 字节 HMAC-SHA-256 密钥（自动 zeroize）

use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// 派生密钥长度（256-bit）
pub const KEY_LEN: usize = 32;

/// 生产方固定的 SHA-512 迭代轮数，禁止调整
const KDF_ROUNDS: usize = 250_000;

/// HKDF 的 info 字段，由备份格式固定
const HKDF_INFO: &[u8] = b"Backup Export";

/// 帧密钥对
///
/// 两把密钥在离开作用域后自动清零。
pub struct FrameKeys {
    pub cipher_key: Zeroizing<[u8; KEY_LEN]>,
    pub mac_key: Zeroizing<[u8; KEY_LEN]>,
}

/// 根据口令和 salt 派生帧密钥对
///
/// #### 参数
/// - `passphrase`：用户输入的备份口令（UTF-8，空格会被剔除）
/// - `salt`：备份头中携带的 salt（可以为空）
///
/// #### 返回
/// - 加密密钥与 MAC 密钥（均自动 zeroize）
pub fn derive_keys(passphrase: &str, salt: &[u8]) -> FrameKeys {
    let normalized = Zeroizing::new(passphrase.trim().replace(' ', ""));
    let input = normalized.as_bytes();

    let mut digest = Sha512::new();
    if !salt.is_empty() {
        digest.update(salt);
    }

    let mut hash = Zeroizing::new(input.to_vec());
    for _ in 0..KDF_ROUNDS {
        digest.update(&*hash);
        digest.update(input);
        *hash = digest.finalize_reset().to_vec();
    }

    let hk = Hkdf::<Sha256>::new(Some(&[0u8; KEY_LEN]), &hash[..KEY_LEN]);
    let mut okm = Zeroizing::new([0u8; KEY_LEN * 2]);
    hk.expand(HKDF_INFO, &mut *okm)
        .expect("64 字节在 HKDF-SHA256 的输出上限之内");

    let mut cipher_key = Zeroizing::new([0u8; KEY_LEN]);
    let mut mac_key = Zeroizing::new([0u8; KEY_LEN]);
    cipher_key.copy_from_slice(&okm[..KEY_LEN]);
    mac_key.copy_from_slice(&okm[KEY_LEN..]);

    FrameKeys {
        cipher_key,
        mac_key,
    }
}
