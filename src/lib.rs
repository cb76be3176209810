//! ChatVault 备份解密引擎
//!
//! 把移动端聊天应用的加密备份文件解出为可检查的标准工件：
//! SQLite 数据库、附件/头像/贴纸原始文件，以及设置键值转储。
//!
//! 核心是备份文件编解码与分发管线：口令派生密钥、逐帧认证解密、
//! 附件流式解密，以及把每一帧路由给可插拔消费者的控制流。
//! 处理严格单线程、按文件顺序进行。

mod analyse;
mod extract;

pub mod consume;
pub mod crypto;
pub mod error;
pub mod format;
pub mod fs;
pub mod schema;

pub use analyse::FileReport;
pub use consume::{consume, Blob, ConsumerSet};
pub use error::{ChatVaultError, Result};
pub use extract::ExtractOptions;
pub use format::frame::{Frame, FrameKind};
pub use format::reader::BackupReader;

use std::path::Path;

/// 解密并提取备份的全部内容到输出目录
pub fn extract(
    input: &Path,
    output_dir: &Path,
    passphrase: &str,
    options: ExtractOptions,
) -> Result<()> {
    extract::extract_backup(input, output_dir, passphrase, options)
}

/// 只把备份中的 SQL 语句重放为一个 SQLite 数据库文件
pub fn decrypt(input: &Path, output_db: &Path, passphrase: &str) -> Result<()> {
    extract::decrypt_database(input, output_db, passphrase)
}

/// 校验整个备份文件的完整性并统计帧分布
pub fn analyse(input: &Path, passphrase: &str) -> Result<FileReport> {
    analyse::analyse_backup(input, passphrase)
}
