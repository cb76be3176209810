//! 提取流程实现
//!
//! 本模块把备份内容还原为磁盘上的标准工件：
//!
//! 提取流程（严格顺序）：
//! 1. 打开备份并派生密钥
//! 2. 创建输出目录结构与新数据库
//! 3. 单次顺序遍历全部帧：SQL 语句重放进数据库并沿途积累
//!    附件/头像/贴纸的元数据，数据帧按元数据落盘，
//!    偏好与键值帧聚合进内存
//! 4. 遍历结束后写出各设置分组的 JSON
//!
//! 注意：
//! - 元数据行一定先于其对应的数据帧出现，这是生产方的写出顺序保证
//! - 被跳过的类别仍会以跳过模式消耗数据，保持流对齐
//! - `sqlite_` 前缀是保留表名，相关语句直接丢弃

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use base64::prelude::*;
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::consume::{consume, Blob, ConsumerSet};
use crate::error::{ChatVaultError, Result};
use crate::format::frame::Frame;
use crate::format::reader::BackupReader;
use crate::format::wire;
use crate::fs::atomic::write_atomic;
use crate::schema::{bind_parameter, unwrap, Affinity, Schema, Value};

const DB_FILENAME: &str = "signal.db";
const FOLDER_ATTACHMENT: &str = "Attachments";
const FOLDER_AVATAR: &str = "Avatars";
const FOLDER_STICKER: &str = "Stickers";
const FOLDER_SETTINGS: &str = "Settings";
const STICKER_INFO_FILENAME: &str = "pack_info.json";

// 键值帧没有归属文件，统一落到这个设置分组
const KEYVALUE_SETTINGS_FILE: &str = "signal";

/// 各类别的提取开关（true = 提取）
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub database: bool,
    pub attachments: bool,
    pub avatars: bool,
    pub stickers: bool,
    pub settings: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            database: true,
            attachments: true,
            avatars: true,
            stickers: true,
            settings: true,
        }
    }
}

/// 一次提取运行期间积累的全部状态
///
/// schema 缓存归本次运行所有，不做进程级共享。
#[derive(Default)]
struct RunState {
    schemas: HashMap<String, Schema>,
    announced: HashSet<String>,
    attachments: HashMap<i64, AttachmentInfo>,
    avatars: HashMap<String, AvatarInfo>,
    stickers: HashMap<i64, StickerInfo>,
    prefs: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

struct AttachmentInfo {
    mime: Option<String>,
    size: Option<i64>,
    name: Option<String>,
}

struct AvatarInfo {
    display_name: Option<String>,
    profile_name: Option<String>,
}

#[derive(Clone, Serialize)]
struct StickerInfo {
    pack_id: String,
    title: String,
    author: String,
    #[serde(skip)]
    sticker_id: i64,
    #[serde(skip)]
    size: Option<i64>,
    #[serde(skip)]
    cover: bool,
}

/// 解密并提取备份的全部内容到输出目录
pub fn extract_backup(
    input: &Path,
    base: &Path,
    passphrase: &str,
    options: ExtractOptions,
) -> Result<()> {
    // ---------- 打开备份 ----------
    let mut reader = BackupReader::open(input, passphrase)?;

    // ---------- 准备输出目录结构 ----------
    fs::create_dir_all(base)?;
    if options.attachments {
        fs::create_dir_all(base.join(FOLDER_ATTACHMENT))?;
    }
    if options.avatars {
        fs::create_dir_all(base.join(FOLDER_AVATAR))?;
    }
    if options.stickers {
        fs::create_dir_all(base.join(FOLDER_STICKER))?;
    }
    if options.settings {
        fs::create_dir_all(base.join(FOLDER_SETTINGS))?;
    }

    let db = if options.database {
        Some(create_database(&base.join(DB_FILENAME))?)
    } else {
        None
    };

    // ---------- 安装消费者 ----------
    let state = RefCell::new(RunState::default());
    let mut fns = ConsumerSet::default();

    fns.frame = Some(Box::new(|frame: &Frame, _offset, _length| {
        if let Frame::Version(v) = frame {
            let version = v.version.unwrap_or(0);
            info!("database version {version}");
            if let Some(conn) = db.as_ref() {
                conn.pragma_update(None, "user_version", &version)?;
            }
        }
        Ok(())
    }));

    fns.statement = Some(Box::new(|s: &wire::SqlStatement| {
        handle_statement(&state, db.as_ref(), s, true)
    }));

    if options.attachments {
        fns.attachment = Some(Box::new(|a: &wire::Attachment, blob: Blob<'_>| {
            let id = a.attachment_id.or(a.row_id).unwrap_or(0) as i64;
            let declared = a.length.unwrap_or(0);

            let mut file_name = id.to_string();
            {
                let st = state.borrow();
                match st.attachments.get(&id) {
                    None => warn!("attachment `{id}` has no associated SQL entry"),
                    Some(info) => {
                        if info.size.is_some_and(|size| size != i64::from(declared)) {
                            warn!(
                                "attachment length ({declared}) mismatches SQL entry size ({})",
                                info.size.unwrap_or(0)
                            );
                        }
                        if let Some(name) = &info.name {
                            file_name.push('.');
                            file_name.push_str(name);
                        }
                        if info.mime.is_none() {
                            warn!("file `{id}` has no declared MIME type");
                        }
                    }
                }
            }

            let path = base
                .join(FOLDER_ATTACHMENT)
                .join(escape_file_name(&file_name));
            write_atomic(&path, |file| blob.stream_to(file))
        }));
    }

    if options.avatars {
        fns.avatar = Some(Box::new(|a: &wire::Avatar, blob: Blob<'_>| {
            let id = a.recipient_id.clone().unwrap_or_default();

            let mut file_name = id.clone();
            {
                let st = state.borrow();
                match st.avatars.get(&id) {
                    None => warn!("avatar `{id}` has no associated SQL entry"),
                    Some(info) => {
                        let shown = info.display_name.as_ref().or(info.profile_name.as_ref());
                        if let Some(name) = shown {
                            file_name.push_str(&format!(" ({name})"));
                        }
                    }
                }
            }

            let path = base.join(FOLDER_AVATAR).join(escape_file_name(&file_name));
            write_atomic(&path, |file| blob.stream_to(file))
        }));
    }

    if options.stickers {
        fns.sticker = Some(Box::new(|s: &wire::Sticker, blob: Blob<'_>| {
            let id = s.row_id.unwrap_or(0) as i64;
            let declared = s.length.unwrap_or(0);
            let info = state.borrow().stickers.get(&id).cloned();

            let (dir, file_name) = match &info {
                None => {
                    warn!("sticker `{id}` has no associated SQL entry");
                    (base.join(FOLDER_STICKER), id.to_string())
                }
                Some(info) => {
                    if info.size.is_some_and(|size| size != i64::from(declared)) {
                        warn!(
                            "sticker length ({declared}) mismatches SQL entry size ({})",
                            info.size.unwrap_or(0)
                        );
                    }
                    if info.cover {
                        debug!("sticker `{id}` is the cover of pack {}", info.pack_id);
                    }
                    let pack_dir = base.join(FOLDER_STICKER).join(&info.pack_id);
                    fs::create_dir_all(&pack_dir)?;
                    write_atomic(&pack_dir.join(STICKER_INFO_FILENAME), |file| {
                        serde_json::to_writer_pretty(file, info).map_err(ChatVaultError::from)
                    })?;
                    (pack_dir, info.sticker_id.to_string())
                }
            };

            write_atomic(&dir.join(escape_file_name(&file_name)), |file| {
                blob.stream_to(file)
            })
        }));
    }

    if options.settings {
        fns.preference = Some(Box::new(|p: &wire::SharedPreference| {
            let mut st = state.borrow_mut();
            let group = st.prefs.entry(p.file.clone().unwrap_or_default()).or_default();
            let Some(key) = p.key.clone() else {
                return Ok(());
            };

            let value = if p.is_string_set_value.unwrap_or(false) {
                json!(p.string_set_value)
            } else if let Some(b) = p.boolean_value {
                json!(b)
            } else {
                p.value
                    .clone()
                    .map_or(serde_json::Value::Null, serde_json::Value::String)
            };
            group.insert(key, value);
            Ok(())
        }));

        fns.keyvalue = Some(Box::new(|kv: &wire::KeyValue| {
            let mut st = state.borrow_mut();
            let group = st.prefs.entry(KEYVALUE_SETTINGS_FILE.to_string()).or_default();
            let Some(key) = kv.key.clone() else {
                return Ok(());
            };
            group.insert(key, keyvalue_json(kv));
            Ok(())
        }));
    }

    // ---------- 遍历全部帧并收尾 ----------
    consume(&mut reader, &mut fns)?;
    drop(fns);

    if options.settings {
        write_settings(base, &state.borrow().prefs)?;
    }

    info!("done");
    Ok(())
}

/// 只把备份中的 SQL 语句重放为一个 SQLite 数据库文件
pub fn decrypt_database(input: &Path, output: &Path, passphrase: &str) -> Result<()> {
    let mut reader = BackupReader::open(input, passphrase)?;
    let db = create_database(output)?;

    let state = RefCell::new(RunState::default());
    let mut fns = ConsumerSet::default();

    fns.frame = Some(Box::new(|frame: &Frame, _offset, _length| {
        if let Frame::Version(v) = frame {
            db.pragma_update(None, "user_version", &v.version.unwrap_or(0))?;
        }
        Ok(())
    }));
    fns.statement = Some(Box::new(|s: &wire::SqlStatement| {
        handle_statement(&state, Some(&db), s, false)
    }));

    consume(&mut reader, &mut fns)?;
    drop(fns);

    info!("done");
    Ok(())
}

// CREATE TABLE 喂给 schema 缓存，INSERT INTO 经 schema 重绑参数，
// 其余语句原样重放。
fn handle_statement(
    state: &RefCell<RunState>,
    db: Option<&Connection>,
    s: &wire::SqlStatement,
    collect_metadata: bool,
) -> Result<()> {
    let Some(stmt) = s.statement.as_deref() else {
        return Ok(());
    };

    let mut bound: Option<Vec<Value>> = None;

    if stmt.starts_with("CREATE TABLE ") {
        let mut parts = stmt.splitn(4, ' ');
        let table_token = parts.nth(2);
        let column_list = parts.next();

        if let (Some(token), Some(columns)) = (table_token, column_list) {
            let table = unwrap(token, '"', '"').to_string();
            if table.starts_with("sqlite_") {
                info!("skipping reserved table name {table}");
                return Ok(());
            }
            state
                .borrow_mut()
                .schemas
                .insert(table, Schema::parse(columns));
        }
    } else if stmt.starts_with("INSERT INTO ") {
        let mut parts = stmt.splitn(4, ' ');
        if let Some(token) = parts.nth(2) {
            let table = unwrap(token, '"', '"').to_string();

            let mut st = state.borrow_mut();
            let st = &mut *st;
            if st.announced.insert(table.clone()) {
                info!("populating table `{table}` ...");
            }

            if let Some(sch) = st.schemas.get(&table) {
                let values = sch.bind_row(&s.parameters);
                if collect_metadata {
                    match table.as_str() {
                        "part" => record_attachment(sch, &values, &mut st.attachments),
                        "recipient" => record_avatar(sch, &values, &mut st.avatars),
                        "sticker" => record_sticker(sch, &values, &mut st.stickers),
                        _ => {}
                    }
                }
                bound = Some(values);
            }
        }
    }

    if let Some(conn) = db {
        // 没见过 CREATE TABLE 的表按无亲和性绑定
        let values = bound.unwrap_or_else(|| {
            s.parameters
                .iter()
                .map(|cell| bind_parameter(cell, Affinity::None))
                .collect()
        });
        if let Err(e) = conn.execute(stmt, rusqlite::params_from_iter(values.iter())) {
            warn!("SQL exec failed for: {stmt}");
            return Err(e.into());
        }
    }

    Ok(())
}

fn record_attachment(sch: &Schema, values: &[Value], out: &mut HashMap<i64, AttachmentInfo>) {
    let Some(id) = integer_at(sch, values, "unique_id") else {
        warn!("part row has no usable unique_id; attachment metadata skipped");
        return;
    };
    out.insert(
        id,
        AttachmentInfo {
            mime: text_at(sch, values, "ct"),
            size: integer_at(sch, values, "data_size"),
            name: text_at(sch, values, "file_name"),
        },
    );
}

fn record_avatar(sch: &Schema, values: &[Value], out: &mut HashMap<String, AvatarInfo>) {
    let Some(id) = integer_at(sch, values, "_id") else {
        warn!("recipient row has no usable _id; avatar metadata skipped");
        return;
    };
    out.insert(
        id.to_string(),
        AvatarInfo {
            display_name: text_at(sch, values, "system_display_name"),
            profile_name: text_at(sch, values, "signal_profile_name"),
        },
    );
}

fn record_sticker(sch: &Schema, values: &[Value], out: &mut HashMap<i64, StickerInfo>) {
    let (Some(id), Some(pack_id)) = (
        integer_at(sch, values, "_id"),
        text_at(sch, values, "pack_id"),
    ) else {
        warn!("sticker row has no usable _id/pack_id; sticker metadata skipped");
        return;
    };
    out.insert(
        id,
        StickerInfo {
            pack_id,
            title: text_at(sch, values, "pack_title").unwrap_or_default(),
            author: text_at(sch, values, "pack_author").unwrap_or_default(),
            sticker_id: integer_at(sch, values, "sticker_id").unwrap_or(id),
            size: integer_at(sch, values, "file_length"),
            cover: integer_at(sch, values, "cover").unwrap_or(0) != 0,
        },
    );
}

fn integer_at(sch: &Schema, values: &[Value], column: &str) -> Option<i64> {
    values.get(sch.column_index(column)?)?.as_integer()
}

fn text_at(sch: &Schema, values: &[Value], column: &str) -> Option<String> {
    values
        .get(sch.column_index(column)?)?
        .as_text()
        .map(str::to_string)
}

fn create_database(path: &Path) -> Result<Connection> {
    info!("begin decrypt into {}", path.display());

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

fn write_settings(
    base: &Path,
    prefs: &BTreeMap<String, BTreeMap<String, serde_json::Value>>,
) -> Result<()> {
    for (file, group) in prefs {
        let path = base
            .join(FOLDER_SETTINGS)
            .join(format!("{}.json", escape_file_name(file)));
        write_atomic(&path, |out| {
            serde_json::to_writer_pretty(out, group).map_err(ChatVaultError::from)
        })?;
    }
    Ok(())
}

// 探测顺序与生产方一致：boolean、float、integer、long、string、blob
fn keyvalue_json(kv: &wire::KeyValue) -> serde_json::Value {
    if let Some(b) = kv.boolean_value {
        json!(b)
    } else if let Some(f) = kv.float_value {
        serde_json::Number::from_f64(f64::from(f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number)
    } else if let Some(i) = kv.integer_value {
        json!(i)
    } else if let Some(l) = kv.long_value {
        json!(l)
    } else if let Some(s) = &kv.string_value {
        json!(s)
    } else if let Some(b) = &kv.blob_value {
        json!(BASE64_STANDARD.encode(b))
    } else {
        serde_json::Value::Null
    }
}

/// 把文件名中的非法字符转义为 %XX 形式
fn escape_file_name(name: &str) -> String {
    const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c < ' ' || ILLEGAL.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}
