use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use hmac::{Hmac, Mac};
use prost::Message;
use sha2::Sha256;
use tempfile::tempdir;

use chatvault::crypto::kdf;
use chatvault::format::wire;
use chatvault::{consume, BackupReader, ChatVaultError, ConsumerSet, Frame, FrameKind};

type Aes256Ctr = Ctr32BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const PASSPHRASE: &str = "123456123456123456123456123456";
const SALT: [u8; 7] = [0x11; 7];
const IV: [u8; 16] = [0; 16];

// 用与解码端相同的原语在内存中搭出合法的备份文件
struct BackupBuilder {
    out: Vec<u8>,
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    counter: u32,
}

impl BackupBuilder {
    fn new() -> Self {
        let keys = kdf::derive_keys(PASSPHRASE, &SALT);

        let header = wire::BackupFrame {
            header: Some(wire::Header {
                iv: Some(IV.to_vec()),
                salt: Some(SALT.to_vec()),
                version: None,
            }),
            ..Default::default()
        };
        let encoded = header.encode_to_vec();

        let mut out = Vec::new();
        out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        out.extend_from_slice(&encoded);

        Self {
            out,
            cipher_key: *keys.cipher_key,
            mac_key: *keys.mac_key,
            iv: IV,
            counter: 0,
        }
    }

    fn len(&self) -> usize {
        self.out.len()
    }

    fn unit_iv(&mut self) -> [u8; 16] {
        self.iv[..4].copy_from_slice(&self.counter.to_be_bytes());
        self.counter += 1;
        self.iv
    }

    fn push_frame(&mut self, frame: &wire::BackupFrame) {
        let mut data = frame.encode_to_vec();

        let iv = self.unit_iv();
        let mut cipher = Aes256Ctr::new((&self.cipher_key).into(), (&iv).into());
        cipher.apply_keystream(&mut data);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("mac key");
        mac.update(&data);
        let tag = mac.finalize().into_bytes();

        self.out
            .extend_from_slice(&((data.len() + 10) as u32).to_be_bytes());
        self.out.extend_from_slice(&data);
        self.out.extend_from_slice(&tag[..10]);
    }

    fn push_blob(&mut self, plaintext: &[u8]) {
        let iv = self.unit_iv();
        let mut data = plaintext.to_vec();
        let mut cipher = Aes256Ctr::new((&self.cipher_key).into(), (&iv).into());
        cipher.apply_keystream(&mut data);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("mac key");
        mac.update(&iv);
        mac.update(&data);
        let tag = mac.finalize().into_bytes();

        self.out.extend_from_slice(&data);
        self.out.extend_from_slice(&tag[..10]);
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

fn version_frame(version: u32) -> wire::BackupFrame {
    wire::BackupFrame {
        version: Some(wire::DatabaseVersion {
            version: Some(version),
        }),
        ..Default::default()
    }
}

fn end_frame() -> wire::BackupFrame {
    wire::BackupFrame {
        end: Some(true),
        ..Default::default()
    }
}

fn statement_frame(sql: &str, parameters: Vec<wire::SqlParameter>) -> wire::BackupFrame {
    wire::BackupFrame {
        statement: Some(wire::SqlStatement {
            statement: Some(sql.to_string()),
            parameters,
        }),
        ..Default::default()
    }
}

fn attachment_frame(id: u64, length: u32) -> wire::BackupFrame {
    wire::BackupFrame {
        attachment: Some(wire::Attachment {
            row_id: Some(id),
            attachment_id: Some(id),
            length: Some(length),
        }),
        ..Default::default()
    }
}

fn int_param(v: i64) -> wire::SqlParameter {
    wire::SqlParameter {
        integer_parameter: Some(v as u64),
        ..Default::default()
    }
}

fn text_param(s: &str) -> wire::SqlParameter {
    wire::SqlParameter {
        string_parameter: Some(s.to_string()),
        ..Default::default()
    }
}

fn blob_plaintext(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) & 0xff) as u8).collect()
}

fn write_fixture(dir: &Path, bytes: &[u8]) -> PathBuf {
    let path = dir.join("backup.bin");
    fs::write(&path, bytes).expect("write fixture");
    path
}

#[test]
fn golden_backup_bytes_decode() {
    // 一次性抓取的金样字节：header + Version(1) 帧 + End 帧。
    // 构造端与解码端各自对照同一份字节。
    let golden = hex::decode(concat!(
        "0000001d0a1b0a1000000000000000000000000000000000120711111111111111",
        "0000000e8128751492bcb193281784730714",
        "0000000cdee9300b4b2b67cd354f5f77",
    ))
    .expect("golden hex");

    let mut builder = BackupBuilder::new();
    builder.push_frame(&version_frame(1));
    builder.push_frame(&end_frame());
    assert_eq!(hex::encode(builder.finish()), hex::encode(&golden));

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &golden);

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");
    assert_eq!(reader.counter(), 0);
    assert_eq!(reader.salt(), &SALT);

    let (_, _, frame) = reader.next_frame().expect("first frame").expect("some");
    match frame {
        Frame::Version(v) => assert_eq!(v.version, Some(1)),
        other => panic!("expected version frame, got {:?}", other.kind()),
    }

    let (_, _, frame) = reader.next_frame().expect("second frame").expect("some");
    assert!(matches!(frame, Frame::End(true)));

    assert_eq!(reader.counter(), 2);
    assert!(reader.next_frame().expect("clean eof").is_none());
}

#[test]
fn wrong_password_fails_on_first_frame() {
    // 引导头不认证，口令错误要到首个加密帧才暴露为完整性错误。
    let mut builder = BackupBuilder::new();
    builder.push_frame(&version_frame(1));
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let mut reader = BackupReader::open(&path, "wrong-password").expect("open backup");
    let err = reader.next_frame().expect_err("expected integrity failure");
    assert!(matches!(
        err,
        ChatVaultError::Integrity {
            unit: "frame",
            ordinal: 1,
            ..
        }
    ));
}

#[test]
fn single_bit_flip_breaks_frame_integrity() {
    let mut builder = BackupBuilder::new();
    let header_len = builder.len();
    builder.push_frame(&version_frame(1));
    builder.push_frame(&end_frame());

    let mut bytes = builder.finish();
    // 长度前缀之后的第一个密文字节
    bytes[header_len + 4] ^= 0x01;

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &bytes);

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");
    let err = reader.next_frame().expect_err("expected integrity failure");
    assert!(matches!(
        err,
        ChatVaultError::Integrity { unit: "frame", .. }
    ));
}

#[test]
fn attachment_blob_streams_back_to_plaintext() {
    // 帧与数据各消耗一次计数，流出的明文逐字节一致。
    let plaintext = blob_plaintext(8192);
    let mut builder = BackupBuilder::new();
    builder.push_frame(&attachment_frame(7, 8192));
    builder.push_blob(&plaintext);
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");

    let (_, _, frame) = reader.next_frame().expect("frame").expect("some");
    assert_eq!(frame.kind(), FrameKind::Attachment);
    assert_eq!(frame.blob_length(), Some(8192));
    assert_eq!(reader.counter(), 1);

    let mut sink = Vec::new();
    reader.read_blob(8192, &mut sink).expect("stream blob");
    assert_eq!(reader.counter(), 2);
    assert_eq!(sink, plaintext);

    let (_, _, frame) = reader.next_frame().expect("frame").expect("some");
    assert!(matches!(frame, Frame::End(true)));
}

#[test]
fn zero_length_blob_is_legal() {
    // 长度为 0 的附件只有一个覆盖 IV 的 MAC。
    let mut builder = BackupBuilder::new();
    builder.push_frame(&attachment_frame(1, 0));
    builder.push_blob(b"");
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");
    reader.next_frame().expect("frame").expect("some");

    let mut sink = Vec::new();
    reader.read_blob(0, &mut sink).expect("stream empty blob");
    assert!(sink.is_empty());
    assert_eq!(reader.counter(), 2);
}

#[test]
fn skip_mode_keeps_position_and_counter_aligned() {
    // 跳过只前进 length + 10 字节并消耗一次计数，后续帧照常通过校验。
    let plaintext = blob_plaintext(8192);
    let mut builder = BackupBuilder::new();
    builder.push_frame(&attachment_frame(7, 8192));
    builder.push_blob(&plaintext);
    builder.push_frame(&version_frame(9));
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");
    reader.next_frame().expect("frame").expect("some");

    let position = reader.position().expect("position");
    let counter = reader.counter();
    reader.skip_blob(8192).expect("skip blob");
    assert_eq!(reader.position().expect("position"), position + 8202);
    assert_eq!(reader.counter(), counter + 1);

    let (_, _, frame) = reader.next_frame().expect("frame").expect("some");
    match frame {
        Frame::Version(v) => assert_eq!(v.version, Some(9)),
        other => panic!("expected version frame, got {:?}", other.kind()),
    }
}

#[test]
fn unset_blob_consumer_defaults_to_skip() {
    // 未设置附件回调时默认跳过，遍历结束后计数器等于帧数加数据数。
    let plaintext = blob_plaintext(1024);
    let mut builder = BackupBuilder::new();
    builder.push_frame(&attachment_frame(7, 1024));
    builder.push_blob(&plaintext);
    builder.push_frame(&version_frame(9));
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");

    let kinds = RefCell::new(Vec::new());
    let mut fns = ConsumerSet::default();
    fns.frame = Some(Box::new(|frame: &Frame, _offset, _length| {
        kinds.borrow_mut().push(frame.kind());
        Ok(())
    }));

    consume(&mut reader, &mut fns).expect("consume");
    drop(fns);

    assert_eq!(
        kinds.into_inner(),
        vec![FrameKind::Attachment, FrameKind::Version, FrameKind::End]
    );
    // 3 帧 + 1 个附件数据
    assert_eq!(reader.counter(), 4);
}

#[test]
fn truncated_file_reports_truncation() {
    let mut builder = BackupBuilder::new();
    let header_len = builder.len();
    builder.push_frame(&version_frame(1));

    let mut bytes = builder.finish();
    bytes.truncate(header_len + 4 + 5);

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &bytes);

    let mut reader = BackupReader::open(&path, PASSPHRASE).expect("open backup");
    let err = reader.next_frame().expect_err("expected truncation");
    assert!(matches!(err, ChatVaultError::Truncated { ordinal: 1, .. }));
}

#[test]
fn analyse_counts_frames_and_blob_bytes() {
    let plaintext = blob_plaintext(2048);
    let mut builder = BackupBuilder::new();
    builder.push_frame(&version_frame(3));
    builder.push_frame(&attachment_frame(1, 2048));
    builder.push_blob(&plaintext);
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());

    let report = chatvault::analyse(&path, PASSPHRASE).expect("analyse");
    assert_eq!(report.frames, 3);
    assert_eq!(report.database_version, Some(3));
    assert_eq!(report.frame_counts.get(&FrameKind::Attachment), Some(&1));
    assert_eq!(report.blob_bytes.get(&FrameKind::Attachment), Some(&2048));
}

#[test]
fn extract_rebuilds_database_files_and_settings() {
    // 端到端：数据库行、按元数据命名的附件、设置 JSON 全部就位。
    let attachment_bytes = blob_plaintext(64);

    let mut builder = BackupBuilder::new();
    builder.push_frame(&version_frame(42));
    builder.push_frame(&statement_frame(
        "CREATE TABLE part (_id INTEGER PRIMARY KEY AUTOINCREMENT, mid INTEGER, \
         ct TEXT, data_size INTEGER, file_name TEXT, unique_id INTEGER, \
         UNIQUE(mid, unique_id))",
        Vec::new(),
    ));
    builder.push_frame(&statement_frame(
        "INSERT INTO part VALUES (?, ?, ?, ?, ?, ?)",
        vec![
            int_param(1),
            int_param(5),
            text_param("image/jpeg"),
            int_param(64),
            text_param("photo.jpg"),
            int_param(10),
        ],
    ));
    builder.push_frame(&attachment_frame(10, 64));
    builder.push_blob(&attachment_bytes);
    builder.push_frame(&wire::BackupFrame {
        preference: Some(wire::SharedPreference {
            file: Some("user_prefs".to_string()),
            key: Some("theme".to_string()),
            value: Some("dark".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    builder.push_frame(&wire::BackupFrame {
        key_value: Some(wire::KeyValue {
            key: Some("registered".to_string()),
            boolean_value: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    });
    builder.push_frame(&wire::BackupFrame {
        key_value: Some(wire::KeyValue {
            key: Some("backup_token".to_string()),
            blob_value: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        }),
        ..Default::default()
    });
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());
    let out = dir.path().join("out");

    chatvault::extract(&path, &out, PASSPHRASE, chatvault::ExtractOptions::default())
        .expect("extract backup");

    // 数据库：行数据与 user_version
    let conn = rusqlite::Connection::open(out.join("signal.db")).expect("open db");
    let user_version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .expect("user_version");
    assert_eq!(user_version, 42);

    let (ct, size, unique_id): (String, i64, i64) = conn
        .query_row(
            "SELECT ct, data_size, unique_id FROM part",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("part row");
    assert_eq!(ct, "image/jpeg");
    assert_eq!(size, 64);
    assert_eq!(unique_id, 10);

    // 附件按「<id>.<file_name>」落盘，内容为明文
    let written = fs::read(out.join("Attachments").join("10.photo.jpg")).expect("attachment file");
    assert_eq!(written, attachment_bytes);

    // 设置分组各自成 JSON 文件
    let prefs: serde_json::Value = serde_json::from_slice(
        &fs::read(out.join("Settings").join("user_prefs.json")).expect("prefs json"),
    )
    .expect("parse prefs");
    assert_eq!(prefs["theme"], "dark");

    let keyvalues: serde_json::Value = serde_json::from_slice(
        &fs::read(out.join("Settings").join("signal.json")).expect("keyvalue json"),
    )
    .expect("parse keyvalues");
    assert_eq!(keyvalues["registered"], true);
    // 二进制值以 base64 落盘
    assert_eq!(keyvalues["backup_token"], "3q2+7w==");
}

#[test]
fn decrypt_writes_database_only() {
    let mut builder = BackupBuilder::new();
    builder.push_frame(&statement_frame(
        "CREATE TABLE kv (k TEXT, v INTEGER)",
        Vec::new(),
    ));
    builder.push_frame(&statement_frame(
        "INSERT INTO kv VALUES (?, ?)",
        vec![text_param("answer"), int_param(-1)],
    ));
    builder.push_frame(&end_frame());

    let dir = tempdir().expect("create temp dir");
    let path = write_fixture(dir.path(), &builder.finish());
    let db_path = dir.path().join("rebuilt.db");

    chatvault::decrypt(&path, &db_path, PASSPHRASE).expect("decrypt backup");

    let conn = rusqlite::Connection::open(&db_path).expect("open db");
    let v: i64 = conn
        .query_row("SELECT v FROM kv WHERE k = 'answer'", [], |row| row.get(0))
        .expect("kv row");
    assert_eq!(v, -1);
}
