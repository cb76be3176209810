//! 备份帧的线格式（protobuf）定义
//!
//! 字段编号是与既有生产方之间的逐位接口，禁止改动。
//! 未知字段编号由 prost 静默跳过，以兼容生产方后续新增的字段。
//!
//! 外层 `BackupFrame` 在线格式上是一组可选字段而非 oneof，
//! 生产方保证每条记录只填充其中一个；收敛为带标签的
//! [`Frame`](crate::format::frame::Frame) 枚举在上层完成。

/// 外层帧记录
#[derive(Clone, PartialEq, prost::Message)]
pub struct BackupFrame {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(message, optional, tag = "2")]
    pub statement: Option<SqlStatement>,
    #[prost(message, optional, tag = "3")]
    pub preference: Option<SharedPreference>,
    #[prost(message, optional, tag = "4")]
    pub attachment: Option<Attachment>,
    #[prost(message, optional, tag = "5")]
    pub version: Option<DatabaseVersion>,
    #[prost(bool, optional, tag = "6")]
    pub end: Option<bool>,
    #[prost(message, optional, tag = "7")]
    pub avatar: Option<Avatar>,
    #[prost(message, optional, tag = "8")]
    pub sticker: Option<Sticker>,
    #[prost(message, optional, tag = "9")]
    pub key_value: Option<KeyValue>,
}

/// 引导头。文件首帧未加密未认证，仅携带密钥派生所需的材料。
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub iv: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub salt: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub version: Option<u32>,
}

/// 一条 SQL 语句及其按位置排列的参数单元
#[derive(Clone, PartialEq, prost::Message)]
pub struct SqlStatement {
    #[prost(string, optional, tag = "1")]
    pub statement: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub parameters: Vec<SqlParameter>,
}

/// 多态参数单元：至多填充其中一个值字段
///
/// integer 字段在线格式上是 uint64，但生产方会把 -1 之类的
/// 有符号值按位存入，还原时必须按 64 位有符号解释。
#[derive(Clone, PartialEq, prost::Message)]
pub struct SqlParameter {
    #[prost(string, optional, tag = "1")]
    pub string_parameter: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub integer_parameter: Option<u64>,
    #[prost(double, optional, tag = "3")]
    pub double_parameter: Option<f64>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub blob_parameter: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "5")]
    pub null_parameter: Option<bool>,
}

/// 共享偏好条目，按 `file` 归组
#[derive(Clone, PartialEq, prost::Message)]
pub struct SharedPreference {
    #[prost(string, optional, tag = "1")]
    pub file: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub key: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub value: Option<String>,
    #[prost(bool, optional, tag = "4")]
    pub boolean_value: Option<bool>,
    #[prost(string, repeated, tag = "5")]
    pub string_set_value: Vec<String>,
    #[prost(bool, optional, tag = "6")]
    pub is_string_set_value: Option<bool>,
}

/// 附件帧。声明紧随其后的加密数据长度。
#[derive(Clone, PartialEq, prost::Message)]
pub struct Attachment {
    #[prost(uint64, optional, tag = "1")]
    pub row_id: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub attachment_id: Option<u64>,
    #[prost(uint32, optional, tag = "3")]
    pub length: Option<u32>,
}

/// 数据库 schema 版本
#[derive(Clone, PartialEq, prost::Message)]
pub struct DatabaseVersion {
    #[prost(uint32, optional, tag = "1")]
    pub version: Option<u32>,
}

/// 头像帧
#[derive(Clone, PartialEq, prost::Message)]
pub struct Avatar {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(uint32, optional, tag = "2")]
    pub length: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub recipient_id: Option<String>,
}

/// 贴纸帧
#[derive(Clone, PartialEq, prost::Message)]
pub struct Sticker {
    #[prost(uint64, optional, tag = "1")]
    pub row_id: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub length: Option<u32>,
}

/// 键值存储条目，至多填充其中一个值字段
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyValue {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub blob_value: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "3")]
    pub boolean_value: Option<bool>,
    #[prost(float, optional, tag = "4")]
    pub float_value: Option<f32>,
    #[prost(int32, optional, tag = "5")]
    pub integer_value: Option<i32>,
    #[prost(int64, optional, tag = "6")]
    pub long_value: Option<i64>,
    #[prost(string, optional, tag = "7")]
    pub string_value: Option<String>,
}
