//! SQL schema 抽取与参数绑定
//!
//! 备份流中的 `CREATE TABLE` 语句只被解析到类型亲和性这一层，
//! 供随后的 `INSERT INTO` 把多态参数单元绑定为具体类型值。
//!
//! 列清单解析只识别生产方固定的标点约定：
//! - 最外层一对括号
//! - 顶层逗号分列（嵌套括号内的逗号，如 `UNIQUE(a, b)`，不分列）
//! - 每列取第一个空白分隔的词为列名，第二个词（若有）为亲和性关键字
//! - 带括号的表级指令不产生列，也不使后续列的序号膨胀
//!
//! 这不是一个 SQL 解析器；生产方改变书写习惯时这里必须跟着改。

use std::collections::HashMap;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use crate::format::wire::SqlParameter;

/// SQLite 列类型亲和性
///
/// 仅是建议性的类型提示，任何列实际都能存放任何类型的值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    #[default]
    None,
    Text,
    Integer,
    Real,
    Blob,
}

impl Affinity {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "TEXT" => Affinity::Text,
            "INTEGER" => Affinity::Integer,
            "REAL" => Affinity::Real,
            "BLOB" => Affinity::Blob,
            _ => Affinity::None,
        }
    }
}

/// 绑定后的具名类型值
///
/// 空单元格按列亲和性落到对应变体的 `None`，
/// 没有亲和性信息时落到 `Null`。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(Option<String>),
    Integer(Option<i64>),
    Real(Option<f64>),
    Blob(Option<Vec<u8>>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => *v,
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(Some(s)) => Some(s),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(Some(s)) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(Some(i)) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(Some(r)) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*r)),
            Value::Blob(Some(b)) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Null
            | Value::Text(None)
            | Value::Integer(None)
            | Value::Real(None)
            | Value::Blob(None) => ToSqlOutput::Owned(rusqlite::types::Value::Null),
        })
    }
}

/// 一张表的列清单：列名到序号的映射 + 按序号排列的亲和性
#[derive(Debug, Clone)]
pub struct Schema {
    index: HashMap<String, usize>,
    affinities: Vec<Affinity>,
}

impl Schema {
    /// 解析 `CREATE TABLE` 的括号列清单（含外层括号）
    pub fn parse(column_list: &str) -> Self {
        let body = unwrap(column_list.trim(), '(', ')');

        let mut index = HashMap::new();
        let mut affinities = Vec::new();

        for fragment in split_top_level(body) {
            let mut tokens = fragment.split_whitespace();
            let Some(name) = tokens.next() else { continue };
            // UNIQUE(...) 之类的表级指令不产生列
            if name.contains('(') {
                continue;
            }

            let affinity = tokens
                .next()
                .map(Affinity::from_keyword)
                .unwrap_or_default();

            index.insert(name.to_string(), affinities.len());
            affinities.push(affinity);
        }

        Self { index, affinities }
    }

    pub fn len(&self) -> usize {
        self.affinities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.affinities.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn affinity(&self, index: usize) -> Affinity {
        self.affinities.get(index).copied().unwrap_or_default()
    }

    /// 取一行中指定列的绑定值；列或单元不存在时返回 None
    pub fn field(&self, row: &[SqlParameter], column: &str) -> Option<Value> {
        let index = self.column_index(column)?;
        let cell = row.get(index)?;
        Some(bind_parameter(cell, self.affinity(index)))
    }

    /// 把一整行多态参数单元绑定为具体类型值
    ///
    /// 结果与输入等长且保持位置顺序。
    pub fn bind_row(&self, row: &[SqlParameter]) -> Vec<Value> {
        row.iter()
            .enumerate()
            .map(|(i, cell)| bind_parameter(cell, self.affinity(i)))
            .collect()
    }
}

/// 把单个参数单元绑定为具体类型值
///
/// 按固定优先级探测值字段：string、integer、double、blob、null。
/// integer 在线格式上是 uint64，但生产方把 -1 等有符号值按位存入，
/// 必须按 64 位有符号还原，否则最高位为 1 的值会被数据库驱动拒绝。
pub fn bind_parameter(cell: &SqlParameter, affinity: Affinity) -> Value {
    if let Some(s) = &cell.string_parameter {
        return Value::Text(Some(s.clone()));
    }
    if let Some(u) = cell.integer_parameter {
        return Value::Integer(Some(u as i64));
    }
    if let Some(d) = cell.double_parameter {
        return Value::Real(Some(d));
    }
    if let Some(b) = &cell.blob_parameter {
        return Value::Blob(Some(b.clone()));
    }

    match affinity {
        Affinity::Text => Value::Text(None),
        Affinity::Integer => Value::Integer(None),
        Affinity::Real => Value::Real(None),
        Affinity::Blob => Value::Blob(None),
        Affinity::None => Value::Null,
    }
}

/// 只在顶层逗号处切分；嵌套括号内的逗号不切分
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// 去除可能包裹子串的一对定界符（如引号或括号）
pub(crate) fn unwrap(s: &str, open: char, close: char) -> &str {
    if s.len() > 2 && s.starts_with(open) && s.ends_with(close) {
        &s[open.len_utf8()..s.len() - close.len_utf8()]
    } else {
        s
    }
}
