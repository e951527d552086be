//! KOB 值类型定义模块
//!
//! 定义了 KOB 格式支持的所有数据类型，包括基础类型、复合类型和
//! 仅供解码的遗留类型。使用 `CompactString` 优化短字符串的内存占用。

use crate::spec::{BinarySubtype, ElementTag};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_common::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// KOB 值的枚举类型
///
/// 表示 KOB 格式支持的所有数据类型，每个变体对应唯一的线上元素标记。
///
/// # 支持的类型
///
/// - **基础类型**: Null, Boolean, Int32/64, Double, Decimal, String, Binary
/// - **标识类型**: ObjectId
/// - **时间类型**: DateTime, Timestamp
/// - **复合类型**: Array, Document
/// - **特殊类型**: Regex, JavaScript, MinKey/MaxKey
/// - **遗留类型**(仅解码): Undefined, Symbol, DbPointer
///
/// # 示例
///
/// ```rust,ignore
/// use koidb_wire::WireValue;
///
/// let value = WireValue::String("hello".into());
/// assert_eq!(value.type_name(), "string");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    /// 空值
    Null,
    /// 布尔值
    Boolean(bool),
    /// 32位有符号整数
    Int32(i32),
    /// 64位有符号整数
    Int64(i64),
    /// 64位浮点数
    Double(f64),
    /// 高精度十进制数（decimal128 槽位）
    Decimal(Decimal),
    /// UTF-8 字符串
    String(CompactString),
    /// 二进制数据（带子类型）
    Binary(BinaryValue),
    /// 12字节的唯一对象标识符
    ObjectId(ObjectId),
    /// UTC 日期时间（线上以毫秒存储）
    DateTime(DateTime<Utc>),
    /// 内部时间戳（递增计数 + 秒）
    Timestamp(TimestampValue),
    /// 值数组
    Array(Vec<WireValue>),
    /// 文档（有序键值对）
    Document(IndexMap<CompactString, WireValue>),
    /// 正则表达式
    Regex(RegexValue),
    /// JavaScript 代码（可携带作用域）
    JavaScript(JavaScriptValue),
    /// 符号（遗留类型，仅解码）
    Symbol(CompactString),
    /// 数据库指针（遗留类型，仅解码）
    DbPointer(DbPointerValue),
    /// 未定义（遗留类型，仅解码）
    Undefined,
    /// 排序哨兵：小于所有值
    MinKey,
    /// 排序哨兵：大于所有值
    MaxKey,
}

/// 二进制值
///
/// 包含子类型标记和原始字节。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryValue {
    /// 二进制子类型
    pub subtype: u8,
    /// 原始字节
    pub bytes: Vec<u8>,
}

impl BinaryValue {
    pub fn generic(bytes: Vec<u8>) -> Self {
        Self {
            subtype: BinarySubtype::Generic as u8,
            bytes,
        }
    }
}

/// 正则表达式值
///
/// 包含正则表达式的模式和选项（如 i, m, s 等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexValue {
    /// 正则表达式模式
    pub pattern: CompactString,
    /// 正则表达式选项
    pub options: CompactString,
}

/// JavaScript 代码值
///
/// 包含 JavaScript 代码字符串和可选的作用域（变量绑定）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JavaScriptValue {
    /// JavaScript 代码
    pub code: CompactString,
    /// 作用域（可选的变量绑定）
    pub scope: Option<IndexMap<CompactString, WireValue>>,
}

/// 内部时间戳值
///
/// 低 4 字节为递增计数，高 4 字节为秒级时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampValue {
    /// 秒级时间
    pub time: u32,
    /// 递增计数
    pub increment: u32,
}

/// 数据库指针值（遗留类型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbPointerValue {
    /// 命名空间
    pub namespace: CompactString,
    /// 目标 ObjectId
    pub id: ObjectId,
}

impl WireValue {
    /// 获取值的类型名称
    ///
    /// # Brief
    /// 返回 KOB 值的类型名称字符串
    ///
    /// # Returns
    /// 类型名称的静态字符串引用
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Boolean(_) => "boolean",
            WireValue::Int32(_) => "int32",
            WireValue::Int64(_) => "int64",
            WireValue::Double(_) => "double",
            WireValue::Decimal(_) => "decimal",
            WireValue::String(_) => "string",
            WireValue::Binary(_) => "binary",
            WireValue::ObjectId(_) => "objectId",
            WireValue::DateTime(_) => "dateTime",
            WireValue::Timestamp(_) => "timestamp",
            WireValue::Array(_) => "array",
            WireValue::Document(_) => "document",
            WireValue::Regex(_) => "regex",
            WireValue::JavaScript(_) => "javascript",
            WireValue::Symbol(_) => "symbol",
            WireValue::DbPointer(_) => "dbPointer",
            WireValue::Undefined => "undefined",
            WireValue::MinKey => "minKey",
            WireValue::MaxKey => "maxKey",
        }
    }

    /// 获取值的线上元素标记
    ///
    /// # Brief
    /// 返回该值在二进制编码中使用的元素标记；带作用域的
    /// JavaScript 使用独立的标记
    ///
    /// # Returns
    /// 对应的 ElementTag
    pub fn element_tag(&self) -> ElementTag {
        match self {
            WireValue::Null => ElementTag::Null,
            WireValue::Boolean(_) => ElementTag::Boolean,
            WireValue::Int32(_) => ElementTag::Int32,
            WireValue::Int64(_) => ElementTag::Int64,
            WireValue::Double(_) => ElementTag::Double,
            WireValue::Decimal(_) => ElementTag::Decimal,
            WireValue::String(_) => ElementTag::String,
            WireValue::Binary(_) => ElementTag::Binary,
            WireValue::ObjectId(_) => ElementTag::ObjectId,
            WireValue::DateTime(_) => ElementTag::DateTime,
            WireValue::Timestamp(_) => ElementTag::Timestamp,
            WireValue::Array(_) => ElementTag::Array,
            WireValue::Document(_) => ElementTag::Document,
            WireValue::Regex(_) => ElementTag::Regex,
            WireValue::JavaScript(js) => {
                if js.scope.is_some() {
                    ElementTag::JavaScriptWithScope
                } else {
                    ElementTag::JavaScript
                }
            }
            WireValue::Symbol(_) => ElementTag::Symbol,
            WireValue::DbPointer(_) => ElementTag::DbPointer,
            WireValue::Undefined => ElementTag::Undefined,
            WireValue::MinKey => ElementTag::MinKey,
            WireValue::MaxKey => ElementTag::MaxKey,
        }
    }

    /// 检查值是否为标量
    ///
    /// # Brief
    /// 文档和数组是容器，其余类型均为标量
    ///
    /// # Returns
    /// 标量返回 true，容器返回 false
    pub fn is_scalar(&self) -> bool {
        !matches!(self, WireValue::Document(_) | WireValue::Array(_))
    }

    /// 检查值是否为 Null
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    /// 尝试获取布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// 尝试获取 i32 值
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            WireValue::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试获取 i64 值
    ///
    /// # Brief
    /// 如果值是整数类型（Int32 或 Int64），返回 i64 值
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int32(n) => Some(*n as i64),
            WireValue::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试获取 f64 值
    ///
    /// # Brief
    /// 如果值是数值类型，返回 f64 值（支持自动类型转换）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Double(n) => Some(*n),
            WireValue::Int32(n) => Some(*n as f64),
            WireValue::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// 尝试获取字符串引用
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 尝试获取数组引用
    pub fn as_array(&self) -> Option<&Vec<WireValue>> {
        match self {
            WireValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// 尝试获取文档引用
    pub fn as_document(&self) -> Option<&IndexMap<CompactString, WireValue>> {
        match self {
            WireValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// 获取指定键的值
    ///
    /// # Brief
    /// 从文档中获取指定键的值，或从数组中获取指定索引的值
    ///
    /// # Arguments
    /// * `key` - 键名（文档）或索引字符串（数组）
    ///
    /// # Returns
    /// `Some(&WireValue)` 如果找到，否则 `None`
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        match self {
            WireValue::Document(doc) => doc.get(key),
            WireValue::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    /// 按路径获取嵌套值
    ///
    /// # Brief
    /// 使用点分隔的路径访问嵌套文档中的值
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径，如 "user.address.city"
    ///
    /// # Returns
    /// `Some(&WireValue)` 如果路径存在，否则 `None`
    pub fn get_path(&self, path: &str) -> Option<&WireValue> {
        let mut current = self;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl Default for WireValue {
    fn default() -> Self {
        WireValue::Null
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Null => write!(f, "null"),
            WireValue::Boolean(b) => write!(f, "{}", b),
            WireValue::Int32(n) => write!(f, "{}", n),
            WireValue::Int64(n) => write!(f, "{}", n),
            WireValue::Double(n) => write!(f, "{}", n),
            WireValue::Decimal(n) => write!(f, "{}", n),
            WireValue::String(s) => write!(f, "\"{}\"", s),
            WireValue::Binary(b) => write!(f, "<binary:{} bytes>", b.bytes.len()),
            WireValue::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            WireValue::DateTime(dt) => write!(f, "DateTime(\"{}\")", dt),
            WireValue::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.time, ts.increment),
            WireValue::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            WireValue::Document(doc) => {
                write!(f, "{{")?;
                for (i, (k, v)) in doc.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", k, v)?;
                }
                write!(f, "}}")
            }
            WireValue::Regex(r) => write!(f, "/{}/{}", r.pattern, r.options),
            WireValue::JavaScript(js) => {
                if let Some(scope) = &js.scope {
                    write!(f, "JavaScript({}, scope: {:?})", js.code, scope)
                } else {
                    write!(f, "JavaScript({})", js.code)
                }
            }
            WireValue::Symbol(s) => write!(f, "Symbol(\"{}\")", s),
            WireValue::DbPointer(p) => write!(f, "DbPointer(\"{}\", {})", p.namespace, p.id),
            WireValue::Undefined => write!(f, "undefined"),
            WireValue::MinKey => write!(f, "MinKey"),
            WireValue::MaxKey => write!(f, "MaxKey"),
        }
    }
}

// ============================================================================
// From 特征实现 - 支持从各种 Rust 类型转换为 WireValue
// ============================================================================

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Boolean(v)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        WireValue::Int32(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int64(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        WireValue::Double(v)
    }
}

impl From<Decimal> for WireValue {
    fn from(v: Decimal) -> Self {
        WireValue::Decimal(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::String(CompactString::from(v))
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::String(CompactString::from(v))
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(v: Vec<u8>) -> Self {
        WireValue::Binary(BinaryValue::generic(v))
    }
}

impl From<ObjectId> for WireValue {
    fn from(v: ObjectId) -> Self {
        WireValue::ObjectId(v)
    }
}

impl From<Uuid> for WireValue {
    fn from(v: Uuid) -> Self {
        WireValue::Binary(BinaryValue {
            subtype: BinarySubtype::Uuid as u8,
            bytes: v.as_bytes().to_vec(),
        })
    }
}

impl From<DateTime<Utc>> for WireValue {
    fn from(v: DateTime<Utc>) -> Self {
        WireValue::DateTime(v)
    }
}

impl<T: Into<WireValue>> From<Vec<T>> for WireValue {
    fn from(v: Vec<T>) -> Self {
        WireValue::Array(v.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// JSON 互转支持（诊断用途）
// ============================================================================

impl From<serde_json::Value> for WireValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => WireValue::Null,
            serde_json::Value::Bool(b) => WireValue::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        WireValue::Int32(i as i32)
                    } else {
                        WireValue::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    WireValue::Double(f)
                } else {
                    WireValue::Null
                }
            }
            serde_json::Value::String(s) => WireValue::String(CompactString::from(s)),
            serde_json::Value::Array(arr) => {
                WireValue::Array(arr.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut doc = IndexMap::new();
                for (k, v) in obj {
                    doc.insert(CompactString::from(k), v.into());
                }
                WireValue::Document(doc)
            }
        }
    }
}

impl From<WireValue> for serde_json::Value {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Null | WireValue::Undefined => serde_json::Value::Null,
            WireValue::Boolean(b) => serde_json::Value::Bool(b),
            WireValue::Int32(n) => serde_json::Value::Number(n.into()),
            WireValue::Int64(n) => serde_json::Value::Number(n.into()),
            WireValue::Double(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            WireValue::Decimal(n) => json_wrapper("$numberDecimal", n.to_string().into()),
            WireValue::String(s) => serde_json::Value::String(s.to_string()),
            WireValue::Binary(b) => json_wrapper("$binary", base64_encode(&b.bytes).into()),
            WireValue::ObjectId(id) => json_wrapper("$oid", id.to_hex().into()),
            WireValue::DateTime(dt) => json_wrapper("$date", dt.to_rfc3339().into()),
            WireValue::Timestamp(ts) => json_wrapper(
                "$timestamp",
                serde_json::json!({ "t": ts.time, "i": ts.increment }),
            ),
            WireValue::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            WireValue::Document(doc) => {
                let mut map = serde_json::Map::new();
                for (k, v) in doc {
                    map.insert(k.to_string(), v.into());
                }
                serde_json::Value::Object(map)
            }
            WireValue::Regex(r) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "$regex".to_string(),
                    serde_json::Value::String(r.pattern.to_string()),
                );
                map.insert(
                    "$options".to_string(),
                    serde_json::Value::String(r.options.to_string()),
                );
                serde_json::Value::Object(map)
            }
            WireValue::JavaScript(js) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "$code".to_string(),
                    serde_json::Value::String(js.code.to_string()),
                );
                if let Some(scope) = js.scope {
                    map.insert("$scope".to_string(), WireValue::Document(scope).into());
                }
                serde_json::Value::Object(map)
            }
            WireValue::Symbol(s) => json_wrapper("$symbol", s.to_string().into()),
            WireValue::DbPointer(p) => json_wrapper(
                "$dbPointer",
                serde_json::json!({ "$ref": p.namespace.to_string(), "$id": p.id.to_hex() }),
            ),
            WireValue::MinKey => json_wrapper("$minKey", 1.into()),
            WireValue::MaxKey => json_wrapper("$maxKey", 1.into()),
        }
    }
}

fn json_wrapper(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value);
    serde_json::Value::Object(map)
}

/// Base64 编码辅助函数
///
/// # Brief
/// 将字节数组编码为 Base64 字符串
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as usize;
        let b1 = chunk.get(1).copied().unwrap_or(0) as usize;
        let b2 = chunk.get(2).copied().unwrap_or(0) as usize;
        result.push(ALPHABET[b0 >> 2] as char);
        result.push(ALPHABET[((b0 & 0x03) << 4) | (b1 >> 4)] as char);
        if chunk.len() > 1 {
            result.push(ALPHABET[((b1 & 0x0f) << 2) | (b2 >> 6)] as char);
        } else {
            result.push('=');
        }
        if chunk.len() > 2 {
            result.push(ALPHABET[b2 & 0x3f] as char);
        } else {
            result.push('=');
        }
    }
    result
}

/// 构造 WireValue 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use koidb_wire::wire;
///
/// let null = wire!(null);
/// let boolean = wire!(true);
/// let number = wire!(42);
/// let string = wire!("hello");
/// let array = wire!([1, 2, 3]);
/// let doc = wire!({ "name": "test", "value": 123 });
/// ```
#[macro_export]
macro_rules! wire {
    (null) => {
        $crate::WireValue::Null
    };
    (true) => {
        $crate::WireValue::Boolean(true)
    };
    (false) => {
        $crate::WireValue::Boolean(false)
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::WireValue::Array(vec![ $($crate::wire!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            let mut doc = indexmap::IndexMap::new();
            $(
                doc.insert(compact_str::CompactString::from($key), $crate::wire!($value));
            )*
            $crate::WireValue::Document(doc)
        }
    };
    ($e:expr) => {
        $crate::WireValue::from($e)
    };
}
