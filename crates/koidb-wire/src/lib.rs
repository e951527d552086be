//! # KOB - Koi Object Binary
//!
//! KOB 是 KoiDB 的二进制文档格式，对标 MongoDB 的 BSON。
//! 文档采用长度前缀的自描述编码：
//!
//! - **长度前缀**：每个文档/数组区域以 4 字节总长度开头，写入端在容器
//!   关闭时回填长度字段
//! - **自描述元素**：每个元素由类型标记、字段名和负载组成
//! - **统一令牌模型**：二进制读取器与内存树遍历器产出同一套结构令牌，
//!   下游消费者无需关心值的来源
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use koidb_wire::{decode, encode_to_vec, wire};
//!
//! let value = wire!({ "name": "KoiDB", "version": 1 });
//!
//! // 序列化
//! let bytes = encode_to_vec(&value).unwrap();
//!
//! // 反序列化
//! let restored = decode(&bytes).unwrap();
//! assert_eq!(value, restored);
//! ```

pub mod build;
pub mod reader;
pub mod sink;
pub mod spec;
pub mod token;
pub mod traverse;
pub mod value;
pub mod writer;

pub use build::TreeBuilder;
pub use reader::BinaryReader;
pub use sink::{relay, DocumentSink, TokenSource};
pub use token::{ContainerKind, TokenEvent};
pub use traverse::TreeTraverser;
pub use value::{
    BinaryValue, DbPointerValue, JavaScriptValue, RegexValue, TimestampValue, WireValue,
};
pub use writer::BinaryWriter;

use thiserror::Error;

/// KOB 编解码的错误类型
///
/// 分为三类：解码错误（数据损坏，不可重试）、物化策略错误（重复字段名）
/// 和调用方契约错误（容器不平衡等编程错误）。
#[derive(Error, Debug)]
pub enum WireError {
    /// 无法识别的元素类型标记
    #[error("Invalid element tag: 0x{0:02X}")]
    InvalidTypeTag(u8),

    /// 意外的输入结束
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// 字符串不是有效的 UTF-8 编码
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// 文档格式无效
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// 嵌套层级过深
    #[error("Nesting too deep: max {0}")]
    NestingTooDeep(usize),

    /// 文档体积超出限制
    #[error("Document too large: max {0} bytes")]
    DocumentTooLarge(usize),

    /// 物化树时遇到重复字段名
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// 调用方契约错误（容器不平衡、缺少字段名等）
    #[error("Invalid codec state: {0}")]
    InvalidState(String),
}

/// KOB 操作的 Result 类型别名
pub type WireResult<T> = Result<T, WireError>;

/// 编码 WireValue 为 KOB 字节向量
///
/// # Brief
/// 通过树遍历器驱动二进制写入器，将值序列化为字节向量。
/// 顶层标量会被包装为单字段文档；顶层数组不是合法的 KOB 文档。
///
/// # Arguments
/// * `value` - 要编码的值
///
/// # Returns
/// 成功返回字节向量, 失败返回错误
pub fn encode_to_vec(value: &WireValue) -> WireResult<Vec<u8>> {
    if matches!(value, WireValue::Array(_)) {
        return Err(WireError::InvalidDocument(
            "Top-level value must be a document".to_string(),
        ));
    }
    let mut traverser = TreeTraverser::new(value);
    let mut writer = BinaryWriter::new();
    relay(&mut traverser, &mut writer)?;
    writer.into_bytes()
}

/// 解码 KOB 字节为 WireValue
///
/// # Brief
/// 通过二进制读取器驱动内存树构建器，物化为值树。
/// 同一文档内出现重复字段名时拒绝解码。
///
/// # Arguments
/// * `data` - 要解码的字节切片
///
/// # Returns
/// 成功返回 WireValue, 失败返回错误
pub fn decode(data: &[u8]) -> WireResult<WireValue> {
    let mut reader = BinaryReader::new(data);
    let mut builder = TreeBuilder::new();
    relay(&mut reader, &mut builder)?;
    if reader.position() != data.len() {
        return Err(WireError::InvalidDocument(format!(
            "Trailing bytes after document: {} of {} consumed",
            reader.position(),
            data.len()
        )));
    }
    builder.finish()
}
