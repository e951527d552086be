//! 令牌源与写入目标的统一接口模块
//!
//! `TokenSource` 由二进制读取器和树遍历器实现；`DocumentSink` 由二进制
//! 写入器和树构建器实现。`relay` 将任意源泵入任意目标，这是编码与解码
//! 共用的唯一通路。

use crate::token::TokenEvent;
use crate::value::WireValue;
use crate::WireResult;

/// 结构化写入目标
///
/// 接受与二进制写入器相同的结构/标量调用序列。实现者决定输出形式：
/// 字节缓冲区（BinaryWriter）或内存值树（TreeBuilder）。
pub trait DocumentSink {
    fn write_start_document(&mut self) -> WireResult<()>;
    fn write_end_document(&mut self) -> WireResult<()>;
    fn write_start_array(&mut self) -> WireResult<()>;
    fn write_end_array(&mut self) -> WireResult<()>;
    fn write_field_name(&mut self, name: &str) -> WireResult<()>;

    /// 写入一个标量值；传入容器是调用方契约错误
    fn write_scalar(&mut self, value: &WireValue) -> WireResult<()>;

    /// 递归写入任意值（容器展开为结构调用序列）
    fn write_value(&mut self, value: &WireValue) -> WireResult<()> {
        match value {
            WireValue::Document(doc) => {
                self.write_start_document()?;
                for (key, item) in doc {
                    self.write_field_name(key)?;
                    self.write_value(item)?;
                }
                self.write_end_document()
            }
            WireValue::Array(items) => {
                self.write_start_array()?;
                for item in items {
                    self.write_value(item)?;
                }
                self.write_end_array()
            }
            scalar => self.write_scalar(scalar),
        }
    }
}

/// 结构令牌源
///
/// 前向游标：每次调用产出一个令牌，耗尽后持续返回 `Ok(None)`。
pub trait TokenSource {
    fn next_event(&mut self) -> WireResult<Option<TokenEvent>>;
}

/// 将令牌源泵入写入目标
///
/// # Brief
/// 逐令牌转发直至源耗尽；任一端出错立即停止并返回错误
///
/// # Arguments
/// * `source` - 令牌源（读取器或遍历器）
/// * `sink` - 写入目标（写入器或构建器）
///
/// # Returns
/// 成功返回 Ok(()), 失败返回错误
pub fn relay<S, D>(source: &mut S, sink: &mut D) -> WireResult<()>
where
    S: TokenSource + ?Sized,
    D: DocumentSink + ?Sized,
{
    while let Some(event) = source.next_event()? {
        match event {
            TokenEvent::StartDocument => sink.write_start_document()?,
            TokenEvent::EndDocument => sink.write_end_document()?,
            TokenEvent::StartArray => sink.write_start_array()?,
            TokenEvent::EndArray => sink.write_end_array()?,
            TokenEvent::FieldName(name) => sink.write_field_name(&name)?,
            TokenEvent::Scalar(value) => sink.write_scalar(&value)?,
        }
    }
    Ok(())
}
