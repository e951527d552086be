//! KOB 二进制读取器模块
//!
//! 将前向二进制游标转换为结构令牌序列的状态机。
//! 状态转移：`Initial → (StartDocument) → Type ⇄ Name ⇄ Value → End* → Done`。
//!
//! - 标量负载在产出令牌时立即读取
//! - 数组元素的索引键被消费并丢弃（数组上下文不产出 FieldName）
//! - 无法识别的类型标记是致命解码错误，表明数据损坏或版本不匹配
//! - `Done` 状态下继续调用持续返回 `Ok(None)`

use crate::sink::TokenSource;
use crate::spec::{ElementTag, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
use crate::token::{ContainerKind, TokenEvent};
use crate::value::{
    BinaryValue, DbPointerValue, JavaScriptValue, RegexValue, TimestampValue, WireValue,
};
use crate::{WireError, WireResult};
use chrono::{TimeZone, Utc};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_common::ObjectId;
use rust_decimal::Decimal;

/// 游标栈帧
///
/// 记录当前容器的种类和区域结束偏移；进入容器时压栈，离开时弹栈。
struct ContextFrame {
    kind: ContainerKind,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
enum ReaderState {
    Initial,
    Type,
    Value(ElementTag),
    Done,
}

/// KOB 二进制读取器
///
/// 持有可变的游标与栈状态，单个实例在一次解码期间被独占使用，
/// 不可跨线程共享。
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    state: ReaderState,
    frames: Vec<ContextFrame>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: ReaderState::Initial,
            frames: Vec::new(),
        }
    }

    /// 当前游标偏移
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 产出下一个结构令牌
    ///
    /// # Brief
    /// 推进底层游标并产出一个令牌；文档耗尽后返回 `Ok(None)`
    ///
    /// # Returns
    /// `Some(TokenEvent)` 或文档结束后的 `None`, 数据损坏返回错误
    pub fn next(&mut self) -> WireResult<Option<TokenEvent>> {
        match self.state {
            ReaderState::Done => Ok(None),
            ReaderState::Initial => {
                let end = self.read_region_header()?;
                self.push_frame(ContainerKind::Document, end)?;
                self.state = ReaderState::Type;
                Ok(Some(TokenEvent::StartDocument))
            }
            ReaderState::Type => self.next_element(),
            ReaderState::Value(tag) => {
                self.state = ReaderState::Type;
                self.read_value_token(tag).map(Some)
            }
        }
    }

    fn next_element(&mut self) -> WireResult<Option<TokenEvent>> {
        let (kind, end) = match self.frames.last() {
            Some(frame) => (frame.kind, frame.end),
            None => {
                return Err(WireError::InvalidState(
                    "next() called with no open container".to_string(),
                ))
            }
        };
        if self.pos >= end {
            return Err(WireError::InvalidDocument(format!(
                "Cursor past container end at offset {}",
                self.pos
            )));
        }

        let byte = self.read_u8()?;
        if byte == 0x00 {
            if self.pos != end {
                return Err(WireError::InvalidDocument(format!(
                    "Container length mismatch: terminator at {}, declared end {}",
                    self.pos, end
                )));
            }
            self.frames.pop();
            if self.frames.is_empty() {
                self.state = ReaderState::Done;
            }
            return match kind {
                ContainerKind::Document => Ok(Some(TokenEvent::EndDocument)),
                ContainerKind::Array => Ok(Some(TokenEvent::EndArray)),
                ContainerKind::Root => Err(WireError::InvalidState(
                    "root frame holds no elements".to_string(),
                )),
            };
        }

        let tag = ElementTag::from_u8(byte).ok_or(WireError::InvalidTypeTag(byte))?;
        let name = self.read_cstring()?;
        match kind {
            ContainerKind::Document => {
                self.state = ReaderState::Value(tag);
                Ok(Some(TokenEvent::FieldName(name)))
            }
            // 数组元素的索引键只占线上空间，不进入令牌流
            ContainerKind::Array => self.read_value_token(tag).map(Some),
            ContainerKind::Root => Err(WireError::InvalidState(
                "root frame holds no elements".to_string(),
            )),
        }
    }

    fn read_value_token(&mut self, tag: ElementTag) -> WireResult<TokenEvent> {
        match tag {
            ElementTag::Document => {
                let end = self.read_region_header()?;
                self.push_frame(ContainerKind::Document, end)?;
                Ok(TokenEvent::StartDocument)
            }
            ElementTag::Array => {
                let end = self.read_region_header()?;
                self.push_frame(ContainerKind::Array, end)?;
                Ok(TokenEvent::StartArray)
            }
            scalar => {
                let value = self.read_scalar(scalar, self.frames.len())?;
                Ok(TokenEvent::Scalar(value))
            }
        }
    }

    /// 立即读取一个值的负载
    ///
    /// 容器标记只在嵌入式上下文（带作用域的 JavaScript）中到达这里，
    /// 此时整个子文档被立即物化进标量令牌。
    fn read_scalar(&mut self, tag: ElementTag, depth: usize) -> WireResult<WireValue> {
        if depth > MAX_NESTING_DEPTH {
            return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        match tag {
            ElementTag::Double => Ok(WireValue::Double(self.read_f64()?)),
            ElementTag::String => Ok(WireValue::String(self.read_string()?)),
            ElementTag::Document => Ok(WireValue::Document(self.read_embedded_document(depth)?)),
            ElementTag::Array => Ok(WireValue::Array(self.read_embedded_array(depth)?)),
            ElementTag::Binary => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(WireError::InvalidDocument(format!(
                        "Negative binary length: {}",
                        len
                    )));
                }
                let subtype = self.read_u8()?;
                let bytes = self.read_bytes(len as usize)?;
                Ok(WireValue::Binary(BinaryValue { subtype, bytes }))
            }
            ElementTag::Undefined => Ok(WireValue::Undefined),
            ElementTag::ObjectId => {
                let mut bytes = [0u8; 12];
                self.read_exact(&mut bytes)?;
                Ok(WireValue::ObjectId(ObjectId::from_bytes(bytes)))
            }
            ElementTag::Boolean => match self.read_u8()? {
                0 => Ok(WireValue::Boolean(false)),
                1 => Ok(WireValue::Boolean(true)),
                b => Err(WireError::InvalidDocument(format!(
                    "Invalid boolean byte: 0x{:02X}",
                    b
                ))),
            },
            ElementTag::DateTime => {
                let millis = self.read_i64()?;
                let dt = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| WireError::InvalidDocument("Invalid datetime".to_string()))?;
                Ok(WireValue::DateTime(dt))
            }
            ElementTag::Null => Ok(WireValue::Null),
            ElementTag::Regex => {
                let pattern = self.read_cstring()?;
                let options = self.read_cstring()?;
                Ok(WireValue::Regex(RegexValue { pattern, options }))
            }
            ElementTag::DbPointer => {
                let namespace = self.read_string()?;
                let mut bytes = [0u8; 12];
                self.read_exact(&mut bytes)?;
                Ok(WireValue::DbPointer(DbPointerValue {
                    namespace,
                    id: ObjectId::from_bytes(bytes),
                }))
            }
            ElementTag::JavaScript => {
                let code = self.read_string()?;
                Ok(WireValue::JavaScript(JavaScriptValue { code, scope: None }))
            }
            ElementTag::Symbol => Ok(WireValue::Symbol(self.read_string()?)),
            ElementTag::JavaScriptWithScope => {
                let start = self.pos;
                let total = self.read_i32()?;
                if total < 4 {
                    return Err(WireError::InvalidDocument(format!(
                        "Invalid code-with-scope length: {}",
                        total
                    )));
                }
                let end = start
                    .checked_add(total as usize)
                    .ok_or(WireError::UnexpectedEof)?;
                let code = self.read_string()?;
                let scope = self.read_embedded_document(depth)?;
                if self.pos != end {
                    return Err(WireError::InvalidDocument(
                        "Code-with-scope length mismatch".to_string(),
                    ));
                }
                Ok(WireValue::JavaScript(JavaScriptValue {
                    code,
                    scope: Some(scope),
                }))
            }
            ElementTag::Int32 => Ok(WireValue::Int32(self.read_i32()?)),
            ElementTag::Timestamp => {
                let increment = self.read_u32()?;
                let time = self.read_u32()?;
                Ok(WireValue::Timestamp(TimestampValue { time, increment }))
            }
            ElementTag::Int64 => Ok(WireValue::Int64(self.read_i64()?)),
            ElementTag::Decimal => {
                let mut bytes = [0u8; 16];
                self.read_exact(&mut bytes)?;
                Ok(WireValue::Decimal(Decimal::deserialize(bytes)))
            }
            ElementTag::MinKey => Ok(WireValue::MinKey),
            ElementTag::MaxKey => Ok(WireValue::MaxKey),
        }
    }

    fn read_embedded_document(
        &mut self,
        depth: usize,
    ) -> WireResult<IndexMap<CompactString, WireValue>> {
        let end = self.read_region_header()?;
        let mut doc = IndexMap::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0x00 {
                if self.pos != end {
                    return Err(WireError::InvalidDocument(
                        "Embedded document length mismatch".to_string(),
                    ));
                }
                break;
            }
            let tag = ElementTag::from_u8(byte).ok_or(WireError::InvalidTypeTag(byte))?;
            let key = self.read_cstring()?;
            let value = self.read_scalar(tag, depth + 1)?;
            if doc.contains_key(&key) {
                return Err(WireError::DuplicateField(key.to_string()));
            }
            doc.insert(key, value);
        }
        Ok(doc)
    }

    fn read_embedded_array(&mut self, depth: usize) -> WireResult<Vec<WireValue>> {
        let end = self.read_region_header()?;
        let mut items = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0x00 {
                if self.pos != end {
                    return Err(WireError::InvalidDocument(
                        "Embedded array length mismatch".to_string(),
                    ));
                }
                break;
            }
            let tag = ElementTag::from_u8(byte).ok_or(WireError::InvalidTypeTag(byte))?;
            self.read_cstring()?;
            items.push(self.read_scalar(tag, depth + 1)?);
        }
        Ok(items)
    }

    fn push_frame(&mut self, kind: ContainerKind, end: usize) -> WireResult<()> {
        if self.frames.len() >= MAX_NESTING_DEPTH {
            return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.frames.push(ContextFrame { kind, end });
        Ok(())
    }

    /// 读取区域头部（4 字节长度），返回区域的绝对结束偏移
    fn read_region_header(&mut self) -> WireResult<usize> {
        let start = self.pos;
        let len = self.read_i32()?;
        if len < 0 || (len as usize) < MIN_DOCUMENT_SIZE {
            return Err(WireError::InvalidDocument(format!(
                "Invalid region length: {}",
                len
            )));
        }
        let len = len as usize;
        if len > MAX_DOCUMENT_SIZE {
            return Err(WireError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
        }
        let end = start.checked_add(len).ok_or(WireError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(WireError::UnexpectedEof);
        }
        if let Some(frame) = self.frames.last() {
            if end > frame.end {
                return Err(WireError::InvalidDocument(
                    "Nested region exceeds parent container".to_string(),
                ));
            }
        }
        Ok(end)
    }

    fn read_u8(&mut self) -> WireResult<u8> {
        if self.pos >= self.data.len() {
            return Err(WireError::UnexpectedEof);
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> WireResult<()> {
        let end = self
            .pos
            .checked_add(buf.len())
            .ok_or(WireError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(WireError::UnexpectedEof);
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> WireResult<Vec<u8>> {
        let end = self.pos.checked_add(len).ok_or(WireError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(WireError::UnexpectedEof);
        }
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> WireResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> WireResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> WireResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64(&mut self) -> WireResult<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// 读取长度前缀字符串：i32 长度（含终止符）+ 字节 + NUL
    fn read_string(&mut self) -> WireResult<CompactString> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(WireError::InvalidDocument(format!(
                "Invalid string length: {}",
                len
            )));
        }
        let bytes = self.read_bytes(len as usize - 1)?;
        if self.read_u8()? != 0x00 {
            return Err(WireError::InvalidDocument(
                "String missing NUL terminator".to_string(),
            ));
        }
        let s = String::from_utf8(bytes)?;
        Ok(CompactString::from(s))
    }

    /// 读取 NUL 结尾字符串
    fn read_cstring(&mut self) -> WireResult<CompactString> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0x00)
            .ok_or(WireError::UnexpectedEof)?;
        let s = String::from_utf8(rest[..nul].to_vec())?;
        self.pos += nul + 1;
        Ok(CompactString::from(s))
    }
}

impl<'a> TokenSource for BinaryReader<'a> {
    fn next_event(&mut self) -> WireResult<Option<TokenEvent>> {
        self.next()
    }
}
