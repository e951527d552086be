//! KOB 二进制写入器模块
//!
//! 接受结构/标量写入调用并产出 KOB 字节。容器区域的长度在打开时
//! 预留 4 字节占位，关闭时回填实际长度。
//!
//! - 起止调用必须平衡；在未打开容器的上下文中写入标量或字段名是
//!   调用方契约错误
//! - 写入器单次使用、单线程持有；`into_bytes` 在容器未闭合时拒绝产出

use crate::sink::DocumentSink;
use crate::spec::{ElementTag, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH};
use crate::token::ContainerKind;
use crate::value::{
    BinaryValue, DbPointerValue, JavaScriptValue, RegexValue, TimestampValue, WireValue,
};
use crate::{WireError, WireResult};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_common::ObjectId;
use rust_decimal::Decimal;

struct WriterFrame {
    kind: ContainerKind,
    len_offset: usize,
    next_index: usize,
}

/// KOB 二进制写入器
///
/// 内部缓冲区随实例释放，任何退出路径（包括错误路径）都不会留下
/// 未回填的长度预留。
pub struct BinaryWriter {
    buf: BytesMut,
    frames: Vec<WriterFrame>,
    pending_name: Option<CompactString>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            frames: Vec::new(),
            pending_name: None,
        }
    }

    /// 完成写入并取出字节
    ///
    /// # Brief
    /// 所有容器必须已闭合；否则返回契约错误
    ///
    /// # Returns
    /// 成功返回完整的 KOB 字节向量, 失败返回错误
    pub fn into_bytes(self) -> WireResult<Vec<u8>> {
        if !self.frames.is_empty() {
            return Err(WireError::InvalidState(format!(
                "{} container(s) still open",
                self.frames.len()
            )));
        }
        if self.buf.is_empty() {
            return Err(WireError::InvalidState("No document written".to_string()));
        }
        Ok(self.buf.to_vec())
    }

    pub fn write_start_document(&mut self) -> WireResult<()> {
        if self.frames.is_empty() {
            if !self.buf.is_empty() {
                return Err(WireError::InvalidState(
                    "Writer already produced a document".to_string(),
                ));
            }
        } else {
            self.put_element_header(ElementTag::Document)?;
        }
        self.open_container(ContainerKind::Document)
    }

    pub fn write_end_document(&mut self) -> WireResult<()> {
        self.close_container(ContainerKind::Document)
    }

    pub fn write_start_array(&mut self) -> WireResult<()> {
        if self.frames.is_empty() {
            return Err(WireError::InvalidState(
                "Top-level container must be a document".to_string(),
            ));
        }
        self.put_element_header(ElementTag::Array)?;
        self.open_container(ContainerKind::Array)
    }

    pub fn write_end_array(&mut self) -> WireResult<()> {
        self.close_container(ContainerKind::Array)
    }

    pub fn write_field_name(&mut self, name: &str) -> WireResult<()> {
        match self.frames.last() {
            Some(frame) if frame.kind == ContainerKind::Document => {}
            Some(_) => {
                return Err(WireError::InvalidState(
                    "Field names are not allowed inside arrays".to_string(),
                ))
            }
            None => {
                return Err(WireError::InvalidState(
                    "Field name written outside a document".to_string(),
                ))
            }
        }
        if self.pending_name.is_some() {
            return Err(WireError::InvalidState(format!(
                "Field name '{}' written while another is pending",
                name
            )));
        }
        self.pending_name = Some(CompactString::from(name));
        Ok(())
    }

    pub fn write_null(&mut self) -> WireResult<()> {
        self.put_element_header(ElementTag::Null)
    }

    pub fn write_boolean(&mut self, v: bool) -> WireResult<()> {
        self.put_element_header(ElementTag::Boolean)?;
        self.buf.put_u8(v as u8);
        Ok(())
    }

    pub fn write_int32(&mut self, v: i32) -> WireResult<()> {
        self.put_element_header(ElementTag::Int32)?;
        self.buf.put_i32_le(v);
        Ok(())
    }

    pub fn write_int64(&mut self, v: i64) -> WireResult<()> {
        self.put_element_header(ElementTag::Int64)?;
        self.buf.put_i64_le(v);
        Ok(())
    }

    pub fn write_double(&mut self, v: f64) -> WireResult<()> {
        self.put_element_header(ElementTag::Double)?;
        self.buf.put_f64_le(v);
        Ok(())
    }

    pub fn write_decimal(&mut self, v: &Decimal) -> WireResult<()> {
        self.put_element_header(ElementTag::Decimal)?;
        self.buf.put_slice(&v.serialize());
        Ok(())
    }

    pub fn write_string(&mut self, v: &str) -> WireResult<()> {
        self.put_element_header(ElementTag::String)?;
        self.put_string(v);
        Ok(())
    }

    pub fn write_symbol(&mut self, v: &str) -> WireResult<()> {
        self.put_element_header(ElementTag::Symbol)?;
        self.put_string(v);
        Ok(())
    }

    pub fn write_binary(&mut self, v: &BinaryValue) -> WireResult<()> {
        self.put_element_header(ElementTag::Binary)?;
        self.buf.put_i32_le(v.bytes.len() as i32);
        self.buf.put_u8(v.subtype);
        self.buf.put_slice(&v.bytes);
        Ok(())
    }

    pub fn write_object_id(&mut self, v: &ObjectId) -> WireResult<()> {
        self.put_element_header(ElementTag::ObjectId)?;
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    pub fn write_date_time(&mut self, v: &DateTime<Utc>) -> WireResult<()> {
        self.put_element_header(ElementTag::DateTime)?;
        self.buf.put_i64_le(v.timestamp_millis());
        Ok(())
    }

    pub fn write_timestamp(&mut self, v: &TimestampValue) -> WireResult<()> {
        self.put_element_header(ElementTag::Timestamp)?;
        self.buf.put_u32_le(v.increment);
        self.buf.put_u32_le(v.time);
        Ok(())
    }

    pub fn write_regex(&mut self, v: &RegexValue) -> WireResult<()> {
        self.put_element_header(ElementTag::Regex)?;
        self.put_cstring(&v.pattern)?;
        self.put_cstring(&v.options)?;
        Ok(())
    }

    pub fn write_db_pointer(&mut self, v: &DbPointerValue) -> WireResult<()> {
        self.put_element_header(ElementTag::DbPointer)?;
        self.put_string(&v.namespace);
        self.buf.put_slice(v.id.as_bytes());
        Ok(())
    }

    pub fn write_java_script(&mut self, v: &JavaScriptValue) -> WireResult<()> {
        match &v.scope {
            None => {
                self.put_element_header(ElementTag::JavaScript)?;
                self.put_string(&v.code);
                Ok(())
            }
            Some(scope) => self.write_java_script_with_scope(&v.code, scope),
        }
    }

    pub fn write_undefined(&mut self) -> WireResult<()> {
        self.put_element_header(ElementTag::Undefined)
    }

    pub fn write_min_key(&mut self) -> WireResult<()> {
        self.put_element_header(ElementTag::MinKey)
    }

    pub fn write_max_key(&mut self) -> WireResult<()> {
        self.put_element_header(ElementTag::MaxKey)
    }

    fn write_java_script_with_scope(
        &mut self,
        code: &str,
        scope: &IndexMap<CompactString, WireValue>,
    ) -> WireResult<()> {
        self.put_element_header(ElementTag::JavaScriptWithScope)?;
        let total_offset = self.buf.len();
        self.buf.put_i32_le(0);
        self.put_string(code);
        self.open_container(ContainerKind::Document)?;
        for (key, value) in scope {
            self.write_field_name(key)?;
            self.write_value(value)?;
        }
        self.close_container(ContainerKind::Document)?;
        self.backpatch(total_offset)?;
        Ok(())
    }

    fn open_container(&mut self, kind: ContainerKind) -> WireResult<()> {
        if self.frames.len() >= MAX_NESTING_DEPTH {
            return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.frames.push(WriterFrame {
            kind,
            len_offset: self.buf.len(),
            next_index: 0,
        });
        self.buf.put_i32_le(0);
        Ok(())
    }

    fn close_container(&mut self, expected: ContainerKind) -> WireResult<()> {
        let kind = match self.frames.last() {
            Some(frame) => frame.kind,
            None => {
                return Err(WireError::InvalidState(
                    "End call with no open container".to_string(),
                ))
            }
        };
        if kind != expected {
            return Err(WireError::InvalidState(format!(
                "End call does not match open container: {:?}",
                kind
            )));
        }
        if self.pending_name.is_some() {
            return Err(WireError::InvalidState(
                "Container closed with a dangling field name".to_string(),
            ));
        }
        let frame = self.frames.pop();
        self.buf.put_u8(0x00);
        if let Some(frame) = frame {
            self.backpatch(frame.len_offset)?;
        }
        Ok(())
    }

    /// 回填长度预留：用从预留处到当前末尾的字节数覆盖占位符
    fn backpatch(&mut self, len_offset: usize) -> WireResult<()> {
        let len = self.buf.len() - len_offset;
        if len > MAX_DOCUMENT_SIZE {
            return Err(WireError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
        }
        self.buf[len_offset..len_offset + 4].copy_from_slice(&(len as i32).to_le_bytes());
        Ok(())
    }

    /// 写出元素头部：类型标记 + 元素键
    ///
    /// 文档上下文取用待写字段名；数组上下文自动生成十进制索引键。
    fn put_element_header(&mut self, tag: ElementTag) -> WireResult<()> {
        let key = match self.frames.last_mut() {
            Some(frame) if frame.kind == ContainerKind::Document => {
                self.pending_name.take().ok_or_else(|| {
                    WireError::InvalidState("Value written without a field name".to_string())
                })?
            }
            Some(frame) => {
                let key = CompactString::from(frame.next_index.to_string());
                frame.next_index += 1;
                key
            }
            None => {
                return Err(WireError::InvalidState(
                    "Value written outside a container".to_string(),
                ))
            }
        };
        self.buf.put_u8(tag as u8);
        self.put_cstring(&key)?;
        Ok(())
    }

    fn put_string(&mut self, s: &str) {
        self.buf.put_i32_le(s.len() as i32 + 1);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0x00);
    }

    fn put_cstring(&mut self, s: &str) -> WireResult<()> {
        if s.as_bytes().contains(&0x00) {
            return Err(WireError::InvalidState(format!(
                "NUL byte in element key or pattern: '{}'",
                s.escape_default()
            )));
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0x00);
        Ok(())
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSink for BinaryWriter {
    fn write_start_document(&mut self) -> WireResult<()> {
        BinaryWriter::write_start_document(self)
    }

    fn write_end_document(&mut self) -> WireResult<()> {
        BinaryWriter::write_end_document(self)
    }

    fn write_start_array(&mut self) -> WireResult<()> {
        BinaryWriter::write_start_array(self)
    }

    fn write_end_array(&mut self) -> WireResult<()> {
        BinaryWriter::write_end_array(self)
    }

    fn write_field_name(&mut self, name: &str) -> WireResult<()> {
        BinaryWriter::write_field_name(self, name)
    }

    fn write_scalar(&mut self, value: &WireValue) -> WireResult<()> {
        match value {
            WireValue::Null => self.write_null(),
            WireValue::Boolean(v) => self.write_boolean(*v),
            WireValue::Int32(v) => self.write_int32(*v),
            WireValue::Int64(v) => self.write_int64(*v),
            WireValue::Double(v) => self.write_double(*v),
            WireValue::Decimal(v) => self.write_decimal(v),
            WireValue::String(v) => self.write_string(v),
            WireValue::Binary(v) => self.write_binary(v),
            WireValue::ObjectId(v) => self.write_object_id(v),
            WireValue::DateTime(v) => self.write_date_time(v),
            WireValue::Timestamp(v) => self.write_timestamp(v),
            WireValue::Regex(v) => self.write_regex(v),
            WireValue::JavaScript(v) => self.write_java_script(v),
            WireValue::Symbol(v) => self.write_symbol(v),
            WireValue::DbPointer(v) => self.write_db_pointer(v),
            WireValue::Undefined => self.write_undefined(),
            WireValue::MinKey => self.write_min_key(),
            WireValue::MaxKey => self.write_max_key(),
            WireValue::Document(_) | WireValue::Array(_) => Err(WireError::InvalidState(
                "write_scalar called with a container value".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::BinaryReader;
    use crate::token::TokenEvent;

    #[test]
    fn test_empty_document_bytes() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        writer.write_end_document().unwrap();
        assert_eq!(writer.into_bytes().unwrap(), b"\x05\x00\x00\x00\x00");
    }

    #[test]
    fn test_string_document_bytes() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        writer.write_field_name("hi").unwrap();
        writer.write_string("y'all").unwrap();
        writer.write_end_document().unwrap();
        assert_eq!(
            writer.into_bytes().unwrap(),
            b"\x13\x00\x00\x00\x02hi\x00\x06\x00\x00\x00y'all\x00\x00"
        );
    }

    #[test]
    fn test_array_index_keys_are_generated() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        writer.write_field_name("a").unwrap();
        writer.write_start_array().unwrap();
        writer.write_int32(1).unwrap();
        writer.write_int32(2).unwrap();
        writer.write_end_array().unwrap();
        writer.write_end_document().unwrap();
        let bytes = writer.into_bytes().unwrap();

        let mut reader = BinaryReader::new(&bytes);
        let mut scalars = Vec::new();
        while let Some(token) = reader.next().unwrap() {
            if let TokenEvent::Scalar(v) = token {
                scalars.push(v);
            }
        }
        assert_eq!(scalars, vec![WireValue::Int32(1), WireValue::Int32(2)]);
    }

    #[test]
    fn test_scalar_without_field_name_is_contract_error() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        assert!(matches!(
            writer.write_int32(1),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_scalar_outside_container_is_contract_error() {
        let mut writer = BinaryWriter::new();
        assert!(matches!(
            writer.write_int32(1),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_unbalanced_writer_refuses_to_finish() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        assert!(matches!(
            writer.into_bytes(),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_mismatched_end_call() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        assert!(matches!(
            writer.write_end_array(),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_field_name_inside_array_is_contract_error() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        writer.write_field_name("a").unwrap();
        writer.write_start_array().unwrap();
        assert!(matches!(
            writer.write_field_name("b"),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_nul_in_field_name_rejected() {
        let mut writer = BinaryWriter::new();
        writer.write_start_document().unwrap();
        writer.write_field_name("bad\0name").unwrap();
        assert!(matches!(
            writer.write_int32(1),
            Err(WireError::InvalidState(_))
        ));
    }
}
