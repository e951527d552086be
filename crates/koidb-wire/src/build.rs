//! 内存树构建器模块
//!
//! 二进制写入器的树端对偶：接受相同的结构/标量写入调用，
//! 构建 WireValue 树而非字节。
//!
//! - 同一文档内的重复字段名被拒绝（物化策略，见 DESIGN.md）
//! - 无外层容器时写入的标量成为根值节点；根值节点重复赋值是
//!   调用方契约错误，表明写入器被错误复用

use crate::sink::DocumentSink;
use crate::spec::MAX_NESTING_DEPTH;
use crate::value::WireValue;
use crate::{WireError, WireResult};
use compact_str::CompactString;
use indexmap::IndexMap;

enum BuildFrame {
    Document {
        map: IndexMap<CompactString, WireValue>,
        pending_name: Option<CompactString>,
    },
    Array {
        items: Vec<WireValue>,
    },
}

/// 内存树构建器
///
/// 单次使用：`finish` 取出根值后实例即被消耗。
pub struct TreeBuilder {
    frames: Vec<BuildFrame>,
    root: Option<WireValue>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            root: None,
        }
    }

    /// 取出构建完成的根值
    ///
    /// # Brief
    /// 所有容器必须已闭合且至少写入过一个值
    ///
    /// # Returns
    /// 成功返回根 WireValue, 失败返回契约错误
    pub fn finish(self) -> WireResult<WireValue> {
        if !self.frames.is_empty() {
            return Err(WireError::InvalidState(format!(
                "{} container(s) still open",
                self.frames.len()
            )));
        }
        self.root
            .ok_or_else(|| WireError::InvalidState("No value written".to_string()))
    }

    fn open(&mut self, frame: BuildFrame) -> WireResult<()> {
        if self.frames.is_empty() && self.root.is_some() {
            return Err(WireError::InvalidState(
                "Root value already set".to_string(),
            ));
        }
        if self.frames.len() >= MAX_NESTING_DEPTH {
            return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// 将完成的值挂到父节点下，或作为根值
    fn attach(&mut self, value: WireValue) -> WireResult<()> {
        match self.frames.last_mut() {
            None => {
                if self.root.is_some() {
                    return Err(WireError::InvalidState(
                        "Root value already set".to_string(),
                    ));
                }
                self.root = Some(value);
                Ok(())
            }
            Some(BuildFrame::Document { map, pending_name }) => {
                let name = pending_name.take().ok_or_else(|| {
                    WireError::InvalidState("Value written without a field name".to_string())
                })?;
                if map.contains_key(&name) {
                    return Err(WireError::DuplicateField(name.to_string()));
                }
                map.insert(name, value);
                Ok(())
            }
            Some(BuildFrame::Array { items }) => {
                items.push(value);
                Ok(())
            }
        }
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSink for TreeBuilder {
    fn write_start_document(&mut self) -> WireResult<()> {
        self.open(BuildFrame::Document {
            map: IndexMap::new(),
            pending_name: None,
        })
    }

    fn write_end_document(&mut self) -> WireResult<()> {
        match self.frames.pop() {
            Some(BuildFrame::Document { map, pending_name }) => {
                if pending_name.is_some() {
                    return Err(WireError::InvalidState(
                        "Document closed with a dangling field name".to_string(),
                    ));
                }
                self.attach(WireValue::Document(map))
            }
            Some(frame @ BuildFrame::Array { .. }) => {
                self.frames.push(frame);
                Err(WireError::InvalidState(
                    "End call does not match open container: array".to_string(),
                ))
            }
            None => Err(WireError::InvalidState(
                "End call with no open container".to_string(),
            )),
        }
    }

    fn write_start_array(&mut self) -> WireResult<()> {
        self.open(BuildFrame::Array { items: Vec::new() })
    }

    fn write_end_array(&mut self) -> WireResult<()> {
        match self.frames.pop() {
            Some(BuildFrame::Array { items }) => self.attach(WireValue::Array(items)),
            Some(frame @ BuildFrame::Document { .. }) => {
                self.frames.push(frame);
                Err(WireError::InvalidState(
                    "End call does not match open container: document".to_string(),
                ))
            }
            None => Err(WireError::InvalidState(
                "End call with no open container".to_string(),
            )),
        }
    }

    fn write_field_name(&mut self, name: &str) -> WireResult<()> {
        match self.frames.last_mut() {
            Some(BuildFrame::Document { pending_name, .. }) => {
                if pending_name.is_some() {
                    return Err(WireError::InvalidState(format!(
                        "Field name '{}' written while another is pending",
                        name
                    )));
                }
                *pending_name = Some(CompactString::from(name));
                Ok(())
            }
            Some(BuildFrame::Array { .. }) => Err(WireError::InvalidState(
                "Field names are not allowed inside arrays".to_string(),
            )),
            None => Err(WireError::InvalidState(
                "Field name written outside a document".to_string(),
            )),
        }
    }

    fn write_scalar(&mut self, value: &WireValue) -> WireResult<()> {
        if !value.is_scalar() {
            return Err(WireError::InvalidState(
                "write_scalar called with a container value".to_string(),
            ));
        }
        self.attach(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;

    #[test]
    fn test_build_flat_document() {
        let mut builder = TreeBuilder::new();
        builder.write_start_document().unwrap();
        builder.write_field_name("name").unwrap();
        builder.write_scalar(&WireValue::String("Koi".into())).unwrap();
        builder.write_field_name("age").unwrap();
        builder.write_scalar(&WireValue::Int32(3)).unwrap();
        builder.write_end_document().unwrap();
        assert_eq!(builder.finish().unwrap(), wire!({ "name": "Koi", "age": 3 }));
    }

    #[test]
    fn test_build_nested() {
        let mut builder = TreeBuilder::new();
        builder.write_start_document().unwrap();
        builder.write_field_name("a").unwrap();
        builder.write_start_array().unwrap();
        builder.write_scalar(&WireValue::Int32(1)).unwrap();
        builder.write_start_document().unwrap();
        builder.write_field_name("b").unwrap();
        builder.write_scalar(&WireValue::Int32(2)).unwrap();
        builder.write_end_document().unwrap();
        builder.write_end_array().unwrap();
        builder.write_end_document().unwrap();
        assert_eq!(builder.finish().unwrap(), wire!({ "a": [1, { "b": 2 }] }));
    }

    #[test]
    fn test_root_scalar_node() {
        let mut builder = TreeBuilder::new();
        builder.write_scalar(&WireValue::Int32(7)).unwrap();
        assert_eq!(builder.finish().unwrap(), WireValue::Int32(7));
    }

    #[test]
    fn test_root_scalar_double_set_is_contract_error() {
        let mut builder = TreeBuilder::new();
        builder.write_scalar(&WireValue::Int32(7)).unwrap();
        assert!(matches!(
            builder.write_scalar(&WireValue::Int32(8)),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut builder = TreeBuilder::new();
        builder.write_start_document().unwrap();
        builder.write_field_name("x").unwrap();
        builder.write_scalar(&WireValue::Int32(1)).unwrap();
        builder.write_field_name("x").unwrap();
        let err = builder.write_scalar(&WireValue::Int32(2)).unwrap_err();
        assert!(matches!(err, WireError::DuplicateField(name) if name == "x"));
    }

    #[test]
    fn test_unbalanced_builder_refuses_to_finish() {
        let mut builder = TreeBuilder::new();
        builder.write_start_document().unwrap();
        assert!(matches!(
            builder.finish(),
            Err(WireError::InvalidState(_))
        ));
    }

    #[test]
    fn test_mismatched_end_call() {
        let mut builder = TreeBuilder::new();
        builder.write_start_document().unwrap();
        assert!(matches!(
            builder.write_end_array(),
            Err(WireError::InvalidState(_))
        ));
    }
}
