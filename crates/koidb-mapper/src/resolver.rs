//! 序列化器路径解析模块
//!
//! 给定整对象序列化器和点分字段路径，沿结构体/映射/集合序列化器
//! 逐段下钻，定位负责该子路径的序列化器：
//!
//! 1. 索引或通配符段：当前必须是集合序列化器，步入其元素序列化器
//! 2. 结构体：查命名属性
//! 3. 映射：无条件步入内容序列化器（键不做类型检查）
//! 4. 其余情况解析失败，调用方必须按运行时值类型回退。回退是
//!    正确性要求（原始映射、多态字段），不是可选项
//!
//! 算子键（`$` 开头）永远不进入解析器：解析只发生在路径的字段部分，
//! 同一字段的所有算子子值复用该字段解析出的序列化器。

use crate::path::{FieldPath, PathSegment};
use crate::serializer::{CompiledSerializer, LeafSerializer, SerializerNode};
use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use tracing::trace;

/// 一次字段解析的结果
///
/// 每个字段键只解析一次；算子子值与集合元素共享同一结果。
#[derive(Debug, Clone)]
pub struct Resolution {
    /// 被解析的字段路径（错误上下文）
    pub path: CompactString,
    /// 声明形状解析出的序列化器；None 表示需按叶值回退
    pub serializer: Option<CompiledSerializer>,
    /// 解析失败时的出错段（用于映射错误报告）
    pub failed_segment: Option<CompactString>,
}

impl Resolution {
    /// 无类型上下文（无根序列化器或算子位置）
    pub fn untyped(path: impl Into<CompactString>) -> Self {
        Self {
            path: path.into(),
            serializer: None,
            failed_segment: None,
        }
    }

    pub fn serializer_ref(&self) -> Option<&CompiledSerializer> {
        self.serializer.as_ref()
    }
}

/// 沿字段路径解析序列化器
///
/// # Brief
/// 逐段下钻；消费完所有段后，若目标是集合元素（$in/$all/$push 语义），
/// 集合序列化器被替换为其元素序列化器，标识叶保持不变（它透明处理
/// 标量与集合两种形态）
///
/// # Arguments
/// * `root` - 整对象序列化器
/// * `path` - 已解析的字段路径
/// * `target_is_collection_element` - 按声明集合的元素类型而非字段
///   自身的声明类型序列化
///
/// # Returns
/// `Some(serializer)` 解析成功；`None` 表示声明形状不匹配该路径，
/// 调用方必须回退到按运行时值类型解析
pub fn resolve(
    root: &CompiledSerializer,
    path: &FieldPath,
    target_is_collection_element: bool,
) -> Option<CompiledSerializer> {
    resolve_inner(root, path, target_is_collection_element).ok()
}

fn resolve_inner(
    root: &CompiledSerializer,
    path: &FieldPath,
    target_is_collection_element: bool,
) -> Result<CompiledSerializer, CompactString> {
    let mut current = root.clone();
    for segment in path.segments() {
        let next = match (segment, current.node()) {
            (PathSegment::Index(_) | PathSegment::Wildcard, SerializerNode::Collection(c)) => {
                c.element().clone()
            }
            (PathSegment::Index(index), _) => {
                return Err(CompactString::from(index.to_string()));
            }
            (PathSegment::Wildcard, _) => return Err(CompactString::from("$")),
            (PathSegment::Property(name), SerializerNode::Struct(s)) => match s.property(name) {
                Some(property) => property.clone(),
                None => return Err(name.clone()),
            },
            (PathSegment::Property(_), SerializerNode::Map(m)) => m.content().clone(),
            (PathSegment::Property(name), SerializerNode::Collection(_)) => {
                return Err(name.clone());
            }
            (PathSegment::Property(name), SerializerNode::Leaf(_)) => return Err(name.clone()),
        };
        current = next;
    }
    if target_is_collection_element {
        let element = match current.node() {
            SerializerNode::Collection(c) => Some(c.element().clone()),
            SerializerNode::Leaf(LeafSerializer::Identifier) => None,
            _ => None,
        };
        if let Some(element) = element {
            current = element;
        }
    }
    Ok(current)
}

/// 为一个过滤/更新字段键解析序列化器
///
/// # Brief
/// 校验键不是算子（契约），解析点分路径；解析失败不立即报错，
/// 结果携带出错段，由叶编码时的运行时回退决定最终成败
///
/// # Arguments
/// * `root` - 整对象序列化器；None 表示无类型上下文
/// * `path` - 字段键（点分路径字符串）
/// * `target_is_collection_element` - 见 [`resolve`]
pub fn resolve_for_field(
    root: Option<&CompiledSerializer>,
    path: &str,
    target_is_collection_element: bool,
) -> MapperResult<Resolution> {
    if path.starts_with('$') {
        return Err(MapperError::Contract(format!(
            "Operator key '{}' must not reach the path resolver",
            path
        )));
    }
    let parsed = FieldPath::parse(path)?;
    let root = match root {
        Some(root) => root,
        None => return Ok(Resolution::untyped(path)),
    };
    match resolve_inner(root, &parsed, target_is_collection_element) {
        Ok(serializer) => Ok(Resolution {
            path: CompactString::from(path),
            serializer: Some(serializer),
            failed_segment: None,
        }),
        Err(segment) => {
            trace!(path, %segment, "declared-shape resolution failed, deferring to runtime fallback");
            Ok(Resolution {
                path: CompactString::from(path),
                serializer: None,
                failed_segment: Some(segment),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn user_serializer() -> CompiledSerializer {
        CompiledSerializer::compile(&Shape::struct_of(
            "User",
            [
                ("name", Shape::String),
                (
                    "addr",
                    Shape::struct_of("Addr", [("zip", Shape::Int32), ("city", Shape::String)]),
                ),
                ("tags", Shape::array(Shape::String)),
                ("meta", Shape::map(Shape::Int64)),
                ("ids", Shape::Identifier),
            ],
        ))
    }

    fn leaf_of(serializer: &CompiledSerializer) -> LeafSerializer {
        *serializer.as_leaf().expect("expected leaf serializer")
    }

    #[test]
    fn test_nested_property_resolves_to_leaf() {
        let root = user_serializer();
        let path = FieldPath::parse("addr.zip").unwrap();
        let resolved = resolve(&root, &path, false).unwrap();
        assert_eq!(leaf_of(&resolved), LeafSerializer::Int32);
    }

    #[test]
    fn test_collection_element_target() {
        let root = user_serializer();
        let path = FieldPath::parse("tags").unwrap();

        let as_field = resolve(&root, &path, false).unwrap();
        assert!(as_field.as_collection().is_some());

        let as_element = resolve(&root, &path, true).unwrap();
        assert_eq!(leaf_of(&as_element), LeafSerializer::String);
    }

    #[test]
    fn test_explicit_index_and_wildcard_step_into_element() {
        let root = user_serializer();
        for path in ["tags.0", "tags.$"] {
            let parsed = FieldPath::parse(path).unwrap();
            let resolved = resolve(&root, &parsed, false).unwrap();
            assert_eq!(leaf_of(&resolved), LeafSerializer::String);
        }
    }

    #[test]
    fn test_map_steps_into_content_for_any_key() {
        let root = user_serializer();
        let path = FieldPath::parse("meta.anything.goes").unwrap();
        // map 内容是 Int64 叶，第二段之后无法继续下钻
        assert!(resolve(&root, &path, false).is_none());

        let path = FieldPath::parse("meta.count").unwrap();
        let resolved = resolve(&root, &path, false).unwrap();
        assert_eq!(leaf_of(&resolved), LeafSerializer::Int64);
    }

    #[test]
    fn test_identifier_leaf_unchanged_for_element_target() {
        let root = user_serializer();
        let path = FieldPath::parse("ids").unwrap();
        let resolved = resolve(&root, &path, true).unwrap();
        assert_eq!(leaf_of(&resolved), LeafSerializer::Identifier);
    }

    #[test]
    fn test_unknown_property_fails() {
        let root = user_serializer();
        let path = FieldPath::parse("nope").unwrap();
        assert!(resolve(&root, &path, false).is_none());
    }

    #[test]
    fn test_index_on_non_collection_fails() {
        let root = user_serializer();
        let path = FieldPath::parse("name.0").unwrap();
        assert!(resolve(&root, &path, false).is_none());
    }

    #[test]
    fn test_operator_key_is_contract_error() {
        let root = user_serializer();
        let err = resolve_for_field(Some(&root), "$gt", false).unwrap_err();
        assert!(matches!(err, MapperError::Contract(_)));
    }

    #[test]
    fn test_failed_resolution_carries_segment() {
        let root = user_serializer();
        let resolution = resolve_for_field(Some(&root), "addr.street", false).unwrap();
        assert!(resolution.serializer.is_none());
        assert_eq!(resolution.failed_segment.as_deref(), Some("street"));
    }
}
