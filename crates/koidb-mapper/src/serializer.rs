//! 编译序列化器模块
//!
//! 每个声明形状编译一次，得到不可变、可跨线程共享的序列化器句柄。
//! 集合的元素序列化器按需编译，通过 `OnceLock` 做幂等的、并发安全的
//! 记忆化，两个线程竞争时各自的计算结果等价。

use crate::shape::Shape;
use crate::{MapperError, MapperResult};
use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_common::ObjectId;
use koidb_wire::{RegexValue, WireValue};
use rust_decimal::Decimal;
use std::sync::{Arc, OnceLock};

/// 编译序列化器句柄
///
/// 构造后不可变；克隆是 Arc 级别的浅拷贝。
#[derive(Debug, Clone)]
pub struct CompiledSerializer {
    node: Arc<SerializerNode>,
}

/// 序列化器节点的种类
///
/// 路径解析只通过这套公开表面下钻，不触碰内部表示。
#[derive(Debug)]
pub enum SerializerNode {
    Struct(StructSerializer),
    Map(MapSerializer),
    Collection(CollectionSerializer),
    Leaf(LeafSerializer),
}

/// 结构体序列化器：暴露命名属性
#[derive(Debug)]
pub struct StructSerializer {
    name: CompactString,
    properties: IndexMap<CompactString, CompiledSerializer>,
}

impl StructSerializer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self, name: &str) -> Option<&CompiledSerializer> {
        self.properties.get(name)
    }
}

/// 映射序列化器：暴露内容序列化器（键不做类型检查）
#[derive(Debug)]
pub struct MapSerializer {
    content: CompiledSerializer,
}

impl MapSerializer {
    pub fn content(&self) -> &CompiledSerializer {
        &self.content
    }
}

/// 集合序列化器：暴露元素序列化器
///
/// 元素序列化器从声明的元素形状按需编译；记忆化是幂等的。
#[derive(Debug)]
pub struct CollectionSerializer {
    element_shape: Shape,
    element: OnceLock<CompiledSerializer>,
}

impl CollectionSerializer {
    pub fn element(&self) -> &CompiledSerializer {
        self.element
            .get_or_init(|| CompiledSerializer::compile(&self.element_shape))
    }
}

impl CompiledSerializer {
    /// 将声明形状编译为序列化器
    ///
    /// # Brief
    /// 递归编译；集合元素延迟到首次使用时编译
    pub fn compile(shape: &Shape) -> Self {
        let node = match shape {
            Shape::Bool => SerializerNode::Leaf(LeafSerializer::Bool),
            Shape::Int32 => SerializerNode::Leaf(LeafSerializer::Int32),
            Shape::Int64 => SerializerNode::Leaf(LeafSerializer::Int64),
            Shape::Double => SerializerNode::Leaf(LeafSerializer::Double),
            Shape::Decimal => SerializerNode::Leaf(LeafSerializer::Decimal),
            Shape::String => SerializerNode::Leaf(LeafSerializer::String),
            Shape::Binary => SerializerNode::Leaf(LeafSerializer::Binary),
            Shape::ObjectId => SerializerNode::Leaf(LeafSerializer::ObjectId),
            Shape::Identifier => SerializerNode::Leaf(LeafSerializer::Identifier),
            Shape::DateTime => SerializerNode::Leaf(LeafSerializer::DateTime),
            Shape::Timestamp => SerializerNode::Leaf(LeafSerializer::Timestamp),
            Shape::Regex => SerializerNode::Leaf(LeafSerializer::Regex),
            Shape::Dynamic => SerializerNode::Leaf(LeafSerializer::Dynamic),
            Shape::Array(element) => SerializerNode::Collection(CollectionSerializer {
                element_shape: (**element).clone(),
                element: OnceLock::new(),
            }),
            Shape::Map(value) => SerializerNode::Map(MapSerializer {
                content: Self::compile(value),
            }),
            Shape::Struct(s) => SerializerNode::Struct(StructSerializer {
                name: s.name.clone(),
                properties: s
                    .fields
                    .iter()
                    .map(|(key, field)| (key.clone(), Self::compile(field)))
                    .collect(),
            }),
        };
        Self {
            node: Arc::new(node),
        }
    }

    pub fn leaf(leaf: LeafSerializer) -> Self {
        Self {
            node: Arc::new(SerializerNode::Leaf(leaf)),
        }
    }

    pub fn node(&self) -> &SerializerNode {
        &self.node
    }

    pub fn as_collection(&self) -> Option<&CollectionSerializer> {
        match self.node() {
            SerializerNode::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafSerializer> {
        match self.node() {
            SerializerNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// 用该序列化器编码一个运行时值
    ///
    /// # Brief
    /// 结构体按声明属性编码（未声明属性是映射错误）；映射按内容序列化
    /// 器编码每个值；集合逐元素编码，标量值按元素序列化器编码（对齐
    /// 目标存储"数组字段等值匹配元素"的查询语义）；叶按类型矫正
    ///
    /// # Arguments
    /// * `field` - 字段路径（用于错误上下文）
    /// * `value` - 要编码的值
    pub fn encode_value(&self, field: &str, value: &WireValue) -> MapperResult<WireValue> {
        match self.node() {
            SerializerNode::Leaf(leaf) => leaf.encode(field, value),
            SerializerNode::Collection(collection) => match value {
                WireValue::Array(items) => {
                    let encoded: MapperResult<Vec<WireValue>> = items
                        .iter()
                        .map(|item| collection.element().encode_value(field, item))
                        .collect();
                    Ok(WireValue::Array(encoded?))
                }
                scalar => collection.element().encode_value(field, scalar),
            },
            SerializerNode::Map(map) => match value {
                WireValue::Document(doc) => {
                    let mut encoded = IndexMap::new();
                    for (key, item) in doc {
                        encoded.insert(key.clone(), map.content().encode_value(field, item)?);
                    }
                    Ok(WireValue::Document(encoded))
                }
                other => Err(MapperError::UnsupportedValue {
                    field: field.to_string(),
                    expected: "document",
                    actual: other.type_name(),
                }),
            },
            SerializerNode::Struct(s) => match value {
                WireValue::Document(doc) => {
                    let mut encoded = IndexMap::new();
                    for (key, item) in doc {
                        let property = s.property(key).ok_or_else(|| {
                            MapperError::UnresolvedPath {
                                path: format!("{}.{}", field, key),
                                segment: key.to_string(),
                            }
                        })?;
                        encoded.insert(key.clone(), property.encode_value(key, item)?);
                    }
                    Ok(WireValue::Document(encoded))
                }
                other => Err(MapperError::UnsupportedValue {
                    field: field.to_string(),
                    expected: "document",
                    actual: other.type_name(),
                }),
            },
        }
    }
}

/// 叶序列化器
///
/// 将调用方提供的动态值矫正为字段声明的线上表示。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafSerializer {
    Bool,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    Binary,
    ObjectId,
    /// 标识序列化器：接受十六进制字符串，并透明处理标量与集合两种
    /// 形态（解析器对它不做元素替换）
    Identifier,
    DateTime,
    Timestamp,
    Regex,
    /// 直通：值按自身类型写出；遗留类型除外
    Dynamic,
}

impl LeafSerializer {
    /// 按运行时值类型推导序列化器（回退路径）
    ///
    /// 遗留的仅解码类型（undefined、db-pointer）不参与新文档的序列化，
    /// 返回 None，这是路径解析失败升级为映射错误的触发点。
    pub fn for_value(value: &WireValue) -> Option<Self> {
        match value {
            WireValue::Boolean(_) => Some(Self::Bool),
            WireValue::Int32(_) => Some(Self::Int32),
            WireValue::Int64(_) => Some(Self::Int64),
            WireValue::Double(_) => Some(Self::Double),
            WireValue::Decimal(_) => Some(Self::Decimal),
            WireValue::String(_) => Some(Self::String),
            WireValue::Binary(_) => Some(Self::Binary),
            WireValue::ObjectId(_) => Some(Self::ObjectId),
            WireValue::DateTime(_) => Some(Self::DateTime),
            WireValue::Timestamp(_) => Some(Self::Timestamp),
            WireValue::Regex(_) => Some(Self::Regex),
            WireValue::Null
            | WireValue::JavaScript(_)
            | WireValue::Symbol(_)
            | WireValue::MinKey
            | WireValue::MaxKey => Some(Self::Dynamic),
            WireValue::Document(_) | WireValue::Array(_) => Some(Self::Dynamic),
            WireValue::Undefined | WireValue::DbPointer(_) => None,
        }
    }

    /// 矫正并编码一个值
    ///
    /// Null 对所有叶直通（字段可空是映射层的默认约定）。
    pub fn encode(&self, field: &str, value: &WireValue) -> MapperResult<WireValue> {
        if value.is_null() && !matches!(self, Self::Dynamic) {
            return Ok(WireValue::Null);
        }
        match self {
            Self::Bool => match value {
                WireValue::Boolean(v) => Ok(WireValue::Boolean(*v)),
                other => Err(unsupported(field, "boolean", other)),
            },
            Self::Int32 => match value {
                WireValue::Int32(v) => Ok(WireValue::Int32(*v)),
                WireValue::Int64(v) if i32::try_from(*v).is_ok() => {
                    Ok(WireValue::Int32(*v as i32))
                }
                other => Err(unsupported(field, "int32", other)),
            },
            Self::Int64 => match value {
                WireValue::Int64(v) => Ok(WireValue::Int64(*v)),
                WireValue::Int32(v) => Ok(WireValue::Int64(*v as i64)),
                other => Err(unsupported(field, "int64", other)),
            },
            Self::Double => match value {
                WireValue::Double(v) => Ok(WireValue::Double(*v)),
                WireValue::Int32(v) => Ok(WireValue::Double(*v as f64)),
                WireValue::Int64(v) => Ok(WireValue::Double(*v as f64)),
                other => Err(unsupported(field, "double", other)),
            },
            Self::Decimal => match value {
                WireValue::Decimal(v) => Ok(WireValue::Decimal(*v)),
                WireValue::Int32(v) => Ok(WireValue::Decimal(Decimal::from(*v))),
                WireValue::Int64(v) => Ok(WireValue::Decimal(Decimal::from(*v))),
                WireValue::String(s) => s
                    .parse::<Decimal>()
                    .map(WireValue::Decimal)
                    .map_err(|_| unsupported(field, "decimal", value)),
                other => Err(unsupported(field, "decimal", other)),
            },
            Self::String => match value {
                WireValue::String(s) => Ok(WireValue::String(s.clone())),
                WireValue::Symbol(s) => Ok(WireValue::String(s.clone())),
                other => Err(unsupported(field, "string", other)),
            },
            Self::Binary => match value {
                WireValue::Binary(b) => Ok(WireValue::Binary(b.clone())),
                other => Err(unsupported(field, "binary", other)),
            },
            Self::ObjectId => encode_object_id(field, value),
            Self::Identifier => match value {
                WireValue::Array(items) => {
                    let encoded: MapperResult<Vec<WireValue>> = items
                        .iter()
                        .map(|item| encode_object_id(field, item))
                        .collect();
                    Ok(WireValue::Array(encoded?))
                }
                scalar => encode_object_id(field, scalar),
            },
            Self::DateTime => match value {
                WireValue::DateTime(v) => Ok(WireValue::DateTime(*v)),
                WireValue::Int64(millis) => Utc
                    .timestamp_millis_opt(*millis)
                    .single()
                    .map(WireValue::DateTime)
                    .ok_or_else(|| unsupported(field, "dateTime", value)),
                WireValue::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| WireValue::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|_| unsupported(field, "dateTime", value)),
                other => Err(unsupported(field, "dateTime", other)),
            },
            Self::Timestamp => match value {
                WireValue::Timestamp(v) => Ok(WireValue::Timestamp(*v)),
                other => Err(unsupported(field, "timestamp", other)),
            },
            Self::Regex => match value {
                WireValue::Regex(r) => Ok(WireValue::Regex(r.clone())),
                WireValue::String(s) => Ok(WireValue::Regex(RegexValue {
                    pattern: s.clone(),
                    options: "".into(),
                })),
                other => Err(unsupported(field, "regex", other)),
            },
            Self::Dynamic => match value {
                WireValue::Undefined | WireValue::DbPointer(_) => Err(MapperError::UnsupportedValue {
                    field: field.to_string(),
                    expected: "serializable value",
                    actual: value.type_name(),
                }),
                passthrough => Ok(passthrough.clone()),
            },
        }
    }
}

fn encode_object_id(field: &str, value: &WireValue) -> MapperResult<WireValue> {
    match value {
        WireValue::ObjectId(id) => Ok(WireValue::ObjectId(*id)),
        WireValue::String(s) => ObjectId::from_hex(s)
            .map(WireValue::ObjectId)
            .map_err(|_| unsupported(field, "objectId", value)),
        WireValue::Null => Ok(WireValue::Null),
        other => Err(unsupported(field, "objectId", other)),
    }
}

fn unsupported(field: &str, expected: &'static str, value: &WireValue) -> MapperError {
    MapperError::UnsupportedValue {
        field: field.to_string(),
        expected,
        actual: value.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_struct_exposes_properties() {
        let shape = Shape::struct_of("User", [("name", Shape::String), ("age", Shape::Int32)]);
        let compiled = CompiledSerializer::compile(&shape);
        match compiled.node() {
            SerializerNode::Struct(s) => {
                assert_eq!(s.name(), "User");
                assert!(s.property("name").is_some());
                assert!(s.property("missing").is_none());
            }
            _ => panic!("expected struct serializer"),
        }
    }

    #[test]
    fn test_collection_element_is_memoized() {
        let shape = Shape::array(Shape::String);
        let compiled = CompiledSerializer::compile(&shape);
        let collection = compiled.as_collection().unwrap();
        let first = collection.element() as *const CompiledSerializer;
        let second = collection.element() as *const CompiledSerializer;
        assert_eq!(first, second);
        assert_eq!(
            collection.element().as_leaf(),
            Some(&LeafSerializer::String)
        );
    }

    #[test]
    fn test_int32_coercion() {
        let leaf = LeafSerializer::Int32;
        assert_eq!(
            leaf.encode("age", &WireValue::Int64(5)).unwrap(),
            WireValue::Int32(5)
        );
        assert!(leaf.encode("age", &WireValue::Int64(i64::MAX)).is_err());
        assert!(leaf.encode("age", &WireValue::String("x".into())).is_err());
    }

    #[test]
    fn test_identifier_accepts_hex_and_arrays() {
        let leaf = LeafSerializer::Identifier;
        let id = ObjectId::from_bytes([1; 12]);
        let hex = id.to_hex();
        assert_eq!(
            leaf.encode("_id", &WireValue::String(hex.as_str().into()))
                .unwrap(),
            WireValue::ObjectId(id)
        );
        let encoded = leaf
            .encode(
                "_id",
                &WireValue::Array(vec![WireValue::String(hex.as_str().into())]),
            )
            .unwrap();
        assert_eq!(encoded, WireValue::Array(vec![WireValue::ObjectId(id)]));
    }

    #[test]
    fn test_datetime_accepts_millis_and_rfc3339() {
        let leaf = LeafSerializer::DateTime;
        let millis = 1_700_000_000_123i64;
        let encoded = leaf.encode("at", &WireValue::Int64(millis)).unwrap();
        match encoded {
            WireValue::DateTime(dt) => assert_eq!(dt.timestamp_millis(), millis),
            other => panic!("expected datetime, got {}", other),
        }
        assert!(leaf
            .encode("at", &WireValue::String("2024-01-02T03:04:05Z".into()))
            .is_ok());
        assert!(leaf.encode("at", &WireValue::String("not a date".into())).is_err());
    }

    #[test]
    fn test_struct_encode_rejects_unknown_property() {
        let shape = Shape::struct_of("User", [("name", Shape::String)]);
        let compiled = CompiledSerializer::compile(&shape);
        let value = koidb_wire::wire!({ "name": "a", "extra": 1 });
        let err = compiled.encode_value("user", &value).unwrap_err();
        assert!(matches!(err, MapperError::UnresolvedPath { segment, .. } if segment == "extra"));
    }

    #[test]
    fn test_dynamic_rejects_legacy_kinds() {
        let leaf = LeafSerializer::Dynamic;
        assert!(leaf.encode("x", &WireValue::Undefined).is_err());
        assert!(LeafSerializer::for_value(&WireValue::Undefined).is_none());
    }

    #[test]
    fn test_collection_encodes_scalar_as_element() {
        let compiled = CompiledSerializer::compile(&Shape::array(Shape::Int32));
        assert_eq!(
            compiled
                .encode_value("nums", &WireValue::Int64(4))
                .unwrap(),
            WireValue::Int32(4)
        );
    }
}
