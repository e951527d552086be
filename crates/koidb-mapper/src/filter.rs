//! 过滤器序列化模块
//!
//! 将条件树编码为线上文档，叶值经过与整文档编码一致的逐字段
//! 序列化器：
//!
//! - 每个字段键解析一次序列化器，该字段的所有算子子值（$gt、$in …）
//!   复用同一结果
//! - 逻辑算子（$or/$and/$nor）的操作数是子过滤器集合，各自以外层
//!   基准重新解析
//! - 声明解析失败的叶按运行时值类型回退；两者都失败是携带字段路径
//!   的映射错误，部分文档宁可报错也不猜测编码

use crate::condition::ConditionNode;
use crate::config::MapperConfig;
use crate::ops;
use crate::resolver::{resolve_for_field, Resolution};
use crate::serializer::CompiledSerializer;
use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_wire::{BinaryWriter, DocumentSink, TreeBuilder, WireValue};

/// 将条件树序列化到任意写入目标
///
/// # Arguments
/// * `config` - 映射配置（回退解析的来源）
/// * `root` - 目标类型的整对象序列化器；None 表示无类型过滤
/// * `filter` - 条件树根（必须是复合节点）
/// * `sink` - 字节写入器或树构建器
pub fn serialize_filter(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    filter: &ConditionNode,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    match filter {
        ConditionNode::Compound { fields, .. } => {
            write_compound_body(config, root, &Resolution::untyped(""), fields, sink)
        }
        _ => Err(MapperError::Contract(
            "Filter root must be a compound node".to_string(),
        )),
    }
}

/// 序列化条件树为内存值
pub fn filter_to_value(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    filter: &ConditionNode,
) -> MapperResult<WireValue> {
    let mut builder = TreeBuilder::new();
    serialize_filter(config, root, filter, &mut builder)?;
    Ok(builder.finish()?)
}

/// 序列化条件树为 KOB 字节
pub fn filter_to_vec(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    filter: &ConditionNode,
) -> MapperResult<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    serialize_filter(config, root, filter, &mut writer)?;
    Ok(writer.into_bytes()?)
}

fn write_compound_body(
    config: &MapperConfig,
    base: Option<&CompiledSerializer>,
    inherited: &Resolution,
    fields: &IndexMap<CompactString, ConditionNode>,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    sink.write_start_document()?;
    for (key, node) in fields {
        sink.write_field_name(key)?;
        if ops::is_logical_operator(key) {
            write_logical_operand(config, base, key, node, sink)?;
        } else if ops::is_operator_key(key) {
            // 算子键：复用外层字段解析出的序列化器，绝不进入解析器
            write_node(config, inherited, node, sink)?;
        } else {
            let resolution = resolve_for_field(base, key, node.collection_target())?;
            write_node(config, &resolution, node, sink)?;
        }
    }
    sink.write_end_document()?;
    Ok(())
}

fn write_node(
    config: &MapperConfig,
    ctx: &Resolution,
    node: &ConditionNode,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    match node {
        ConditionNode::Simple { value, wire_ready } => {
            if *wire_ready {
                sink.write_value(value)?;
            } else {
                let encoded = config.encode_leaf(ctx, value)?;
                sink.write_value(&encoded)?;
            }
            Ok(())
        }
        ConditionNode::Collection { items, .. } => {
            sink.write_start_array()?;
            for item in items {
                write_node(config, ctx, item, sink)?;
            }
            sink.write_end_array()?;
            Ok(())
        }
        ConditionNode::Compound { fields, .. } => {
            write_compound_body(config, ctx.serializer_ref(), ctx, fields, sink)
        }
    }
}

fn write_logical_operand(
    config: &MapperConfig,
    base: Option<&CompiledSerializer>,
    key: &str,
    node: &ConditionNode,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    let items = match node {
        ConditionNode::Collection { items, .. } => items,
        _ => {
            return Err(MapperError::InvalidOperator(format!(
                "{} requires a collection of sub-filters",
                key
            )))
        }
    };
    sink.write_start_array()?;
    for item in items {
        match item {
            ConditionNode::Compound { fields, .. } => {
                // 子过滤器的字段以外层基准解析，而非逻辑算子自身
                write_compound_body(config, base, &Resolution::untyped(key), fields, sink)?;
            }
            _ => {
                return Err(MapperError::InvalidOperator(format!(
                    "{} operands must be compound sub-filters",
                    key
                )))
            }
        }
    }
    sink.write_end_array()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use koidb_wire::wire;

    fn config() -> MapperConfig {
        MapperConfig::builder()
            .register(Shape::struct_of(
                "User",
                [
                    ("name", Shape::String),
                    ("age", Shape::Int32),
                    (
                        "addr",
                        Shape::struct_of("Addr", [("zip", Shape::Int32), ("city", Shape::String)]),
                    ),
                    ("tags", Shape::array(Shape::String)),
                    (
                        "pets",
                        Shape::array(Shape::struct_of(
                            "Pet",
                            [("kind", Shape::String), ("age", Shape::Int32)],
                        )),
                    ),
                ],
            ))
            .build()
    }

    #[test]
    fn test_equality_goes_through_field_serializer() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([("age", ConditionNode::value(30i64))]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        assert_eq!(value, wire!({ "age": 30 }));
        assert_eq!(value.get("age"), Some(&WireValue::Int32(30)));
    }

    #[test]
    fn test_operator_subvalue_reuses_field_serializer() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "age",
            ConditionNode::fields([("$gt", ConditionNode::value(5i64))]),
        )]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        // Int64(5) 被 age 的 Int32 序列化器矫正，证明 $gt 复用了字段解析结果
        assert_eq!(value.get_path("age.$gt"), Some(&WireValue::Int32(5)));
    }

    #[test]
    fn test_nested_path_resolution() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([("addr.zip", ConditionNode::value(310000i64))]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        assert_eq!(value.get("addr.zip"), Some(&WireValue::Int32(310000)));
    }

    #[test]
    fn test_in_serializes_elements_with_element_serializer() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "tags",
            ConditionNode::fields([(
                "$in",
                ConditionNode::elements([
                    ConditionNode::value("a"),
                    ConditionNode::value("b"),
                ]),
            )])
            .with_collection_target(true),
        )]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        assert_eq!(value, wire!({ "tags": { "$in": ["a", "b"] } }));
    }

    #[test]
    fn test_in_of_compound_conditions() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "pets",
            ConditionNode::fields([(
                "$in",
                ConditionNode::elements([ConditionNode::fields([
                    ("kind", ConditionNode::value("cat")),
                    ("age", ConditionNode::value(2i64)),
                ])]),
            )])
            .with_collection_target(true),
        )]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        // 复合成员的字段以元素结构体序列化器解析
        assert_eq!(
            value,
            wire!({ "pets": { "$in": [{ "kind": "cat", "age": 2 }] } })
        );
    }

    #[test]
    fn test_logical_operator_resolves_against_root() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "$or",
            ConditionNode::list([
                ConditionNode::fields([("name", ConditionNode::value("Koi"))]),
                ConditionNode::fields([("age", ConditionNode::value(3i64))]),
            ]),
        )]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        assert_eq!(
            value,
            wire!({ "$or": [{ "name": "Koi" }, { "age": 3 }] })
        );
    }

    #[test]
    fn test_wire_ready_value_skips_serialization() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "age",
            ConditionNode::fields([("$exists", ConditionNode::wire_ready(true))]),
        )]);
        let value = filter_to_value(&config, root, &filter).unwrap();
        assert_eq!(value, wire!({ "age": { "$exists": true } }));
    }

    #[test]
    fn test_untyped_filter_falls_back_to_value_types() {
        let config = config();
        let filter = ConditionNode::fields([("anything", ConditionNode::value("x"))]);
        let value = filter_to_value(&config, None, &filter).unwrap();
        assert_eq!(value, wire!({ "anything": "x" }));
    }

    #[test]
    fn test_unresolved_path_with_unserializable_value_is_mapping_error() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "nope",
            ConditionNode::Simple {
                value: WireValue::Undefined,
                wire_ready: false,
            },
        )]);
        let err = filter_to_value(&config, root, &filter).unwrap_err();
        match err {
            MapperError::UnresolvedPath { path, segment } => {
                assert_eq!(path, "nope");
                assert_eq!(segment, "nope");
            }
            other => panic!("expected UnresolvedPath, got {}", other),
        }
    }

    #[test]
    fn test_logical_operator_rejects_non_compound_operands() {
        let config = config();
        let filter = ConditionNode::fields([(
            "$or",
            ConditionNode::list([ConditionNode::value(1)]),
        )]);
        assert!(matches!(
            filter_to_value(&config, None, &filter),
            Err(MapperError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_filter_bytes_round_trip() {
        let config = config();
        let root = config.serializer("User");
        let filter = ConditionNode::fields([(
            "age",
            ConditionNode::fields([("$gte", ConditionNode::value(18i64))]),
        )]);
        let bytes = filter_to_vec(&config, root, &filter).unwrap();
        let decoded = koidb_wire::decode(&bytes).unwrap();
        assert_eq!(decoded, wire!({ "age": { "$gte": 18 } }));
    }
}
