//! 更新算子序列化模块
//!
//! 按算子分组的 字段→值 映射编码为线上更新文档。字段序列化器经
//! 路径解析获得；多值包装（一次作用于多个元素）编码为线上数组，
//! 且在 $push/$addToSet 下必须再包一层 `$each` 键，这是目标存储的
//! 线上契约，不是实现选择。

use crate::config::MapperConfig;
use crate::ops;
use crate::resolver::resolve_for_field;
use crate::serializer::CompiledSerializer;
use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_wire::{BinaryWriter, DocumentSink, TreeBuilder, WireValue};
use serde::{Deserialize, Serialize};

/// 更新算子（闭集，与目标存储文档化的集合一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOperator {
    Set,
    Unset,
    Inc,
    Push,
    Pull,
    PullAll,
    Pop,
    Rename,
    Bit,
    AddToSet,
}

impl UpdateOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::Push => "$push",
            UpdateOperator::Pull => "$pull",
            UpdateOperator::PullAll => "$pullAll",
            UpdateOperator::Pop => "$pop",
            UpdateOperator::Rename => "$rename",
            UpdateOperator::Bit => "$bit",
            UpdateOperator::AddToSet => "$addToSet",
        }
    }

    /// 算子值按字段声明集合的元素类型序列化
    fn targets_collection_element(&self) -> bool {
        matches!(
            self,
            UpdateOperator::Push
                | UpdateOperator::AddToSet
                | UpdateOperator::Pull
                | UpdateOperator::PullAll
        )
    }

    /// 算子存在多值形式
    fn supports_multi(&self) -> bool {
        matches!(
            self,
            UpdateOperator::Push | UpdateOperator::AddToSet | UpdateOperator::PullAll
        )
    }

    /// 多值形式需要 $each 包装
    fn wraps_each(&self) -> bool {
        matches!(self, UpdateOperator::Push | UpdateOperator::AddToSet)
    }

    /// 值是位置性字面量（新字段名、弹出方向等），不经字段序列化器
    fn positional_literal(&self) -> bool {
        matches!(
            self,
            UpdateOperator::Unset
                | UpdateOperator::Rename
                | UpdateOperator::Pop
                | UpdateOperator::Bit
        )
    }
}

impl std::fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 更新算子的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateValue {
    /// 单值
    Single(WireValue),
    /// 多值包装：一次作用于多个元素
    Each(Vec<WireValue>),
}

/// 按算子分组的更新文档
///
/// 算子与字段都保持插入顺序。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDocument {
    groups: Vec<(UpdateOperator, IndexMap<CompactString, UpdateValue>)>,
}

impl UpdateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[(UpdateOperator, IndexMap<CompactString, UpdateValue>)] {
        &self.groups
    }

    /// 记录一条算子条目（同算子合并进既有分组）
    pub fn apply(
        mut self,
        operator: UpdateOperator,
        field: impl Into<CompactString>,
        value: UpdateValue,
    ) -> Self {
        if let Some((_, fields)) = self.groups.iter_mut().find(|(op, _)| *op == operator) {
            fields.insert(field.into(), value);
        } else {
            let mut fields = IndexMap::new();
            fields.insert(field.into(), value);
            self.groups.push((operator, fields));
        }
        self
    }

    pub fn set(self, field: impl Into<CompactString>, value: impl Into<WireValue>) -> Self {
        self.apply(UpdateOperator::Set, field, UpdateValue::Single(value.into()))
    }

    pub fn unset(self, field: impl Into<CompactString>) -> Self {
        self.apply(
            UpdateOperator::Unset,
            field,
            UpdateValue::Single(WireValue::String("".into())),
        )
    }

    pub fn inc(self, field: impl Into<CompactString>, value: impl Into<WireValue>) -> Self {
        self.apply(UpdateOperator::Inc, field, UpdateValue::Single(value.into()))
    }

    pub fn push(self, field: impl Into<CompactString>, value: impl Into<WireValue>) -> Self {
        self.apply(UpdateOperator::Push, field, UpdateValue::Single(value.into()))
    }

    pub fn push_each(
        self,
        field: impl Into<CompactString>,
        values: impl IntoIterator<Item = WireValue>,
    ) -> Self {
        self.apply(
            UpdateOperator::Push,
            field,
            UpdateValue::Each(values.into_iter().collect()),
        )
    }

    pub fn add_to_set(self, field: impl Into<CompactString>, value: impl Into<WireValue>) -> Self {
        self.apply(
            UpdateOperator::AddToSet,
            field,
            UpdateValue::Single(value.into()),
        )
    }

    pub fn add_to_set_each(
        self,
        field: impl Into<CompactString>,
        values: impl IntoIterator<Item = WireValue>,
    ) -> Self {
        self.apply(
            UpdateOperator::AddToSet,
            field,
            UpdateValue::Each(values.into_iter().collect()),
        )
    }

    pub fn pull(self, field: impl Into<CompactString>, value: impl Into<WireValue>) -> Self {
        self.apply(UpdateOperator::Pull, field, UpdateValue::Single(value.into()))
    }

    pub fn pull_all(
        self,
        field: impl Into<CompactString>,
        values: impl IntoIterator<Item = WireValue>,
    ) -> Self {
        self.apply(
            UpdateOperator::PullAll,
            field,
            UpdateValue::Each(values.into_iter().collect()),
        )
    }

    pub fn pop_first(self, field: impl Into<CompactString>) -> Self {
        self.apply(
            UpdateOperator::Pop,
            field,
            UpdateValue::Single(WireValue::Int32(-1)),
        )
    }

    pub fn pop_last(self, field: impl Into<CompactString>) -> Self {
        self.apply(
            UpdateOperator::Pop,
            field,
            UpdateValue::Single(WireValue::Int32(1)),
        )
    }

    pub fn rename(self, from: impl Into<CompactString>, to: impl Into<WireValue>) -> Self {
        self.apply(UpdateOperator::Rename, from, UpdateValue::Single(to.into()))
    }

    pub fn bit_and(self, field: impl Into<CompactString>, operand: i64) -> Self {
        self.bit(field, "and", operand)
    }

    pub fn bit_or(self, field: impl Into<CompactString>, operand: i64) -> Self {
        self.bit(field, "or", operand)
    }

    pub fn bit_xor(self, field: impl Into<CompactString>, operand: i64) -> Self {
        self.bit(field, "xor", operand)
    }

    fn bit(self, field: impl Into<CompactString>, operation: &str, operand: i64) -> Self {
        let mut doc = IndexMap::new();
        doc.insert(CompactString::from(operation), WireValue::Int64(operand));
        self.apply(
            UpdateOperator::Bit,
            field,
            UpdateValue::Single(WireValue::Document(doc)),
        )
    }
}

/// 将更新文档序列化到任意写入目标
pub fn serialize_update(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    update: &UpdateDocument,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    sink.write_start_document()?;
    for (operator, fields) in update.groups() {
        sink.write_field_name(operator.as_str())?;
        sink.write_start_document()?;
        for (field, value) in fields {
            sink.write_field_name(field)?;
            write_operator_value(config, root, *operator, field, value, sink)?;
        }
        sink.write_end_document()?;
    }
    sink.write_end_document()?;
    Ok(())
}

/// 序列化更新文档为内存值
pub fn update_to_value(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    update: &UpdateDocument,
) -> MapperResult<WireValue> {
    let mut builder = TreeBuilder::new();
    serialize_update(config, root, update, &mut builder)?;
    Ok(builder.finish()?)
}

/// 序列化更新文档为 KOB 字节
pub fn update_to_vec(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    update: &UpdateDocument,
) -> MapperResult<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    serialize_update(config, root, update, &mut writer)?;
    Ok(writer.into_bytes()?)
}

fn write_operator_value(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    operator: UpdateOperator,
    field: &str,
    value: &UpdateValue,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    match value {
        UpdateValue::Single(single) => {
            if operator.positional_literal() {
                sink.write_value(single)?;
                return Ok(());
            }
            let resolution =
                resolve_for_field(root, field, operator.targets_collection_element())?;
            let encoded = config.encode_leaf(&resolution, single)?;
            sink.write_value(&encoded)?;
            Ok(())
        }
        UpdateValue::Each(items) => {
            if !operator.supports_multi() {
                return Err(MapperError::Contract(format!(
                    "{} has no multi-value form",
                    operator
                )));
            }
            let resolution = resolve_for_field(root, field, true)?;
            if operator.wraps_each() {
                sink.write_start_document()?;
                sink.write_field_name(ops::EACH)?;
            }
            sink.write_start_array()?;
            for item in items {
                let encoded = config.encode_leaf(&resolution, item)?;
                sink.write_value(&encoded)?;
            }
            sink.write_end_array()?;
            if operator.wraps_each() {
                sink.write_end_document()?;
            }
            Ok(())
        }
    }
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
                    ("tags", Shape::array(Shape::String)),
                ],
            ))
            .build()
    }

    #[test]
    fn test_set_goes_through_field_serializer() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new().set("age", 30i64);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(value, wire!({ "$set": { "age": 30 } }));
        assert_eq!(value.get_path("$set.age"), Some(&WireValue::Int32(30)));
    }

    #[test]
    fn test_operators_group_in_insertion_order() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new()
            .set("name", "Koi")
            .inc("age", 1)
            .set("age", 4);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(
            value,
            wire!({ "$set": { "name": "Koi", "age": 4 }, "$inc": { "age": 1 } })
        );
    }

    #[test]
    fn test_add_to_set_each_wrapping() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new()
            .add_to_set_each("tags", [WireValue::from("a"), WireValue::from("b")]);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(
            value,
            wire!({ "$addToSet": { "tags": { "$each": ["a", "b"] } } })
        );
    }

    #[test]
    fn test_push_each_has_identical_shape() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new()
            .push_each("tags", [WireValue::from("a"), WireValue::from("b")]);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(value, wire!({ "$push": { "tags": { "$each": ["a", "b"] } } }));
    }

    #[test]
    fn test_set_rejects_multi_value() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new().apply(
            UpdateOperator::Set,
            "tags",
            UpdateValue::Each(vec![WireValue::from("a")]),
        );
        assert!(matches!(
            update_to_value(&config, root, &update),
            Err(MapperError::Contract(_))
        ));
    }

    #[test]
    fn test_pull_rejects_multi_value() {
        let config = config();
        let update = UpdateDocument::new().apply(
            UpdateOperator::Pull,
            "tags",
            UpdateValue::Each(vec![WireValue::from("a")]),
        );
        assert!(matches!(
            update_to_value(&config, None, &update),
            Err(MapperError::Contract(_))
        ));
    }

    #[test]
    fn test_pull_all_is_plain_array() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new()
            .pull_all("tags", [WireValue::from("a"), WireValue::from("b")]);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(value, wire!({ "$pullAll": { "tags": ["a", "b"] } }));
    }

    #[test]
    fn test_push_single_serializes_as_element() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new().push("tags", "fresh");
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(value, wire!({ "$push": { "tags": "fresh" } }));
    }

    #[test]
    fn test_positional_literals_bypass_resolution() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new()
            .unset("name")
            .rename("age", "years")
            .pop_first("tags");
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(
            value,
            wire!({
                "$unset": { "name": "" },
                "$rename": { "age": "years" },
                "$pop": { "tags": (-1) }
            })
        );
    }

    #[test]
    fn test_bit_operand_is_positional_literal() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new().bit_and("age", 15);
        let value = update_to_value(&config, root, &update).unwrap();
        assert_eq!(value, wire!({ "$bit": { "age": { "and": 15i64 } } }));
    }

    #[test]
    fn test_update_bytes_round_trip() {
        let config = config();
        let root = config.serializer("User");
        let update = UpdateDocument::new().set("age", 3i64);
        let bytes = update_to_vec(&config, root, &update).unwrap();
        let decoded = koidb_wire::decode(&bytes).unwrap();
        assert_eq!(decoded, wire!({ "$set": { "age": 3 } }));
    }
}
