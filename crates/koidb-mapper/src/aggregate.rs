//! 聚合表达式与管道序列化模块
//!
//! 封闭的表达式文法：字段路径引用（序列化为 `$` 前缀字符串）、
//! 字面量（包在 `$literal` 键下以消除与算子文档的歧义）、有序
//! 表达式对象、算子表达式（算子名→操作数列表）。聚合表达式不
//! 绑定单一声明形状，纯结构序列化，无需字段序列化器解析；
//! `$match` 阶段例外：它携带条件树，委托给过滤器序列化。

use crate::condition::ConditionNode;
use crate::config::MapperConfig;
use crate::filter;
use crate::ops;
use crate::serializer::CompiledSerializer;
use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_wire::{DocumentSink, TreeBuilder, WireValue};
use serde::{Deserialize, Serialize};

/// 聚合表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggExpression {
    /// 字段路径引用：序列化为 `"$path"` 字符串
    FieldPath(CompactString),
    /// 字面量：包在 `$literal` 下
    Literal(WireValue),
    /// 有序 键→表达式 对象
    Document(IndexMap<CompactString, AggExpression>),
    /// 算子表达式：`{"$op": [operands...]}`
    Operator {
        name: CompactString,
        operands: Vec<AggExpression>,
    },
}

impl AggExpression {
    pub fn field(path: impl Into<CompactString>) -> Self {
        AggExpression::FieldPath(path.into())
    }

    pub fn literal(value: impl Into<WireValue>) -> Self {
        AggExpression::Literal(value.into())
    }

    pub fn operator(
        name: impl Into<CompactString>,
        operands: impl IntoIterator<Item = AggExpression>,
    ) -> Self {
        AggExpression::Operator {
            name: name.into(),
            operands: operands.into_iter().collect(),
        }
    }

    pub fn document<K>(pairs: impl IntoIterator<Item = (K, AggExpression)>) -> Self
    where
        K: Into<CompactString>,
    {
        AggExpression::Document(
            pairs
                .into_iter()
                .map(|(key, expr)| (key.into(), expr))
                .collect(),
        )
    }
}

/// 聚合管道阶段（闭集）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStage {
    Match(ConditionNode),
    Project(IndexMap<CompactString, AggExpression>),
    Group {
        id: AggExpression,
        fields: IndexMap<CompactString, AggExpression>,
    },
    Sort(IndexMap<CompactString, i32>),
    Limit(i64),
    Skip(i64),
    Unwind(CompactString),
    Out(CompactString),
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Match(_) => "$match",
            PipelineStage::Project(_) => "$project",
            PipelineStage::Group { .. } => "$group",
            PipelineStage::Sort(_) => "$sort",
            PipelineStage::Limit(_) => "$limit",
            PipelineStage::Skip(_) => "$skip",
            PipelineStage::Unwind(_) => "$unwind",
            PipelineStage::Out(_) => "$out",
        }
    }

    pub fn project<K>(pairs: impl IntoIterator<Item = (K, AggExpression)>) -> Self
    where
        K: Into<CompactString>,
    {
        PipelineStage::Project(
            pairs
                .into_iter()
                .map(|(key, expr)| (key.into(), expr))
                .collect(),
        )
    }

    pub fn group<K>(
        id: AggExpression,
        fields: impl IntoIterator<Item = (K, AggExpression)>,
    ) -> Self
    where
        K: Into<CompactString>,
    {
        PipelineStage::Group {
            id,
            fields: fields
                .into_iter()
                .map(|(key, expr)| (key.into(), expr))
                .collect(),
        }
    }

    pub fn sort<K>(pairs: impl IntoIterator<Item = (K, i32)>) -> Self
    where
        K: Into<CompactString>,
    {
        PipelineStage::Sort(pairs.into_iter().map(|(key, dir)| (key.into(), dir)).collect())
    }
}

/// 将聚合表达式序列化到任意写入目标
pub fn serialize_expression(
    expression: &AggExpression,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    match expression {
        AggExpression::FieldPath(path) => {
            let reference = WireValue::String(CompactString::from(format!("${}", path)));
            sink.write_value(&reference)?;
            Ok(())
        }
        AggExpression::Literal(value) => {
            sink.write_start_document()?;
            sink.write_field_name(ops::LITERAL)?;
            sink.write_value(value)?;
            sink.write_end_document()?;
            Ok(())
        }
        AggExpression::Document(fields) => {
            sink.write_start_document()?;
            for (key, expr) in fields {
                sink.write_field_name(key)?;
                serialize_expression(expr, sink)?;
            }
            sink.write_end_document()?;
            Ok(())
        }
        AggExpression::Operator { name, operands } => {
            if !ops::is_operator_key(name) {
                return Err(MapperError::InvalidOperator(format!(
                    "Aggregation operator must start with '$': {}",
                    name
                )));
            }
            sink.write_start_document()?;
            sink.write_field_name(name)?;
            sink.write_start_array()?;
            for operand in operands {
                serialize_expression(operand, sink)?;
            }
            sink.write_end_array()?;
            sink.write_end_document()?;
            Ok(())
        }
    }
}

/// 序列化单个聚合表达式为内存值
pub fn expression_to_value(expression: &AggExpression) -> MapperResult<WireValue> {
    let mut builder = TreeBuilder::new();
    serialize_expression(expression, &mut builder)?;
    Ok(builder.finish()?)
}

/// 将一个管道阶段序列化到任意写入目标
pub fn serialize_stage(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    stage: &PipelineStage,
    sink: &mut dyn DocumentSink,
) -> MapperResult<()> {
    sink.write_start_document()?;
    sink.write_field_name(stage.name())?;
    match stage {
        PipelineStage::Match(condition) => {
            filter::serialize_filter(config, root, condition, sink)?;
        }
        PipelineStage::Project(fields) => {
            sink.write_start_document()?;
            for (key, expr) in fields {
                sink.write_field_name(key)?;
                serialize_expression(expr, sink)?;
            }
            sink.write_end_document()?;
        }
        PipelineStage::Group { id, fields } => {
            sink.write_start_document()?;
            sink.write_field_name("_id")?;
            serialize_expression(id, sink)?;
            for (key, expr) in fields {
                sink.write_field_name(key)?;
                serialize_expression(expr, sink)?;
            }
            sink.write_end_document()?;
        }
        PipelineStage::Sort(fields) => {
            sink.write_start_document()?;
            for (key, direction) in fields {
                sink.write_field_name(key)?;
                sink.write_scalar(&WireValue::Int32(*direction))?;
            }
            sink.write_end_document()?;
        }
        PipelineStage::Limit(count) => {
            sink.write_scalar(&WireValue::Int64(*count))?;
        }
        PipelineStage::Skip(count) => {
            sink.write_scalar(&WireValue::Int64(*count))?;
        }
        PipelineStage::Unwind(path) => {
            let reference = WireValue::String(CompactString::from(format!("${}", path)));
            sink.write_scalar(&reference)?;
        }
        PipelineStage::Out(collection) => {
            sink.write_scalar(&WireValue::String(collection.clone()))?;
        }
    }
    sink.write_end_document()?;
    Ok(())
}

/// 序列化整个管道为阶段文档数组
pub fn pipeline_to_value(
    config: &MapperConfig,
    root: Option<&CompiledSerializer>,
    stages: &[PipelineStage],
) -> MapperResult<WireValue> {
    let mut builder = TreeBuilder::new();
    builder.write_start_array()?;
    for stage in stages {
        serialize_stage(config, root, stage, &mut builder)?;
    }
    builder.write_end_array()?;
    Ok(builder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use koidb_wire::wire;

    fn config() -> MapperConfig {
        MapperConfig::builder()
            .register(Shape::struct_of(
                "Order",
                [("status", Shape::String), ("amount", Shape::Int64)],
            ))
            .build()
    }

    #[test]
    fn test_field_path_serializes_with_dollar_prefix() {
        let expr = AggExpression::field("amount");
        assert_eq!(
            expression_to_value(&expr).unwrap(),
            WireValue::String("$amount".into())
        );
    }

    #[test]
    fn test_literal_is_wrapped() {
        let expr = AggExpression::literal("$amount");
        assert_eq!(
            expression_to_value(&expr).unwrap(),
            wire!({ "$literal": "$amount" })
        );
    }

    #[test]
    fn test_operator_expression() {
        let expr = AggExpression::operator(
            "$add",
            [AggExpression::field("amount"), AggExpression::literal(5)],
        );
        assert_eq!(
            expression_to_value(&expr).unwrap(),
            wire!({ "$add": ["$amount", { "$literal": 5 }] })
        );
    }

    #[test]
    fn test_unprefixed_operator_rejected() {
        let expr = AggExpression::operator("add", [AggExpression::literal(1)]);
        assert!(matches!(
            expression_to_value(&expr),
            Err(MapperError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_match_stage_uses_typed_filter_serialization() {
        let config = config();
        let root = config.serializer("Order");
        let stages = [PipelineStage::Match(ConditionNode::fields([(
            "amount",
            ConditionNode::fields([("$gt", ConditionNode::value(100))]),
        )]))];
        let value = pipeline_to_value(&config, root, &stages).unwrap();
        // amount 声明为 Int64：$match 经过字段序列化器矫正
        assert_eq!(
            value,
            wire!([{ "$match": { "amount": { "$gt": 100i64 } } }])
        );
    }

    #[test]
    fn test_full_pipeline_shape() {
        let config = config();
        let root = config.serializer("Order");
        let stages = [
            PipelineStage::Match(ConditionNode::fields([(
                "status",
                ConditionNode::value("paid"),
            )])),
            PipelineStage::group(
                AggExpression::field("status"),
                [(
                    "total",
                    AggExpression::operator("$sum", [AggExpression::field("amount")]),
                )],
            ),
            PipelineStage::sort([("total", -1)]),
            PipelineStage::Limit(10),
            PipelineStage::Skip(5),
            PipelineStage::Unwind("tags".into()),
            PipelineStage::Out("report".into()),
        ];
        let value = pipeline_to_value(&config, root, &stages).unwrap();
        assert_eq!(
            value,
            wire!([
                { "$match": { "status": "paid" } },
                { "$group": { "_id": "$status", "total": { "$sum": ["$amount"] } } },
                { "$sort": { "total": (-1) } },
                { "$limit": 10i64 },
                { "$skip": 5i64 },
                { "$unwind": "$tags" },
                { "$out": "report" }
            ])
        );
    }

    #[test]
    fn test_project_stage() {
        let config = config();
        let stages = [PipelineStage::project([
            ("status", AggExpression::literal(1)),
            ("total", AggExpression::field("amount")),
        ])];
        let value = pipeline_to_value(&config, None, &stages).unwrap();
        assert_eq!(
            value,
            wire!([{ "$project": { "status": { "$literal": 1 }, "total": "$amount" } }])
        );
    }
}
