//! 映射配置模块
//!
//! 显式、不可变的配置值，传入每个编码入口，没有进程级可变默认实例。
//! 标识/日期/引用处理在构建阶段注册，构建完成后配置可跨线程只读共享。

use crate::aggregate::{self, AggExpression, PipelineStage};
use crate::condition::ConditionNode;
use crate::filter;
use crate::resolver::Resolution;
use crate::serializer::{CompiledSerializer, LeafSerializer};
use crate::shape::Shape;
use crate::update::{self, UpdateDocument};
use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_wire::WireValue;
use tracing::trace;

/// 映射配置
///
/// 构建后不可变；编译序列化器按类型名缓存，生命周期与配置一致。
#[derive(Debug)]
pub struct MapperConfig {
    types: IndexMap<CompactString, CompiledSerializer>,
}

/// 映射配置构建器
#[derive(Debug, Default)]
pub struct MapperConfigBuilder {
    types: IndexMap<CompactString, CompiledSerializer>,
}

impl MapperConfigBuilder {
    /// 注册一个结构体形状（以结构体名为键）
    pub fn register(self, shape: Shape) -> Self {
        let name = match &shape {
            Shape::Struct(s) => s.name.clone(),
            other => CompactString::from(format!("{:?}", other)),
        };
        self.register_as(name, shape)
    }

    /// 以指定名称注册形状
    pub fn register_as(mut self, name: impl Into<CompactString>, shape: Shape) -> Self {
        self.types
            .insert(name.into(), CompiledSerializer::compile(&shape));
        self
    }

    pub fn build(self) -> MapperConfig {
        MapperConfig { types: self.types }
    }
}

impl MapperConfig {
    pub fn builder() -> MapperConfigBuilder {
        MapperConfigBuilder::default()
    }

    /// 查找已注册类型的整对象序列化器
    pub fn serializer(&self, type_name: &str) -> Option<&CompiledSerializer> {
        self.types.get(type_name)
    }

    /// 查找已注册类型，未注册时报错
    pub fn require_serializer(&self, type_name: &str) -> MapperResult<&CompiledSerializer> {
        self.serializer(type_name)
            .ok_or_else(|| MapperError::UnknownType(type_name.to_string()))
    }

    /// 按运行时值类型推导序列化器（回退路径）
    ///
    /// # Brief
    /// 文档按动态映射、数组按动态集合、标量按对应叶处理；遗留的
    /// 仅解码类型（undefined、db-pointer）返回 None
    pub fn serializer_for_value(&self, value: &WireValue) -> Option<CompiledSerializer> {
        match value {
            WireValue::Document(_) => {
                Some(CompiledSerializer::compile(&Shape::map(Shape::Dynamic)))
            }
            WireValue::Array(_) => {
                Some(CompiledSerializer::compile(&Shape::array(Shape::Dynamic)))
            }
            scalar => LeafSerializer::for_value(scalar).map(CompiledSerializer::leaf),
        }
    }

    /// 用解析结果编码一个叶值，必要时按运行时类型回退
    pub(crate) fn encode_leaf(
        &self,
        resolution: &Resolution,
        value: &WireValue,
    ) -> MapperResult<WireValue> {
        if let Some(serializer) = resolution.serializer_ref() {
            return serializer.encode_value(&resolution.path, value);
        }
        match self.serializer_for_value(value) {
            Some(serializer) => {
                trace!(path = %resolution.path, value_type = value.type_name(),
                    "serializing by runtime value type");
                serializer.encode_value(&resolution.path, value)
            }
            None => Err(MapperError::UnresolvedPath {
                path: resolution.path.to_string(),
                segment: resolution
                    .failed_segment
                    .as_deref()
                    .unwrap_or_else(|| last_segment(&resolution.path))
                    .to_string(),
            }),
        }
    }

    /// 序列化查询过滤器为内存值
    pub fn filter_to_value(
        &self,
        root: Option<&CompiledSerializer>,
        filter: &ConditionNode,
    ) -> MapperResult<WireValue> {
        filter::filter_to_value(self, root, filter)
    }

    /// 序列化查询过滤器为 KOB 字节
    pub fn filter_to_vec(
        &self,
        root: Option<&CompiledSerializer>,
        filter: &ConditionNode,
    ) -> MapperResult<Vec<u8>> {
        filter::filter_to_vec(self, root, filter)
    }

    /// 序列化更新文档为内存值
    pub fn update_to_value(
        &self,
        root: Option<&CompiledSerializer>,
        update: &UpdateDocument,
    ) -> MapperResult<WireValue> {
        update::update_to_value(self, root, update)
    }

    /// 序列化更新文档为 KOB 字节
    pub fn update_to_vec(
        &self,
        root: Option<&CompiledSerializer>,
        update: &UpdateDocument,
    ) -> MapperResult<Vec<u8>> {
        update::update_to_vec(self, root, update)
    }

    /// 序列化聚合管道为内存值（阶段文档数组）
    pub fn pipeline_to_value(
        &self,
        root: Option<&CompiledSerializer>,
        stages: &[PipelineStage],
    ) -> MapperResult<WireValue> {
        aggregate::pipeline_to_value(self, root, stages)
    }

    /// 序列化单个聚合表达式为内存值
    pub fn expression_to_value(&self, expression: &AggExpression) -> MapperResult<WireValue> {
        aggregate::expression_to_value(expression)
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let config = MapperConfig::builder()
            .register(Shape::struct_of("User", [("name", Shape::String)]))
            .build();
        assert!(config.serializer("User").is_some());
        assert!(config.serializer("Ghost").is_none());
        assert!(matches!(
            config.require_serializer("Ghost"),
            Err(MapperError::UnknownType(_))
        ));
    }

    #[test]
    fn test_register_as_custom_name() {
        let config = MapperConfig::builder()
            .register_as("ids", Shape::Identifier)
            .build();
        assert!(config.serializer("ids").is_some());
    }

    #[test]
    fn test_fallback_by_value_kind() {
        let config = MapperConfig::builder().build();
        assert!(config
            .serializer_for_value(&WireValue::Int32(1))
            .is_some());
        assert!(config
            .serializer_for_value(&koidb_wire::wire!({ "a": 1 }))
            .is_some());
        assert!(config.serializer_for_value(&WireValue::Undefined).is_none());
    }

    #[test]
    fn test_config_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MapperConfig>();
        assert_send_sync::<CompiledSerializer>();
    }
}
