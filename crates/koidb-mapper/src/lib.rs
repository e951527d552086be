//! # koidb-mapper - 部分文档序列化
//!
//! 让通用对象映射使用与整文档编码相同的逐字段序列化器来序列化
//! *部分* 文档：查询过滤器、更新算子和聚合表达式。
//!
//! 核心是序列化器路径解析：给定某个声明形状的编译序列化器和一条
//! 点分字段路径（可含数组索引和通配符），沿结构体/映射/集合序列化器
//! 下钻，找到负责该子路径的叶序列化器。声明形状无法静态匹配路径时
//! （原始映射、多态字段），按运行时值类型回退解析。回退是正确性
//! 要求，不是可选项。
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use koidb_mapper::{ConditionNode, MapperConfig, Shape};
//!
//! let config = MapperConfig::builder()
//!     .register(Shape::struct_of("User", [
//!         ("name", Shape::String),
//!         ("age", Shape::Int32),
//!     ]))
//!     .build();
//!
//! let root = config.serializer("User");
//! let filter = ConditionNode::fields([
//!     ("age", ConditionNode::fields([("$gt", ConditionNode::value(30))])),
//! ]);
//! let value = config.filter_to_value(root, &filter)?;
//! ```

pub mod aggregate;
pub mod condition;
pub mod config;
pub mod filter;
pub mod ops;
pub mod path;
pub mod resolver;
pub mod serializer;
pub mod shape;
pub mod update;

pub use aggregate::{AggExpression, PipelineStage};
pub use condition::ConditionNode;
pub use config::{MapperConfig, MapperConfigBuilder};
pub use path::{FieldPath, PathSegment};
pub use resolver::{resolve, resolve_for_field, Resolution};
pub use serializer::{CompiledSerializer, LeafSerializer, SerializerNode};
pub use shape::Shape;
pub use update::{UpdateDocument, UpdateOperator, UpdateValue};

use koidb_wire::WireError;
use thiserror::Error;

/// 映射层错误类型
///
/// 映射错误（MappingError）表示声明形状无法涵盖被序列化的值、或字段
/// 路径在回退后仍无法解析，携带出错的字段路径；契约错误表示调用方
/// 编程错误，不设计为可恢复。
#[derive(Error, Debug)]
pub enum MapperError {
    /// 字段路径在声明形状和运行时回退下均无法解析
    #[error("Cannot resolve serializer for path '{path}': segment '{segment}'")]
    UnresolvedPath { path: String, segment: String },

    /// 值的运行时类型与目标序列化器不符
    #[error("Field '{field}': expected {expected}, got {actual}")]
    UnsupportedValue {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// 字段路径语法无效（空段等）
    #[error("Invalid field path: {0}")]
    InvalidPath(String),

    /// 无效或位置不当的算子
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    /// 按名称查找类型失败
    #[error("Unknown mapped type: {0}")]
    UnknownType(String),

    /// 调用方契约错误
    #[error("Caller contract violation: {0}")]
    Contract(String),

    /// 底层编解码错误
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

/// 映射层 Result 类型别名
pub type MapperResult<T> = Result<T, MapperError>;
