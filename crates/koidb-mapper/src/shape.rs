use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 声明形状描述
///
/// 对象映射注册时的类型描述，编译为 CompiledSerializer 后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Bool,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    Binary,
    ObjectId,
    /// 标识字段：接受十六进制字符串并透明处理标量/集合两种形态
    Identifier,
    DateTime,
    Timestamp,
    Regex,
    /// 未声明类型：值按自身的运行时类型直通
    Dynamic,
    Array(Box<Shape>),
    Map(Box<Shape>),
    Struct(StructShape),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructShape {
    pub name: CompactString,
    pub fields: IndexMap<CompactString, Shape>,
}

impl Shape {
    pub fn array(element: Shape) -> Self {
        Shape::Array(Box::new(element))
    }

    pub fn map(value: Shape) -> Self {
        Shape::Map(Box::new(value))
    }

    pub fn struct_of<N, K, I>(name: N, fields: I) -> Self
    where
        N: Into<CompactString>,
        K: Into<CompactString>,
        I: IntoIterator<Item = (K, Shape)>,
    {
        Shape::Struct(StructShape {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(key, shape)| (key.into(), shape))
                .collect(),
        })
    }
}
