use compact_str::CompactString;
use indexmap::IndexMap;
use koidb_wire::WireValue;
use serde::{Deserialize, Serialize};

/// 条件树节点
///
/// 查询构建器产出的带标签条件表示，独立于线上编码；部分文档
/// 序列化器只读消费。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionNode {
    /// 简单叶值；`wire_ready` 为真时跳过字段序列化器，原样写出
    Simple { value: WireValue, wire_ready: bool },
    /// 有序节点列表；`collection_target` 为真时按字段声明集合的
    /// 元素类型序列化每个成员（$in/$all 语义）
    Collection {
        items: Vec<ConditionNode>,
        collection_target: bool,
    },
    /// 嵌套的 字段→节点 映射
    Compound {
        fields: IndexMap<CompactString, ConditionNode>,
        collection_target: bool,
    },
}

impl ConditionNode {
    /// 需要经过字段序列化器的叶值
    pub fn value(value: impl Into<WireValue>) -> Self {
        ConditionNode::Simple {
            value: value.into(),
            wire_ready: false,
        }
    }

    /// 已是线上形式的叶值（$exists 的布尔值、$size 的计数等）
    pub fn wire_ready(value: impl Into<WireValue>) -> Self {
        ConditionNode::Simple {
            value: value.into(),
            wire_ready: true,
        }
    }

    /// 普通节点列表（逻辑算子的操作数）
    pub fn list(items: impl IntoIterator<Item = ConditionNode>) -> Self {
        ConditionNode::Collection {
            items: items.into_iter().collect(),
            collection_target: false,
        }
    }

    /// 以集合元素为目标的节点列表（$in/$all 的操作数）
    pub fn elements(items: impl IntoIterator<Item = ConditionNode>) -> Self {
        ConditionNode::Collection {
            items: items.into_iter().collect(),
            collection_target: true,
        }
    }

    /// 字段→节点 复合节点
    pub fn fields<K>(pairs: impl IntoIterator<Item = (K, ConditionNode)>) -> Self
    where
        K: Into<CompactString>,
    {
        ConditionNode::Compound {
            fields: pairs
                .into_iter()
                .map(|(key, node)| (key.into(), node))
                .collect(),
            collection_target: false,
        }
    }

    /// 设置集合目标标志（对 Simple 节点无效果）
    pub fn with_collection_target(mut self, target: bool) -> Self {
        match &mut self {
            ConditionNode::Simple { .. } => {}
            ConditionNode::Collection {
                collection_target, ..
            } => *collection_target = target,
            ConditionNode::Compound {
                collection_target, ..
            } => *collection_target = target,
        }
        self
    }

    /// 节点声明的集合目标标志
    pub fn collection_target(&self) -> bool {
        match self {
            ConditionNode::Simple { .. } => false,
            ConditionNode::Collection {
                collection_target, ..
            } => *collection_target,
            ConditionNode::Compound {
                collection_target, ..
            } => *collection_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let node = ConditionNode::value(5);
        assert!(matches!(
            node,
            ConditionNode::Simple {
                value: WireValue::Int32(5),
                wire_ready: false
            }
        ));

        let node = ConditionNode::wire_ready(true);
        assert!(matches!(
            node,
            ConditionNode::Simple {
                wire_ready: true,
                ..
            }
        ));

        let node = ConditionNode::elements([ConditionNode::value("a")]);
        assert!(node.collection_target());

        let node = ConditionNode::fields([("a", ConditionNode::value(1))]);
        assert!(!node.collection_target());
    }

    #[test]
    fn test_with_collection_target() {
        let node = ConditionNode::fields([("a", ConditionNode::value(1))])
            .with_collection_target(true);
        assert!(node.collection_target());
    }
}
