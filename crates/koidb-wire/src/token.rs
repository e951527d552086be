//! 结构令牌定义模块
//!
//! 定义流式对象序列化模型的令牌单元。二进制读取器与内存树遍历器
//! 产出同一套令牌，消费者无需关心值的来源。

use crate::value::WireValue;
use compact_str::CompactString;

/// 结构令牌事件
///
/// # 不变量
///
/// - StartDocument/StartArray 总是与对应的 End* 配对
/// - FieldName 只出现在文档上下文中，且紧跟一个产值事件或嵌套 Start*
/// - 数组上下文中不出现 FieldName
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    /// 进入文档
    StartDocument,
    /// 离开文档
    EndDocument,
    /// 进入数组
    StartArray,
    /// 离开数组
    EndArray,
    /// 字段名（仅文档上下文）
    FieldName(CompactString),
    /// 标量值
    Scalar(WireValue),
}

/// 容器种类
///
/// 游标栈帧记录当前所在容器的种类；Root 是没有父帧的终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Root,
    Document,
    Array,
}
