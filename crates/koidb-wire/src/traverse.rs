//! 内存树遍历器模块
//!
//! 将已物化的 WireValue 树呈现为与二进制读取器完全相同的令牌序列，
//! 使消费者无需关心值来自字节流还是内存树。
//!
//! - 空容器直接短路到对应的 End* 令牌，不构造子游标
//! - 裸标量根值在内部合成单字段包装文档（字段名 `value`），使标量
//!   顶层值复用基于容器令牌的消费路径

use crate::sink::TokenSource;
use crate::token::{ContainerKind, TokenEvent};
use crate::value::WireValue;
use crate::WireResult;
use compact_str::CompactString;
use indexmap::IndexMap;

/// 裸标量根值的包装字段名
pub const SCALAR_WRAPPER_FIELD: &str = "value";

enum TraverseFrame<'a> {
    Document(indexmap::map::Iter<'a, CompactString, WireValue>),
    Array(std::slice::Iter<'a, WireValue>),
}

#[derive(Clone, Copy)]
enum Step<'a> {
    Start(&'a WireValue),
    WrapName(&'a WireValue),
    WrapValue(&'a WireValue),
    WrapEnd,
    Walk,
    Done,
}

/// 内存树遍历器
///
/// 持有游标栈的可变状态，单个实例在一次遍历期间被独占使用。
pub struct TreeTraverser<'a> {
    step: Step<'a>,
    frames: Vec<TraverseFrame<'a>>,
    pending_value: Option<&'a WireValue>,
    pending_end: Option<ContainerKind>,
}

impl<'a> TreeTraverser<'a> {
    pub fn new(value: &'a WireValue) -> Self {
        Self {
            step: Step::Start(value),
            frames: Vec::new(),
            pending_value: None,
            pending_end: None,
        }
    }

    /// 产出下一个结构令牌
    ///
    /// # Brief
    /// 与 `BinaryReader::next` 相同的表面：树耗尽后返回 `Ok(None)`
    pub fn next(&mut self) -> WireResult<Option<TokenEvent>> {
        match self.step {
            Step::Done => Ok(None),
            Step::Start(value) => {
                if value.is_scalar() {
                    self.step = Step::WrapName(value);
                    Ok(Some(TokenEvent::StartDocument))
                } else {
                    self.step = Step::Walk;
                    Ok(Some(self.enter(value)))
                }
            }
            Step::WrapName(value) => {
                self.step = Step::WrapValue(value);
                Ok(Some(TokenEvent::FieldName(CompactString::from(
                    SCALAR_WRAPPER_FIELD,
                ))))
            }
            Step::WrapValue(value) => {
                self.step = Step::WrapEnd;
                Ok(Some(TokenEvent::Scalar(value.clone())))
            }
            Step::WrapEnd => {
                self.step = Step::Done;
                Ok(Some(TokenEvent::EndDocument))
            }
            Step::Walk => Ok(self.walk()),
        }
    }

    fn walk(&mut self) -> Option<TokenEvent> {
        if let Some(kind) = self.pending_end.take() {
            return Some(self.emit_end(kind));
        }
        if let Some(value) = self.pending_value.take() {
            if value.is_scalar() {
                return Some(TokenEvent::Scalar(value.clone()));
            }
            return Some(self.enter(value));
        }
        match self.frames.last_mut() {
            None => {
                self.step = Step::Done;
                None
            }
            Some(TraverseFrame::Document(iter)) => match iter.next() {
                Some((key, value)) => {
                    self.pending_value = Some(value);
                    Some(TokenEvent::FieldName(key.clone()))
                }
                None => {
                    self.frames.pop();
                    Some(self.emit_end(ContainerKind::Document))
                }
            },
            Some(TraverseFrame::Array(iter)) => match iter.next() {
                Some(value) if value.is_scalar() => Some(TokenEvent::Scalar(value.clone())),
                Some(value) => Some(self.enter(value)),
                None => {
                    self.frames.pop();
                    Some(self.emit_end(ContainerKind::Array))
                }
            },
        }
    }

    /// 进入容器：空容器不压栈，直接挂起对应的 End* 令牌
    fn enter(&mut self, value: &'a WireValue) -> TokenEvent {
        match value {
            WireValue::Document(doc) => {
                if doc.is_empty() {
                    self.pending_end = Some(ContainerKind::Document);
                } else {
                    self.frames.push(TraverseFrame::Document(doc.iter()));
                }
                TokenEvent::StartDocument
            }
            WireValue::Array(items) => {
                if items.is_empty() {
                    self.pending_end = Some(ContainerKind::Array);
                } else {
                    self.frames.push(TraverseFrame::Array(items.iter()));
                }
                TokenEvent::StartArray
            }
            _ => TokenEvent::Scalar(value.clone()),
        }
    }

    fn emit_end(&mut self, kind: ContainerKind) -> TokenEvent {
        if self.frames.is_empty() {
            self.step = Step::Done;
        }
        match kind {
            ContainerKind::Array => TokenEvent::EndArray,
            ContainerKind::Document | ContainerKind::Root => TokenEvent::EndDocument,
        }
    }
}

impl<'a> TokenSource for TreeTraverser<'a> {
    fn next_event(&mut self) -> WireResult<Option<TokenEvent>> {
        self.next()
    }
}
