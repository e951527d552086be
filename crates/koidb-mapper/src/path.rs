//! 字段路径模块
//!
//! 点分字符串标识声明形状内的（可能嵌套、可能带数组索引的）叶位置。
//! 段类型：属性名、十进制数组索引、通配符 `$`（定位数组元素的遗留
//! 位置算子）。空段非法。

use crate::{MapperError, MapperResult};
use compact_str::CompactString;
use std::fmt;

/// 路径段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// 属性名
    Property(CompactString),
    /// 十进制数组索引
    Index(usize),
    /// 通配符 `$`
    Wildcard,
}

/// 已解析的字段路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: CompactString,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// 解析点分字段路径
    ///
    /// # Brief
    /// 按 `.` 切分；全数字段解析为索引，`$` 段解析为通配符
    ///
    /// # Arguments
    /// * `path` - 点分路径，如 "addr.zip" 或 "tags.0"
    ///
    /// # Returns
    /// 成功返回 FieldPath, 空路径或空段返回错误
    pub fn parse(path: &str) -> MapperResult<Self> {
        if path.is_empty() {
            return Err(MapperError::InvalidPath(
                "Field path cannot be empty".to_string(),
            ));
        }
        let mut segments = Vec::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(MapperError::InvalidPath(format!(
                    "Empty segment in path '{}'",
                    path
                )));
            }
            let segment = if part == "$" {
                PathSegment::Wildcard
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                match part.parse::<usize>() {
                    Ok(index) => PathSegment::Index(index),
                    Err(_) => {
                        return Err(MapperError::InvalidPath(format!(
                            "Index segment out of range in path '{}'",
                            path
                        )))
                    }
                }
            } else {
                PathSegment::Property(CompactString::from(part))
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: CompactString::from(path),
            segments,
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 路径的最后一段（用于错误报告）
    pub fn last_segment_text(&self) -> &str {
        self.raw.rsplit('.').next().unwrap_or(&self.raw)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
