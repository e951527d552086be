//! 算子词表模块
//!
//! 与目标存储文档化的算子集合保持一致；等值匹配没有算子键。

pub const COMPARISON_OPERATORS: [&str; 5] = ["$gt", "$gte", "$lt", "$lte", "$ne"];
pub const MEMBERSHIP_OPERATORS: [&str; 3] = ["$in", "$nin", "$all"];
pub const EXISTENCE_OPERATORS: [&str; 1] = ["$exists"];
pub const LOGICAL_OPERATORS: [&str; 3] = ["$or", "$and", "$nor"];

/// 多值更新包装键（$push/$addToSet 的多值形式）
pub const EACH: &str = "$each";

/// 聚合字面量包装键
pub const LITERAL: &str = "$literal";

pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$')
}

pub fn is_logical_operator(key: &str) -> bool {
    LOGICAL_OPERATORS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_classification() {
        assert!(is_operator_key("$gt"));
        assert!(!is_operator_key("age"));
        assert!(is_logical_operator("$or"));
        assert!(!is_logical_operator("$gt"));
    }
}
