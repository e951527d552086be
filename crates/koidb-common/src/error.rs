//! 错误类型定义模块
//!
//! 定义 koidb-common 的错误类型 CommonError 和 Result 别名。

use thiserror::Error;

/// 公共类型错误
///
/// 包含共享类型解析过程中可能出现的错误情况。
#[derive(Error, Debug)]
pub enum CommonError {
    /// ObjectId 格式无效
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(String),
}

/// 公共类型 Result 别名
pub type CommonResult<T> = Result<T, CommonError>;
