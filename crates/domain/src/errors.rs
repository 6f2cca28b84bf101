//! 领域模型错误定义
//!
//! 定义数据模型校验与事件负载解析中可能出现的错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 事件负载无法解析
    #[error("协议错误: 事件 {event} 的负载无效: {message}")]
    ProtocolError { event: String, message: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建协议错误
    pub fn protocol_error(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolError {
            event: event.into(),
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
