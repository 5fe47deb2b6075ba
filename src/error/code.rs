//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// SDK 错误代码
///
/// 按类别分组，每个类别占用 1000 个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 认证相关错误
/// - 3000-3999: 协议相关错误
/// - 4000-4999: 消息相关错误
/// - 5000-5999: 任务调度相关错误
/// - 6000-6999: 系统 / 配置相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,
    BrokerDisabled = 1003,

    // ============================================================
    // 认证相关错误 (2000-2999)
    // ============================================================
    AuthenticationFailed = 2000,
    PermissionDenied = 2001,
    TokenInvalid = 2002,

    // ============================================================
    // 协议相关错误 (3000-3999)
    // ============================================================
    ProtocolError = 3000,
    InvalidTimestamp = 3001,

    // ============================================================
    // 消息相关错误 (4000-4999)
    // ============================================================
    MessageSendFailed = 4000,
    MessageAlreadySettled = 4001,
    PublishFailed = 4002,

    // ============================================================
    // 任务调度相关错误 (5000-5999)
    // ============================================================
    AlreadyStarted = 5000,
    NotStarted = 5001,
    QueueFull = 5002,
    QueueClosed = 5003,

    // ============================================================
    // 系统 / 配置相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ServiceUnavailable = 6001,
    ResourceExhausted = 6002,
    ConfigurationError = 6003,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    OperationTimeout = 9004,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        let code = match code {
            1000 => ErrorCode::ConnectionFailed,
            1001 => ErrorCode::ConnectionTimeout,
            1002 => ErrorCode::ConnectionClosed,
            1003 => ErrorCode::BrokerDisabled,
            2000 => ErrorCode::AuthenticationFailed,
            2001 => ErrorCode::PermissionDenied,
            2002 => ErrorCode::TokenInvalid,
            3000 => ErrorCode::ProtocolError,
            3001 => ErrorCode::InvalidTimestamp,
            4000 => ErrorCode::MessageSendFailed,
            4001 => ErrorCode::MessageAlreadySettled,
            4002 => ErrorCode::PublishFailed,
            5000 => ErrorCode::AlreadyStarted,
            5001 => ErrorCode::NotStarted,
            5002 => ErrorCode::QueueFull,
            5003 => ErrorCode::QueueClosed,
            6000 => ErrorCode::InternalError,
            6001 => ErrorCode::ServiceUnavailable,
            6002 => ErrorCode::ResourceExhausted,
            6003 => ErrorCode::ConfigurationError,
            9000 => ErrorCode::GeneralError,
            9001 => ErrorCode::InvalidParameter,
            9004 => ErrorCode::OperationTimeout,
            9999 => ErrorCode::UnknownError,
            _ => return None,
        };
        Some(code)
    }

    /// 获取错误代码的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::BrokerDisabled => "BROKER_DISABLED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::TokenInvalid => "TOKEN_INVALID",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InvalidTimestamp => "INVALID_TIMESTAMP",
            ErrorCode::MessageSendFailed => "MESSAGE_SEND_FAILED",
            ErrorCode::MessageAlreadySettled => "MESSAGE_ALREADY_SETTLED",
            ErrorCode::PublishFailed => "PUBLISH_FAILED",
            ErrorCode::AlreadyStarted => "ALREADY_STARTED",
            ErrorCode::NotStarted => "NOT_STARTED",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::QueueClosed => "QUEUE_CLOSED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Authentication,
            3000..=3999 => ErrorCategory::Protocol,
            4000..=4999 => ErrorCategory::Message,
            5000..=5999 => ErrorCategory::Scheduling,
            6000..=6999 => ErrorCategory::System,
            _ => ErrorCategory::General,
        }
    }

    /// 是否为可重试的瞬时错误
    ///
    /// SDK 内部从不自动重试，调用方据此决定自己的重试策略。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::ServiceUnavailable
                | ErrorCode::ResourceExhausted
                | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Connection,
    Authentication,
    Protocol,
    Message,
    Scheduling,
    System,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Message => "message",
            ErrorCategory::Scheduling => "scheduling",
            ErrorCategory::System => "system",
            ErrorCategory::General => "general",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_u32() {
        for code in [
            ErrorCode::BrokerDisabled,
            ErrorCode::MessageAlreadySettled,
            ErrorCode::QueueFull,
            ErrorCode::ConfigurationError,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(4242), None);
    }

    #[test]
    fn categories_follow_ranges() {
        assert_eq!(ErrorCode::BrokerDisabled.category(), ErrorCategory::Connection);
        assert_eq!(ErrorCode::InvalidTimestamp.category(), ErrorCategory::Protocol);
        assert_eq!(ErrorCode::AlreadyStarted.category(), ErrorCategory::Scheduling);
        assert_eq!(ErrorCode::InvalidParameter.category(), ErrorCategory::General);
    }

    #[test]
    fn broker_disabled_is_not_retryable() {
        assert!(!ErrorCode::BrokerDisabled.is_retryable());
        assert!(ErrorCode::ConnectionClosed.is_retryable());
    }
}
