//! SDK 统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// SDK 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum SdkError {
    /// 带错误代码的错误
    #[error("[{}] {reason}", .code.as_str())]
    Coded {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误）
    #[error("system error: {0}")]
    System(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(String),
}

impl SdkError {
    /// 创建带错误代码的错误
    pub fn coded(code: ErrorCode, reason: impl Into<String>) -> Self {
        SdkError::Coded {
            code,
            reason: reason.into(),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        SdkError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        SdkError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：连接相关错误
    // ============================================================

    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionFailed, reason)
    }

    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionClosed, reason)
    }

    /// Broker 未配置（客户端没有可用的传输层）
    pub fn broker_disabled() -> Self {
        Self::coded(ErrorCode::BrokerDisabled, "Broker is not connected")
    }

    // ============================================================
    // 便捷方法：认证 / 协议 / 消息
    // ============================================================

    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::AuthenticationFailed, reason)
    }

    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ProtocolError, reason)
    }

    pub fn invalid_timestamp(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidTimestamp, reason)
    }

    pub fn message_send_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::MessageSendFailed, reason)
    }

    /// 消息已经 ack / redeliver 过
    pub fn already_settled(message_id: &str) -> Self {
        Self::coded(
            ErrorCode::MessageAlreadySettled,
            format!("message {message_id} already acknowledged or redelivered"),
        )
    }

    // ============================================================
    // 便捷方法：任务调度
    // ============================================================

    pub fn already_started(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::AlreadyStarted, reason)
    }

    pub fn queue_full(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::QueueFull, reason)
    }

    pub fn queue_closed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::QueueClosed, reason)
    }

    // ============================================================
    // 便捷方法：配置 / 通用
    // ============================================================

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConfigurationError, reason)
    }

    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidParameter, reason)
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::OperationTimeout, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SdkError::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            SdkError::Coded { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// 是否为指定错误代码
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SdkError::Coded { code, .. } => code.is_retryable(),
            SdkError::Io(_) => true,
            SdkError::System(_) => false,
        }
    }
}

/// SDK 结果类型
pub type Result<T> = std::result::Result<T, SdkError>;
