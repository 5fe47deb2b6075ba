//! 错误类型转换实现

use super::{ErrorBuilder, ErrorCode, SdkError};
use std::io;

impl From<io::Error> for SdkError {
    fn from(err: io::Error) -> Self {
        SdkError::io(err.to_string())
    }
}

impl From<toml::de::Error> for SdkError {
    fn from(err: toml::de::Error) -> Self {
        ErrorBuilder::new(ErrorCode::ConfigurationError, "invalid toml configuration")
            .details(err.to_string())
            .build()
    }
}

impl From<tonic::transport::Error> for SdkError {
    fn from(err: tonic::transport::Error) -> Self {
        ErrorBuilder::new(ErrorCode::ConnectionFailed, "broker transport error")
            .details(err.to_string())
            .build()
    }
}

impl From<tonic::Status> for SdkError {
    fn from(status: tonic::Status) -> Self {
        ErrorBuilder::new(map_grpc_code(status.code()), status.message())
            .details(format!("grpc status: {:?}", status.code()))
            .build()
    }
}

/// 将 gRPC 状态码映射为 SDK 错误代码
pub fn map_grpc_code(code: tonic::Code) -> ErrorCode {
    match code {
        tonic::Code::Unauthenticated => ErrorCode::AuthenticationFailed,
        tonic::Code::PermissionDenied => ErrorCode::PermissionDenied,
        tonic::Code::InvalidArgument => ErrorCode::InvalidParameter,
        tonic::Code::ResourceExhausted => ErrorCode::ResourceExhausted,
        tonic::Code::Internal => ErrorCode::InternalError,
        tonic::Code::Unavailable => ErrorCode::ServiceUnavailable,
        tonic::Code::DeadlineExceeded => ErrorCode::OperationTimeout,
        tonic::Code::Cancelled | tonic::Code::Aborted => ErrorCode::ConnectionClosed,
        tonic::Code::DataLoss => ErrorCode::ProtocolError,
        _ => ErrorCode::UnknownError,
    }
}
