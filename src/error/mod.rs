//! SDK 错误处理模块
//!
//! 提供统一的错误代码分类、错误类型和错误转换

pub mod builder;
pub mod code;
pub mod conversions;
pub mod sdk_error;

pub use builder::ErrorBuilder;
pub use code::{ErrorCategory, ErrorCode};
pub use conversions::map_grpc_code;
pub use sdk_error::{Result, SdkError};

/// 组件生命周期钩子使用的结果类型
pub type ServiceResult = anyhow::Result<()>;

/// 将任意错误转换为 `SdkError`
pub fn map_sdk_error<E, S>(error: E, code: ErrorCode, message: S) -> SdkError
where
    E: std::fmt::Display,
    S: Into<String>,
{
    ErrorBuilder::new(code, message.into())
        .details(error.to_string())
        .build()
}

/// `Result` 的辅助扩展，用于快速转换为 SDK 错误类型
pub trait ResultExt<T> {
    fn into_sdk<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_sdk<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.map_err(|err| map_sdk_error(err, code, message))
    }
}
