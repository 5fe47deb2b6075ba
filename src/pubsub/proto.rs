//! broker 协议帧
//!
//! 与 broker 的 `pubsub.Broker` gRPC 服务保持字段编号一致。

use bytes::Bytes;

/// 发布请求
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishRequest {
    #[prost(string, tag = "1")]
    pub event: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub token: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
    #[prost(message, optional, tag = "4")]
    pub delay: ::core::option::Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishResponse {
    #[prost(string, tag = "1")]
    pub message_id: ::prost::alloc::string::String,
}

/// 订阅选项，每个订阅流的第一帧
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeOptions {
    #[prost(string, tag = "1")]
    pub event: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub token: ::prost::alloc::string::String,
    #[prost(int32, tag = "3")]
    pub max_concurrent: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageAck {
    #[prost(uint64, tag = "1")]
    pub tag: u64,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageRedeliver {
    #[prost(uint64, tag = "1")]
    pub tag: u64,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub delay: ::core::option::Option<::prost_types::Duration>,
}

/// 客户端发往 broker 的订阅流帧
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeRequest {
    #[prost(oneof = "subscribe_request::Frame", tags = "1, 2, 3")]
    pub frame: ::core::option::Option<subscribe_request::Frame>,
}

pub mod subscribe_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Options(super::SubscribeOptions),
        #[prost(message, tag = "2")]
        Ack(super::MessageAck),
        #[prost(message, tag = "3")]
        Redeliver(super::MessageRedeliver),
    }
}

impl SubscribeRequest {
    pub fn options(options: SubscribeOptions) -> Self {
        Self {
            frame: Some(subscribe_request::Frame::Options(options)),
        }
    }

    pub fn ack(tag: u64, message: impl Into<String>) -> Self {
        Self {
            frame: Some(subscribe_request::Frame::Ack(MessageAck {
                tag,
                message: message.into(),
            })),
        }
    }

    pub fn redeliver(
        tag: u64,
        message: impl Into<String>,
        delay: Option<::prost_types::Duration>,
    ) -> Self {
        Self {
            frame: Some(subscribe_request::Frame::Redeliver(MessageRedeliver {
                tag,
                message: message.into(),
                delay,
            })),
        }
    }
}

/// broker 推送的消息
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeliveredMessage {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "2")]
    pub data: Bytes,
    #[prost(int32, tag = "3")]
    pub delivered_count: i32,
    #[prost(message, optional, tag = "4")]
    pub created: ::core::option::Option<::prost_types::Timestamp>,
}

/// 转换为 protobuf Duration，超出范围时取最大值
pub fn duration_to_proto(delay: std::time::Duration) -> ::prost_types::Duration {
    ::prost_types::Duration::try_from(delay).unwrap_or(::prost_types::Duration {
        seconds: i64::MAX,
        nanos: 999_999_999,
    })
}

/// 转换为 std Duration，负值视为 0
pub fn duration_from_proto(delay: Option<&::prost_types::Duration>) -> std::time::Duration {
    delay
        .cloned()
        .and_then(|d| std::time::Duration::try_from(d).ok())
        .unwrap_or_default()
}
