//! 基于 tonic 的 broker 传输层

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::uri::PathAndQuery;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tonic_prost::ProstCodec;
use tracing::debug;

use super::proto::{DeliveredMessage, PublishRequest, PublishResponse, SubscribeRequest};
use super::transport::{BrokerTransport, FrameSink, FrameSource, SubscribeStream};
use crate::error::{ErrorCode, Result, ResultExt, SdkError};

const PUBLISH_PATH: &str = "/pubsub.Broker/Publish";
const SUBSCRIBE_PATH: &str = "/pubsub.Broker/Subscribe";

/// 出站帧缓冲
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct GrpcTransport {
    endpoint: String,
    channel: Channel,
}

impl GrpcTransport {
    /// 创建延迟连接的传输层，首次调用时才建立连接
    ///
    /// 没有 scheme 的地址按 `http://` 处理。
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let uri = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let channel = Endpoint::from_shared(uri.clone())
            .into_sdk(ErrorCode::ConfigurationError, format!("invalid broker endpoint: {endpoint}"))?
            .connect_timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .connect_lazy();
        Ok(Self {
            endpoint: uri,
            channel,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ready_client(&self) -> Result<Grpc<Channel>> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|err| {
            SdkError::connection_failed(format!("broker {} not ready: {err}", self.endpoint))
        })?;
        Ok(grpc)
    }
}

#[async_trait]
impl BrokerTransport for GrpcTransport {
    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse> {
        let mut grpc = self.ready_client().await?;
        let codec: ProstCodec<PublishRequest, PublishResponse> = ProstCodec::default();
        let response = grpc
            .unary(
                Request::new(request),
                PathAndQuery::from_static(PUBLISH_PATH),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn open_stream(&self) -> Result<SubscribeStream> {
        let mut grpc = self.ready_client().await?;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

        // 响应头在首次 recv 时才等待，出站帧先进入缓冲
        let call: BoxFuture<'static, std::result::Result<Streaming<DeliveredMessage>, Status>> =
            Box::pin(async move {
                let codec: ProstCodec<SubscribeRequest, DeliveredMessage> = ProstCodec::default();
                grpc.streaming(
                    Request::new(ReceiverStream::new(rx)),
                    PathAndQuery::from_static(SUBSCRIBE_PATH),
                    codec,
                )
                .await
                .map(tonic::Response::into_inner)
            });

        debug!(endpoint = %self.endpoint, "Subscribe stream opened");
        Ok(SubscribeStream {
            sink: Box::new(GrpcSink { tx }),
            source: Box::new(GrpcSource {
                state: SourceState::Connecting(call),
            }),
        })
    }
}

struct GrpcSink {
    tx: mpsc::Sender<SubscribeRequest>,
}

#[async_trait]
impl FrameSink for GrpcSink {
    async fn send(&mut self, frame: SubscribeRequest) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| SdkError::connection_closed("subscribe stream closed"))
    }
}

enum SourceState {
    Connecting(BoxFuture<'static, std::result::Result<Streaming<DeliveredMessage>, Status>>),
    Open(Streaming<DeliveredMessage>),
    Closed,
}

struct GrpcSource {
    state: SourceState,
}

#[async_trait]
impl FrameSource for GrpcSource {
    async fn recv(&mut self) -> Result<Option<DeliveredMessage>> {
        loop {
            match &mut self.state {
                SourceState::Connecting(call) => {
                    let connected = call.await;
                    match connected {
                        Ok(streaming) => self.state = SourceState::Open(streaming),
                        Err(status) => {
                            self.state = SourceState::Closed;
                            return Err(status.into());
                        }
                    }
                }
                SourceState::Open(streaming) => {
                    let next = streaming.message().await;
                    return match next {
                        Ok(Some(message)) => Ok(Some(message)),
                        Ok(None) => {
                            self.state = SourceState::Closed;
                            Ok(None)
                        }
                        Err(status) => {
                            self.state = SourceState::Closed;
                            Err(status.into())
                        }
                    };
                }
                SourceState::Closed => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoint_without_scheme_gets_http() {
        let transport = GrpcTransport::connect_lazy("127.0.0.1:50051").unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:50051");
    }

    #[tokio::test]
    async fn invalid_endpoint_is_configuration_error() {
        let err = GrpcTransport::connect_lazy("http://bad host:1").unwrap_err();
        assert!(err.is(ErrorCode::ConfigurationError));
    }
}
