//! gRPC ingestion: turns a client stream into one conversion call.
//!
//! The first fragment must carry the [`proto::Meta`]; every later fragment
//! contributes a chunk to the payload, in receive order. Once the stream ends
//! the assembled [`ConversionRequest`] is handed to [`ConversionService`] and
//! its outcome becomes the single response of the call.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::pipeline::input::ConversionRequest;
use crate::upload::ConversionService;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, info_span, warn, Instrument};

/// Generated protobuf messages, server and client.
pub mod proto {
    #![allow(clippy::all, missing_docs)]
    tonic::include_proto!("pdf2images.v1");
}

use proto::convert_request::Data;
use proto::pdf2_images_service_server::{
    Pdf2ImagesService as Pdf2ImagesRpc, Pdf2ImagesServiceServer,
};
use proto::{ConvertRequest, EmptyResponse};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Slack given to the transport timeout so the handler's own deadline, which
/// answers `DeadlineExceeded`, normally fires first.
const TRANSPORT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Server side of `pdf2images.v1.PDF2ImagesService`.
#[derive(Clone)]
pub struct RpcHandler {
    service: ConversionService,
    max_payload_bytes: usize,
    request_timeout: Duration,
}

impl RpcHandler {
    pub fn new(service: ConversionService, config: &ServiceConfig) -> Self {
        Self {
            service,
            max_payload_bytes: config.max_payload_bytes,
            request_timeout: config.request_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn into_server(self) -> Pdf2ImagesServiceServer<Self> {
        Pdf2ImagesServiceServer::new(self)
    }

    /// Earliest of the client's `grpc-timeout` and the server timeout.
    fn deadline(&self, metadata: &MetadataMap) -> Instant {
        let budget = match grpc_timeout(metadata) {
            Some(client) => client.min(self.request_timeout),
            None => self.request_timeout,
        };
        Instant::now() + budget
    }

    async fn handle<S>(&self, stream: S, deadline: Instant) -> Result<(), Status>
    where
        S: Stream<Item = Result<ConvertRequest, Status>>,
    {
        let request = assemble_request(stream, self.max_payload_bytes).await?;
        debug!(
            container = %request.container_name,
            file_name = %request.file_name,
            payload_bytes = request.payload.len(),
            "request assembled"
        );
        self.service
            .convert_and_upload(request, Some(deadline.into_std()))
            .await
            .map_err(Status::from)
    }
}

#[tonic::async_trait]
impl Pdf2ImagesRpc for RpcHandler {
    async fn convert_pdf2_images(
        &self,
        request: Request<Streaming<ConvertRequest>>,
    ) -> Result<Response<EmptyResponse>, Status> {
        let deadline = self.deadline(request.metadata());
        let span = info_span!(
            "convert_pdf2_images",
            remote = ?request.remote_addr(),
        );

        async move {
            let outcome =
                match tokio::time::timeout_at(deadline, self.handle(request.into_inner(), deadline))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Status::from(ServiceError::DeadlineExceeded)),
                };

            match outcome {
                Ok(()) => {
                    info!("response sent");
                    Ok(Response::new(EmptyResponse {}))
                }
                Err(status) => {
                    warn!(
                        code = ?status.code(),
                        message = status.message(),
                        "response to an error request"
                    );
                    Err(status)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Collect a fragment stream into a [`ConversionRequest`].
///
/// Receive errors are returned unchanged. A payload growing past
/// `max_payload_bytes` is rejected as soon as the offending chunk arrives.
pub async fn assemble_request<S>(
    stream: S,
    max_payload_bytes: usize,
) -> Result<ConversionRequest, Status>
where
    S: Stream<Item = Result<ConvertRequest, Status>>,
{
    let mut stream = std::pin::pin!(stream);

    let meta = match stream.next().await {
        Some(first) => match first?.data {
            Some(Data::Meta(meta)) => meta,
            _ => {
                return Err(Status::invalid_argument(
                    "first message must carry file metadata",
                ))
            }
        },
        None => {
            return Err(Status::invalid_argument(
                "stream closed before file metadata",
            ))
        }
    };

    let mut payload = Vec::new();
    while let Some(message) = stream.next().await {
        // Metadata after the first fragment carries no bytes and is skipped.
        if let Some(Data::Chunk(chunk)) = message?.data {
            if payload.len() + chunk.len() > max_payload_bytes {
                return Err(Status::resource_exhausted(format!(
                    "payload exceeds {max_payload_bytes} bytes"
                )));
            }
            payload.extend_from_slice(&chunk);
        }
    }

    Ok(ConversionRequest {
        container_name: meta.container_name,
        destination_path: meta.blob_folder_path,
        file_name: meta.file_name,
        payload,
    })
}

/// Parse the `grpc-timeout` request header.
pub fn grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    metadata
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
}

/// `TimeoutValue TimeoutUnit`: at most eight ASCII digits followed by one of
/// `H M S m u n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(n * 3600),
        "M" => Duration::from_secs(n * 60),
        "S" => Duration::from_secs(n),
        "m" => Duration::from_millis(n),
        "u" => Duration::from_micros(n),
        "n" => Duration::from_nanos(n),
        _ => return None,
    };
    Some(timeout)
}

/// Serve `handler` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    handler: RpcHandler,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "gRPC server listening");
    }
    Server::builder()
        .timeout(handler.request_timeout() + TRANSPORT_TIMEOUT_GRACE)
        .add_service(handler.into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
