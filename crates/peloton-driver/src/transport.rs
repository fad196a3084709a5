//! HTTP transport to the Mesos master's `/api/v1/scheduler` endpoint.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, info};

use peloton_mesos::{Encoding, RecordIoDecoder};

use crate::error::{DriverError, DriverResult};

/// Header carrying the per-subscription stream id.
pub const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

const SCHEDULER_PATH: &str = "/api/v1/scheduler";

/// An open subscription: the stream id from the response headers plus the
/// de-framed record stream.
pub struct SubscribeConnection {
    pub stream_id: String,
    pub frames: Pin<Box<dyn Stream<Item = DriverResult<Bytes>> + Send>>,
}

/// The wire side of the driver. Split from identity persistence so each
/// can be mocked on its own.
#[async_trait]
pub trait MasterTransport: Send + Sync {
    /// Open the long-lived streaming POST carrying a SUBSCRIBE call.
    async fn subscribe(&self, master: &str, body: Bytes) -> DriverResult<SubscribeConnection>;

    /// Send a unary call on an existing subscription.
    async fn call(
        &self,
        master: &str,
        body: Bytes,
        stream_id: &str,
        deadline: Duration,
    ) -> DriverResult<()>;
}

/// reqwest-backed transport speaking JSON or protobuf.
pub struct HttpTransport {
    client: reqwest::Client,
    encoding: Encoding,
    auth_header: Option<String>,
}

impl HttpTransport {
    pub fn new(encoding: Encoding, auth_header: Option<String>) -> DriverResult<Self> {
        // No global timeout: the subscribe response body streams forever.
        // Unary calls get their deadline per request.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            encoding,
            auth_header,
        })
    }

    fn endpoint(&self, master: &str) -> String {
        format!("http://{master}{SCHEDULER_PATH}")
    }

    fn request(&self, master: &str, body: Bytes) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.endpoint(master))
            .header("Content-Type", self.encoding.content_type())
            .header("Accept", self.encoding.content_type())
            .body(body);
        if let Some(auth) = &self.auth_header {
            req = req.header("Authorization", auth.clone());
        }
        req
    }
}

#[async_trait]
impl MasterTransport for HttpTransport {
    async fn subscribe(&self, master: &str, body: Bytes) -> DriverResult<SubscribeConnection> {
        let response = self
            .request(master, body)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DriverError::Master {
                status: status.as_u16(),
                message,
            });
        }

        let stream_id = response
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(DriverError::MissingStreamId)?;

        debug!(%master, %stream_id, "subscription stream opened");

        let frames = Box::pin(futures::stream::try_unfold(
            (response.bytes_stream(), RecordIoDecoder::new()),
            |(mut chunks, mut decoder)| async move {
                loop {
                    match decoder
                        .next_record()
                        .map_err(|e| DriverError::Transport(e.to_string()))?
                    {
                        Some(record) => return Ok(Some((record, (chunks, decoder)))),
                        None => match chunks.next().await {
                            Some(Ok(chunk)) => decoder.extend(&chunk),
                            Some(Err(e)) => return Err(DriverError::Transport(e.to_string())),
                            None => return Ok(None),
                        },
                    }
                }
            },
        ));

        Ok(SubscribeConnection { stream_id, frames })
    }

    async fn call(
        &self,
        master: &str,
        body: Bytes,
        stream_id: &str,
        deadline: Duration,
    ) -> DriverResult<()> {
        let request = self.request(master, body).header(STREAM_ID_HEADER, stream_id);

        let response = tokio::time::timeout(deadline, request.send())
            .await
            .map_err(|_| DriverError::Timeout(deadline))?
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(DriverError::Master {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Build the Basic Authorization header from the framework principal and a
/// secret file. No principal or no secret file means no header at all.
/// The secret is whitespace-trimmed before encoding.
pub fn basic_auth_header(
    principal: &str,
    secret_path: Option<&Path>,
) -> std::io::Result<Option<String>> {
    if principal.is_empty() {
        info!("no principal configured, skipping master authentication");
        return Ok(None);
    }
    let Some(path) = secret_path else {
        info!("no secret file configured, skipping master authentication");
        return Ok(None);
    };

    let secret = std::fs::read_to_string(path)?;
    let secret = secret.trim();
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{principal}:{secret}"));
    info!(secret_path = ?path, %principal, "master authentication header loaded");
    Ok(Some(format!("Basic {encoded}")))
}
