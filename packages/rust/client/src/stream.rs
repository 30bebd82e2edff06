//! `POST /generate-eda-stream` as a session [`Transport`].

use bytes::Bytes;
use edastream_shared::{EdaError, GenerateEdaRequest, Result};
use edastream_stream::Transport;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::{EdaClient, GENERATE_FAILED, error_from_response, network_error};

impl Transport for EdaClient {
    type Chunk = Bytes;
    type Body = BoxStream<'static, Result<Bytes>>;

    /// Issue the stream request and hand back the raw body.
    ///
    /// No overall timeout applies; the body ends when the server closes the
    /// connection and dropping it aborts the request.
    async fn open(&self, request: &GenerateEdaRequest) -> Result<Self::Body> {
        if request.csv_id.is_empty() || request.uid.is_empty() {
            return Err(EdaError::validation("stream request needs both csv_id and uid"));
        }

        let url = self.endpoint(&["generate-eda-stream"])?;
        info!(%url, csv_id = %request.csv_id, "opening EDA stream");

        let response = self
            .http
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response, GENERATE_FAILED).await);
        }

        match response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            Some(ct) if ct.starts_with("text/event-stream") => debug!(%status, "stream accepted"),
            other => warn!(%status, content_type = ?other, "stream response is not text/event-stream"),
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| EdaError::Network(format!("stream interrupted: {e}")))
            })
            .boxed())
    }
}
