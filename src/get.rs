use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, StatusCode};
use tracing::{debug, error, info, warn};

use crate::{
    client::{parse_json, read_body, read_text, RESULTS_ENDPOINT},
    AnalysisResult, QureClient, QureError,
};

/// Body of a downloaded artifact, chunk by chunk.
pub type DownloadStream = BoxStream<'static, Result<Bytes, QureError>>;

impl QureClient {
    /// Fetches the analysis of `instance_uid`.
    ///
    /// 404 and 503 mean "not ready yet" for this service, their body is
    /// parsed like a 2xx one (an empty body gives the default result).
    ///
    /// # Errors
    ///
    /// `Unauthorized` on 401, `RemoteRejected` with the body on any other
    /// 4xx, `RemoteRejected` without body on anything else.
    pub async fn fetch_result(&self, instance_uid: &str) -> Result<AnalysisResult, QureError> {
        let client = self.http_client()?;
        info!("Fetching results of {}", instance_uid);

        let response = client
            .get(self.endpoint(&format!("{}{}", RESULTS_ENDPOINT, instance_uid)))
            .header(header::AUTHORIZATION, self.auth_header()?)
            .send()
            .await
            .map_err(QureError::ConnectionFailure)?;

        let status = response.status();
        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::SERVICE_UNAVAILABLE
        {
            let body = read_body(response).await?;
            if body.iter().all(u8::is_ascii_whitespace) {
                warn!("Empty result for {} (status {})", instance_uid, status);
                return Ok(AnalysisResult::default());
            }
            let result: AnalysisResult = parse_json(&body)?;
            debug!(
                "Results of {} (status {}): success {}, {} tags",
                instance_uid,
                status,
                result.success,
                result.tags.len()
            );
            Ok(result)
        } else if status == StatusCode::UNAUTHORIZED {
            error!("Unauthorized while fetching results of {}", instance_uid);
            Err(QureError::Unauthorized)
        } else if status.is_client_error() {
            let body = read_text(response).await?;
            error!("Error {} while fetching results of {}", status, instance_uid);
            Err(QureError::RemoteRejected { status, body })
        } else {
            error!("Error {} while fetching results of {}", status, instance_uid);
            Err(QureError::RemoteRejected {
                status,
                body: String::new(),
            })
        }
    }

    /// Downloads an artifact referenced by an analysis result.
    ///
    /// `uri` is absolute: neither the base URL nor the auth header are
    /// used. The body is streamed as it arrives.
    pub async fn download(&self, uri: &str) -> Result<DownloadStream, QureError> {
        if uri.trim().is_empty() {
            return Err(QureError::MissingReportReference);
        }
        let url = reqwest::Url::parse(uri).map_err(|e| QureError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let client = self.http_client()?;
        info!("Downloading {}", url);

        let response = client
            .get(url)
            .send()
            .await
            .map_err(QureError::ConnectionFailure)?;

        let status = response.status();
        if !status.is_success() {
            error!("Error {} while downloading {}", status, uri);
            return Err(QureError::RemoteRejected {
                status,
                body: String::new(),
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(QureError::ConnectionFailure)
            .boxed())
    }
}
