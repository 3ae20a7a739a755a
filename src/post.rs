use std::path::PathBuf;

use bytes::Bytes;
use reqwest::header;
use tracing::{debug, error, info, warn};

use crate::{
    client::{parse_json, read_body, read_text, STUDIES_ENDPOINT},
    disposition,
    multipart::MultipartRelatedWriter,
    part::{FileResource, Part, PartSet},
    QureClient, QureError, UploadResult,
};

impl QureClient {
    /// Sends a POST request to upload one DICOM file held in memory.
    ///
    /// # Arguments
    ///
    /// * `file` - The raw bytes of the DICOM file.
    /// * `identifier` - The part name, usually the SOPInstanceUID.
    /// * `use_named_disposition` - Frame the part with
    ///   `form-data; name="..."; filename="....dcm"` instead of `form-data`.
    ///
    /// # Errors
    ///
    /// `RemoteRejected` with the response body on a non-2xx status,
    /// `ConnectionFailure` on timeout or I/O failure.
    pub async fn upload(
        &self,
        file: impl Into<Bytes>,
        identifier: &str,
        use_named_disposition: bool,
    ) -> Result<UploadResult, QureError> {
        let mut parts = PartSet::new();
        parts.push(Part::bytes(identifier, file));
        self.upload_parts(parts, use_named_disposition).await
    }

    /// Same as [QureClient::upload], but the file is streamed from disk
    /// instead of being loaded in memory.
    pub async fn upload_file(
        &self,
        path: impl Into<PathBuf>,
        identifier: &str,
        use_named_disposition: bool,
    ) -> Result<UploadResult, QureError> {
        let path = path.into();
        // fail early rather than in the middle of the request body
        tokio::fs::metadata(&path).await?;
        let mut parts = PartSet::new();
        parts.push(Part::file(identifier, FileResource::new(path)));
        self.upload_parts(parts, use_named_disposition).await
    }

    async fn upload_parts(
        &self,
        parts: PartSet,
        use_named_disposition: bool,
    ) -> Result<UploadResult, QureError> {
        let names = parts.names().join(", ");
        let body = MultipartRelatedWriter::new()
            .write(parts, disposition::select(use_named_disposition))?;
        let content_type = body.content_type().to_string();

        let client = self.http_client()?;
        info!("Uploading {}", names);
        let start = std::time::Instant::now();

        let response = client
            .post(self.endpoint(STUDIES_ENDPOINT))
            .header(header::AUTHORIZATION, self.auth_header()?)
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into_body())
            .send()
            .await
            .map_err(QureError::ConnectionFailure)?;

        debug!("Time to upload {} : {:?}", names, start.elapsed());

        let status = response.status();
        if status.is_success() {
            let upload: UploadResult = parse_json(&read_body(response).await?)?;
            debug!("{} successfully sent: {:?}", names, upload);
            Ok(upload)
        } else {
            let body = read_text(response).await?;
            error!("Error {} while uploading {}", status, names);
            Err(QureError::RemoteRejected { status, body })
        }
    }

    /// Checks that the service answers.
    ///
    /// There is no health endpoint, so a dummy JSON document is posted to
    /// the upload endpoint: any 4xx or 5xx answer proves the server is up.
    /// Any other status returns `false`.
    pub async fn ping(&self) -> Result<bool, QureError> {
        let client = self.http_client()?;
        let response = client
            .post(self.endpoint(STUDIES_ENDPOINT))
            .json("ping")
            .send()
            .await
            .map_err(QureError::ConnectionFailure)?;

        let status = response.status();
        let reachable = status.is_client_error() || status.is_server_error();
        if reachable {
            debug!("Ping answered with {}", status);
        } else {
            warn!("Unexpected status {} while pinging {}", status, self.base_url());
        }
        Ok(reachable)
    }
}
