//! Upload → wait → poll → download → persist, once.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use dicom_object::OpenFileOptions;
use futures_util::TryStreamExt;
use tracing::{debug, error, info, warn};

use crate::{AnalysisResult, QureClient, QureConfig, QureError, UploadResult};

/// Time given to the service between the upload and the result request.
pub const RESULT_DELAY: Duration = Duration::from_secs(5);

/// Part name used when nothing better is known about the input file.
const FALLBACK_IDENTIFIER: &str = "filename";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uploading,
    WaitingFixedDelay,
    FetchingResult,
    ExtractingReportRef,
    Downloading,
    Persisting,
    Done,
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub identifier: String,
    pub upload: UploadResult,
    pub result: AnalysisResult,
    pub report_uri: String,
    pub output_path: PathBuf,
    pub bytes_written: usize,
}

pub struct Pipeline {
    config: QureConfig,
    client: QureClient,
    delay: Duration,
}

impl Pipeline {
    pub fn new(config: QureConfig) -> Self {
        let client = QureClient::new(&config);
        Pipeline {
            config,
            client,
            delay: RESULT_DELAY,
        }
    }

    /// Overrides the wait between upload and result request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn client(&self) -> &QureClient {
        &self.client
    }

    /// Runs every stage in order and stops at the first failure, which is
    /// logged and returned. Nothing is written unless the download
    /// completed.
    pub async fn process(&self) -> Result<PipelineReport, QureError> {
        if self.config.instance_uid.is_empty() {
            info!("Please define the instance uid, nothing to process.");
            return Err(QureError::ConfigurationIncomplete("instance_uid"));
        }

        match self.run().await {
            Ok(report) => {
                info!(
                    "Report of {} saved to {} ({} bytes)",
                    self.config.instance_uid,
                    report.output_path.display(),
                    report.bytes_written
                );
                Ok(report)
            }
            Err(e) => {
                error!("An error occurred: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<PipelineReport, QureError> {
        enter(Stage::Uploading);
        let file = tokio::fs::read(&self.config.input_path).await?;
        let identifier = resolve_identifier(&self.config);
        let upload = self
            .client
            .upload(file, &identifier, self.config.fix_applied)
            .await?;
        info!(
            "Upload of {} accepted: {} (result {}, task created {})",
            identifier, upload.message, upload.result, upload.task_created
        );

        enter(Stage::WaitingFixedDelay);
        tokio::time::sleep(self.delay).await;

        enter(Stage::FetchingResult);
        let result = self.client.fetch_result(&self.config.instance_uid).await?;

        enter(Stage::ExtractingReportRef);
        let report_uri = report_reference(&result)?.to_string();

        enter(Stage::Downloading);
        let mut chunks = self.client.download(&report_uri).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.try_next().await? {
            buf.put(chunk);
        }

        enter(Stage::Persisting);
        persist(&self.config.output_path, &buf).await?;

        enter(Stage::Done);
        Ok(PipelineReport {
            identifier,
            upload,
            result,
            report_uri,
            output_path: self.config.output_path.clone(),
            bytes_written: buf.len(),
        })
    }
}

fn enter(stage: Stage) {
    debug!("Stage: {:?}", stage);
}

/// The DICOM report of an analysis.
fn report_reference(result: &AnalysisResult) -> Result<&str, QureError> {
    let dcm = result.files.reports.dcm.trim();
    if dcm.is_empty() {
        warn!("No DICOM report in result: {}", result.message);
        return Err(QureError::MissingReportReference);
    }
    Ok(dcm)
}

/// Configured identifier, else the SOPInstanceUID of the input file, else
/// its file stem.
fn resolve_identifier(config: &QureConfig) -> String {
    if let Some(identifier) = config.identifier.as_deref().filter(|id| !id.is_empty()) {
        return identifier.to_string();
    }
    if let Some(sop_instance_uid) = sop_instance_uid(&config.input_path) {
        return sop_instance_uid;
    }
    config
        .input_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_IDENTIFIER.to_string())
}

fn sop_instance_uid(path: &Path) -> Option<String> {
    // open the file until the PixelData tag
    let object = match OpenFileOptions::new()
        .read_until(dicom_dictionary_std::tags::PIXEL_DATA)
        .open_file(path)
    {
        Ok(object) => object,
        Err(e) => {
            debug!("{} is not a readable DICOM file: {}", path.display(), e);
            return None;
        }
    };
    let uid = object
        .element_by_name("SOPInstanceUID")
        .ok()?
        .to_str()
        .ok()?
        .trim_end_matches('\0')
        .trim()
        .to_string();
    if uid.is_empty() {
        None
    } else {
        Some(uid)
    }
}

/// Replaces `path` with `bytes` through a sibling temporary file, so the
/// output is never left half written.
async fn persist(path: &Path, bytes: &[u8]) -> Result<(), QureError> {
    let file_name = path.file_name().ok_or_else(|| {
        QureError::InvalidConfiguration(format!("output path {} has no file name", path.display()))
    })?;
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
