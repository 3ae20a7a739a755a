//! # qure_rs
//! ## Before you begin
//! This library talks to a remote chest X-ray analysis service. To use it you need the base URL of the
//! service and an authorization token of the form `Token <hex>`, both usually provided through the
//! `QURE_BASE_URL` and `QURE_AUTHORIZATION` environment variables by the [qure_rs binary](../qure_rs/index.html).
//!
//! ## Description
//! **qure_rs** uploads a DICOM file to the service as a `multipart/related` body, waits for the analysis,
//! fetches the resulting tags and downloads the DICOM report produced by the service.
//!
//! The interaction is split in layers:
//!
//! 1. [MultipartRelatedWriter] turns a [PartSet] into a lazily produced body, framing each [Part] with a
//!    random boundary. How each part is labelled is decided by a [DispositionPolicy]
//!    ([PlainDisposition] or [NamedDisposition]).
//! 2. [QureClient] sends the requests: [QureClient::upload], [QureClient::upload_file],
//!    [QureClient::fetch_result], [QureClient::download] and [QureClient::ping].
//! 3. [Pipeline] chains the whole run (upload, fixed delay, result, report download, atomic write) from a
//!    [QureConfig].
//!
//! Every failure is a [QureError].
//!
//! ## Example
//! ```rust no_run
//! use std::time::Duration;
//!
//! #[tokio::main]
//! pub async fn main() {
//!     let mut config = qure_rs::QureConfig::new("https://qure.example", "Token 0123abcd");
//!     config.input_path = "DX000000.dcm".into();
//!     config.output_path = "report.dcm".into();
//!     config.instance_uid = "1.2.840.113619.2.1".to_string();
//!     config.request_timeout = Duration::from_secs(10);
//!
//!     if let Err(e) = config.validate() {
//!         panic!("Error: {}", e);
//!     }
//!
//!     match qure_rs::Pipeline::new(config).process().await {
//!         Ok(report) => println!("{} bytes written", report.bytes_written),
//!         Err(e) => panic!("Error: {}", e),
//!     }
//! }
//! ```

mod client;
mod config;
mod disposition;
mod get;
mod multipart;
mod part;
mod pipeline;
mod post;
mod structs;

pub use client::QureClient;
pub use config::{QureConfig, ResultFileType};
pub use disposition::{
    select as select_disposition, DispositionPolicy, NamedDisposition, PlainDisposition,
    APPLICATION_DICOM,
};
pub use get::DownloadStream;
pub use multipart::{
    generate_boundary, BytesSerializer, MultipartRelatedWriter, PartEncoder, PartSerializer,
    RelatedBody, ResourceSerializer, TextSerializer, DEFAULT_CHARSET, MULTIPART_RELATED,
};
pub use part::{ByteStream, FileResource, Part, PartHeaders, PartSet, PartValue};
pub use pipeline::{Pipeline, PipelineReport, Stage, RESULT_DELAY};
pub use structs::{
    AnalysisResult, ConnectionError, FileRefs, QureError, Reports, Tag, UploadResult,
};
