use std::{path::PathBuf, time::Duration};

use clap::ValueEnum;

use crate::QureError;

/// Artifacts that can be requested from the service.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq)]
pub enum ResultFileType {
    Pdf,
    Overlay,
}

/// Settings of the client and of the upload pipeline.
///
/// `retry_rate`, `result_types` and `max_name_and_id_length` are accepted
/// and validated but nothing consumes them yet.
#[derive(Debug, Clone)]
pub struct QureConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Sent verbatim as the `Authorization` header, `Token <hex>`.
    pub authorization: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Instance polled for results. The pipeline does nothing without it.
    pub instance_uid: String,
    /// Name of the uploaded part. Resolved from the input file when unset.
    pub identifier: Option<String>,
    /// Use the named Content-Disposition framing.
    pub fix_applied: bool,
    pub max_name_and_id_length: usize,
    pub request_timeout: Duration,
    pub retry_rate: Duration,
    pub result_types: Vec<ResultFileType>,
}

impl Default for QureConfig {
    fn default() -> Self {
        QureConfig {
            enabled: true,
            base_url: "https://localhost".to_string(),
            authorization: "UNDEFINED".to_string(),
            input_path: PathBuf::from("inputDcm.dcm"),
            output_path: PathBuf::from("outputDcm.dcm"),
            instance_uid: String::new(),
            identifier: None,
            fix_applied: false,
            max_name_and_id_length: 45,
            request_timeout: Duration::from_secs(30),
            retry_rate: Duration::from_secs(10),
            result_types: vec![ResultFileType::Pdf, ResultFileType::Overlay],
        }
    }
}

impl QureConfig {
    pub fn new(base_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        QureConfig {
            base_url: base_url.into(),
            authorization: authorization.into(),
            ..Default::default()
        }
    }

    /// Enabled and holding a token that looks valid.
    pub fn is_enabled(&self) -> bool {
        self.enabled && is_valid_authorization(&self.authorization)
    }

    pub fn validate(&self) -> Result<(), QureError> {
        if self.base_url.is_empty() {
            return Err(invalid("base URL must not be empty"));
        }
        if let Err(e) = reqwest::Url::parse(&self.base_url) {
            return Err(invalid(format!("base URL {:?}: {}", self.base_url, e)));
        }
        if self.authorization.is_empty() {
            return Err(invalid("authorization must not be empty"));
        }
        if self.input_path.as_os_str().is_empty() {
            return Err(invalid("input path must not be empty"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(invalid("output path must not be empty"));
        }
        if !(20..=64).contains(&self.max_name_and_id_length) {
            return Err(invalid(format!(
                "max name and id length must be within 20..=64, got {}",
                self.max_name_and_id_length
            )));
        }
        check_bounds(
            "request timeout",
            self.request_timeout,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )?;
        check_bounds(
            "retry rate",
            self.retry_rate,
            Duration::from_secs(1),
            Duration::from_secs(5 * 60),
        )?;
        Ok(())
    }
}

/// `Token ` followed by at least one hexadecimal digit.
fn is_valid_authorization(authorization: &str) -> bool {
    match authorization.strip_prefix("Token ") {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn check_bounds(
    what: &str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> Result<(), QureError> {
    if value < min || value > max {
        return Err(invalid(format!(
            "{} must be within {:?}..={:?}, got {:?}",
            what, min, max, value
        )));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> QureError {
    QureError::InvalidConfiguration(msg.into())
}
