//! Content-Disposition framing of the uploaded parts.
//!
//! The analysis service historically accepted a bare `form-data`
//! disposition; newer deployments require the part name and a `.dcm`
//! filename. Both framings are kept and picked per upload.

/// Part content type announced by both policies.
pub const APPLICATION_DICOM: &str = "application/dicom";

/// Strategy producing the per-part `Content-Disposition` and `Content-Type`.
pub trait DispositionPolicy: Send + Sync {
    fn disposition(&self, part_name: &str) -> String;

    fn content_type(&self, _part_name: &str) -> String {
        APPLICATION_DICOM.to_string()
    }
}

/// `Content-Disposition: form-data`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDisposition;

impl DispositionPolicy for PlainDisposition {
    fn disposition(&self, _part_name: &str) -> String {
        "form-data".to_string()
    }
}

/// `Content-Disposition: form-data; name="X"; filename="X.dcm"`
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedDisposition;

impl DispositionPolicy for NamedDisposition {
    fn disposition(&self, part_name: &str) -> String {
        format!(
            "form-data; name=\"{}\"; filename=\"{}.dcm\"",
            part_name, part_name
        )
    }
}

/// Picks the policy for one upload.
pub fn select(use_named_disposition: bool) -> &'static dyn DispositionPolicy {
    if use_named_disposition {
        &NamedDisposition
    } else {
        &PlainDisposition
    }
}
