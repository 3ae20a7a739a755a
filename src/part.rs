use std::{fmt, path::PathBuf, pin::Pin};

use bytes::Bytes;
use futures_util::Stream;

use crate::QureError;

/// Chunks of a body that is produced lazily.
///
/// `Sync` is required because reqwest only accepts `Sync` body streams.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, QureError>> + Send + Sync>>;

/// Ordered, case-insensitive header multimap.
///
/// A header keeps the position of its first insertion. Each value is
/// written on its own line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Adds one more value for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replaces every value of `name`, in place if the header already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Copies every header of `other` over this one, replacing values of
    /// headers present in both.
    pub fn merge(&mut self, other: PartHeaders) {
        for (name, values) in other.entries {
            match self.position(&name) {
                Some(i) => self.entries[i].1 = values,
                None => self.entries.push((name, values)),
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    /// Header lines in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A file sent as a part body, read from disk while the request streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    pub path: PathBuf,
    pub headers: PartHeaders,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileResource {
            path: path.into(),
            headers: PartHeaders::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

pub enum PartValue {
    Bytes(Bytes),
    Text(String),
    /// Bytes that become available later.
    Stream(ByteStream),
    File(FileResource),
}

impl fmt::Debug for PartValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PartValue::Text(t) => write!(f, "Text({} chars)", t.len()),
            PartValue::Stream(_) => f.write_str("Stream"),
            PartValue::File(r) => write!(f, "File({})", r.path.display()),
        }
    }
}

/// One named value of a multipart body.
#[derive(Debug)]
pub struct Part {
    pub name: String,
    pub value: PartValue,
    pub headers: PartHeaders,
}

impl Part {
    pub fn new(name: impl Into<String>, value: PartValue) -> Self {
        Part {
            name: name.into(),
            value,
            headers: PartHeaders::new(),
        }
    }

    pub fn bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(name, PartValue::Bytes(bytes.into()))
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, PartValue::Text(text.into()))
    }

    pub fn stream<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, QureError>> + Send + Sync + 'static,
    {
        Self::new(name, PartValue::Stream(Box::pin(stream)))
    }

    pub fn file(name: impl Into<String>, resource: FileResource) -> Self {
        Self::new(name, PartValue::File(resource))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Parts in wire order. Several parts may share a name.
#[derive(Debug, Default)]
pub struct PartSet {
    parts: Vec<Part>,
}

impl PartSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: Part) -> &mut Self {
        self.parts.push(part);
        self
    }

    /// Adds one part per value, all under `name`.
    pub fn extend_named<I>(&mut self, name: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = PartValue>,
    {
        self.parts
            .extend(values.into_iter().map(|value| Part::new(name, value)));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl FromIterator<Part> for PartSet {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        PartSet {
            parts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PartSet {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_keep_insertion_order() {
        let mut headers = PartHeaders::new();
        headers.append("X-First", "1");
        headers.append("Content-Type", "text/plain");
        headers.append("x-first", "2");
        let lines: Vec<_> = headers.iter().collect();
        assert_eq!(
            lines,
            vec![
                ("X-First", "1"),
                ("X-First", "2"),
                ("Content-Type", "text/plain")
            ]
        );
    }

    #[test]
    fn test_headers_set_replaces_in_place() {
        let mut headers = PartHeaders::new();
        headers.append("Content-Type", "text/plain");
        headers.append("X-Other", "a");
        headers.set("content-type", "application/dicom");
        assert_eq!(headers.get_all("Content-Type"), ["application/dicom"]);
        assert_eq!(headers.iter().next(), Some(("Content-Type", "application/dicom")));
    }

    #[test]
    fn test_headers_merge() {
        let mut headers = PartHeaders::new();
        headers.append("Content-Id", "<a>");
        let mut other = PartHeaders::new();
        other.append("content-id", "<b>");
        other.append("Content-Length", "9");
        headers.merge(other);
        assert_eq!(headers.get("Content-Id"), Some("<b>"));
        assert_eq!(headers.get("Content-Length"), Some("9"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_part_set_repeated_names() {
        let mut set = PartSet::new();
        set.extend_named(
            "series",
            vec![
                PartValue::Bytes(Bytes::from_static(b"a")),
                PartValue::Bytes(Bytes::from_static(b"b")),
            ],
        );
        set.push(Part::bytes("other", "c"));
        assert_eq!(set.names(), vec!["series", "series", "other"]);
        assert_eq!(set.len(), 3);
    }
}
