//! Streaming `multipart/related` encoder for DICOM uploads.
//!
//! The body is never buffered as a whole: every part becomes a lazy chunk
//! stream and the parts are drained one after the other, so a part body
//! that is still being produced (a file on disk, a stream) cannot interleave
//! with the framing of its neighbours.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{future, stream, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::debug;

use crate::{
    disposition::DispositionPolicy,
    part::{ByteStream, Part, PartHeaders, PartSet, PartValue},
    QureError,
};

pub const MULTIPART_RELATED: &str = "multipart/related";
pub const DEFAULT_CHARSET: &str = "UTF-8";

const CONTENT_DISPOSITION: &str = "Content-Disposition";
const CONTENT_TYPE: &str = "Content-Type";
const CRLF: &[u8] = b"\r\n";

/// Generate a random boundary: 32 hex digits of a v4 UUID.
pub fn generate_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Writes one kind of part value.
pub trait PartSerializer: Send + Sync {
    /// Turns `value` into body chunks, or hands it back when this serializer
    /// cannot write it as `content_type`.
    fn serialize(&self, value: PartValue, content_type: &str) -> Result<ByteStream, PartValue>;
}

/// Raw bytes and byte streams, passed through untouched.
#[derive(Debug, Default)]
pub struct BytesSerializer;

impl PartSerializer for BytesSerializer {
    fn serialize(&self, value: PartValue, _content_type: &str) -> Result<ByteStream, PartValue> {
        match value {
            PartValue::Bytes(bytes) => Ok(Box::pin(stream::once(future::ready(Ok::<_, QureError>(
                bytes,
            ))))),
            PartValue::Stream(body) => Ok(body),
            other => Err(other),
        }
    }
}

/// Files, opened when the body is first polled and read chunk by chunk.
#[derive(Debug, Default)]
pub struct ResourceSerializer;

impl PartSerializer for ResourceSerializer {
    fn serialize(&self, value: PartValue, _content_type: &str) -> Result<ByteStream, PartValue> {
        match value {
            PartValue::File(resource) => {
                let path = resource.path;
                let body = stream::once(async move { File::open(path).await })
                    .map_ok(|file| {
                        FramedRead::new(file, BytesCodec::new()).map_ok(BytesMut::freeze)
                    })
                    .try_flatten()
                    .map_err(QureError::Io);
                Ok(Box::pin(body))
            }
            other => Err(other),
        }
    }
}

/// Text, only as `text/plain`.
#[derive(Debug, Default)]
pub struct TextSerializer;

impl PartSerializer for TextSerializer {
    fn serialize(&self, value: PartValue, content_type: &str) -> Result<ByteStream, PartValue> {
        match value {
            PartValue::Text(text) if content_type.starts_with("text/plain") => Ok(Box::pin(
                stream::once(future::ready(Ok::<_, QureError>(Bytes::from(text)))),
            )),
            other => Err(other),
        }
    }
}

/// Encoder for a single part. `encode` consumes it, a part is written once.
pub struct PartEncoder {
    boundary: Bytes,
    headers: PartHeaders,
    body: ByteStream,
}

impl PartEncoder {
    /// Resolves the headers and the body serializer of `part`.
    ///
    /// Headers are the part's own, then those carried by a file resource,
    /// then `Content-Disposition` and `Content-Type` from `policy`.
    pub fn new(
        boundary: &str,
        part: Part,
        policy: &dyn DispositionPolicy,
        serializers: &[Box<dyn PartSerializer>],
    ) -> Result<Self, QureError> {
        let Part {
            name,
            mut value,
            mut headers,
        } = part;

        if let PartValue::File(resource) = &mut value {
            headers.merge(std::mem::take(&mut resource.headers));
        }
        headers.set(CONTENT_DISPOSITION, policy.disposition(&name));
        headers.set(CONTENT_TYPE, policy.content_type(&name));

        let content_type = headers.get(CONTENT_TYPE).unwrap_or_default().to_string();
        for serializer in serializers {
            match serializer.serialize(value, &content_type) {
                Ok(body) => {
                    return Ok(PartEncoder {
                        boundary: Bytes::copy_from_slice(boundary.as_bytes()),
                        headers,
                        body,
                    })
                }
                Err(unhandled) => value = unhandled,
            }
        }
        Err(QureError::UnsupportedPartType(name))
    }

    /// Boundary line and header block.
    fn head(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.boundary.len() + 128);
        buf.put_slice(b"--");
        buf.put_slice(&self.boundary);
        buf.put_slice(CRLF);
        for (name, value) in self.headers.iter() {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(CRLF);
        buf.freeze()
    }

    /// Boundary and headers come out as the first chunk, before the body is
    /// polled.
    pub fn encode(self) -> ByteStream {
        let head = self.head();
        Box::pin(
            stream::once(future::ready(Ok(head)))
                .chain(self.body)
                .chain(stream::once(future::ready(Ok(Bytes::from_static(CRLF))))),
        )
    }
}

/// Writes a [PartSet] as a `multipart/related` body with
/// `type="application/dicom"`.
pub struct MultipartRelatedWriter {
    serializers: Vec<Box<dyn PartSerializer>>,
    charset: String,
}

impl Default for MultipartRelatedWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartRelatedWriter {
    pub fn new() -> Self {
        let serializers: Vec<Box<dyn PartSerializer>> = vec![
            Box::new(BytesSerializer),
            Box::new(ResourceSerializer),
            Box::new(TextSerializer),
        ];
        MultipartRelatedWriter {
            serializers,
            charset: DEFAULT_CHARSET.to_string(),
        }
    }

    /// Charset announced in the outer `Content-Type`. Header text is always
    /// written as UTF-8.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Registers an extra serializer, tried after the built-in ones.
    pub fn with_serializer(mut self, serializer: impl PartSerializer + 'static) -> Self {
        self.serializers.push(Box::new(serializer));
        self
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    fn content_type(&self, boundary: &str) -> String {
        format!(
            "{}; boundary={}; type=\"application/dicom\"; charset={}",
            MULTIPART_RELATED, boundary, self.charset
        )
    }

    /// Prepares the body for `parts`.
    ///
    /// Every part is checked against the serializers here, so an
    /// unsupported value fails before any byte is produced.
    pub fn write(
        &self,
        parts: PartSet,
        policy: &dyn DispositionPolicy,
    ) -> Result<RelatedBody, QureError> {
        let boundary = generate_boundary();
        let content_type = self.content_type(&boundary);

        debug!("Encoding parts {:?} (content masked)", parts.names());

        let encoders = parts
            .into_iter()
            .map(|part| PartEncoder::new(&boundary, part, policy, &self.serializers))
            .collect::<Result<Vec<_>, _>>()?;

        let last_line = Bytes::from(format!("--{}--\r\n", boundary));
        let stream = stream::iter(encoders)
            .flat_map(PartEncoder::encode)
            .chain(stream::once(future::ready(Ok(last_line))));

        Ok(RelatedBody {
            boundary,
            content_type,
            stream: Box::pin(stream),
        })
    }
}

/// An encoded body: its `Content-Type`, known up front, and the chunks.
pub struct RelatedBody {
    boundary: String,
    content_type: String,
    stream: ByteStream,
}

impl RelatedBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    pub fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(self.stream)
    }

    /// Drains the whole body in memory.
    pub async fn collect(self) -> Result<Bytes, QureError> {
        let mut buf = BytesMut::new();
        let mut stream = self.stream;
        while let Some(chunk) = stream.try_next().await? {
            buf.put(chunk);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for RelatedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelatedBody")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::FutureExt;

    use super::*;
    use crate::{
        disposition::{NamedDisposition, PlainDisposition, APPLICATION_DICOM},
        part::FileResource,
    };

    fn one_part(name: &str, body: &'static [u8]) -> PartSet {
        let mut parts = PartSet::new();
        parts.push(Part::bytes(name, body));
        parts
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn test_boundary_is_random_and_safe() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert_ne!(a, b);
        assert!(a.len() >= 30);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_outer_content_type() {
        let body = MultipartRelatedWriter::new()
            .write(one_part("a", b"x"), &PlainDisposition)
            .unwrap();
        assert_eq!(
            body.content_type(),
            format!(
                "multipart/related; boundary={}; type=\"application/dicom\"; charset=UTF-8",
                body.boundary()
            )
        );

        let body = MultipartRelatedWriter::new()
            .with_charset("ISO-8859-1")
            .write(one_part("a", b"x"), &PlainDisposition)
            .unwrap();
        assert!(body.content_type().ends_with("charset=ISO-8859-1"));
    }

    #[tokio::test]
    async fn test_exact_framing_plain() {
        let body = MultipartRelatedWriter::new()
            .write(one_part("dummySopInstanceUid", b"FILE_SENT"), &PlainDisposition)
            .unwrap();
        let boundary = body.boundary().to_string();
        let bytes = body.collect().await.unwrap();
        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data\r\nContent-Type: application/dicom\r\n\r\nFILE_SENT\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(bytes, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_exact_framing_named() {
        let body = MultipartRelatedWriter::new()
            .write(one_part("X", b"abc"), &NamedDisposition)
            .unwrap();
        let boundary = body.boundary().to_string();
        let bytes = body.collect().await.unwrap();
        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"X\"; filename=\"X.dcm\"\r\nContent-Type: application/dicom\r\n\r\nabc\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(bytes, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_segments_and_order() {
        let mut parts = PartSet::new();
        parts
            .push(Part::bytes("first", "one"))
            .push(Part::stream(
                "second",
                stream::iter(vec![Ok(Bytes::from("tw")), Ok(Bytes::from("o"))]),
            ))
            .push(Part::bytes("first", "three"));
        let body = MultipartRelatedWriter::new()
            .write(parts, &NamedDisposition)
            .unwrap();
        let boundary = body.boundary().to_string();
        let bytes = body.collect().await.unwrap();

        let open = format!("--{}\r\n", boundary);
        let close = format!("--{}--\r\n", boundary);
        assert!(bytes.starts_with(open.as_bytes()));
        assert!(bytes.ends_with(close.as_bytes()));
        assert_eq!(count(&bytes, open.as_bytes()), 3);

        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let one = text.find("\r\n\r\none\r\n").unwrap();
        let two = text.find("\r\n\r\ntwo\r\n").unwrap();
        let three = text.find("\r\n\r\nthree\r\n").unwrap();
        assert!(one < two && two < three);
    }

    #[tokio::test]
    async fn test_part_headers_merged_before_policy() {
        let mut parts = PartSet::new();
        parts.push(
            Part::bytes("a", "x")
                .with_header("Content-Type", "text/plain")
                .with_header("Content-ID", "<1>")
                .with_header("Content-ID", "<2>"),
        );
        let body = MultipartRelatedWriter::new()
            .write(parts, &PlainDisposition)
            .unwrap();
        let bytes = body.collect().await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(
            "Content-Type: application/dicom\r\nContent-ID: <1>\r\nContent-ID: <2>\r\nContent-Disposition: form-data\r\n\r\n"
        ));
        assert!(!text.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_file_resource_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.dcm");
        std::fs::write(&path, b"FILE_SENT").unwrap();

        let mut parts = PartSet::new();
        parts.push(Part::file(
            "series",
            FileResource::new(&path).with_header("Content-Length", "9"),
        ));
        let body = MultipartRelatedWriter::new()
            .write(parts, &NamedDisposition)
            .unwrap();
        let text = String::from_utf8(body.collect().await.unwrap().to_vec()).unwrap();
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.contains("filename=\"series.dcm\""));
        assert!(text.contains("\r\n\r\nFILE_SENT\r\n"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_while_streaming() {
        let mut parts = PartSet::new();
        parts.push(Part::file("series", FileResource::new("/does/not/exist.dcm")));
        let body = MultipartRelatedWriter::new()
            .write(parts, &PlainDisposition)
            .unwrap();
        assert!(matches!(body.collect().await, Err(QureError::Io(_))));
    }

    #[test]
    fn test_text_is_unsupported_as_dicom() {
        let mut parts = PartSet::new();
        parts
            .push(Part::bytes("ok", "x"))
            .push(Part::text("comment", "hello"));
        let res = MultipartRelatedWriter::new().write(parts, &PlainDisposition);
        match res {
            Err(QureError::UnsupportedPartType(name)) => assert_eq!(name, "comment"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    struct TextPolicy;

    impl DispositionPolicy for TextPolicy {
        fn disposition(&self, _part_name: &str) -> String {
            "inline".to_string()
        }

        fn content_type(&self, _part_name: &str) -> String {
            "text/plain".to_string()
        }
    }

    #[tokio::test]
    async fn test_text_with_text_policy() {
        let mut parts = PartSet::new();
        parts.push(Part::text("comment", "héllo"));
        let body = MultipartRelatedWriter::new().write(parts, &TextPolicy).unwrap();
        let text = String::from_utf8(body.collect().await.unwrap().to_vec()).unwrap();
        assert!(text.contains("Content-Disposition: inline\r\nContent-Type: text/plain\r\n\r\nhéllo\r\n"));
    }

    #[tokio::test]
    async fn test_headers_precede_pending_body() {
        let token = Arc::new(());
        let guard = Arc::clone(&token);
        let body_chunks = stream::iter(vec![Ok::<_, QureError>(Bytes::from_static(b"partial"))])
            .chain(stream::pending())
            .map(move |chunk| {
                let _ = &guard;
                chunk
            });

        let mut parts = PartSet::new();
        parts.push(Part::stream("slow", body_chunks));
        let body = MultipartRelatedWriter::new()
            .write(parts, &PlainDisposition)
            .unwrap();
        let boundary = body.boundary().to_string();
        let mut stream = body.into_stream();

        let head = stream.next().await.unwrap().unwrap();
        let head = String::from_utf8(head.to_vec()).unwrap();
        assert!(head.starts_with(&format!("--{}\r\n", boundary)));
        assert!(head.ends_with(&format!("Content-Type: {}\r\n\r\n", APPLICATION_DICOM)));

        let partial = stream.next().await.unwrap().unwrap();
        assert_eq!(partial, Bytes::from_static(b"partial"));
        assert!(stream.next().now_or_never().is_none());

        // the transport gives up: everything held by the body goes away
        assert_eq!(Arc::strong_count(&token), 2);
        drop(stream);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[tokio::test]
    async fn test_round_trip_through_multer() {
        let binary: Vec<u8> = (0..=255u8).chain(b"\r\n--\r\n".iter().copied()).collect();
        let mut parts = PartSet::new();
        parts
            .push(Part::bytes("first", binary.clone()))
            .push(Part::bytes("second", "FILE_SENT").with_header("Content-ID", "<x>"));
        let body = MultipartRelatedWriter::new()
            .write(parts, &NamedDisposition)
            .unwrap();
        let boundary = body.boundary().to_string();

        let mut multipart = multer::Multipart::new(body.into_stream(), boundary);

        let field = multipart.next_field().await.unwrap().unwrap();
        assert_eq!(field.name(), Some("first"));
        assert_eq!(field.file_name(), Some("first.dcm"));
        assert_eq!(
            field.headers().get("content-type").unwrap(),
            "application/dicom"
        );
        assert_eq!(field.bytes().await.unwrap().as_ref(), binary.as_slice());

        let field = multipart.next_field().await.unwrap().unwrap();
        assert_eq!(field.name(), Some("second"));
        assert_eq!(field.headers().get("content-id").unwrap(), "<x>");
        assert_eq!(field.bytes().await.unwrap().as_ref(), b"FILE_SENT");

        assert!(multipart.next_field().await.unwrap().is_none());
    }
}
