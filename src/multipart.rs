//! Multipart/form-data decoder for field-device report uploads.
//!
//! The Raspberry Pi firmware builds its upload bodies by hand, so this
//! decoder is deliberately lenient in the same places the devices are
//! sloppy: parts without a blank line after their headers are dropped
//! rather than rejected, whitespace-only fragments between boundaries are
//! ignored, and a file part that declares no `Content-Type` is assumed to
//! be a JPEG. It is not a general-purpose RFC 7578 parser and does not
//! support nested multiparts, `Content-Transfer-Encoding`, quoted boundary
//! parameters or escaped quotes in disposition values.
//!
//! Duplicate part names are not an error; the last occurrence wins.

use std::collections::HashMap;
use std::io::Read;

use thiserror::Error;

/// Content type assumed for file parts that do not declare one.
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "image/jpeg";

const MULTIPART_MARKER: &str = "multipart/form-data";
const BOUNDARY_PARAM: &str = "boundary=";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on the body buffer preallocated from the declared length.
const PREALLOC_CAP: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("content type is not multipart/form-data")]
    NotMultipart,
    #[error("multipart content type has no boundary parameter")]
    MissingBoundary,
    #[error("part headers are not valid UTF-8")]
    HeaderEncoding(#[source] std::str::Utf8Error),
    #[error("text field {0:?} is not valid UTF-8")]
    FieldEncoding(String),
    #[error("failed to read request body")]
    Io(#[from] std::io::Error),
}

/// One uploaded file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Client-declared filename, empty when the part did not carry one.
    pub filename: String,
    /// Part content with the trailing CRLF stripped.
    pub content: Vec<u8>,
    /// Declared part content type, [`DEFAULT_FILE_CONTENT_TYPE`] when absent.
    pub content_type: String,
}

/// A decoded multipart body: named text fields and named file parts.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, FilePart>,
}

impl MultipartForm {
    /// Reads up to `content_length` bytes from `input` and decodes them.
    ///
    /// The read is bounded: bytes past the declared length are never
    /// consumed, and a body shorter than declared is decoded as-is.
    pub fn read_from(
        content_type: &str,
        content_length: usize,
        input: impl Read,
    ) -> Result<Self, MultipartError> {
        // The declared length is untrusted; cap the preallocation.
        let mut body = Vec::with_capacity(content_length.min(PREALLOC_CAP));
        input.take(content_length as u64).read_to_end(&mut body)?;
        Self::parse(content_type, &body)
    }

    /// Decodes a fully buffered multipart body.
    ///
    /// The content type must contain `multipart/form-data` and a
    /// `boundary=` parameter. A body containing no boundary at all decodes
    /// to an empty form rather than an error.
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self, MultipartError> {
        if !content_type.contains(MULTIPART_MARKER) {
            return Err(MultipartError::NotMultipart);
        }
        // The boundary value is everything after the first `boundary=`,
        // taken verbatim. The device firmware never quotes it or appends
        // further parameters.
        let boundary = content_type
            .split_once(BOUNDARY_PARAM)
            .map(|(_, rest)| rest)
            .ok_or(MultipartError::MissingBoundary)?;

        let delimiter = [b"--", boundary.as_bytes()].concat();
        let segments = split_on(body, &delimiter);

        let mut form = MultipartForm::default();
        // The first segment is the preamble and the last is the trailing
        // `--` terminator; parts live in between.
        let parts: &[&[u8]] = if segments.len() >= 2 {
            &segments[1..segments.len() - 1]
        } else {
            &[]
        };
        for part in parts {
            form.decode_part(part)?;
        }
        Ok(form)
    }

    fn decode_part(&mut self, part: &[u8]) -> Result<(), MultipartError> {
        if part.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(());
        }
        // No blank line between headers and content: drop the fragment
        // instead of failing the whole request.
        let Some(header_end) = find(part, HEADER_SEPARATOR) else {
            return Ok(());
        };
        let headers =
            std::str::from_utf8(&part[..header_end]).map_err(MultipartError::HeaderEncoding)?;
        let mut content = &part[header_end + HEADER_SEPARATOR.len()..];

        if !headers.contains("Content-Disposition: form-data") {
            return Ok(());
        }
        let Some(name) = quoted_param(headers, "name=\"") else {
            return Ok(());
        };

        // Part content is terminated by exactly one CRLF before the next
        // boundary; anything beyond that belongs to the content itself.
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }

        if headers.contains("filename=") {
            let filename = quoted_param(headers, "filename=\"").unwrap_or_default();
            let content_type = part_content_type(headers).unwrap_or(DEFAULT_FILE_CONTENT_TYPE);
            self.files.insert(
                name.to_owned(),
                FilePart {
                    filename: filename.to_owned(),
                    content: content.to_vec(),
                    content_type: content_type.to_owned(),
                },
            );
        } else {
            let text = std::str::from_utf8(content)
                .map_err(|_| MultipartError::FieldEncoding(name.to_owned()))?;
            self.fields.insert(name.to_owned(), text.to_owned());
        }
        Ok(())
    }
}

/// Byte-wise substring search.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Splits `haystack` on every occurrence of `delimiter`.
fn split_on<'a>(haystack: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(at) = find(rest, delimiter) {
        segments.push(&rest[..at]);
        rest = &rest[at + delimiter.len()..];
    }
    segments.push(rest);
    segments
}

/// Returns the text between `token` and the next `"` in `headers`.
///
/// This is a literal scan, not a header-parameter grammar: it finds the
/// first occurrence of `token` anywhere in the header block.
fn quoted_param<'a>(headers: &'a str, token: &str) -> Option<&'a str> {
    let start = headers.find(token)? + token.len();
    let end = headers[start..].find('"')? + start;
    Some(&headers[start..end])
}

/// Extracts the part's own `Content-Type` header value, if declared.
fn part_content_type(headers: &str) -> Option<&str> {
    headers
        .lines()
        .find(|line| line.contains("Content-Type:"))
        .and_then(|line| line.split_once("Content-Type: "))
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const BOUNDARY: &str = "X-RPI-UPLOAD";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    fn field_part(name: &str, value: &str) -> Vec<u8> {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .into_bytes()
    }

    fn file_part(name: &str, filename: &str, content_type: Option<&str>, content: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
        )
        .into_bytes();
        if let Some(ct) = content_type {
            part.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        part.extend_from_slice(b"\r\n");
        part.extend_from_slice(content);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn terminator() -> Vec<u8> {
        format!("--{BOUNDARY}--\r\n").into_bytes()
    }

    fn body_of(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(part);
        }
        body.extend_from_slice(&terminator());
        body
    }

    #[test]
    fn test_decodes_fields_and_file() {
        let body = body_of(&[
            field_part("raspberry_id", "rpi-007"),
            field_part("temperature", "28.5"),
            file_part("image", "capture.jpg", Some("image/jpeg"), b"\xFF\xD8\xFF\xE0 jpeg bytes"),
        ]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields.len(), 2);
        assert_eq!(form.files.len(), 1);
        assert_eq!(form.fields["raspberry_id"], "rpi-007");
        assert_eq!(form.fields["temperature"], "28.5");
        let image = &form.files["image"];
        assert_eq!(image.filename, "capture.jpg");
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.content, b"\xFF\xD8\xFF\xE0 jpeg bytes");
    }

    #[test]
    fn test_binary_content_preserved_byte_for_byte() {
        // Content containing CRLFs and boundary-like noise must survive as
        // long as the real delimiter never appears inside it.
        let payload: Vec<u8> = (0u8..=255).chain([b'\r', b'\n', b'\r', b'\n']).collect();
        let body = body_of(&[file_part("image", "x.bin", None, &payload)]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.files["image"].content, payload);
    }

    #[test]
    fn test_missing_content_type_defaults_to_jpeg() {
        let body = body_of(&[file_part("image", "capture.jpg", None, b"data")]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.files["image"].content_type, DEFAULT_FILE_CONTENT_TYPE);
    }

    #[test]
    fn test_strips_exactly_one_trailing_crlf() {
        // Content that itself ends in CRLF keeps its own CRLF.
        let body = body_of(&[file_part("image", "x.bin", None, b"tail\r\n")]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.files["image"].content, b"tail\r\n");
    }

    #[test]
    fn test_empty_field_value_decodes_to_empty_string() {
        let body = body_of(&[field_part("name", "")]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields["name"], "");
    }

    #[test]
    fn test_last_duplicate_name_wins() {
        let body = body_of(&[
            field_part("raspberry_id", "first"),
            field_part("raspberry_id", "second"),
        ]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields["raspberry_id"], "second");
    }

    #[test]
    fn test_part_without_header_separator_is_dropped() {
        let mut parts = vec![field_part("raspberry_id", "rpi-007")];
        parts.push(format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"broken\"").into_bytes());
        let body = body_of(&parts);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields.len(), 1);
        assert!(!form.fields.contains_key("broken"));
    }

    #[test]
    fn test_whitespace_only_fragment_is_ignored() {
        let mut parts = vec![field_part("raspberry_id", "rpi-007")];
        parts.push(format!("--{BOUNDARY}\r\n  \r\n").into_bytes());
        let body = body_of(&parts);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields.len(), 1);
    }

    #[test]
    fn test_part_without_form_data_disposition_is_dropped() {
        let mut parts = vec![field_part("raspberry_id", "rpi-007")];
        parts.push(
            format!("--{BOUNDARY}\r\nContent-Disposition: attachment; name=\"x\"\r\n\r\nv\r\n")
                .into_bytes(),
        );
        let body = body_of(&parts);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields.len(), 1);
    }

    #[test]
    fn test_non_multipart_content_type_rejected() {
        let err = MultipartForm::parse("application/json", b"{}").unwrap_err();
        assert!(matches!(err, MultipartError::NotMultipart));
    }

    #[test]
    fn test_missing_boundary_rejected() {
        let err = MultipartForm::parse("multipart/form-data", b"").unwrap_err();
        assert!(matches!(err, MultipartError::MissingBoundary));
    }

    #[test]
    fn test_body_without_boundary_decodes_to_empty_form() {
        let form = MultipartForm::parse(&content_type(), b"no delimiters here").unwrap();
        assert!(form.fields.is_empty());
        assert!(form.files.is_empty());
    }

    #[test]
    fn test_empty_body_decodes_to_empty_form() {
        let form = MultipartForm::parse(&content_type(), b"").unwrap();
        assert!(form.fields.is_empty());
        assert!(form.files.is_empty());
    }

    #[test]
    fn test_invalid_utf8_in_field_value_rejected() {
        let mut part =
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"location\"\r\n\r\n")
                .into_bytes();
        part.extend_from_slice(&[0xFF, 0xFE]);
        part.extend_from_slice(b"\r\n");
        let body = body_of(&[part]);

        let err = MultipartForm::parse(&content_type(), &body).unwrap_err();

        assert!(matches!(err, MultipartError::FieldEncoding(name) if name == "location"));
    }

    #[test]
    fn test_invalid_utf8_in_headers_rejected() {
        let mut part = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"").into_bytes();
        part.extend_from_slice(&[0xFF]);
        part.extend_from_slice(b"\"\r\n\r\nv\r\n");
        let body = body_of(&[part]);

        let err = MultipartForm::parse(&content_type(), &body).unwrap_err();

        assert!(matches!(err, MultipartError::HeaderEncoding(_)));
    }

    #[test]
    fn test_quoted_param_extracts_simple_quoted_values() {
        let headers = "Content-Disposition: form-data; name=\"image\"; filename=\"capture.jpg\"";

        assert_eq!(quoted_param(headers, "name=\""), Some("image"));
        assert_eq!(quoted_param(headers, "filename=\""), Some("capture.jpg"));
        assert_eq!(quoted_param(headers, "missing=\""), None);
    }

    #[test]
    fn test_field_values_keep_utf8_text() {
        let body = body_of(&[field_part("location", "Belén, Iquitos")]);

        let form = MultipartForm::parse(&content_type(), &body).unwrap();

        assert_eq!(form.fields["location"], "Belén, Iquitos");
    }

    #[test]
    fn test_read_from_stops_at_declared_length() {
        let body = body_of(&[field_part("raspberry_id", "rpi-007")]);
        let mut stream = body.clone();
        stream.extend_from_slice(b"TRAILING GARBAGE PAST THE DECLARED LENGTH");

        let form =
            MultipartForm::read_from(&content_type(), body.len(), Cursor::new(stream)).unwrap();

        assert_eq!(form.fields["raspberry_id"], "rpi-007");
    }

    #[test]
    fn test_read_from_accepts_short_body() {
        let body = body_of(&[field_part("raspberry_id", "rpi-007")]);

        let form =
            MultipartForm::read_from(&content_type(), body.len() + 1000, Cursor::new(body)).unwrap();

        assert_eq!(form.fields["raspberry_id"], "rpi-007");
    }
}
