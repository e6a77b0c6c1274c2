//! Parsing of the `CompleteMultipartUpload` request body.
//!
//! This is the only XML request body the gateway accepts. The document shape:
//!
//! ```xml
//! <CompleteMultipartUpload>
//!   <Part><PartNumber>1</PartNumber><ETag>"..."</ETag></Part>
//!   ...
//! </CompleteMultipartUpload>
//! ```

use quick_xml::Reader;
use quick_xml::events::Event;
use switchyard_model::types::CompletedPart;

use crate::error::XmlError;

/// Parse a `CompleteMultipartUpload` request body into its part list.
///
/// Parts are returned in document order; the caller sorts by part number
/// before talking to the backend.
///
/// # Errors
///
/// Returns `XmlError` when the document is not well-formed, the root element
/// is missing, or a `<Part>` lacks `PartNumber`/`ETag`.
pub fn parse_complete_multipart_upload(xml: &[u8]) -> Result<Vec<CompletedPart>, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    // Skip the declaration and find the root element.
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"CompleteMultipartUpload" => break,
            Event::Start(e) => {
                return Err(XmlError::ParseError(format!(
                    "unexpected root element: {}",
                    String::from_utf8_lossy(e.local_name().as_ref())
                )));
            }
            Event::Eof => {
                return Err(XmlError::MissingElement(
                    "CompleteMultipartUpload".to_owned(),
                ));
            }
            _ => {}
        }
    }

    let mut parts = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"Part" => {
                parts.push(read_part(&mut reader)?);
            }
            Event::End(e) if e.local_name().as_ref() == b"CompleteMultipartUpload" => break,
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF inside CompleteMultipartUpload".to_owned(),
                ));
            }
            _ => {}
        }
    }

    Ok(parts)
}

/// Read one `<Part>` element; the reader is positioned just after its start tag.
fn read_part(reader: &mut Reader<&[u8]>) -> Result<CompletedPart, XmlError> {
    let mut part_number: Option<i32> = None;
    let mut etag: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"PartNumber" => {
                    let text = read_text_content(reader)?;
                    let n = text.parse::<i32>().map_err(|e| {
                        XmlError::ParseError(format!("invalid PartNumber '{text}': {e}"))
                    })?;
                    part_number = Some(n);
                }
                b"ETag" => {
                    etag = Some(read_text_content(reader)?);
                }
                _ => skip_element(reader)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"Part" => break,
            Event::Eof => {
                return Err(XmlError::ParseError("unexpected EOF inside Part".to_owned()));
            }
            _ => {}
        }
    }

    Ok(CompletedPart {
        part_number: part_number.ok_or_else(|| XmlError::MissingElement("PartNumber".to_owned()))?,
        etag: etag.ok_or_else(|| XmlError::MissingElement("ETag".to_owned()))?,
    })
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let decoded = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF while reading text content".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF while skipping element".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_parts_in_document_order() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUpload>
  <Part><PartNumber>2</PartNumber><ETag>"bbb"</ETag></Part>
  <Part><PartNumber>1</PartNumber><ETag>"aaa"</ETag></Part>
</CompleteMultipartUpload>"#;

        let parts = parse_complete_multipart_upload(xml).expect("parse");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 2);
        assert_eq!(parts[0].etag, "\"bbb\"");
        assert_eq!(parts[1].part_number, 1);
    }

    #[test]
    fn test_should_parse_namespaced_document() {
        let xml = br#"<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Part><ETag>"aaa"</ETag><PartNumber>1</PartNumber></Part>
</CompleteMultipartUpload>"#;

        let parts = parse_complete_multipart_upload(xml).expect("parse");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, 1);
    }

    #[test]
    fn test_should_reject_part_without_etag() {
        let xml = br#"<CompleteMultipartUpload>
  <Part><PartNumber>1</PartNumber></Part>
</CompleteMultipartUpload>"#;

        let err = parse_complete_multipart_upload(xml).unwrap_err();
        assert!(matches!(err, XmlError::MissingElement(_)));
    }

    #[test]
    fn test_should_reject_wrong_root() {
        let xml = br"<AbortMultipartUpload></AbortMultipartUpload>";
        assert!(parse_complete_multipart_upload(xml).is_err());
    }

    #[test]
    fn test_should_reject_truncated_document() {
        let xml = br#"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber>"#;
        assert!(parse_complete_multipart_upload(xml).is_err());
    }

    #[test]
    fn test_should_ignore_unknown_part_children() {
        let xml = br#"<CompleteMultipartUpload>
  <Part>
    <PartNumber>3</PartNumber>
    <ChecksumCRC32>abcd</ChecksumCRC32>
    <ETag>"ccc"</ETag>
  </Part>
</CompleteMultipartUpload>"#;

        let parts = parse_complete_multipart_upload(xml).expect("parse");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, 3);
        assert_eq!(parts[0].etag, "\"ccc\"");
    }
}
