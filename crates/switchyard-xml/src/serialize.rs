//! Serialization of gateway response types to S3-compatible XML.
//!
//! Conventions follow the AWS RestXml protocol:
//!
//! - Namespace: `http://s3.amazonaws.com/doc/2006-03-01/` on the root element
//! - Booleans: lowercase `true`/`false`
//! - Timestamps: ISO 8601 with milliseconds (`2006-02-03T16:45:09.000Z`)
//! - XML declaration: `<?xml version="1.0" encoding="UTF-8"?>`

use std::io::{self, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};
use switchyard_model::types::{
    BucketEntry, CompleteMultipartUploadResult, CopyObjectResult, InitiateMultipartUploadResult,
    ListAllMyBucketsResult, ListBucketResult, ListMultipartUploadsResult, ListPartsResult,
    MultipartUploadEntry, ObjectSummary, Owner, PartSummary,
};

use crate::error::XmlError;

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Trait for serializing gateway types to XML.
///
/// Implementors write their content as child elements inside the current XML
/// context. The root element name and namespace are handled by [`to_xml`].
///
/// Uses `io::Result` because `quick_xml::Writer` closures require
/// `io::Result<()>`.
pub trait S3Serialize {
    /// Serialize this value as XML child elements into the given writer.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if writing to the underlying writer fails.
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()>;
}

/// Serialize a value as a complete S3 XML document.
///
/// # Errors
///
/// Returns `XmlError` if serialization fails.
pub fn to_xml<T: S3Serialize>(root_element: &str, value: &T) -> Result<Vec<u8>, XmlError> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
        "1.0",
        Some("UTF-8"),
        None,
    )))?;

    writer
        .create_element(root_element)
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| value.serialize_xml(w))?;

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Helper functions for writing common XML patterns
// ---------------------------------------------------------------------------

/// Write a simple `<tag>text</tag>` element.
fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// Write `<tag>value</tag>` for a boolean.
fn write_bool<W: Write>(writer: &mut Writer<W>, tag: &str, value: bool) -> io::Result<()> {
    write_text_element(writer, tag, if value { "true" } else { "false" })
}

/// Write `<tag>iso8601</tag>` for a timestamp.
fn write_timestamp<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &chrono::DateTime<chrono::Utc>,
) -> io::Result<()> {
    write_text_element(writer, tag, &format_timestamp(value))
}

/// Format a `DateTime<Utc>` as ISO 8601 with milliseconds and `Z` suffix.
fn format_timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Write an `<Owner>`-shaped element under the given tag.
fn write_owner<W: Write>(writer: &mut Writer<W>, tag: &str, owner: &Owner) -> io::Result<()> {
    writer.create_element(tag).write_inner_content(|w| {
        write_text_element(w, "ID", &owner.id)?;
        write_text_element(w, "DisplayName", &owner.display_name)?;
        Ok(())
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

impl S3Serialize for ListAllMyBucketsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_owner(writer, "Owner", &self.owner)?;
        writer.create_element("Buckets").write_inner_content(|w| {
            for bucket in &self.buckets {
                write_bucket_entry(w, bucket)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

fn write_bucket_entry<W: Write>(writer: &mut Writer<W>, entry: &BucketEntry) -> io::Result<()> {
    writer.create_element("Bucket").write_inner_content(|w| {
        write_text_element(w, "Name", &entry.name)?;
        write_timestamp(w, "CreationDate", &entry.creation_date)?;
        Ok(())
    })?;
    Ok(())
}

impl S3Serialize for ListBucketResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Name", &self.name)?;
        write_text_element(writer, "Prefix", &self.prefix)?;
        write_text_element(writer, "Marker", &self.marker)?;
        write_text_element(writer, "MaxKeys", &self.max_keys.to_string())?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        for object in &self.contents {
            write_object_summary(writer, object)?;
        }
        Ok(())
    }
}

fn write_object_summary<W: Write>(writer: &mut Writer<W>, object: &ObjectSummary) -> io::Result<()> {
    writer.create_element("Contents").write_inner_content(|w| {
        write_text_element(w, "Key", &object.key)?;
        write_timestamp(w, "LastModified", &object.last_modified)?;
        write_text_element(w, "ETag", &object.etag)?;
        write_text_element(w, "Size", &object.size.to_string())?;
        write_text_element(w, "StorageClass", &object.storage_class)?;
        Ok(())
    })?;
    Ok(())
}

impl S3Serialize for InitiateMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        Ok(())
    }
}

impl S3Serialize for ListMultipartUploadsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "KeyMarker", &self.key_marker)?;
        write_text_element(writer, "UploadIdMarker", &self.upload_id_marker)?;
        write_text_element(writer, "NextKeyMarker", &self.next_key_marker)?;
        write_text_element(writer, "NextUploadIdMarker", &self.next_upload_id_marker)?;
        write_text_element(writer, "MaxUploads", &self.max_uploads.to_string())?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        for upload in &self.uploads {
            write_upload_entry(writer, upload)?;
        }
        Ok(())
    }
}

fn write_upload_entry<W: Write>(
    writer: &mut Writer<W>,
    upload: &MultipartUploadEntry,
) -> io::Result<()> {
    writer.create_element("Upload").write_inner_content(|w| {
        write_text_element(w, "Key", &upload.key)?;
        write_text_element(w, "UploadId", &upload.upload_id)?;
        write_owner(w, "Initiator", &upload.initiator)?;
        write_owner(w, "Owner", &upload.owner)?;
        write_text_element(w, "StorageClass", &upload.storage_class)?;
        write_timestamp(w, "Initiated", &upload.initiated)?;
        Ok(())
    })?;
    Ok(())
}

impl S3Serialize for ListPartsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        write_text_element(
            writer,
            "PartNumberMarker",
            &self.part_number_marker.to_string(),
        )?;
        write_text_element(
            writer,
            "NextPartNumberMarker",
            &self.next_part_number_marker.to_string(),
        )?;
        write_text_element(writer, "MaxParts", &self.max_parts.to_string())?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        for part in &self.parts {
            write_part_summary(writer, part)?;
        }
        Ok(())
    }
}

fn write_part_summary<W: Write>(writer: &mut Writer<W>, part: &PartSummary) -> io::Result<()> {
    writer.create_element("Part").write_inner_content(|w| {
        write_text_element(w, "PartNumber", &part.part_number.to_string())?;
        write_timestamp(w, "LastModified", &part.last_modified)?;
        write_text_element(w, "ETag", &part.etag)?;
        write_text_element(w, "Size", &part.size.to_string())?;
        Ok(())
    })?;
    Ok(())
}

impl S3Serialize for CompleteMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Location", &self.location)?;
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "ETag", &self.etag)?;
        Ok(())
    }
}

impl S3Serialize for CopyObjectResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_timestamp(writer, "LastModified", &self.last_modified)?;
        write_text_element(writer, "ETag", &self.etag)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use switchyard_model::types::Owner;

    use super::*;

    fn fixed_time() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc
            .with_ymd_and_hms(2025, 3, 14, 9, 26, 53)
            .unwrap()
    }

    #[test]
    fn test_should_emit_namespace_on_root() {
        let result = ListAllMyBucketsResult {
            owner: Owner::gateway(),
            buckets: vec![],
        };
        let xml = to_xml("ListAllMyBucketsResult", &result).expect("serialize");
        let s = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(s.contains(
            r#"<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#
        ));
        assert!(s.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    }

    #[test]
    fn test_should_list_buckets_with_entries() {
        let result = ListAllMyBucketsResult {
            owner: Owner::gateway(),
            buckets: vec![BucketEntry {
                name: "media".to_owned(),
                creation_date: fixed_time(),
            }],
        };
        let xml = to_xml("ListAllMyBucketsResult", &result).expect("serialize");
        let s = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(s.contains("<Name>media</Name>"));
        assert!(s.contains("<CreationDate>2025-03-14T09:26:53.000Z</CreationDate>"));
    }

    #[test]
    fn test_should_serialize_list_bucket_result() {
        let result = ListBucketResult {
            name: "media".to_owned(),
            prefix: "img/".to_owned(),
            marker: String::new(),
            max_keys: 1000,
            is_truncated: true,
            contents: vec![ObjectSummary {
                key: "img/a.png".to_owned(),
                last_modified: fixed_time(),
                etag: "\"abc123\"".to_owned(),
                size: 42,
                storage_class: "STANDARD".to_owned(),
            }],
        };
        let xml = to_xml("ListBucketResult", &result).expect("serialize");
        let s = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(s.contains("<Prefix>img/</Prefix>"));
        assert!(s.contains("<IsTruncated>true</IsTruncated>"));
        assert!(s.contains("<Key>img/a.png</Key>"));
        assert!(s.contains("<Size>42</Size>"));
    }

    #[test]
    fn test_should_serialize_copy_object_result() {
        let result = CopyObjectResult {
            last_modified: fixed_time(),
            etag: "\"17f2af\"".to_owned(),
        };
        let xml = to_xml("CopyObjectResult", &result).expect("serialize");
        let s = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(s.contains("<LastModified>2025-03-14T09:26:53.000Z</LastModified>"));
        assert!(s.contains("<ETag>&quot;17f2af&quot;</ETag>"));
    }

    #[test]
    fn test_should_serialize_initiate_result_with_virtual_bucket() {
        let result = InitiateMultipartUploadResult {
            bucket: "media".to_owned(),
            key: "video.mp4".to_owned(),
            upload_id: "2~abcdef".to_owned(),
        };
        let xml = to_xml("InitiateMultipartUploadResult", &result).expect("serialize");
        let s = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(s.contains("<Bucket>media</Bucket>"));
        assert!(s.contains("<UploadId>2~abcdef</UploadId>"));
    }
}
