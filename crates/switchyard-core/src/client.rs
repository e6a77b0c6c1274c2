//! Signed REST client for real S3 backends.
//!
//! The gateway talks to backends in two ways: bulk object bytes travel over
//! presigned URLs (see `switchyard-auth`), while control operations — health
//! probes, stats listings, and the multipart lifecycle — go through this
//! client with SigV4 header signing. The client speaks the minimal S3 REST
//! subset the gateway needs and parses responses with quick-xml.

use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use switchyard_auth::credentials::Credentials;
use switchyard_auth::sigv4::{UNSIGNED_PAYLOAD, sha256_hex, sign_headers};
use tracing::debug;

use crate::config::BucketConfig;

/// Timeout for list calls (health probes override this with their own).
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for multipart control calls and HEAD.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from backend REST calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with an S3 error document.
    #[error("backend returned {status} {code}: {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// S3 error code from the body, empty when absent.
        code: String,
        /// S3 error message from the body.
        message: String,
    },

    /// The endpoint URL could not be interpreted.
    #[error("invalid backend endpoint: {0}")]
    Endpoint(String),

    /// The backend response was not the expected document.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// The S3 error code when the backend sent one.
    #[must_use]
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default)]
pub struct ListObjectsPage {
    /// `(key, size)` for each object on the page.
    pub objects: Vec<(String, i64)>,
    /// Whether more pages follow.
    pub is_truncated: bool,
    /// Continuation token for the next page.
    pub next_continuation_token: Option<String>,
}

/// One backend part entry from `ListParts`.
#[derive(Debug)]
pub struct BackendPart {
    /// Part number.
    pub part_number: i32,
    /// Last-modified time.
    pub last_modified: DateTime<Utc>,
    /// Entity tag.
    pub etag: String,
    /// Size in bytes.
    pub size: i64,
}

/// Parsed `ListParts` response.
#[derive(Debug, Default)]
pub struct ListPartsPage {
    /// The listed parts.
    pub parts: Vec<BackendPart>,
    /// Whether more parts follow.
    pub is_truncated: bool,
    /// Marker for the next page.
    pub next_part_number_marker: i32,
}

/// One in-progress upload from `ListMultipartUploads`.
#[derive(Debug)]
pub struct BackendUpload {
    /// Object key.
    pub key: String,
    /// Upload ID.
    pub upload_id: String,
    /// Initiation time.
    pub initiated: DateTime<Utc>,
}

/// Signed REST client bound to one backend bucket.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    scheme: String,
    authority: String,
    bucket: String,
    region: String,
    credentials: Credentials,
    path_style: bool,
}

impl BackendClient {
    /// Build a client from a real backend's config.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Endpoint`] when the endpoint URL is unusable.
    pub fn new(http: reqwest::Client, config: &BucketConfig) -> Result<Self, ClientError> {
        let (scheme, rest) = match config.endpoint.split_once("://") {
            Some(("http", rest)) => ("http", rest),
            Some(("https", rest)) => ("https", rest),
            Some((other, _)) => return Err(ClientError::Endpoint(other.to_owned())),
            None => ("https", config.endpoint.as_str()),
        };
        let authority = rest.trim_end_matches('/');
        if authority.is_empty() {
            return Err(ClientError::Endpoint(config.endpoint.clone()));
        }

        Ok(Self {
            http,
            scheme: scheme.to_owned(),
            authority: authority.to_owned(),
            bucket: config.name.clone(),
            region: config.region.clone(),
            credentials: Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
            ),
            path_style: config.path_style,
        })
    }

    /// The endpoint authority this client talks to.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The backend credential pair (shared with presigning).
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn host_and_path(&self, key: &str) -> (String, String) {
        let encoded_key = encode_key(key);
        if self.path_style {
            let path = if encoded_key.is_empty() {
                format!("/{}", self.bucket)
            } else {
                format!("/{}/{encoded_key}", self.bucket)
            };
            (self.authority.clone(), path)
        } else {
            let host = format!("{}.{}", self.bucket, self.authority);
            let path = if encoded_key.is_empty() {
                "/".to_owned()
            } else {
                format!("/{encoded_key}")
            };
            (host, path)
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let (host, path) = self.host_and_path(key);

        let query_string = query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={}", switchyard_auth::canonical::uri_encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = match &body {
            Some(bytes) => sha256_hex(bytes),
            None => UNSIGNED_PAYLOAD.to_owned(),
        };

        let (amz_date, content_sha, authorization) = sign_headers(
            method.as_str(),
            &host,
            &path,
            &query_string,
            &self.region,
            &self.credentials,
            &payload_hash,
            Utc::now(),
        );

        let url = if query_string.is_empty() {
            format!("{}://{host}{path}", self.scheme)
        } else {
            format!("{}://{host}{path}?{query_string}", self.scheme)
        };

        debug!(method = %method, url = %url, "backend request");

        let mut request = self
            .http
            .request(method, &url)
            .timeout(timeout)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", content_sha)
            .header(reqwest::header::AUTHORIZATION, authorization);
        if let Some(bytes) = body {
            request = request.body(bytes);
        }

        Ok(request.send().await?)
    }

    /// Turn a non-2xx response into [`ClientError::Api`].
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let status = status.as_u16();
        let body = response.bytes().await.unwrap_or_default();
        let (code, message) = parse_error_document(&body);
        Err(ClientError::Api {
            status,
            code,
            message,
        })
    }

    /// One page of `ListObjectsV2`. `max_keys` of 1 makes this the cheapest
    /// liveness probe the S3 API offers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn list_objects_page(
        &self,
        continuation_token: Option<&str>,
        max_keys: Option<i32>,
        timeout: Option<Duration>,
    ) -> Result<ListObjectsPage, ClientError> {
        let mut query: Vec<(String, String)> = vec![("list-type".to_owned(), "2".to_owned())];
        if let Some(n) = max_keys {
            query.push(("max-keys".to_owned(), n.to_string()));
        }
        if let Some(token) = continuation_token {
            query.push(("continuation-token".to_owned(), token.to_owned()));
        }

        let response = self
            .send(
                reqwest::Method::GET,
                "",
                &query,
                None,
                timeout.unwrap_or(LIST_TIMEOUT),
            )
            .await?;
        let body = Self::check(response).await?.bytes().await?;
        parse_list_objects(&body)
    }

    /// `HeadObject`: the object's content length.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn head_object(&self, key: &str) -> Result<i64, ClientError> {
        let response = self
            .send(reqwest::Method::HEAD, key, &[], None, CONTROL_TIMEOUT)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: String::new(),
                message: "HEAD failed".to_owned(),
            });
        }
        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(length)
    }

    /// `CreateMultipartUpload`: the backend-issued upload ID.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn create_multipart_upload(&self, key: &str) -> Result<String, ClientError> {
        let query = vec![("uploads".to_owned(), String::new())];
        let response = self
            .send(reqwest::Method::POST, key, &query, None, CONTROL_TIMEOUT)
            .await?;
        let body = Self::check(response).await?.bytes().await?;
        extract_element(&body, "UploadId")
            .ok_or_else(|| ClientError::Malformed("no UploadId in response".to_owned()))
    }

    /// `CompleteMultipartUpload`: returns the final ETag.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors; the
    /// backend's `Code`/`Message` are preserved in [`ClientError::Api`].
    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> Result<String, ClientError> {
        let query = vec![("uploadId".to_owned(), upload_id.to_owned())];
        let body = build_complete_body(parts);
        let response = self
            .send(
                reqwest::Method::POST,
                key,
                &query,
                Some(body),
                CONTROL_TIMEOUT,
            )
            .await?;
        let body = Self::check(response).await?.bytes().await?;

        // Some backends answer 200 with an <Error> body; treat that as a
        // failure too.
        let (code, message) = parse_error_document(&body);
        if !code.is_empty() {
            return Err(ClientError::Api {
                status: 200,
                code,
                message,
            });
        }

        extract_element(&body, "ETag")
            .ok_or_else(|| ClientError::Malformed("no ETag in response".to_owned()))
    }

    /// `AbortMultipartUpload`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        let query = vec![("uploadId".to_owned(), upload_id.to_owned())];
        let response = self
            .send(reqwest::Method::DELETE, key, &query, None, CONTROL_TIMEOUT)
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `ListParts` for an in-progress upload.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_number_marker: i32,
        max_parts: i32,
    ) -> Result<ListPartsPage, ClientError> {
        let query = vec![
            ("uploadId".to_owned(), upload_id.to_owned()),
            (
                "part-number-marker".to_owned(),
                part_number_marker.to_string(),
            ),
            ("max-parts".to_owned(), max_parts.to_string()),
        ];
        let response = self
            .send(reqwest::Method::GET, key, &query, None, CONTROL_TIMEOUT)
            .await?;
        let body = Self::check(response).await?.bytes().await?;
        parse_list_parts(&body)
    }

    /// `ListMultipartUploads` on the whole bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failures or backend errors.
    pub async fn list_multipart_uploads(
        &self,
        prefix: &str,
        max_uploads: i32,
    ) -> Result<Vec<BackendUpload>, ClientError> {
        let mut query = vec![
            ("uploads".to_owned(), String::new()),
            ("max-uploads".to_owned(), max_uploads.to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_owned(), prefix.to_owned()));
        }
        let response = self
            .send(reqwest::Method::GET, "", &query, None, CONTROL_TIMEOUT)
            .await?;
        let body = Self::check(response).await?.bytes().await?;
        parse_list_uploads(&body)
    }
}

fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    key.split('/')
        .map(switchyard_auth::canonical::uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the `<CompleteMultipartUpload>` request body.
fn build_complete_body(parts: &[(i32, String)]) -> Vec<u8> {
    use quick_xml::Writer;
    use quick_xml::events::BytesText;

    let mut buf = Vec::with_capacity(256);
    let mut writer = Writer::new(&mut buf);
    writer
        .create_element("CompleteMultipartUpload")
        .write_inner_content(|w| {
            for (number, etag) in parts {
                w.create_element("Part").write_inner_content(|pw| {
                    pw.create_element("PartNumber")
                        .write_text_content(BytesText::new(&number.to_string()))?;
                    pw.create_element("ETag")
                        .write_text_content(BytesText::new(etag))?;
                    Ok(())
                })?;
            }
            Ok(())
        })
        .expect("writing XML to Vec cannot fail");
    buf
}

/// Pull the text of the first `wanted` element out of an XML document.
fn extract_element(xml: &[u8], wanted: &str) -> Option<String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.local_name().as_ref() == wanted.as_bytes() => inside = true,
            Event::Text(e) if inside => {
                let decoded = reader.decoder().decode(&e).ok()?;
                return quick_xml::escape::unescape(&decoded)
                    .ok()
                    .map(|s| s.into_owned());
            }
            Event::End(_) if inside => return Some(String::new()),
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Extract `(Code, Message)` from an S3 `<Error>` document; empty strings
/// when absent.
fn parse_error_document(xml: &[u8]) -> (String, String) {
    let code = extract_element(xml, "Code").unwrap_or_default();
    let message = extract_element(xml, "Message").unwrap_or_default();
    (code, message)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ").map(|n| n.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

fn parse_list_objects(xml: &[u8]) -> Result<ListObjectsPage, ClientError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListObjectsPage::default();
    let mut in_contents = false;
    let mut current: Option<&str> = None;
    let mut key = String::new();
    let mut size = 0_i64;

    loop {
        match reader
            .read_event()
            .map_err(|e| ClientError::Malformed(e.to_string()))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Contents" => {
                    in_contents = true;
                    key.clear();
                    size = 0;
                }
                b"Key" if in_contents => current = Some("key"),
                b"Size" if in_contents => current = Some("size"),
                b"IsTruncated" => current = Some("truncated"),
                b"NextContinuationToken" => current = Some("token"),
                _ => current = None,
            },
            Event::Text(e) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| ClientError::Malformed(err.to_string()))?;
                match current {
                    Some("key") => key = text.into_owned(),
                    Some("size") => size = text.parse().unwrap_or(0),
                    Some("truncated") => page.is_truncated = text == "true",
                    Some("token") => page.next_continuation_token = Some(text.into_owned()),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"Contents" {
                    in_contents = false;
                    page.objects.push((std::mem::take(&mut key), size));
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}

fn parse_list_parts(xml: &[u8]) -> Result<ListPartsPage, ClientError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPartsPage::default();
    let mut in_part = false;
    let mut current: Option<&str> = None;
    let mut number = 0_i32;
    let mut modified = Utc::now();
    let mut etag = String::new();
    let mut size = 0_i64;

    loop {
        match reader
            .read_event()
            .map_err(|e| ClientError::Malformed(e.to_string()))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Part" => {
                    in_part = true;
                    number = 0;
                    etag.clear();
                    size = 0;
                }
                b"PartNumber" if in_part => current = Some("number"),
                b"LastModified" if in_part => current = Some("modified"),
                b"ETag" if in_part => current = Some("etag"),
                b"Size" if in_part => current = Some("size"),
                b"IsTruncated" => current = Some("truncated"),
                b"NextPartNumberMarker" => current = Some("marker"),
                _ => current = None,
            },
            Event::Text(e) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| ClientError::Malformed(err.to_string()))?;
                match current {
                    Some("number") => number = text.parse().unwrap_or(0),
                    Some("modified") => modified = parse_timestamp(&text),
                    Some("etag") => {
                        etag = quick_xml::escape::unescape(&text)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| text.into_owned());
                    }
                    Some("size") => size = text.parse().unwrap_or(0),
                    Some("truncated") => page.is_truncated = text == "true",
                    Some("marker") => page.next_part_number_marker = text.parse().unwrap_or(0),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"Part" {
                    in_part = false;
                    page.parts.push(BackendPart {
                        part_number: number,
                        last_modified: modified,
                        etag: std::mem::take(&mut etag),
                        size,
                    });
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}

fn parse_list_uploads(xml: &[u8]) -> Result<Vec<BackendUpload>, ClientError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut uploads = Vec::new();
    let mut in_upload = false;
    let mut current: Option<&str> = None;
    let mut key = String::new();
    let mut upload_id = String::new();
    let mut initiated = Utc::now();

    loop {
        match reader
            .read_event()
            .map_err(|e| ClientError::Malformed(e.to_string()))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Upload" => {
                    in_upload = true;
                    key.clear();
                    upload_id.clear();
                }
                b"Key" if in_upload => current = Some("key"),
                b"UploadId" if in_upload => current = Some("id"),
                b"Initiated" if in_upload => current = Some("initiated"),
                _ => current = None,
            },
            Event::Text(e) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| ClientError::Malformed(err.to_string()))?;
                match current {
                    Some("key") => key = text.into_owned(),
                    Some("id") => upload_id = text.into_owned(),
                    Some("initiated") => initiated = parse_timestamp(&text),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"Upload" {
                    in_upload = false;
                    uploads.push(BackendUpload {
                        key: std::mem::take(&mut key),
                        upload_id: std::mem::take(&mut upload_id),
                        initiated,
                    });
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(uploads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_list_objects_page() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>pool-a</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok123</NextContinuationToken>
  <Contents><Key>a.txt</Key><Size>10</Size></Contents>
  <Contents><Key>b.txt</Key><Size>20</Size></Contents>
</ListBucketResult>"#;

        let page = parse_list_objects(xml).expect("parse");
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0], ("a.txt".to_owned(), 10));
        assert_eq!(page.objects[1], ("b.txt".to_owned(), 20));
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("tok123"));
    }

    #[test]
    fn test_should_parse_error_document() {
        let xml = br#"<Error><Code>NoSuchUpload</Code><Message>gone</Message></Error>"#;
        let (code, message) = parse_error_document(xml);
        assert_eq!(code, "NoSuchUpload");
        assert_eq!(message, "gone");
    }

    #[test]
    fn test_should_extract_upload_id() {
        let xml = br#"<InitiateMultipartUploadResult>
  <Bucket>pool-a</Bucket><Key>big.dat</Key><UploadId>2~xyz</UploadId>
</InitiateMultipartUploadResult>"#;
        assert_eq!(extract_element(xml, "UploadId").as_deref(), Some("2~xyz"));
        assert_eq!(extract_element(xml, "Missing"), None);
    }

    #[test]
    fn test_should_parse_list_parts() {
        let xml = br#"<ListPartsResult>
  <IsTruncated>false</IsTruncated>
  <Part>
    <PartNumber>1</PartNumber>
    <LastModified>2025-02-01T10:00:00.000Z</LastModified>
    <ETag>&quot;etag1&quot;</ETag>
    <Size>5242880</Size>
  </Part>
</ListPartsResult>"#;

        let page = parse_list_parts(xml).expect("parse");
        assert_eq!(page.parts.len(), 1);
        assert_eq!(page.parts[0].part_number, 1);
        assert_eq!(page.parts[0].etag, "\"etag1\"");
        assert_eq!(page.parts[0].size, 5_242_880);
        assert!(!page.is_truncated);
    }

    #[test]
    fn test_should_parse_list_uploads() {
        let xml = br#"<ListMultipartUploadsResult>
  <Upload>
    <Key>big.dat</Key>
    <UploadId>2~abc</UploadId>
    <Initiated>2025-02-01T10:00:00.000Z</Initiated>
  </Upload>
</ListMultipartUploadsResult>"#;

        let uploads = parse_list_uploads(xml).expect("parse");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].key, "big.dat");
        assert_eq!(uploads[0].upload_id, "2~abc");
    }

    #[test]
    fn test_should_build_complete_body_in_given_order() {
        let parts = vec![(1, "\"a\"".to_owned()), (2, "\"b\"".to_owned())];
        let body = build_complete_body(&parts);
        let s = String::from_utf8(body).expect("utf8");
        assert!(s.starts_with("<CompleteMultipartUpload>"));
        let first = s.find("<PartNumber>1</PartNumber>").expect("part 1");
        let second = s.find("<PartNumber>2</PartNumber>").expect("part 2");
        assert!(first < second);
    }

    #[test]
    fn test_should_build_path_style_and_vhost_paths() {
        let http = reqwest::Client::new();
        let mut config = BucketConfig {
            name: "pool-a".to_owned(),
            endpoint: "http://minio.internal:9000".to_owned(),
            access_key_id: "AK".to_owned(),
            secret_access_key: "SK".to_owned(),
            path_style: true,
            ..BucketConfig::default()
        };

        let client = BackendClient::new(http.clone(), &config).expect("client");
        assert_eq!(
            client.host_and_path("a b.txt"),
            ("minio.internal:9000".to_owned(), "/pool-a/a%20b.txt".to_owned())
        );

        config.path_style = false;
        let client = BackendClient::new(http, &config).expect("client");
        assert_eq!(
            client.host_and_path(""),
            ("pool-a.minio.internal:9000".to_owned(), "/".to_owned())
        );
    }

    #[test]
    fn test_should_reject_bad_endpoint() {
        let config = BucketConfig {
            name: "x".to_owned(),
            endpoint: "ftp://nope".to_owned(),
            ..BucketConfig::default()
        };
        assert!(BackendClient::new(reqwest::Client::new(), &config).is_err());
    }
}
