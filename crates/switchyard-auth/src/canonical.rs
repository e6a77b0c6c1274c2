//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request is the newline-joined form AWS specifies:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Query-string values are taken exactly as they appear on the wire: clients
//! disagree about encoding `:` and `*`, and the signature only verifies if we
//! canonicalize what the client actually signed.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters percent-encoded in URI path segments per SigV4: everything but
/// RFC 3986 unreserved. Slashes between segments are preserved by the caller.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Assemble the full canonical request string.
#[must_use]
pub fn canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let canonical_uri = canonical_uri(uri);
    let canonical_query = canonical_query_string(query_string);
    let canonical_headers = canonical_headers(headers, signed_headers);
    let signed = signed_headers_string(signed_headers);

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed}\n{payload_hash}"
    )
}

/// Canonicalize a URI path: decode then re-encode each segment so raw and
/// pre-encoded inputs produce the same bytes. Empty paths become `/`.
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            uri_encode(&decoded)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Sort query parameters by key, then value; values are preserved byte for
/// byte (no decode/re-encode round trip).
#[must_use]
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase, trim, and sort the signed headers into the canonical block.
/// No trailing newline; the request format adds the separating blank line.
#[must_use]
pub fn canonical_headers(headers: &[(String, String)], signed_headers: &[String]) -> String {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let lower_name = name.to_lowercase();
        let trimmed = collapse_whitespace(value.trim());
        header_map
            .entry(lower_name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed);
            })
            .or_insert(trimmed);
    }

    let mut sorted: Vec<&String> = signed_headers.iter().collect();
    sorted.sort_unstable();

    sorted
        .iter()
        .filter_map(|name| {
            header_map
                .get(name.as_str())
                .map(|value| format!("{name}:{value}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Semicolon-joined, sorted, lowercase signed-header names.
#[must_use]
pub fn signed_headers_string(signed_headers: &[String]) -> String {
    let mut sorted: Vec<&str> = signed_headers.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(";")
}

/// URI-encode a single path or query component with the SigV4 character set.
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_should_normalize_empty_path_to_slash() {
        assert_eq!(canonical_uri(""), "/");
        assert_eq!(canonical_uri("/"), "/");
    }

    #[test]
    fn test_should_not_double_encode_path() {
        assert_eq!(canonical_uri("/hello world"), "/hello%20world");
        assert_eq!(canonical_uri("/hello%20world"), "/hello%20world");
    }

    #[test]
    fn test_should_sort_query_parameters() {
        assert_eq!(canonical_query_string("b=2&a=1&c=3"), "a=1&b=2&c=3");
        assert_eq!(canonical_query_string(""), "");
    }

    #[test]
    fn test_should_preserve_raw_query_values() {
        assert_eq!(
            canonical_query_string("events=s3%3AObjectCreated%3A%2A&prefix=test"),
            "events=s3%3AObjectCreated%3A%2A&prefix=test"
        );
        assert_eq!(
            canonical_query_string("events=s3:ObjectCreated:*&prefix=test"),
            "events=s3:ObjectCreated:*&prefix=test"
        );
    }

    #[test]
    fn test_should_sort_duplicate_query_keys_by_value() {
        assert_eq!(
            canonical_query_string("e=b&e=a&p=1"),
            "e=a&e=b&p=1"
        );
    }

    #[test]
    fn test_should_lowercase_and_collapse_headers() {
        let headers = owned(&[("Host", "  example.com  "), ("X-Custom", "a   b   c")]);
        let signed = names(&["host", "x-custom"]);
        assert_eq!(
            canonical_headers(&headers, &signed),
            "host:example.com\nx-custom:a b c"
        );
    }

    #[test]
    fn test_should_match_aws_canonical_request_vector() {
        use sha2::{Digest, Sha256};

        let headers = owned(&[
            ("host", "examplebucket.s3.amazonaws.com"),
            ("range", "bytes=0-9"),
            (
                "x-amz-content-sha256",
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ),
            ("x-amz-date", "20130524T000000Z"),
        ]);
        let signed = names(&["host", "range", "x-amz-content-sha256", "x-amz-date"]);

        let canonical = canonical_request(
            "GET",
            "/test.txt",
            "",
            &headers,
            &signed,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );

        let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(
            hash,
            "7344ae5b7ee6c3e7e6b0fe0640412a37625d1fbfff95c48bbb2dc43964946972"
        );
    }
}
