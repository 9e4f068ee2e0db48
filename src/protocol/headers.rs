use http::header::{CONNECTION, CONTENT_LENGTH, DATE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// Insert a header, coalescing a duplicate name into a single value joined
/// with `", "` in arrival order.
pub(crate) fn append_coalesced(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    match headers.get_mut(&name) {
        Some(existing) => {
            let mut joined = Vec::with_capacity(existing.as_bytes().len() + 2 + value.as_bytes().len());
            joined.extend_from_slice(existing.as_bytes());
            joined.extend_from_slice(b", ");
            joined.extend_from_slice(value.as_bytes());
            // both inputs were valid header values, so the join is too
            *existing = HeaderValue::from_bytes(&joined).expect("joined header value");
        }
        None => {
            headers.insert(name, value);
        }
    }
}

/// A Transfer-Encoding with any value other than `identity` selects chunked
/// framing.
pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(false)
}

pub(crate) fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|_| Error::InvalidContentLength {
        reason: "not ascii".into(),
    })?;
    let length = text.trim().parse::<u64>().map_err(|_| Error::InvalidContentLength {
        reason: text.into(),
    })?;
    Ok(Some(length))
}

/// `Connection: close` on either side ends reuse; HTTP/1.1 defaults to
/// keep-alive otherwise.
pub(crate) fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
        .unwrap_or(false)
}

/// Set a `Date` header in RFC 1123 GMT format if none is present.
pub(crate) fn ensure_date(headers: &mut HeaderMap) {
    if !headers.contains_key(DATE) {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        headers.insert(DATE, HeaderValue::from_str(&now).expect("httpdate output"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        append_coalesced(
            &mut headers,
            HeaderName::from_bytes(b"Content-Length").unwrap(),
            HeaderValue::from_static("11"),
        );
        assert_eq!(headers.get("content-length").unwrap(), "11");
        assert_eq!(headers.get("CONTENT-LENGTH").unwrap(), "11");
    }

    #[test]
    fn duplicates_coalesce_in_arrival_order() {
        let mut headers = HeaderMap::new();
        for value in ["no-cache", "no-store", "max-age=0"] {
            append_coalesced(
                &mut headers,
                HeaderName::from_static("cache-control"),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "no-cache, no-store, max-age=0"
        );
    }

    #[test]
    fn transfer_encoding_identity_is_not_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("identity"));
        assert!(!is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        assert!(is_chunked(&headers));
    }

    #[test]
    fn content_length_rejects_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers).unwrap(), None);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static(" 42 "));
        assert_eq!(content_length(&headers).unwrap(), Some(42));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("14x"));
        let err = content_length(&headers).unwrap_err();
        assert_eq!(err.code(), Some(4));
    }

    #[test]
    fn connection_close_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_close(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!wants_close(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("Close"));
        assert!(wants_close(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("upgrade, close"));
        assert!(wants_close(&headers));
    }

    #[test]
    fn date_is_set_once() {
        let mut headers = HeaderMap::new();
        ensure_date(&mut headers);
        let first = headers.get(DATE).unwrap().clone();
        assert!(first.to_str().unwrap().ends_with("GMT"));

        ensure_date(&mut headers);
        assert_eq!(headers.get(DATE).unwrap(), &first);
    }
}
