use http::{HeaderMap, Method};

use crate::protocol::query::{decode_component, parse_query, Query};

/// The parsed request line and headers. Immutable once parsing completes.
#[derive(Debug)]
pub struct RequestHead {
    method: Method,
    target: String,
    path: String,
    query: Query,
    fragment: String,
    headers: HeaderMap,
}

impl RequestHead {
    pub(crate) fn new(method: Method, target: String, headers: HeaderMap) -> RequestHead {
        let (path, query, fragment) = split_target(&target);
        RequestHead {
            method,
            target,
            path,
            query,
            fragment,
            headers,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Decoded path portion of the target.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Decoded fragment, empty when the target carries none.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Decompose `PATH ("?" QUERY)? ("#" FRAGMENT)?` and decode each part.
fn split_target(target: &str) -> (String, Query, String) {
    let (before_fragment, fragment) = match target.split_once('#') {
        Some((head, fragment)) => (head, fragment),
        None => (target, ""),
    };
    let (path, query) = match before_fragment.split_once('?') {
        Some((path, query)) => (path, query),
        None => (before_fragment, ""),
    };

    (
        decode_component(path),
        parse_query(query),
        decode_component(fragment),
    )
}
