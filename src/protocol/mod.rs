mod body;
mod headers;
mod query;
mod request;
mod response;

pub use body::BodyMode;
pub use query::{decode_component, encode_query, parse_query, Query};
pub use request::RequestHead;
pub use response::ResponseHead;

pub(crate) use headers::{append_coalesced, ensure_date, is_chunked, wants_close};
pub(crate) use response::WriteState;
