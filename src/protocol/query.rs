use std::collections::HashMap;

/// Decoded query parameters. Duplicate names keep the last value.
pub type Query = HashMap<String, String>;

/// Percent- and plus-decode one target component.
///
/// `%HH` with two hex digits becomes the byte, `+` becomes a space, and a
/// `%` not followed by two hex digits stays literal. Decoded bytes that are
/// not valid UTF-8 are replaced lossily.
pub fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a raw (still encoded) query string into a [`Query`].
///
/// Splits on `&`, then on the first `=`; a token without `=` is dropped.
/// Names and values are decoded after splitting so encoded `&` and `=` do
/// not break the structure.
pub fn parse_query(raw: &str) -> Query {
    let mut query = Query::new();

    for token in raw.split('&') {
        if token.is_empty() {
            continue;
        }
        let Some((name, value)) = token.split_once('=') else {
            continue;
        };
        query.insert(decode_component(name), decode_component(value));
    }

    query
}

/// Encode a [`Query`] back into a query string, the inverse of
/// [`parse_query`] for any map.
pub fn encode_query(query: &Query) -> String {
    let mut out = String::new();

    for (name, value) in query {
        if !out.is_empty() {
            out.push('&');
        }
        encode_component_into(&mut out, name);
        out.push('=');
        encode_component_into(&mut out, value);
    }

    out
}

fn encode_component_into(out: &mut String, s: &str) {
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(char::from_digit(u32::from(b >> 4), 16).unwrap().to_ascii_uppercase());
                out.push(char::from_digit(u32::from(b & 0xf), 16).unwrap().to_ascii_uppercase());
            }
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
