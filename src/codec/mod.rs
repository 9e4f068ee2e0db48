mod body_decoder;
mod body_encoder;
mod head_decoder;
mod head_encoder;

pub(crate) use body_decoder::{BodyDecoder, Step};
pub(crate) use body_encoder::{encode_chunk_prefix, encode_eof, CHUNK_SUFFIX};
pub(crate) use head_decoder::decode_head;
pub(crate) use head_encoder::encode_head;
