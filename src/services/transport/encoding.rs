use encoding_rs::Encoding;

use crate::constants::transport::DEFAULT_ENCODING;
use crate::error::TransportError;

/// Decode a response body with the requested text encoding (UTF-8 default)
pub fn decode_body(bytes: &[u8], label: Option<&str>) -> Result<String, TransportError> {
    let label = label.unwrap_or(DEFAULT_ENCODING);
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| TransportError::UnknownEncoding(label.to_string()))?;

    let (text, _, _) = encoding.decode(bytes);
    Ok(text.into_owned())
}
