//! Encoding images as `data:` URLs for inline LLM vision input.

use base64::prelude::*;

/// Encode `data` as a `data:` URL with the given MIME type.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bytes_with_mime_type() {
        assert_eq!(
            data_url("image/jpeg", b"hello"),
            "data:image/jpeg;base64,aGVsbG8="
        );
    }
}
