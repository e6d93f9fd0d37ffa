use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum IngestError {
    #[snafu(display("no ingestion handling for MIME type '{mime_type}'"))]
    UnsupportedMime {
        stage: &'static str,
        mime_type: String,
    },
    #[snafu(display("text file is not valid UTF-8: {source}"))]
    InvalidTextEncoding {
        stage: &'static str,
        source: std::string::FromUtf8Error,
    },
}

/// Turns file bytes plus a declared MIME type into an insertable string.
///
/// Images become a data-URI markdown embed on its own line; text files pass
/// through as UTF-8. Anything else is rejected, and a rejection never leaves
/// partial content behind for the caller to insert.
pub fn insertable_fragment(
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<String, IngestError> {
    if mime_type.starts_with("image/") {
        let payload = BASE64_STANDARD.encode(bytes);
        return Ok(format!(
            "\n![{file_name}](data:{mime_type};base64,{payload})\n"
        ));
    }

    if mime_type.starts_with("text/") {
        return String::from_utf8(bytes.to_vec()).context(InvalidTextEncodingSnafu {
            stage: "decode-text-file",
        });
    }

    UnsupportedMimeSnafu {
        stage: "classify-mime",
        mime_type,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_files_pass_through_as_utf8() {
        let fragment = insertable_fragment("notes.md", "text/markdown", "# Notes\n".as_bytes());
        assert_eq!(fragment.unwrap(), "# Notes\n");
    }

    #[test]
    fn images_become_a_data_uri_embed() {
        let fragment = insertable_fragment("dot.png", "image/png", &[0x89, 0x50, 0x4e, 0x47])
            .unwrap();
        assert_eq!(fragment, "\n![dot.png](data:image/png;base64,iVBORw==)\n");
    }

    #[test]
    fn unsupported_mime_is_rejected() {
        let error = insertable_fragment("a.bin", "application/octet-stream", &[0, 1]).unwrap_err();
        assert!(matches!(error, IngestError::UnsupportedMime { .. }));
    }

    #[test]
    fn invalid_utf8_text_inserts_nothing() {
        let error = insertable_fragment("broken.txt", "text/plain", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(error, IngestError::InvalidTextEncoding { .. }));
    }
}
