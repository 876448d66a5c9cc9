//! Buffer and URI resolution.

use std::path::{Path, PathBuf};

use crate::error::{LoadError, LoadResult};

/// Extension whose fallback buffers carry no data.
pub(super) const MESHOPT_EXTENSION: &str = "EXT_meshopt_compression";

/// Resolved buffer bytes, one entry per glTF buffer.
///
/// `None` marks a buffer that legitimately has no data (a meshopt fallback);
/// primitives reading from it are skipped.
pub(crate) type Buffers = Vec<Option<Vec<u8>>>;

/// Resolve all buffer data from the glTF document.
///
/// The GLB binary chunk backs the first URI-less buffer. Data URIs are
/// decoded in place and relative URIs are read from `base_dir`.
pub(crate) fn resolve_buffers(
    document: &gltf_dep::Document,
    mut blob: Option<Vec<u8>>,
    base_dir: Option<&Path>,
) -> LoadResult<Buffers> {
    let meshopt = document.extensions_used().any(|e| e == MESHOPT_EXTENSION);
    let mut buffers = Vec::with_capacity(document.buffers().len());

    for buffer in document.buffers() {
        let data = match buffer.source() {
            gltf_dep::buffer::Source::Bin => match blob.take() {
                Some(data) => Some(data),
                None if meshopt => {
                    log::debug!(
                        "Buffer {} has no data; treating it as a meshopt fallback",
                        buffer.index()
                    );
                    None
                }
                None => {
                    return Err(LoadError::Buffer(format!(
                        "buffer {} references the binary chunk but none is present",
                        buffer.index()
                    )));
                }
            },
            gltf_dep::buffer::Source::Uri(uri) => Some(read_uri(uri, base_dir)?),
        };

        if let Some(data) = &data {
            if data.len() < buffer.length() {
                return Err(LoadError::Buffer(format!(
                    "buffer {} holds {} bytes, {} declared",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                )));
            }
        }
        buffers.push(data);
    }

    log::debug!("Resolved {} buffers", buffers.len());
    Ok(buffers)
}

/// Read the bytes behind a data URI or a file path relative to `base_dir`.
pub(super) fn read_uri(uri: &str, base_dir: Option<&Path>) -> LoadResult<Vec<u8>> {
    if uri.starts_with("data:") {
        return parse_data_uri(uri)
            .ok_or_else(|| LoadError::Buffer(format!("malformed data URI ({} bytes)", uri.len())));
    }

    let Some(base_dir) = base_dir else {
        return Err(LoadError::Buffer(format!(
            "external URI '{uri}' cannot be resolved without a base directory"
        )));
    };

    let path = resolve_path(base_dir, uri);
    std::fs::read(&path).map_err(|source| LoadError::Io { path, source })
}

fn resolve_path(base_dir: &Path, uri: &str) -> PathBuf {
    base_dir.join(percent_decode(uri))
}

/// Decode `%XX` escapes in a relative URI.
fn percent_decode(uri: &str) -> String {
    let bytes = uri.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(value) = hex {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a data URI (e.g., `data:image/png;base64,...`) and return the decoded bytes.
pub(super) fn parse_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let base64_start = rest.find(";base64,")?;
    base64_decode(&rest[base64_start + 8..])
}

/// Decode standard base64, ignoring whitespace.
///
/// Padding is optional. A lone trailing character carries only six bits and
/// is rejected, as is anything after the padding.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    fn sextet(c: u8) -> Option<u32> {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            _ => return None,
        };
        Some(value as u32)
    }

    let body = input.trim_end_matches(|c: char| c == '=' || c.is_ascii_whitespace());
    let mut out = Vec::with_capacity(body.len() * 3 / 4);
    let mut bits = 0u32;
    let mut pending = 0u32;
    let mut symbols = 0usize;
    for c in body.bytes().filter(|b| !b.is_ascii_whitespace()) {
        bits = (bits << 6) | sextet(c)?;
        pending += 6;
        symbols += 1;
        if pending >= 8 {
            pending -= 8;
            out.push((bits >> pending) as u8);
            bits &= (1 << pending) - 1;
        }
    }
    if symbols % 4 == 1 {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode() {
        assert_eq!(base64_decode("SGVsbG8gV29ybGQ=").unwrap(), b"Hello World");
        assert_eq!(base64_decode("YQ==").unwrap(), b"a");
        assert_eq!(base64_decode("YWJj").unwrap(), b"abc");
        assert_eq!(base64_decode("YWI").unwrap(), b"ab");
        assert!(base64_decode("Y*==").is_none());
        assert!(base64_decode("YWJjZ").is_none());
        assert!(base64_decode("YQ==YQ==").is_none());
    }

    #[test]
    fn test_parse_data_uri() {
        let uri = "data:application/octet-stream;base64,AQID";
        assert_eq!(parse_data_uri(uri).unwrap(), vec![1, 2, 3]);
        assert!(parse_data_uri("file://some/path").is_none());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("my%20model.bin"), "my model.bin");
        assert_eq!(percent_decode("plain.bin"), "plain.bin");
        assert_eq!(percent_decode("trailing%2"), "trailing%2");
    }

    #[test]
    fn test_external_uri_needs_base_dir() {
        assert!(matches!(read_uri("scene.bin", None), Err(LoadError::Buffer(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = std::env::temp_dir();
        let err = read_uri("aster-definitely-missing.bin", Some(&dir)).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
