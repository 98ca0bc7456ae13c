//! Local path derivation for downloaded models.

use std::path::{Path, PathBuf};

/// Whether a model path is a remote URL rather than a filesystem path.
#[must_use]
pub fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Derive the local destination for a URL: the last path segment of the URL
/// (percent-decoded, query stripped) under `models_dir`. Falls back to
/// `model.gguf` when the URL has no usable filename.
#[must_use]
pub fn derive_local_path(url: &str, models_dir: &Path) -> PathBuf {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    let decoded = percent_decode(segment);
    let filename = if decoded.is_empty() || decoded.contains("://") {
        "model.gguf".to_string()
    } else {
        decoded
    };

    models_dir.join(filename)
}

/// Minimal percent-decoding; invalid escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/model.gguf"));
        assert!(is_url("http://host/m.gguf"));
        assert!(!is_url("./models/m.gguf"));
        assert!(!is_url("/abs/path.gguf"));
    }

    #[test]
    fn derives_filename_from_url_path() {
        let path = derive_local_path(
            "https://host.example/repo/resolve/main/Qwen2.5-0.5B.Q4_K_M.gguf",
            Path::new("./models"),
        );
        assert_eq!(path, Path::new("./models/Qwen2.5-0.5B.Q4_K_M.gguf"));
    }

    #[test]
    fn strips_query_and_decodes_escapes() {
        let path = derive_local_path(
            "https://host/files/my%20model.gguf?download=true",
            Path::new("/tmp/models"),
        );
        assert_eq!(path, Path::new("/tmp/models/my model.gguf"));
    }

    #[test]
    fn bare_host_falls_back_to_default_name() {
        let path = derive_local_path("https://host.example", Path::new("m"));
        assert_eq!(path, Path::new("m/model.gguf"));
    }
}
