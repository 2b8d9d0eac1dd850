/// Artwork normalization: turns whatever the media source hands back into the
/// base64 payload carried by `update` messages.
///
/// Never fails.  Anything that cannot be turned into image bytes (missing
/// value, bad hex, unreachable URL, empty body) yields the default artwork,
/// which is encoded once at construction.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

/// 1×1 transparent PNG used when no default artwork file is configured.
pub const BUILTIN_DEFAULT_ARTWORK: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// AppleScript's rendering of an absent value.
const MISSING_SENTINEL: &str = "missing value";

// ── raw artwork ───────────────────────────────────────────────────────────────

/// Artwork as the media source delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArtwork {
    Missing,
    /// HTTP(S) location of the image (e.g. Spotify's `artwork url`).
    Url(String),
    /// Vendor inline encoding, e.g. AppleScript's `«data tdta89504E47…»`.
    Inline(String),
    /// Bytes already in hand.
    Bytes(Vec<u8>),
}

impl RawArtwork {
    /// Classify a textual field value.
    pub fn from_field(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == MISSING_SENTINEL {
            RawArtwork::Missing
        } else if is_url(trimmed) {
            RawArtwork::Url(trimmed.to_string())
        } else {
            RawArtwork::Inline(trimmed.to_string())
        }
    }
}

fn is_url(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

// ── fetcher ───────────────────────────────────────────────────────────────────

/// `GET url` with a timeout, returning the body.  Implementations should fail
/// on non-2xx statuses.
pub trait ArtworkFetcher: Send {
    fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<Vec<u8>>;
}

/// Blocking reqwest client.  Must not be used from inside an async runtime;
/// the normalizer runs on the control thread.
pub struct HttpArtworkFetcher {
    client: reqwest::blocking::Client,
}

impl HttpArtworkFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("cbnp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ArtworkFetcher for HttpArtworkFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()?
            .error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

// ── normalizer ────────────────────────────────────────────────────────────────

pub struct ArtworkNormalizer {
    default_artwork: Arc<str>,
    fetcher: Box<dyn ArtworkFetcher>,
    fetch_timeout: Duration,
}

impl ArtworkNormalizer {
    pub fn new(
        default_image: &[u8],
        fetcher: Box<dyn ArtworkFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            default_artwork: Arc::from(STANDARD.encode(default_image)),
            fetcher,
            fetch_timeout,
        }
    }

    /// Build with the default image read from `path`, falling back to the
    /// built-in image when the path is unset or unreadable.
    pub fn with_default_path(
        path: Option<&Path>,
        fetcher: Box<dyn ArtworkFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        let image = path.and_then(|p| match std::fs::read(p) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                warn!("Default artwork {:?} is empty, using built-in image", p);
                None
            }
            Err(e) => {
                warn!("Failed to read default artwork {:?}: {}", p, e);
                None
            }
        });
        let image = image.as_deref().unwrap_or(BUILTIN_DEFAULT_ARTWORK);
        Self::new(image, fetcher, fetch_timeout)
    }

    pub fn default_artwork(&self) -> &Arc<str> {
        &self.default_artwork
    }

    pub fn normalize(&self, raw: &RawArtwork) -> Arc<str> {
        let bytes = match raw {
            RawArtwork::Missing => None,
            RawArtwork::Url(url) => match self.fetcher.fetch(url, self.fetch_timeout) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!("artwork: fetch {} failed: {}", url, e);
                    None
                }
            },
            RawArtwork::Inline(text) => match decode_inline(text) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!("artwork: inline decode failed: {}", e);
                    None
                }
            },
            RawArtwork::Bytes(bytes) => Some(bytes.clone()),
        };

        match bytes {
            Some(bytes) if !bytes.is_empty() => Arc::from(STANDARD.encode(bytes)),
            _ => Arc::clone(&self.default_artwork),
        }
    }
}

// ── inline decoding ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum InlineDecodeError {
    OddLength(usize),
    InvalidChar(char),
}

impl std::fmt::Display for InlineDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InlineDecodeError::OddLength(n) => write!(f, "odd hex length {}", n),
            InlineDecodeError::InvalidChar(c) => write!(f, "invalid hex character {:?}", c),
        }
    }
}

impl std::error::Error for InlineDecodeError {}

/// Strip the `«data XXXX` / `»` wrapper AppleScript puts around raw data and
/// decode the hex body.
pub fn decode_inline(text: &str) -> Result<Vec<u8>, InlineDecodeError> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("«data") {
        // four-character type code follows, e.g. `tdta`, `PNGf`, `JPEG`
        let rest = rest.trim_start();
        body = rest.get(4..).unwrap_or("");
    }
    body = body.strip_suffix('»').unwrap_or(body);

    let digits: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(InlineDecodeError::OddLength(digits.len()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = hex_value(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_value(c: char) -> Result<u8, InlineDecodeError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(InlineDecodeError::InvalidChar(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        result: Option<Vec<u8>>,
        calls: Arc<AtomicUsize>,
    }

    impl ArtworkFetcher for StubFetcher {
        fn fetch(&self, _url: &str, _timeout: Duration) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    fn normalizer(result: Option<Vec<u8>>) -> (ArtworkNormalizer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = StubFetcher {
            result,
            calls: calls.clone(),
        };
        (
            ArtworkNormalizer::new(b"icon", Box::new(fetcher), Duration::from_secs(1)),
            calls,
        )
    }

    #[test]
    fn test_classify_field_values() {
        assert_eq!(RawArtwork::from_field(""), RawArtwork::Missing);
        assert_eq!(RawArtwork::from_field("  missing value \n"), RawArtwork::Missing);
        assert_eq!(
            RawArtwork::from_field("https://i.scdn.co/image/ab67"),
            RawArtwork::Url("https://i.scdn.co/image/ab67".into())
        );
        assert_eq!(
            RawArtwork::from_field("HTTP://host/a.jpg"),
            RawArtwork::Url("HTTP://host/a.jpg".into())
        );
        assert_eq!(
            RawArtwork::from_field("«data tdta8950»"),
            RawArtwork::Inline("«data tdta8950»".into())
        );
    }

    #[test]
    fn test_decode_applescript_data() {
        assert_eq!(
            decode_inline("«data tdta89504E47»").unwrap(),
            vec![0x89, 0x50, 0x4E, 0x47]
        );
        assert_eq!(decode_inline("«data JPEGffd8»").unwrap(), vec![0xFF, 0xD8]);
        assert_eq!(decode_inline("00 ff\n10").unwrap(), vec![0x00, 0xFF, 0x10]);
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        assert_eq!(
            decode_inline("«data tdta895»"),
            Err(InlineDecodeError::OddLength(3))
        );
        assert_eq!(
            decode_inline("«data tdta89zz»"),
            Err(InlineDecodeError::InvalidChar('z'))
        );
    }

    #[test]
    fn test_missing_and_bad_input_yield_default() {
        let (n, _) = normalizer(None);
        let default = n.default_artwork().clone();
        assert_eq!(&*default, STANDARD.encode(b"icon"));

        for raw in [
            RawArtwork::Missing,
            RawArtwork::Inline("«data tdta0»".into()),
            RawArtwork::Inline("not hex at all".into()),
            RawArtwork::Inline("«data tdta»".into()),
            RawArtwork::Bytes(Vec::new()),
            RawArtwork::Url("https://unreachable.invalid/a.png".into()),
        ] {
            assert_eq!(n.normalize(&raw), default, "input {:?}", raw);
        }
    }

    #[test]
    fn test_inline_and_bytes_are_encoded() {
        let (n, _) = normalizer(None);
        assert_eq!(
            &*n.normalize(&RawArtwork::Inline("«data tdta89504E47»".into())),
            STANDARD.encode([0x89, 0x50, 0x4E, 0x47])
        );
        assert_eq!(
            &*n.normalize(&RawArtwork::Bytes(vec![1, 2, 3])),
            STANDARD.encode([1, 2, 3])
        );
    }

    #[test]
    fn test_url_fetch_success_and_empty_body() {
        let (n, calls) = normalizer(Some(b"jpegbytes".to_vec()));
        let out = n.normalize(&RawArtwork::Url("https://host/a.jpg".into()));
        assert_eq!(&*out, STANDARD.encode(b"jpegbytes"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (n, _) = normalizer(Some(Vec::new()));
        let out = n.normalize(&RawArtwork::Url("https://host/a.jpg".into()));
        assert_eq!(out, *n.default_artwork());
    }

    #[test]
    fn test_default_path_fallbacks() {
        let (_, calls) = normalizer(None);
        let stub = StubFetcher { result: None, calls };
        let n = ArtworkNormalizer::with_default_path(
            Some(Path::new("/nonexistent/cbnp/icon.png")),
            Box::new(stub),
            Duration::from_secs(1),
        );
        assert_eq!(&**n.default_artwork(), STANDARD.encode(BUILTIN_DEFAULT_ARTWORK));

        let dir = tempfile::tempdir().unwrap();
        let icon = dir.path().join("icon.png");
        std::fs::write(&icon, b"custom").unwrap();
        let (_, calls) = normalizer(None);
        let stub = StubFetcher { result: None, calls };
        let n = ArtworkNormalizer::with_default_path(
            Some(&icon),
            Box::new(stub),
            Duration::from_secs(1),
        );
        assert_eq!(&**n.default_artwork(), STANDARD.encode(b"custom"));
    }
}
