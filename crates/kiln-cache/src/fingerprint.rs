use std::borrow::Cow;
use std::fmt;

use kiln_core::{BuildConfig, SourceUnit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Delimiter byte appended after every digest segment so that the segment
/// boundaries are unambiguous: moving bytes across a boundary always changes
/// the digest input.
const SEGMENT_DELIMITER: &[u8] = b"\n";

/// A stable SHA-256 fingerprint stored as a lowercase hex string.
///
/// A fingerprint is a pure function of its inputs: identical source bytes,
/// identical normalized preprocessor output, and identical build
/// configuration yield the same fingerprint on any machine and any run.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of an arbitrary byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fold the three build inputs into a single digest.
    ///
    /// Segments, in order, each terminated by a delimiter byte:
    /// 1. the raw source bytes;
    /// 2. the preprocessed output when header hashing is enabled, folded
    ///    line by line: line-number pragmas are skipped entirely (they
    ///    embed absolute paths and line counts that vary per machine), and
    ///    every other line has literal quoted occurrences of the source's
    ///    own path rewritten to its quoted short name, under both path
    ///    separator conventions, so otherwise identical preprocessor output
    ///    digests identically regardless of where the source lives;
    /// 3. each configuration entry, in caller order.
    pub fn of_build_inputs(
        source: &SourceUnit,
        source_bytes: &[u8],
        preprocessed: Option<&[u8]>,
        config: &BuildConfig,
    ) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(source_bytes);
        hasher.update(SEGMENT_DELIMITER);

        if let Some(preprocessed) = preprocessed {
            fold_preprocessed(&mut hasher, source, preprocessed);
            hasher.update(SEGMENT_DELIMITER);
        }

        for entry in config.entries() {
            hasher.update(entry.as_bytes());
            hasher.update(SEGMENT_DELIMITER);
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a lowercase hex fingerprint, e.g. recovered from an artifact
    /// file name. Returns `None` unless the input is exactly one SHA-256
    /// worth of hex digits.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 64 {
            return None;
        }
        if !hex_str
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        Some(Self(hex_str.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn fold_preprocessed(hasher: &mut Sha256, source: &SourceUnit, preprocessed: &[u8]) {
    let raw = source.path().to_string_lossy();
    let replacement = format!("\"{}\"", source.short_name());

    // The preprocessor quotes the path of the file it expanded (`__FILE__`,
    // error-check macros). Which separator it prints depends on the platform
    // and on how the caller spelled the path, so rewrite both spellings.
    let mut needles = vec![format!("\"{}\"", raw.replace('\\', "/"))];
    let backslashed = format!("\"{}\"", raw.replace('/', "\\"));
    if backslashed != needles[0] {
        needles.push(backslashed);
    }

    for line in preprocessed.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"# ") || line.starts_with(b"#line") {
            continue;
        }
        let mut line = Cow::Borrowed(line);
        for needle in &needles {
            line = match replace_all(&line, needle.as_bytes(), replacement.as_bytes()) {
                Some(rewritten) => Cow::Owned(rewritten),
                None => line,
            };
        }
        hasher.update(line.as_ref());
    }
}

/// Byte-slice find-and-replace. Returns `None` when the needle does not
/// occur, so callers can keep borrowing the original line.
fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let mut out: Option<Vec<u8>> = None;
    let mut rest = haystack;
    while let Some(at) = find(rest, needle) {
        let out = out.get_or_insert_with(|| Vec::with_capacity(haystack.len()));
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(replacement);
        rest = &rest[at + needle.len()..];
    }
    if let Some(mut done) = out {
        done.extend_from_slice(rest);
        return Some(done);
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
