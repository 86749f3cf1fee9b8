//! Audio references
//!
//! Every stage input and output is one of these closed variants. Client
//! tokens are parsed exactly once at the boundary; stages never re-inspect raw
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

use crate::error::{PipelineError, PipelineResult};
use crate::store::sanitize_filename;

/// Route prefix under which local artifacts are served
pub const RETRIEVAL_PATH: &str = "/api/audio";

/// Pointer to audio data: a local artifact token or a remote locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AudioReference {
    Local(String),
    Remote(reqwest::Url),
}

impl AudioReference {
    /// Parse a client token
    ///
    /// - `http(s)://…` → `Remote`
    /// - `/api/audio?file=X` → `Local(basename(X))`
    /// - anything else → `Local(basename(token))`
    pub fn parse(token: &str) -> PipelineResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PipelineError::Input("Empty audio reference".to_string()));
        }

        let lower = token.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = reqwest::Url::parse(token)
                .map_err(|e| PipelineError::Input(format!("Invalid audio URL {}: {}", token, e)))?;
            return Ok(AudioReference::Remote(url));
        }

        if token.starts_with(RETRIEVAL_PATH) {
            let url = reqwest::Url::parse(&format!("http://localhost{}", token))
                .map_err(|e| PipelineError::Input(format!("Invalid audio URL {}: {}", token, e)))?;
            let file = url
                .query_pairs()
                .find(|(k, _)| k == "file")
                .map(|(_, v)| v.into_owned())
                .ok_or_else(|| {
                    PipelineError::Input(format!("Audio URL has no file parameter: {}", token))
                })?;
            return Ok(AudioReference::Local(sanitize_filename(&file)?));
        }

        if lower.starts_with("data:") {
            return Err(PipelineError::Input(
                "Inline data URIs are not accepted as references; upload the file instead"
                    .to_string(),
            ));
        }

        Ok(AudioReference::Local(sanitize_filename(token)?))
    }

    pub fn local(filename: impl Into<String>) -> Self {
        AudioReference::Local(filename.into())
    }

    /// Verbatim identity used in cache fingerprints
    pub fn stable_identity(&self) -> &str {
        match self {
            AudioReference::Local(name) => name,
            AudioReference::Remote(url) => url.as_str(),
        }
    }

    pub fn as_local(&self) -> Option<&str> {
        match self {
            AudioReference::Local(name) => Some(name),
            AudioReference::Remote(_) => None,
        }
    }
}

impl fmt::Display for AudioReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioReference::Local(name) => {
                let encoded: String = form_urlencoded::byte_serialize(name.as_bytes()).collect();
                write!(f, "{}?file={}", RETRIEVAL_PATH, encoded)
            }
            AudioReference::Remote(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for AudioReference {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AudioReference::parse(s)
    }
}

impl TryFrom<String> for AudioReference {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AudioReference::parse(&value)
    }
}

impl From<AudioReference> for String {
    fn from(value: AudioReference) -> Self {
        value.to_string()
    }
}

/// Named separation stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Vocals,
    Drums,
    Bass,
    Other,
    Instrumental,
}

impl StemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Instrumental => "instrumental",
        }
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StemKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vocals" => Ok(StemKind::Vocals),
            "drums" => Ok(StemKind::Drums),
            "bass" => Ok(StemKind::Bass),
            "other" => Ok(StemKind::Other),
            "instrumental" => Ok(StemKind::Instrumental),
            other => Err(PipelineError::Input(format!("Unknown stem: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MultiTag {
    Multi,
}

/// Ordered group of instrumental stems pending combination
///
/// Serialized as `{"type": "multi", "stems": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemSet {
    #[serde(rename = "type")]
    tag: MultiTag,
    pub stems: Vec<AudioReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<StemKind>,
}

impl StemSet {
    pub fn new(stems: Vec<(StemKind, AudioReference)>) -> Self {
        let (labels, stems): (Vec<StemKind>, Vec<AudioReference>) = stems.into_iter().unzip();
        Self {
            tag: MultiTag::Multi,
            stems,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

/// Instrumental input for the combine stage
///
/// Serialized as a bare reference token or a [`StemSet`] object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instrumental {
    Single(AudioReference),
    Stems(StemSet),
}

impl Instrumental {
    /// Every reference to feed into the mixer, in order
    pub fn references(&self) -> Vec<&AudioReference> {
        match self {
            Instrumental::Single(reference) => vec![reference],
            Instrumental::Stems(set) => set.stems.iter().collect(),
        }
    }
}
