//! External AI services
//!
//! Separation and voice conversion are black boxes: audio goes in as a URI,
//! and each output comes back either as a fetchable locator or as a byte
//! stream. [`replicate::ReplicateClient`] implements both traits against the
//! Replicate predictions API.

pub mod replicate;

pub use replicate::ReplicateClient;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::PipelineResult;
use crate::reference::StemKind;
use crate::store::ByteStream;

/// One output produced by an external service
pub enum ServiceOutput {
    /// Remote locator the result can be fetched from
    Locator(reqwest::Url),
    /// Result body delivered inline
    Stream(ByteStream),
}

impl fmt::Debug for ServiceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceOutput::Locator(url) => f.debug_tuple("Locator").field(&url.as_str()).finish(),
            ServiceOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Named stems returned by the separation service
#[derive(Debug, Default)]
pub struct SeparatedStems {
    pub stems: BTreeMap<StemKind, ServiceOutput>,
}

impl SeparatedStems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: StemKind, output: ServiceOutput) -> Self {
        self.stems.insert(kind, output);
        self
    }

    pub fn take(&mut self, kind: StemKind) -> Option<ServiceOutput> {
        self.stems.remove(&kind)
    }

    pub fn kinds(&self) -> Vec<StemKind> {
        self.stems.keys().copied().collect()
    }
}

/// Fixed voice-conversion parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionProfile {
    pub voice_model_url: &'static str,
    pub pitch_change: i32,
    pub index_rate: f32,
    pub filter_radius: u32,
    pub rms_mix_rate: f32,
    pub protect: f32,
}

/// The one profile this pipeline converts with
pub const CONVERSION_PROFILE: ConversionProfile = ConversionProfile {
    voice_model_url: "https://huggingface.co/Fonre/RVC-Models/resolve/main/Villager%20(Minecraft)%20-%20Weights%20Model.zip?download=true",
    pitch_change: 0,
    index_rate: 0.5,
    filter_radius: 3,
    rms_mix_rate: 0.25,
    protect: 0.33,
};

/// Source separation service
#[async_trait]
pub trait SeparationService: Send + Sync {
    /// Separate `audio_uri` (typically a `data:` URI) into named stems
    async fn separate(&self, audio_uri: &str) -> PipelineResult<SeparatedStems>;
}

/// Voice conversion service
#[async_trait]
pub trait VoiceConversionService: Send + Sync {
    /// Convert the voice in `audio_uri` using `profile`
    async fn convert(
        &self,
        audio_uri: &str,
        profile: &ConversionProfile,
    ) -> PipelineResult<ServiceOutput>;
}
