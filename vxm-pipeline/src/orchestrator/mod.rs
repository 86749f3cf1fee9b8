//! Stage orchestrator
//!
//! Ingest → Separate (optional) → Convert → Combine (optional).
//!
//! Every cached stage follows the same shape: fingerprint the input, return
//! the cached outcome on a hit, otherwise materialize inputs, run the stage,
//! register outputs in the artifact store and record the outcome with its
//! dependent artifacts. Stages hold no state between calls.

pub mod policy;

pub use policy::{plan_instrumental, InstrumentalPlan};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::cache::{Fingerprint, ResultCache, Stage};
use crate::combiner::{combine_artifacts, StemCombiner};
use crate::error::{PipelineError, PipelineResult};
use crate::reference::{AudioReference, Instrumental, StemKind, StemSet};
use crate::resolver::ReferenceResolver;
use crate::services::{
    SeparatedStems, SeparationService, ServiceOutput, VoiceConversionService,
    CONVERSION_PROFILE,
};
use crate::store::{ArtifactNaming, ArtifactStore};

/// Raw audio handed in at the upload boundary
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub original_name: Option<String>,
    /// Client-declared content type, if any
    pub content_type: Option<String>,
}

impl Upload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            original_name: None,
            content_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn declared_extension(&self) -> Option<String> {
        self.original_name
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    /// File extension for the stored artifact, or an input error for non-audio
    ///
    /// Sniffed bytes win over what the client declared.
    fn audio_extension(&self) -> PipelineResult<Option<String>> {
        if let Some(kind) = infer::get(&self.bytes) {
            return match kind.matcher_type() {
                infer::MatcherType::Audio | infer::MatcherType::Video => {
                    Ok(Some(kind.extension().to_string()))
                }
                _ => Err(PipelineError::Input(format!(
                    "Uploaded file is not audio ({})",
                    kind.mime_type()
                ))),
            };
        }

        let declared_audio = self
            .content_type
            .as_deref()
            .map(|ct| ct.starts_with("audio/"))
            .unwrap_or(false);
        let extension = self.declared_extension();
        let known_extension = extension
            .as_deref()
            .map(|e| matches!(e, "mp3" | "m4a" | "wav" | "webm" | "flac" | "ogg"))
            .unwrap_or(false);

        if declared_audio || known_extension {
            Ok(extension)
        } else {
            Err(PipelineError::Input(
                "Uploaded file is not recognisable audio".to_string(),
            ))
        }
    }
}

/// Per-call request for a full run; never persisted
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub upload: Upload,
    pub separate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub filename: String,
    pub reference: AudioReference,
    #[serde(skip)]
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationOutcome {
    pub vocals: AudioReference,
    pub instrumental: Instrumental,
    /// Set when only a partial accompaniment stem was available
    #[serde(default)]
    pub degraded: bool,
    #[serde(skip)]
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub converted: AudioReference,
    #[serde(skip)]
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombineOutcome {
    pub combined: AudioReference,
}

/// Every step of a full run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub ingest: IngestOutcome,
    pub separation: Option<SeparationOutcome>,
    pub conversion: ConversionOutcome,
    pub combine: Option<CombineOutcome>,
}

impl PipelineOutcome {
    /// The final audio of the run
    pub fn result(&self) -> &AudioReference {
        match &self.combine {
            Some(combine) => &combine.combined,
            None => &self.conversion.converted,
        }
    }
}

/// Stage orchestrator
pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    cache: ResultCache,
    resolver: Arc<ReferenceResolver>,
    separation: Arc<dyn SeparationService>,
    conversion: Arc<dyn VoiceConversionService>,
    combiner: Arc<dyn StemCombiner>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<ReferenceResolver>,
        cache: ResultCache,
        separation: Arc<dyn SeparationService>,
        conversion: Arc<dyn VoiceConversionService>,
        combiner: Arc<dyn StemCombiner>,
    ) -> Self {
        Self {
            store: Arc::clone(resolver.store()),
            cache,
            resolver,
            separation,
            conversion,
            combiner,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<ReferenceResolver> {
        &self.resolver
    }

    /// Store uploaded bytes under their content hash
    ///
    /// Identical bytes always map to the same artifact.
    pub async fn ingest(&self, upload: Upload) -> PipelineResult<IngestOutcome> {
        if upload.bytes.is_empty() {
            return Err(PipelineError::Input("Uploaded file is empty".to_string()));
        }

        let fingerprint = Fingerprint::of_bytes(Stage::Ingest, &upload.bytes);
        if let Some(mut outcome) = self.cache.lookup::<IngestOutcome>(&fingerprint).await {
            outcome.cached = true;
            tracing::info!(filename = %outcome.filename, "Ingest served from cache");
            return Ok(outcome);
        }

        let extension = upload.audio_extension()?;
        let naming = ArtifactNaming::content_hash(extension.as_deref());
        let filename = self.store.put(&naming, &upload.bytes).await?;

        tracing::info!(
            filename = %filename,
            original = ?upload.original_name,
            size = upload.bytes.len(),
            "Upload ingested"
        );

        let outcome = IngestOutcome {
            reference: AudioReference::local(filename.clone()),
            filename: filename.clone(),
            cached: false,
        };
        self.remember(&fingerprint, &outcome, vec![filename]).await;
        Ok(outcome)
    }

    /// Split audio into vocals and an instrumental
    pub async fn separate(&self, reference: &AudioReference) -> PipelineResult<SeparationOutcome> {
        let fingerprint = Fingerprint::of_reference(Stage::Separate, reference);
        if let Some(mut outcome) = self.cache.lookup::<SeparationOutcome>(&fingerprint).await {
            outcome.cached = true;
            tracing::info!(input = %reference, "Separation served from cache");
            return Ok(outcome);
        }

        let input = self
            .resolver
            .resolve(reference, &ArtifactNaming::purpose("source"))
            .await?;
        let audio_uri = self.resolver.read_as_data_uri(&input).await?;

        tracing::info!(input = %input, "Running separation");
        let mut stems = self.separation.separate(&audio_uri).await?;

        let plan = plan_instrumental(&stems.kinds())?;
        if plan.is_degraded() {
            tracing::warn!(
                input = %input,
                available = ?stems.kinds(),
                "Using partial accompaniment as instrumental"
            );
        }

        let vocals = self
            .persist_stem(&mut stems, StemKind::Vocals, &input)
            .await?;
        let mut files = vec![vocals.clone()];

        let mut used = Vec::new();
        for kind in plan.stems() {
            let filename = self.persist_stem(&mut stems, kind, &input).await?;
            files.push(filename.clone());
            used.push((kind, AudioReference::local(filename)));
        }

        let instrumental = match plan {
            InstrumentalPlan::Stems(_) => Instrumental::Stems(StemSet::new(used)),
            InstrumentalPlan::Single(_) | InstrumentalPlan::Degraded(_) => {
                let (_, reference) = used.into_iter().next().ok_or_else(|| {
                    PipelineError::Internal("Instrumental plan selected no stem".to_string())
                })?;
                Instrumental::Single(reference)
            }
        };

        let outcome = SeparationOutcome {
            vocals: AudioReference::local(vocals),
            instrumental,
            degraded: plan.is_degraded(),
            cached: false,
        };

        tracing::info!(
            input = %input,
            stems = files.len(),
            degraded = outcome.degraded,
            "Separation complete"
        );

        self.remember(&fingerprint, &outcome, files).await;
        Ok(outcome)
    }

    /// Run voice conversion with the fixed profile
    pub async fn convert(&self, reference: &AudioReference) -> PipelineResult<ConversionOutcome> {
        let fingerprint = Fingerprint::of_reference(Stage::Convert, reference);
        if let Some(mut outcome) = self.cache.lookup::<ConversionOutcome>(&fingerprint).await {
            outcome.cached = true;
            tracing::info!(input = %reference, "Conversion served from cache");
            return Ok(outcome);
        }

        let audio_uri = match reference {
            AudioReference::Local(_) => {
                let input = self
                    .resolver
                    .resolve(reference, &ArtifactNaming::purpose("source"))
                    .await?;
                self.resolver.read_as_data_uri(&input).await?
            }
            AudioReference::Remote(url) => url.to_string(),
        };

        tracing::info!(input = %reference, "Running voice conversion");
        let output = self.conversion.convert(&audio_uri, &CONVERSION_PROFILE).await?;

        let (converted, files) = match output {
            ServiceOutput::Locator(url) => {
                tracing::debug!(url = %url, "Conversion returned a locator");
                (AudioReference::Remote(url), Vec::new())
            }
            ServiceOutput::Stream(stream) => {
                let naming = ArtifactNaming::purpose("converted").with_extension("wav");
                let filename = self.store.put_stream(&naming, stream).await?;
                (AudioReference::local(filename.clone()), vec![filename])
            }
        };

        let outcome = ConversionOutcome {
            converted,
            cached: false,
        };
        tracing::info!(input = %reference, output = %outcome.converted, "Conversion complete");

        self.remember(&fingerprint, &outcome, files).await;
        Ok(outcome)
    }

    /// Mix vocals with an instrumental into one artifact
    ///
    /// Without an instrumental the vocals reference is returned unchanged.
    /// Never cached.
    pub async fn combine(
        &self,
        vocals: &AudioReference,
        instrumental: Option<&Instrumental>,
    ) -> PipelineResult<CombineOutcome> {
        let Some(instrumental) = instrumental else {
            return Ok(CombineOutcome {
                combined: vocals.clone(),
            });
        };

        let vocals_file = self
            .resolver
            .resolve(vocals, &ArtifactNaming::purpose("vocals").with_extension("wav"))
            .await?;

        let mut instrumental_files = Vec::new();
        for reference in instrumental.references() {
            let naming = ArtifactNaming::purpose("instrumental").with_extension("wav");
            instrumental_files.push(self.resolver.resolve(reference, &naming).await?);
        }

        let combined = combine_artifacts(
            &self.store,
            self.combiner.as_ref(),
            &vocals_file,
            &instrumental_files,
        )
        .await?;

        Ok(CombineOutcome {
            combined: AudioReference::local(combined),
        })
    }

    /// Full run: ingest, optionally separate, convert, then combine
    pub async fn run(&self, request: PipelineRequest) -> PipelineResult<PipelineOutcome> {
        let ingest = self.ingest(request.upload).await?;

        let separation = if request.separate {
            Some(self.separate(&ingest.reference).await?)
        } else {
            None
        };

        let voice_source = separation
            .as_ref()
            .map(|s| &s.vocals)
            .unwrap_or(&ingest.reference);
        let conversion = self.convert(voice_source).await?;

        let combine = match &separation {
            Some(separation) => Some(
                self.combine(&conversion.converted, Some(&separation.instrumental))
                    .await?,
            ),
            None => None,
        };

        let outcome = PipelineOutcome {
            ingest,
            separation,
            conversion,
            combine,
        };
        tracing::info!(result = %outcome.result(), "Pipeline run complete");
        Ok(outcome)
    }

    /// Store one stem output under `<stem>-<millis>-<rand>-<input stem>.wav`
    async fn persist_stem(
        &self,
        stems: &mut SeparatedStems,
        kind: StemKind,
        input: &str,
    ) -> PipelineResult<String> {
        let output = stems.take(kind).ok_or_else(|| {
            PipelineError::MissingStems(format!("separation returned no {}", kind))
        })?;

        let naming = ArtifactNaming::purpose(kind.as_str())
            .with_original(input)
            .with_extension("wav");

        match output {
            ServiceOutput::Locator(url) => self.resolver.fetch_remote(&url, &naming).await,
            ServiceOutput::Stream(stream) => Ok(self.store.put_stream(&naming, stream).await?),
        }
    }

    /// Record a stage result; failure to persist only costs a later recompute
    async fn remember<T: Serialize>(
        &self,
        fingerprint: &Fingerprint,
        outcome: &T,
        files: Vec<String>,
    ) {
        if let Err(e) = self.cache.store(fingerprint, outcome, files).await {
            tracing::warn!(key = %fingerprint, error = %e, "Failed to persist cache entry");
        }
    }
}
