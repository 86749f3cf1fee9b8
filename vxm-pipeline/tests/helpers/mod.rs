//! Shared test helpers
//!
//! Fake external services with invocation counters, WAV fixtures and a
//! pipeline wired against a temporary directory.

#![allow(dead_code)]

pub mod audio_generator;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use vxm_pipeline::cache::{JsonFileCacheStore, ResultCache};
use vxm_pipeline::combiner::{NativeCombiner, StemCombiner};
use vxm_pipeline::error::{PipelineError, PipelineResult};
use vxm_pipeline::orchestrator::Pipeline;
use vxm_pipeline::reference::StemKind;
use vxm_pipeline::resolver::ReferenceResolver;
use vxm_pipeline::services::{
    ConversionProfile, SeparatedStems, SeparationService, ServiceOutput, VoiceConversionService,
};
use vxm_pipeline::store::{ArtifactStore, ByteStream, LocalArtifactStore};

pub use audio_generator::{wav_bytes, write_test_wav, AudioConfig};

/// Split bytes into a multi-chunk stream
pub fn byte_stream(bytes: Vec<u8>) -> ByteStream {
    let chunks: Vec<std::io::Result<Bytes>> = bytes
        .chunks(4096)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks).boxed()
}

/// Push a file's modification time `age` into the past
pub fn age_file(path: &Path, age: Duration) {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open file for aging");
    file.set_modified(SystemTime::now() - age)
        .expect("set modification time");
}

/// Regular files directly inside `dir`
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Separation service returning fixed WAV stems as byte streams
pub struct FakeSeparation {
    stems: Vec<(StemKind, Vec<u8>)>,
    failure: Option<String>,
    calls: AtomicUsize,
    last_input: Mutex<Option<String>>,
}

impl FakeSeparation {
    pub fn with_stems(kinds: &[StemKind]) -> Self {
        let stems = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let config = AudioConfig {
                    duration_seconds: 0.5,
                    frequency: 220.0 * (i + 1) as f64,
                    ..Default::default()
                };
                (*kind, wav_bytes(&config))
            })
            .collect();

        Self {
            stems,
            failure: None,
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            stems: Vec::new(),
            failure: Some(message.to_string()),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl SeparationService for FakeSeparation {
    async fn separate(&self, audio_uri: &str) -> PipelineResult<SeparatedStems> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(audio_uri.to_string());

        if let Some(message) = &self.failure {
            return Err(PipelineError::Upstream(message.clone()));
        }

        let mut stems = SeparatedStems::new();
        for (kind, bytes) in &self.stems {
            stems = stems.with(*kind, ServiceOutput::Stream(byte_stream(bytes.clone())));
        }
        Ok(stems)
    }
}

/// What the fake conversion service hands back
#[derive(Debug, Clone)]
pub enum ConversionMode {
    Locator(reqwest::Url),
    Stream(Vec<u8>),
    Fail(String),
}

/// Voice conversion service with a fixed answer
pub struct FakeConversion {
    mode: ConversionMode,
    calls: AtomicUsize,
    last_input: Mutex<Option<String>>,
    last_profile: Mutex<Option<ConversionProfile>>,
}

impl FakeConversion {
    pub fn new(mode: ConversionMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
            last_profile: Mutex::new(None),
        }
    }

    pub fn locator(url: &str) -> Self {
        Self::new(ConversionMode::Locator(reqwest::Url::parse(url).unwrap()))
    }

    pub fn streaming() -> Self {
        let config = AudioConfig {
            duration_seconds: 0.5,
            ..Default::default()
        };
        Self::new(ConversionMode::Stream(wav_bytes(&config)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().unwrap().clone()
    }

    pub fn last_profile(&self) -> Option<ConversionProfile> {
        self.last_profile.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceConversionService for FakeConversion {
    async fn convert(
        &self,
        audio_uri: &str,
        profile: &ConversionProfile,
    ) -> PipelineResult<ServiceOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(audio_uri.to_string());
        *self.last_profile.lock().unwrap() = Some(profile.clone());

        match &self.mode {
            ConversionMode::Locator(url) => Ok(ServiceOutput::Locator(url.clone())),
            ConversionMode::Stream(bytes) => Ok(ServiceOutput::Stream(byte_stream(bytes.clone()))),
            ConversionMode::Fail(message) => Err(PipelineError::Upstream(message.clone())),
        }
    }
}

/// Combiner that records its inputs and copies the first one to the output
#[derive(Default)]
pub struct RecordingCombiner {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<PathBuf>>,
    pub fail: bool,
}

impl RecordingCombiner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StemCombiner for RecordingCombiner {
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.inputs.lock().unwrap() = inputs.to_vec();

        if self.fail {
            return Err(PipelineError::Upstream("mixer exploded".to_string()));
        }

        std::fs::copy(&inputs[0], output)
            .map_err(|e| PipelineError::Upstream(e.to_string()))?;
        Ok(())
    }
}

/// A pipeline over a temporary root folder
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<dyn ArtifactStore>,
    pub separation: Arc<FakeSeparation>,
    pub conversion: Arc<FakeConversion>,
    pub pipeline: Arc<Pipeline>,
}

impl TestEnv {
    pub async fn new(separation: FakeSeparation, conversion: FakeConversion) -> Self {
        Self::with_combiner(separation, conversion, Arc::new(NativeCombiner::new())).await
    }

    pub async fn with_combiner(
        separation: FakeSeparation,
        conversion: FakeConversion,
        combiner: Arc<dyn StemCombiner>,
    ) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store: Arc<dyn ArtifactStore> = Arc::new(
            LocalArtifactStore::open(dir.path().join("artifacts"))
                .await
                .expect("open store"),
        );
        let cache = ResultCache::new(
            Arc::new(JsonFileCacheStore::new(dir.path().join("cache.json"))),
            Arc::clone(&store),
        );
        let resolver = Arc::new(ReferenceResolver::new(Arc::clone(&store)).expect("resolver"));

        let separation = Arc::new(separation);
        let conversion = Arc::new(conversion);
        let pipeline = Arc::new(Pipeline::new(
            resolver,
            cache,
            separation.clone(),
            conversion.clone(),
            combiner,
        ));

        Self {
            dir,
            store,
            separation,
            conversion,
            pipeline,
        }
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn artifacts(&self) -> Vec<String> {
        list_files(&self.artifact_dir())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.path().join("cache.json")
    }
}
