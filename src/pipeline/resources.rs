//! Resource lifecycle management for heavy model stages
//!
//! Tracks which model resources are loaded, loads each lazily on first use,
//! and releases deterministically at session end or on a mode switch that
//! drops a stage. Handles are exclusively owned here; callers borrow an
//! `Arc` for the duration of one stage invocation and never cache it across
//! turns.
//!
//! Invariant: a handle for a stage the current mode does not need is always
//! absent, so peak device memory is bounded by the union of stages the
//! *current* mode needs.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::stages::{Generator, StageFactory, Synthesizer, Transcriber};
use crate::types::{PipelineMode, StageKind};

pub struct ResourceManager {
    factory: Arc<dyn StageFactory>,
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Option<Arc<dyn Generator>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    /// Stages whose load already failed this session; not retried silently.
    failed: HashMap<StageKind, String>,
}

impl ResourceManager {
    pub fn new(factory: Arc<dyn StageFactory>) -> Self {
        Self {
            factory,
            transcriber: None,
            generator: None,
            synthesizer: None,
            failed: HashMap::new(),
        }
    }

    /// Acquire the transcriber, loading it on first use. Idempotent: a second
    /// call returns the existing handle without reloading.
    pub async fn transcriber(&mut self) -> Result<Arc<dyn Transcriber>, PipelineError> {
        if let Some(handle) = &self.transcriber {
            return Ok(handle.clone());
        }
        self.check_failed(StageKind::Transcriber)?;
        info!("Loading transcriber");
        match self.factory.load_transcriber().await {
            Ok(handle) => {
                self.transcriber = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => Err(self.record_failure(StageKind::Transcriber, e)),
        }
    }

    pub async fn generator(&mut self) -> Result<Arc<dyn Generator>, PipelineError> {
        if let Some(handle) = &self.generator {
            return Ok(handle.clone());
        }
        self.check_failed(StageKind::Generator)?;
        info!("Loading generator");
        match self.factory.load_generator().await {
            Ok(handle) => {
                self.generator = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => Err(self.record_failure(StageKind::Generator, e)),
        }
    }

    pub async fn synthesizer(&mut self) -> Result<Arc<dyn Synthesizer>, PipelineError> {
        if let Some(handle) = &self.synthesizer {
            return Ok(handle.clone());
        }
        self.check_failed(StageKind::Synthesizer)?;
        info!("Loading synthesizer");
        match self.factory.load_synthesizer().await {
            Ok(handle) => {
                self.synthesizer = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => Err(self.record_failure(StageKind::Synthesizer, e)),
        }
    }

    pub fn is_loaded(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Transcriber => self.transcriber.is_some(),
            StageKind::Generator => self.generator.is_some(),
            StageKind::Synthesizer => self.synthesizer.is_some(),
        }
    }

    /// Free one stage's handle. Safe to call when already released.
    pub fn release(&mut self, kind: StageKind) {
        let was_loaded = self.is_loaded(kind);
        match kind {
            StageKind::Transcriber => self.transcriber = None,
            StageKind::Generator => self.generator = None,
            StageKind::Synthesizer => self.synthesizer = None,
        }
        self.failed.remove(&kind);
        if was_loaded {
            info!("Released {}", kind);
        } else {
            debug!("Release of {} was a no-op", kind);
        }
    }

    /// Release everything. Called at session teardown.
    pub fn release_all(&mut self) {
        for kind in [
            StageKind::Transcriber,
            StageKind::Generator,
            StageKind::Synthesizer,
        ] {
            self.release(kind);
        }
    }

    /// Release every stage the given mode does not need. Called on each mode
    /// transition that drops a previously enabled stage.
    pub fn retain_for(&mut self, mode: PipelineMode) {
        for kind in [
            StageKind::Transcriber,
            StageKind::Generator,
            StageKind::Synthesizer,
        ] {
            if !mode.requires(kind) {
                self.release(kind);
            }
        }
    }

    fn check_failed(&self, kind: StageKind) -> Result<(), PipelineError> {
        if let Some(reason) = self.failed.get(&kind) {
            return Err(PipelineError::ResourceLoad {
                stage: kind,
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn record_failure(&mut self, kind: StageKind, err: PipelineError) -> PipelineError {
        warn!("{} failed to load: {}", kind, err);
        self.failed.insert(kind, err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    use crate::types::Turn;

    struct NullTranscriber;

    #[async_trait]
    impl Transcriber for NullTranscriber {
        async fn transcribe(&self, _: &[f32], _: u32) -> Result<String, PipelineError> {
            Ok(String::new())
        }
    }

    struct NullGenerator;

    #[async_trait]
    impl Generator for NullGenerator {
        async fn generate(
            &self,
            _: &[Turn],
        ) -> Result<crate::stages::FragmentStream, PipelineError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    struct NullSynthesizer;

    #[async_trait]
    impl Synthesizer for NullSynthesizer {
        async fn synthesize(&self, _: &str) -> Result<Vec<u8>, PipelineError> {
            Ok(Vec::new())
        }
    }

    /// Counts loads per stage; optionally fails synthesizer loads.
    struct CountingFactory {
        transcriber_loads: AtomicUsize,
        generator_loads: AtomicUsize,
        synthesizer_loads: AtomicUsize,
        fail_synthesizer: bool,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                transcriber_loads: AtomicUsize::new(0),
                generator_loads: AtomicUsize::new(0),
                synthesizer_loads: AtomicUsize::new(0),
                fail_synthesizer: false,
            }
        }
    }

    #[async_trait]
    impl StageFactory for CountingFactory {
        async fn load_transcriber(&self) -> Result<Arc<dyn Transcriber>, PipelineError> {
            self.transcriber_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullTranscriber))
        }

        async fn load_generator(&self) -> Result<Arc<dyn Generator>, PipelineError> {
            self.generator_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullGenerator))
        }

        async fn load_synthesizer(&self) -> Result<Arc<dyn Synthesizer>, PipelineError> {
            self.synthesizer_loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_synthesizer {
                return Err(PipelineError::ResourceLoad {
                    stage: StageKind::Synthesizer,
                    reason: "no cli".into(),
                });
            }
            Ok(Arc::new(NullSynthesizer))
        }
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent() {
        let factory = Arc::new(CountingFactory::new());
        let mut manager = ResourceManager::new(factory.clone());

        let first = manager.transcriber().await.unwrap();
        let second = manager.transcriber().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.transcriber_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_then_reacquire_reloads() {
        let factory = Arc::new(CountingFactory::new());
        let mut manager = ResourceManager::new(factory.clone());

        manager.generator().await.unwrap();
        manager.release(StageKind::Generator);
        assert!(!manager.is_loaded(StageKind::Generator));
        // Release when already released is a no-op
        manager.release(StageKind::Generator);

        manager.generator().await.unwrap();
        assert_eq!(factory.generator_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retain_for_mode_drops_unneeded_stages() {
        let factory = Arc::new(CountingFactory::new());
        let mut manager = ResourceManager::new(factory);

        manager.transcriber().await.unwrap();
        manager.generator().await.unwrap();
        manager.synthesizer().await.unwrap();

        manager.retain_for(PipelineMode::TextOnly);

        assert!(!manager.is_loaded(StageKind::Transcriber));
        assert!(manager.is_loaded(StageKind::Generator));
        assert!(!manager.is_loaded(StageKind::Synthesizer));
    }

    #[tokio::test]
    async fn test_release_all() {
        let factory = Arc::new(CountingFactory::new());
        let mut manager = ResourceManager::new(factory);

        manager.generator().await.unwrap();
        manager.synthesizer().await.unwrap();
        manager.release_all();

        assert!(!manager.is_loaded(StageKind::Generator));
        assert!(!manager.is_loaded(StageKind::Synthesizer));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_retried_silently() {
        let factory = Arc::new(CountingFactory {
            fail_synthesizer: true,
            ..CountingFactory::new()
        });
        let mut manager = ResourceManager::new(factory.clone());

        assert!(manager.synthesizer().await.is_err());
        assert!(manager.synthesizer().await.is_err());
        // The second failure came from the cached record, not a reload.
        assert_eq!(factory.synthesizer_loads.load(Ordering::SeqCst), 1);

        // An explicit release clears the record, allowing a fresh attempt.
        manager.release(StageKind::Synthesizer);
        assert!(manager.synthesizer().await.is_err());
        assert_eq!(factory.synthesizer_loads.load(Ordering::SeqCst), 2);
    }
}
