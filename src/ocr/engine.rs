use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ocr::error::OcrError;

/// Characters the fully configured engine is allowed to emit.
pub const CHAR_WHITELIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 .,;:()[]{}/-+*=@#$%&";

/// Raw recognition output. `confidence` is on the engine's 0-100 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub confidence: f32,
}

/// A ready-to-use recognizer. Implementations receive encoded image bytes
/// (PNG, JPEG, TIFF, BMP) and must not be assumed safe for concurrent calls;
/// the pipeline only ever issues one recognition at a time per document.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: Vec<u8>) -> Result<OcrOutput, OcrError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineProfile {
    /// Auto page segmentation with OSD, LSTM only, whitelist, interword spaces.
    Full,
    /// Language only, engine defaults for everything else.
    Minimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub language: String,
    pub profile: EngineProfile,
    pub datapath: Option<String>,
}

impl EngineConfig {
    pub fn full(language: &str, datapath: Option<String>) -> Self {
        Self {
            language: language.to_string(),
            profile: EngineProfile::Full,
            datapath,
        }
    }

    pub fn minimal(language: &str, datapath: Option<String>) -> Self {
        Self {
            language: language.to_string(),
            profile: EngineProfile::Minimal,
            datapath,
        }
    }
}

/// Builds engines. `create` may block (model loading) and is always called
/// from a blocking thread.
pub trait OcrEngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, OcrError>;
}

/// Factory used when the crate is built without an OCR backend.
pub struct UnavailableEngineFactory;

impl OcrEngineFactory for UnavailableEngineFactory {
    fn create(&self, _config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
        Err(OcrError::TesseractNotInstalled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

enum EngineState {
    Uninitialized,
    Ready {
        language: String,
        profile: EngineProfile,
        engine: Arc<dyn OcrEngine>,
    },
    Failed {
        language: String,
        reason: String,
    },
}

/// Marks initialization as in flight until dropped, including when the
/// awaiting caller is cancelled.
struct InitializingFlag<'a>(&'a AtomicBool);

impl<'a> InitializingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InitializingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Process-wide OCR engine with a single-flight lazy initializer.
///
/// The state lock is held for the whole initialization, so callers that
/// arrive while it is in flight wait for that attempt and share its outcome
/// instead of starting their own. A failed initialization stays failed for
/// its language until [`SharedOcrEngine::shutdown`] resets the handle.
pub struct SharedOcrEngine {
    factory: Arc<dyn OcrEngineFactory>,
    datapath: Option<String>,
    state: Mutex<EngineState>,
    initializing: AtomicBool,
}

impl SharedOcrEngine {
    pub fn new(factory: Arc<dyn OcrEngineFactory>) -> Self {
        Self {
            factory,
            datapath: None,
            state: Mutex::new(EngineState::Uninitialized),
            initializing: AtomicBool::new(false),
        }
    }

    pub fn with_datapath(mut self, datapath: Option<String>) -> Self {
        self.datapath = datapath;
        self
    }

    /// Tesseract-backed engine when the `ocr` feature is enabled, otherwise a
    /// handle whose initialization always fails.
    pub fn system_default(datapath: Option<String>) -> Self {
        #[cfg(feature = "ocr")]
        let factory: Arc<dyn OcrEngineFactory> =
            Arc::new(crate::ocr::tesseract_engine::TesseractEngineFactory);
        #[cfg(not(feature = "ocr"))]
        let factory: Arc<dyn OcrEngineFactory> = Arc::new(UnavailableEngineFactory);

        Self::new(factory).with_datapath(datapath)
    }

    pub async fn status(&self) -> EngineStatus {
        if self.initializing.load(Ordering::SeqCst) {
            return EngineStatus::Initializing;
        }
        match &*self.state.lock().await {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Ready { .. } => EngineStatus::Ready,
            EngineState::Failed { .. } => EngineStatus::Failed,
        }
    }

    /// Profile of the ready engine, if any.
    pub async fn active_profile(&self) -> Option<EngineProfile> {
        match &*self.state.lock().await {
            EngineState::Ready { profile, .. } => Some(*profile),
            _ => None,
        }
    }

    /// Returns the ready engine for `language`, initializing it on first use.
    pub async fn acquire(&self, language: &str) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let mut state = self.state.lock().await;

        match &*state {
            EngineState::Ready {
                language: ready_language,
                engine,
                ..
            } if ready_language == language => return Ok(Arc::clone(engine)),
            EngineState::Failed {
                language: failed_language,
                reason,
            } if failed_language == language => {
                return Err(OcrError::InitializationFailed {
                    details: reason.clone(),
                })
            }
            EngineState::Ready {
                language: ready_language,
                ..
            } => {
                info!(
                    "Re-initializing OCR engine: language changed from '{}' to '{}'",
                    ready_language, language
                );
            }
            _ => {}
        }

        let outcome = {
            let _initializing = InitializingFlag::raise(&self.initializing);
            self.initialize(language).await
        };

        match outcome {
            Ok((engine, profile)) => {
                *state = EngineState::Ready {
                    language: language.to_string(),
                    profile,
                    engine: Arc::clone(&engine),
                };
                Ok(engine)
            }
            Err(e) => {
                let reason = match e {
                    OcrError::InitializationFailed { details } => details,
                    other => other.to_string(),
                };
                *state = EngineState::Failed {
                    language: language.to_string(),
                    reason: reason.clone(),
                };
                Err(OcrError::InitializationFailed { details: reason })
            }
        }
    }

    /// Releases the engine and returns to the uninitialized state.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, EngineState::Uninitialized) {
            info!("Releasing OCR engine");
        }
        *state = EngineState::Uninitialized;
    }

    async fn initialize(
        &self,
        language: &str,
    ) -> Result<(Arc<dyn OcrEngine>, EngineProfile), OcrError> {
        info!("Initializing OCR engine for language '{}'", language);

        let full = EngineConfig::full(language, self.datapath.clone());
        match self.create_blocking(full).await {
            Ok(engine) => {
                debug!("OCR engine ready with full configuration");
                return Ok((engine, EngineProfile::Full));
            }
            Err(e) => {
                warn!(
                    "OCR engine initialization with full configuration failed: {}, retrying with minimal configuration",
                    e
                );
            }
        }

        let minimal = EngineConfig::minimal(language, self.datapath.clone());
        let engine = self.create_blocking(minimal).await?;
        info!("OCR engine ready with minimal configuration");
        Ok((engine, EngineProfile::Minimal))
    }

    async fn create_blocking(&self, config: EngineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let factory = Arc::clone(&self.factory);
        tokio::task::spawn_blocking(move || factory.create(&config))
            .await
            .map_err(OcrError::from_join)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeEngineFactory, FakeOcrEngine};
    use std::time::Duration;

    fn shared(factory: FakeEngineFactory) -> (Arc<FakeEngineFactory>, Arc<SharedOcrEngine>) {
        let factory = Arc::new(factory);
        let engine = Arc::new(SharedOcrEngine::new(factory.clone()));
        (factory, engine)
    }

    #[tokio::test]
    async fn test_lazy_initialization_happens_once() {
        let (factory, engine) = shared(FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0)));

        assert_eq!(engine.status().await, EngineStatus::Uninitialized);
        engine.acquire("eng").await.unwrap();
        engine.acquire("eng").await.unwrap();

        assert_eq!(engine.status().await, EngineStatus::Ready);
        assert_eq!(factory.attempted_profiles(), vec![EngineProfile::Full]);
        assert_eq!(engine.active_profile().await, Some(EngineProfile::Full));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_initialization() {
        let (factory, engine) = shared(
            FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0))
                .with_delay(Duration::from_millis(50)),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.acquire("eng").await.map(|_| ()) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(factory.attempted_profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_full_failure_retries_with_minimal_configuration() {
        let (factory, engine) = shared(
            FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0)).failing_full(),
        );

        engine.acquire("eng").await.unwrap();

        assert_eq!(
            factory.attempted_profiles(),
            vec![EngineProfile::Full, EngineProfile::Minimal]
        );
        assert_eq!(engine.active_profile().await, Some(EngineProfile::Minimal));
    }

    #[tokio::test]
    async fn test_second_failure_is_sticky_until_shutdown() {
        let (factory, engine) = shared(
            FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0))
                .failing_full()
                .failing_minimal(),
        );

        let err = engine.acquire("eng").await.err().unwrap();
        assert_eq!(err.error_code(), "OCR_INIT_FAILED");
        assert_eq!(engine.status().await, EngineStatus::Failed);

        // No new attempt while failed
        assert!(engine.acquire("eng").await.is_err());
        assert_eq!(factory.attempted_profiles().len(), 2);

        engine.shutdown().await;
        assert_eq!(engine.status().await, EngineStatus::Uninitialized);
        assert!(engine.acquire("eng").await.is_err());
        assert_eq!(factory.attempted_profiles().len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_allows_reinitialization() {
        let (factory, engine) = shared(FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0)));

        engine.acquire("eng").await.unwrap();
        engine.shutdown().await;
        assert_eq!(engine.status().await, EngineStatus::Uninitialized);

        engine.acquire("eng").await.unwrap();
        assert_eq!(factory.attempted_profiles().len(), 2);
    }

    #[tokio::test]
    async fn test_language_change_reinitializes() {
        let (factory, engine) = shared(FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0)));

        engine.acquire("eng").await.unwrap();
        engine.acquire("swa").await.unwrap();
        engine.acquire("swa").await.unwrap();

        let languages = factory.attempted_languages();
        assert_eq!(languages, vec!["eng".to_string(), "swa".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_initialization_does_not_stick() {
        let (factory, engine) = shared(
            FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0))
                .with_delay(Duration::from_millis(100)),
        );

        let timed_out = tokio::time::timeout(Duration::from_millis(20), engine.acquire("eng")).await;
        assert!(timed_out.is_err());
        assert_eq!(engine.status().await, EngineStatus::Uninitialized);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(engine.status().await, EngineStatus::Uninitialized);

        engine.acquire("eng").await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Ready);
        assert_eq!(factory.attempted_profiles().len(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_initializing_while_in_flight() {
        let (_, engine) = shared(
            FakeEngineFactory::new(FakeOcrEngine::fixed("text", 90.0))
                .with_delay(Duration::from_millis(100)),
        );

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.acquire("eng").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.status().await, EngineStatus::Initializing);

        pending.await.unwrap().unwrap();
        assert_eq!(engine.status().await, EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_unavailable_factory_fails_both_attempts() {
        let engine = SharedOcrEngine::new(Arc::new(UnavailableEngineFactory));
        let err = engine.acquire("eng").await.err().unwrap();
        assert!(err.to_string().contains("Tesseract is not installed"));
    }
}
