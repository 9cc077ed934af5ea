//! Bitonal compression selection.
//!
//! Preference order: JBIG2 lossy (encoder present, lossy enabled, threshold set), JBIG2
//! lossless (encoder present), CCITT Group 4. An unavailable encoder only moves the choice down
//! the list.

use crate::core::config::CompressionConfig;
use crate::types::CompressionChoice;
use crate::utils::probe_tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    Lossy,
    Lossless,
}

/// A high-ratio bitonal encoder that may or may not be installed.
#[async_trait]
pub trait BitonalEncoder: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self, mode: EncoderMode) -> bool;
}

/// The `jbig2` encoder (jbig2enc). Probed once per instance.
#[derive(Debug)]
pub struct Jbig2Encoder {
    program: String,
    available: OnceCell<bool>,
}

impl Jbig2Encoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            available: OnceCell::new(),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::new(config.jbig2_program.clone())
    }
}

#[async_trait]
impl BitonalEncoder for Jbig2Encoder {
    fn name(&self) -> &str {
        "jbig2"
    }

    async fn is_available(&self, _mode: EncoderMode) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let found = probe_tool(&self.program, &["--version"]).await;
                if !found {
                    tracing::info!(program = %self.program, "JBIG2 encoder not found, falling back to CCITT G4");
                }
                found
            })
            .await
    }
}

/// Pick the codec from the configuration and the encoder's availability.
pub fn select_compression(config: &CompressionConfig, lossy_available: bool, lossless_available: bool) -> CompressionChoice {
    if config.jbig2 {
        if config.jbig2_lossy
            && lossy_available
            && let Some(threshold) = config.jbig2_threshold
        {
            return CompressionChoice::Jbig2Lossy { threshold };
        }
        if lossless_available {
            return CompressionChoice::Jbig2Lossless;
        }
    }
    CompressionChoice::CcittG4
}

/// Probe `encoder` as needed and pick the codec. Never fails.
pub async fn choose_compression(config: &CompressionConfig, encoder: &dyn BitonalEncoder) -> CompressionChoice {
    if !config.jbig2 {
        return CompressionChoice::CcittG4;
    }
    let lossy = config.jbig2_lossy && config.jbig2_threshold.is_some() && encoder.is_available(EncoderMode::Lossy).await;
    let lossless = lossy || encoder.is_available(EncoderMode::Lossless).await;
    select_compression(config, lossy, lossless)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEncoder {
        lossy: bool,
        lossless: bool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl BitonalEncoder for FakeEncoder {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_available(&self, mode: EncoderMode) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            match mode {
                EncoderMode::Lossy => self.lossy,
                EncoderMode::Lossless => self.lossless,
            }
        }
    }

    fn fake(lossy: bool, lossless: bool) -> FakeEncoder {
        FakeEncoder {
            lossy,
            lossless,
            probes: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_lossy_needs_flag_and_threshold() {
        let mut config = CompressionConfig {
            jbig2_lossy: true,
            ..CompressionConfig::default()
        };
        assert_eq!(
            choose_compression(&config, &fake(true, true)).await,
            CompressionChoice::Jbig2Lossy { threshold: 0.85 }
        );

        config.jbig2_threshold = None;
        assert_eq!(choose_compression(&config, &fake(true, true)).await, CompressionChoice::Jbig2Lossless);

        let config = CompressionConfig::default();
        assert_eq!(choose_compression(&config, &fake(true, true)).await, CompressionChoice::Jbig2Lossless);
    }

    #[tokio::test]
    async fn test_unavailable_encoder_falls_back() {
        let config = CompressionConfig {
            jbig2_lossy: true,
            ..CompressionConfig::default()
        };
        assert_eq!(choose_compression(&config, &fake(false, true)).await, CompressionChoice::Jbig2Lossless);
        assert_eq!(choose_compression(&config, &fake(false, false)).await, CompressionChoice::CcittG4);
    }

    #[tokio::test]
    async fn test_disabled_jbig2_never_probes() {
        let config = CompressionConfig {
            jbig2: false,
            ..CompressionConfig::default()
        };
        let encoder = fake(true, true);
        assert_eq!(choose_compression(&config, &encoder).await, CompressionChoice::CcittG4);
        assert_eq!(encoder.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_jbig2_binary() {
        let encoder = Jbig2Encoder::new("palimpsest-no-such-jbig2");
        assert!(!encoder.is_available(EncoderMode::Lossless).await);
        assert_eq!(
            choose_compression(&CompressionConfig::default(), &encoder).await,
            CompressionChoice::CcittG4
        );
    }
}
