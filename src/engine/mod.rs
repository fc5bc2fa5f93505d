//! Text generation engine for Kiln.
//!
//! Two backend paths produce resident model handles: the pre-quantized GGUF
//! path (a single self-contained runtime) and the general framework path
//! (a tokenizer paired with a Candle causal LM). Both satisfy [`TextModel`],
//! so callers never need to know which artifact format produced a handle.

pub mod device;
pub mod error;
pub mod gguf;
pub mod hf;

pub use device::{DeviceMode, ResolvedDevice};
pub use error::EngineError;
pub use gguf::GgufRuntime;
pub use hf::HfCausalModel;

use std::time::Duration;

/// Parameters controlling a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Hard cap on newly generated tokens.
    pub max_new_tokens: usize,
    /// Sampling temperature. `<= 0.0` selects greedy decoding (the default).
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 150,
            temperature: 0.0,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_new_tokens == 0 {
            return Err(EngineError::InvalidParams("max_new_tokens must be > 0".into()));
        }
        if self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(EngineError::InvalidParams("top_p must be in (0, 1]".into()));
        }
        Ok(())
    }

    /// True when decoding should pick the argmax token every step.
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// Result of one generation call.
///
/// `text` contains ONLY the completion - prompt tokens are sliced off before
/// decoding, so the prompt never reappears as a prefix of the output.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub tokens_generated: usize,
    pub elapsed: Duration,
}

impl GenerationOutput {
    /// Emitted tokens per second of wall-clock time.
    ///
    /// A degenerate zero-length elapsed reports zero rather than dividing.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.tokens_generated as f64 / secs
        } else {
            0.0
        }
    }
}

/// The generation contract every resident handle satisfies.
///
/// Implementations tokenize the prompt, run bounded autoregressive decoding,
/// and return only the newly generated tokens with timing attached. Calls are
/// CPU/accelerator-bound and blocking; the service layer runs them under
/// `spawn_blocking`.
pub trait TextModel: Send + Sync {
    /// Generate a completion for `prompt`.
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationOutput, EngineError>;

    /// Short backend label for logs and the models listing.
    fn format(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_is_zero_for_instant_generation() {
        let out = GenerationOutput {
            text: "hi".into(),
            tokens_generated: 2,
            elapsed: Duration::ZERO,
        };
        assert_eq!(out.tokens_per_second(), 0.0);
    }

    #[test]
    fn throughput_is_tokens_over_seconds() {
        let out = GenerationOutput {
            text: String::new(),
            tokens_generated: 30,
            elapsed: Duration::from_secs(2),
        };
        assert!((out.tokens_per_second() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_config_is_greedy_and_bounded() {
        let cfg = GenerationConfig::default();
        assert!(cfg.is_greedy());
        assert_eq!(cfg.max_new_tokens, 150);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let cfg = GenerationConfig { max_new_tokens: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
