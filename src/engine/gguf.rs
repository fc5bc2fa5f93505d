//! Pre-quantized GGUF backend via the llama-cpp-2 bindings.
//!
//! Produces a single self-contained handle: the runtime owns both the
//! vocabulary and the weights, so tokenization, decoding, and detokenization
//! all go through one object.

use std::path::Path;

use crate::engine::{EngineError, GenerationConfig, GenerationOutput, ResolvedDevice, TextModel};

#[cfg(feature = "gguf")]
use std::num::NonZeroU32;
#[cfg(feature = "gguf")]
use std::time::Instant;

#[cfg(feature = "gguf")]
use llama_cpp_2::context::params::LlamaContextParams;
#[cfg(feature = "gguf")]
use llama_cpp_2::context::LlamaContext;
#[cfg(feature = "gguf")]
use llama_cpp_2::llama_backend::LlamaBackend;
#[cfg(feature = "gguf")]
use llama_cpp_2::llama_batch::LlamaBatch;
#[cfg(feature = "gguf")]
use llama_cpp_2::model::params::LlamaModelParams;
#[cfg(feature = "gguf")]
use llama_cpp_2::model::{AddBos, LlamaModel};
#[cfg(feature = "gguf")]
use llama_cpp_2::sampling::LlamaSampler;
#[cfg(feature = "gguf")]
use llama_cpp_2::token::LlamaToken;

/// Tuning knobs for the GGUF runtime.
#[derive(Debug, Clone)]
pub struct GgufConfig {
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Inference threads. 0 = auto (logical cores, capped).
    pub n_threads: u32,
}

impl Default for GgufConfig {
    fn default() -> Self {
        Self { n_ctx: 2048, n_threads: 0 }
    }
}

/// Self-contained GGUF model runtime.
pub struct GgufRuntime {
    #[cfg(feature = "gguf")]
    backend: LlamaBackend,
    #[cfg(feature = "gguf")]
    model: LlamaModel,
    #[cfg(feature = "gguf")]
    n_ctx: u32,
    #[cfg(feature = "gguf")]
    n_threads: i32,
    /// Serializes same-handle generation; llama contexts are not meant to be
    /// driven concurrently against one model instance.
    #[cfg(feature = "gguf")]
    flight: parking_lot::Mutex<()>,
}

// SAFETY: LlamaModel and LlamaBackend are Send+Sync in llama-cpp-2.
#[cfg(feature = "gguf")]
unsafe impl Send for GgufRuntime {}
#[cfg(feature = "gguf")]
unsafe impl Sync for GgufRuntime {}

impl GgufRuntime {
    /// Load a GGUF weight file, offloading all layers when the load resolved
    /// to an accelerator.
    #[cfg(feature = "gguf")]
    pub fn load(
        path: &Path,
        device: ResolvedDevice,
        config: &GgufConfig,
    ) -> Result<Self, EngineError> {
        let backend = LlamaBackend::init()
            .map_err(|e| EngineError::BackendInit(format!("llama backend: {e}")))?;
        let n_gpu_layers = if device.is_accelerator() { u32::MAX } else { 0 };
        let model_params = LlamaModelParams::default().with_n_gpu_layers(n_gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| EngineError::Model(format!("load {}: {e}", path.display())))?;
        Ok(Self {
            backend,
            model,
            n_ctx: config.n_ctx,
            n_threads: resolve_threads(config.n_threads),
            flight: parking_lot::Mutex::new(()),
        })
    }

    #[cfg(not(feature = "gguf"))]
    pub fn load(
        _path: &Path,
        _device: ResolvedDevice,
        _config: &GgufConfig,
    ) -> Result<Self, EngineError> {
        Err(EngineError::BackendUnavailable("gguf"))
    }

    #[cfg(feature = "gguf")]
    fn create_context(&self) -> Result<LlamaContext<'_>, EngineError> {
        let p = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        self.model
            .new_context(&self.backend, p)
            .map_err(|e| EngineError::Model(format!("ctx: {e}")))
    }

    #[cfg(feature = "gguf")]
    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>, EngineError> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| EngineError::Tokenizer(format!("tokenize: {e}")))
    }

    #[cfg(feature = "gguf")]
    fn detokenize(&self, tokens: &[LlamaToken]) -> Result<String, EngineError> {
        let mut dec = encoding_rs::UTF_8.new_decoder();
        let mut out = String::new();
        for &t in tokens {
            let piece = self
                .model
                .token_to_piece(t, &mut dec, false, None)
                .map_err(|e| EngineError::Model(format!("detok: {e}")))?;
            out.push_str(&piece);
        }
        Ok(out)
    }

    /// Decode up to `max_tok` new tokens. The prompt tokens are never part of
    /// the returned vector, only what the model emitted after them.
    #[cfg(feature = "gguf")]
    fn sample_loop(
        &self,
        ctx: &mut LlamaContext<'_>,
        prompt: &[LlamaToken],
        config: &GenerationConfig,
    ) -> Result<Vec<LlamaToken>, EngineError> {
        let mut batch = LlamaBatch::new(prompt.len(), 1);
        add_seq(&mut batch, prompt)?;
        decode(ctx, &mut batch)?;
        let mut sampler = build_sampler(config);
        sampler.accept_many(prompt.iter().copied());
        let mut out = Vec::new();
        let mut pos = prompt.len() as i32;
        for _ in 0..config.max_new_tokens {
            // -1 samples from the last token that had logits computed.
            let tok = sampler.sample(ctx, -1);
            sampler.accept(tok);
            if self.model.is_eog_token(tok) {
                break;
            }
            out.push(tok);
            batch.clear();
            add_one(&mut batch, tok, pos)?;
            decode(ctx, &mut batch)?;
            pos += 1;
        }
        Ok(out)
    }
}

impl TextModel for GgufRuntime {
    #[cfg(feature = "gguf")]
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationOutput, EngineError> {
        config.validate()?;
        if prompt.is_empty() {
            return Err(EngineError::InvalidParams("prompt cannot be empty".into()));
        }
        let _flight = self.flight.lock();
        let tokens = self.tokenize(prompt)?;
        let mut ctx = self.create_context()?;
        let start = Instant::now();
        let out_tokens = self.sample_loop(&mut ctx, &tokens, config)?;
        let elapsed = start.elapsed();
        let text = self.detokenize(&out_tokens)?;
        Ok(GenerationOutput {
            text,
            tokens_generated: out_tokens.len(),
            elapsed,
        })
    }

    #[cfg(not(feature = "gguf"))]
    fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<GenerationOutput, EngineError> {
        Err(EngineError::BackendUnavailable("gguf"))
    }

    fn format(&self) -> &'static str {
        "gguf"
    }
}

#[cfg(feature = "gguf")]
fn add_seq(batch: &mut LlamaBatch, tokens: &[LlamaToken]) -> Result<(), EngineError> {
    // Only the last prompt token needs logits; the rest are context.
    let n = tokens.len();
    if n == 0 {
        return Ok(());
    }
    for (i, &tok) in tokens.iter().enumerate() {
        let logits = i == n - 1;
        batch
            .add(tok, i as i32, &[0], logits)
            .map_err(|e| EngineError::Model(format!("batch: {e}")))?;
    }
    Ok(())
}

#[cfg(feature = "gguf")]
fn add_one(batch: &mut LlamaBatch, tok: LlamaToken, pos: i32) -> Result<(), EngineError> {
    batch
        .add(tok, pos, &[0], true)
        .map_err(|e| EngineError::Model(format!("batch: {e}")))
}

#[cfg(feature = "gguf")]
fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<(), EngineError> {
    ctx.decode(batch)
        .map_err(|e| EngineError::Model(format!("decode: {e}")))
}

#[cfg(feature = "gguf")]
fn build_sampler(config: &GenerationConfig) -> LlamaSampler {
    if config.is_greedy() {
        return LlamaSampler::greedy();
    }
    let mut s = Vec::new();
    if config.top_k > 0 {
        s.push(LlamaSampler::top_k(config.top_k as i32));
    }
    s.push(LlamaSampler::top_p(config.top_p, 1));
    s.push(LlamaSampler::temp(config.temperature));
    s.push(LlamaSampler::dist(42));
    LlamaSampler::chain_simple(s)
}

#[cfg(feature = "gguf")]
fn resolve_threads(n: u32) -> i32 {
    if n == 0 {
        // Inference is memory-bound; all logical cores help up to a point.
        let optimal = num_cpus::get().max(1).min(16);
        i32::try_from(optimal).unwrap_or(4)
    } else {
        i32::try_from(n).unwrap_or(4)
    }
}
