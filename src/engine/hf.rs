//! General framework backend via Candle.
//!
//! Loads a model directory the way the upstream hub lays it out:
//! `tokenizer.json`, `config.json`, and one or more `.safetensors` shards.
//! The resulting handle pairs a tokenizer with a Llama-family causal LM;
//! precision follows the resolved device (F32 on cpu, F16 on an accelerator).

use std::path::Path;

use crate::engine::{EngineError, GenerationConfig, GenerationOutput, ResolvedDevice, TextModel};

#[cfg(feature = "hf")]
use std::time::Instant;

#[cfg(feature = "hf")]
use candle_core::{DType, Device, Tensor};
#[cfg(feature = "hf")]
use candle_nn::VarBuilder;
#[cfg(feature = "hf")]
use candle_transformers::generation::LogitsProcessor;
#[cfg(feature = "hf")]
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
#[cfg(feature = "hf")]
use tokenizers::Tokenizer;

#[cfg(feature = "hf")]
const EOS_TOKEN: &str = "</s>";

/// Paired tokenizer + causal LM handle for framework-format model dirs.
pub struct HfCausalModel {
    #[cfg(feature = "hf")]
    tokenizer: Tokenizer,
    #[cfg(feature = "hf")]
    model: Llama,
    #[cfg(feature = "hf")]
    config: Config,
    #[cfg(feature = "hf")]
    device: Device,
    #[cfg(feature = "hf")]
    dtype: DType,
}

impl HfCausalModel {
    /// Load tokenizer, config, and weights from a model directory.
    #[cfg(feature = "hf")]
    pub fn load(dir: &Path, device: ResolvedDevice) -> Result<Self, EngineError> {
        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| EngineError::Tokenizer(format!("tokenizer.json: {e}")))?;

        let raw = std::fs::read(dir.join("config.json"))?;
        let config: LlamaConfig = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::UnsupportedArtifact(format!("config.json: {e}")))?;
        let config = config.into_config(false);

        let mut shards: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
            .collect();
        if shards.is_empty() {
            return Err(EngineError::UnsupportedArtifact(format!(
                "no .safetensors weights in {}",
                dir.display()
            )));
        }
        shards.sort();

        // Full precision on the general-purpose processor, reduced precision
        // on the accelerator: throughput/memory trade, not an accident.
        let dtype = if device.is_accelerator() { DType::F16 } else { DType::F32 };
        let device = candle_device(device)?;
        // SAFETY: weight files are opened read-only and not mutated while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&shards, dtype, &device).map_err(model_err)?
        };
        let model = Llama::load(vb, &config).map_err(model_err)?;

        Ok(Self { tokenizer, model, config, device, dtype })
    }

    #[cfg(not(feature = "hf"))]
    pub fn load(_dir: &Path, _device: ResolvedDevice) -> Result<Self, EngineError> {
        Err(EngineError::BackendUnavailable("hf"))
    }

    #[cfg(feature = "hf")]
    fn eos_matches(&self, token: u32) -> bool {
        let eos = self
            .config
            .eos_token_id
            .clone()
            .or_else(|| self.tokenizer.token_to_id(EOS_TOKEN).map(LlamaEosToks::Single));
        match eos {
            Some(LlamaEosToks::Single(id)) => token == id,
            Some(LlamaEosToks::Multiple(ids)) => ids.contains(&token),
            None => false,
        }
    }
}

impl TextModel for HfCausalModel {
    #[cfg(feature = "hf")]
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationOutput, EngineError> {
        config.validate()?;
        if prompt.is_empty() {
            return Err(EngineError::InvalidParams("prompt cannot be empty".into()));
        }

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Tokenizer(format!("encode: {e}")))?;
        let mut tokens: Vec<u32> = encoding.get_ids().to_vec();
        let prompt_len = tokens.len();

        // Fresh incremental-computation cache per call keeps the handle
        // reentrant across concurrent prompts.
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device).map_err(model_err)?;
        let mut logits_processor = if config.is_greedy() {
            LogitsProcessor::new(299792458, None, None)
        } else {
            LogitsProcessor::new(
                299792458,
                Some(config.temperature as f64),
                Some(config.top_p as f64),
            )
        };

        let start = Instant::now();
        let mut index_pos = 0;
        for index in 0..config.max_new_tokens {
            let (context_size, context_index) = if index > 0 {
                (1, index_pos)
            } else {
                (tokens.len(), 0)
            };
            let ctxt = &tokens[tokens.len().saturating_sub(context_size)..];
            let input = Tensor::new(ctxt, &self.device).map_err(model_err)?
                .unsqueeze(0)
                .map_err(model_err)?;
            let logits = self
                .model
                .forward(&input, context_index, &mut cache)
                .map_err(model_err)?;
            let logits = logits.squeeze(0).map_err(model_err)?;
            index_pos += ctxt.len();

            let next = logits_processor.sample(&logits).map_err(model_err)?;
            if self.eos_matches(next) {
                break;
            }
            tokens.push(next);
        }
        let elapsed = start.elapsed();

        // Slice the prompt off before decoding: only the completion goes back.
        let new_tokens = &tokens[prompt_len..];
        let text = self
            .tokenizer
            .decode(new_tokens, true)
            .map_err(|e| EngineError::Tokenizer(format!("decode: {e}")))?;

        Ok(GenerationOutput {
            text,
            tokens_generated: new_tokens.len(),
            elapsed,
        })
    }

    #[cfg(not(feature = "hf"))]
    fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<GenerationOutput, EngineError> {
        Err(EngineError::BackendUnavailable("hf"))
    }

    fn format(&self) -> &'static str {
        "safetensors"
    }
}

#[cfg(feature = "hf")]
fn candle_device(device: ResolvedDevice) -> Result<Device, EngineError> {
    match device {
        ResolvedDevice::Cpu => Ok(Device::Cpu),
        ResolvedDevice::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(model_err),
        ResolvedDevice::Metal => Device::new_metal(0).map_err(model_err),
    }
}

#[cfg(feature = "hf")]
fn model_err(e: candle_core::Error) -> EngineError {
    EngineError::Model(e.to_string())
}
