use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nano_specdec::{
    autoregressive_generate, build_strategy, BigramPredictor, GenerationConfig, SamplingConfig,
    SpeculativeConfig, SpeculativeEngine,
};

#[derive(Parser, Debug)]
#[command(name = "nano-specdec")]
#[command(about = "Speculative decoding over seeded bigram predictors")]
struct Args {
    /// JSON generation config; command-line flags are ignored when set
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Vocabulary size of both predictors
    #[arg(long, default_value = "32")]
    vocab_size: usize,

    /// Prompt token ids, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "1,2,3")]
    prompt: Vec<u32>,

    /// Stop token ids, comma separated
    #[arg(long, value_delimiter = ',', default_value = "0")]
    stop: Vec<u32>,

    /// Draft tokens per step
    #[arg(short = 'k', long, default_value = "5")]
    gamma: usize,

    /// Maximum tokens to generate
    #[arg(long, default_value = "40")]
    max_new_tokens: usize,

    /// Sampling temperature (0 = greedy)
    #[arg(long, default_value = "1.0")]
    temperature: f32,

    /// Top-k cutoff (0 = disabled)
    #[arg(long, default_value = "0")]
    top_k: usize,

    /// Nucleus cutoff (1.0 = disabled)
    #[arg(long, default_value = "1.0")]
    top_p: f32,

    /// Seed for predictors and samplers
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Reprocess the full window on every call
    #[arg(long)]
    no_cache: bool,

    /// Resample from the raw target distribution after a rejection
    #[arg(long)]
    skip_sample_adjustment: bool,

    /// Logit noise separating the drafter from the target
    #[arg(long, default_value = "0.5")]
    drafter_noise: f32,
}

impl Args {
    fn generation_config(&self) -> anyhow::Result<GenerationConfig> {
        if let Some(path) = &self.config {
            return GenerationConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()));
        }
        let config = GenerationConfig {
            speculative: SpeculativeConfig::new(self.stop.clone())
                .num_tokens(self.gamma)
                .max_new_tokens(self.max_new_tokens)
                .use_cache(!self.no_cache)
                .skip_sample_adjustment(self.skip_sample_adjustment),
            sampling: SamplingConfig {
                temperature: self.temperature,
                top_k: self.top_k,
                top_p: self.top_p,
                seed: Some(self.seed),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.generation_config()?;
    let device = Device::Cpu;

    let target = BigramPredictor::random(args.vocab_size, 4.0, args.seed, &device)?;
    let drafter = target.perturbed(args.drafter_noise, args.seed.wrapping_add(1))?;
    let mut baseline_target = target.clone();

    info!(
        vocab_size = args.vocab_size,
        gamma = config.speculative.num_speculative_tokens,
        max_new_tokens = config.speculative.max_new_tokens,
        temperature = config.sampling.temperature,
        "nano-specdec v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut engine = SpeculativeEngine::with_seed(
        target,
        drafter,
        config.speculative.clone(),
        args.seed.wrapping_add(2),
    )?;
    let mut strategy = build_strategy(&config.sampling)?;
    let output = engine.generate(&args.prompt, strategy.as_mut(), None)?;

    println!("Speculative: {:?}", output.tokens);
    println!(
        "  finish={} steps={} accepted={}/{} rate={:.3}",
        output.finish_reason.as_str(),
        output.steps.len(),
        output.stats.drafts_accepted,
        output.stats.drafts_speculated,
        output.acceptance_rate
    );

    let mut strategy = build_strategy(&config.sampling)?;
    let baseline = autoregressive_generate(
        &mut baseline_target,
        &args.prompt,
        &config.speculative,
        strategy.as_mut(),
        None,
    )?;

    println!("Autoregressive: {:?}", baseline.tokens);
    println!(
        "  finish={} target_calls={}",
        baseline.finish_reason.as_str(),
        baseline.target_calls
    );

    Ok(())
}
