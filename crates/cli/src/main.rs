use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, Rng, SeedableRng};

use lutnet_common::LayerConfig;
use lutnet_core::{layer_stats, BinaryConv2d, BinaryDense, LayerCore, ResidualSign};

#[derive(Parser, Debug)]
#[command(name = "lutnet", about = "Inspect and exercise LUTNet layers")]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default layer config as JSON.
    InitConfig(InitConfigArgs),
    /// Print kind, tile geometry, parameter stats and weight distribution.
    Inspect(InspectArgs),
    /// Run one forward pass on random input.
    Forward(ForwardArgs),
    /// Calibrate residual coefficients on random samples.
    Calibrate(CalibrateArgs),
}

// ── Args ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct InitConfigArgs {
    #[arg(long, default_value = "layer.json")]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[arg(long, default_value = "layer.json")]
    config: PathBuf,
}

#[derive(Parser, Debug)]
struct ForwardArgs {
    #[arg(long, default_value = "layer.json")]
    config: PathBuf,
    #[arg(long, default_value = "4")]
    batch: usize,
    /// Input height (convolution layers only).
    #[arg(long, default_value = "8")]
    height: usize,
    /// Input width (convolution layers only).
    #[arg(long, default_value = "8")]
    width: usize,
    /// Pre-compute effective weights before the forward pass.
    #[arg(long)]
    cached: bool,
}

#[derive(Parser, Debug)]
struct CalibrateArgs {
    #[arg(long, default_value = "2")]
    levels: usize,
    #[arg(long, default_value = "4096")]
    samples: usize,
    #[arg(long, default_value = "0")]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Command::InitConfig(args) => cmd_init_config(args),
        Command::Inspect(args) => cmd_inspect(args),
        Command::Forward(args) => cmd_forward(args),
        Command::Calibrate(args) => cmd_calibrate(args),
    }
}

// ── Layer dispatch ─────────────────────────────────────────────────────────────

enum Layer {
    Dense(BinaryDense),
    Conv(BinaryConv2d),
}

impl Layer {
    fn new(config: &LayerConfig, vb: VarBuilder) -> Result<Self> {
        Ok(if config.conv.is_some() {
            Self::Conv(BinaryConv2d::new(config, vb)?)
        } else {
            Self::Dense(BinaryDense::new(config, vb)?)
        })
    }

    fn core(&self) -> &LayerCore {
        match self {
            Self::Dense(l) => l.core(),
            Self::Conv(l) => l.core(),
        }
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Self::Dense(l) => l.forward(x)?,
            Self::Conv(l) => l.forward(x)?,
        })
    }
}

fn load_config(path: &Path) -> Result<LayerConfig> {
    LayerConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

// ── Command implementations ────────────────────────────────────────────────────

fn cmd_init_config(args: InitConfigArgs) -> Result<()> {
    LayerConfig::default().save(&args.output)?;
    eprintln!("Created default config at {}", args.output.display());
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let layer = Layer::new(&config, vb)?;
    let core = layer.core();
    let stats = layer_stats(&config);

    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("kind:              {:?}", core.kind());
    println!("tile dims:         {:?}", core.geometry().tile_dims());
    println!("window:            {}", core.geometry().window());
    println!("trainable params:  {}", stats.trainable_params);
    println!("physical LUTs:     {}", stats.lut_count);
    println!("expanded params:   {}", stats.expanded_params);
    println!("sharing ratio:     {}", stats.sharing_ratio);
    println!("distribution:      {}", core.debug_weight_distribution()?);
    Ok(())
}

fn cmd_forward(args: ForwardArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Layer::new(&config, vb.pp("layer"))?;

    let shape = if config.conv.is_some() {
        vec![args.batch, args.height, args.width, config.in_features]
    } else {
        vec![args.batch, config.in_features]
    };
    let raw = Tensor::randn(0f32, 1., shape, &device)?;
    let x = if config.stacked_input() {
        ResidualSign::new(2, vb.pp("act"))?.forward(&raw)?
    } else {
        raw
    };

    if args.cached {
        layer.core().cache_effective_weights()?;
    }
    let start = std::time::Instant::now();
    let y = layer.forward(&x)?;
    let elapsed = start.elapsed();
    let mean = y.mean_all()?.to_scalar::<f32>()?;

    println!("input shape:  {:?}", x.dims());
    println!("output shape: {:?}", y.dims());
    println!("output mean:  {mean:.6}");
    println!("elapsed:      {elapsed:.2?}");
    Ok(())
}

fn cmd_calibrate(args: CalibrateArgs) -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let samples: Vec<f32> = (0..args.samples).map(|_| rng.gen_range(-1.5f32..1.5)).collect();
    let x = Tensor::new(samples.as_slice(), &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let act = ResidualSign::new(args.levels, vb)?;
    println!("initial:    {:?}", act.means()?);
    let means = act.calibrate(&x)?;
    println!("calibrated: {means:?}");
    Ok(())
}
