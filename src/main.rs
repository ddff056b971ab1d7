use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

use argpipe::pipeline::{
    self, extract_stage, sample_stage, simulate_stage, PipelineConfig, SampleParams, SimParams,
    Statistic, Tools,
};
use argpipe::{compat, defaults, sites::Sites, smc::LocalTrees};

#[derive(Parser)]
#[command(name = "argpipe")]
#[command(about = "ARG sampling pipeline harness with an infinite-sites compatibility validator", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbosity level (1=error, 2=warning, 3=message, 4=debug, 5+=trace)
    #[arg(short = 'v', long, global = true, value_name = "INT", default_value_t = defaults::VERBOSITY)]
    verbosity: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct ModelArgs {
    /// Effective population size
    #[arg(short = 'N', long, value_name = "FLOAT", default_value_t = defaults::POPSIZE)]
    popsize: f64,

    /// Recombination rate per site per generation
    #[arg(short = 'r', long, value_name = "FLOAT", default_value_t = defaults::RECOMB_RATE)]
    recomb_rate: f64,

    /// Mutation rate per site per generation
    #[arg(short = 'm', long, value_name = "FLOAT", default_value_t = defaults::MUTATION_RATE)]
    mut_rate: f64,

    /// Number of discretized time points
    #[arg(long, value_name = "INT", default_value_t = defaults::NTIMES)]
    ntimes: u32,

    /// Maximum time in generations
    #[arg(long, value_name = "FLOAT", default_value_t = defaults::MAX_TIME)]
    maxtime: f64,
}

#[derive(clap::Args, Clone)]
struct SamplerArgs {
    /// Number of sampling chains
    #[arg(short = 'c', long, value_name = "INT", default_value_t = defaults::CHAINS)]
    chains: u32,

    /// Number of sampling iterations
    #[arg(short = 'n', long, value_name = "INT", default_value_t = defaults::ITERS)]
    iters: u32,

    /// Iterations between saved samples
    #[arg(long, value_name = "INT", default_value_t = defaults::SAMPLE_STEP)]
    sample_step: u32,

    /// Random seed passed to the sampler
    #[arg(short = 'x', long, value_name = "INT", default_value_t = defaults::SEED)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a ground-truth ARG and sites file
    Simulate {
        /// Output directory (cleared before the run)
        #[arg(short = 'o', long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Number of sampled lineages
        #[arg(short = 'k', long, value_name = "INT", default_value_t = defaults::SAMPLES)]
        samples: u32,

        /// Sequence length in bases
        #[arg(short = 'L', long, value_name = "INT", default_value_t = defaults::SEQLEN)]
        seqlen: u64,

        #[command(flatten)]
        model: ModelArgs,

        /// Directory holding the external arg-* tools (default: PATH)
        #[arg(long, value_name = "DIR")]
        tools_dir: Option<PathBuf>,
    },

    /// Sample ARGs from a sites file
    Sample {
        /// Input sites file
        #[arg(short = 's', long, value_name = "FILE")]
        sites: PathBuf,

        /// Output directory (cleared unless --resume)
        #[arg(short = 'o', long, value_name = "DIR")]
        out_dir: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        sampler: SamplerArgs,

        /// Continue from the last checkpoint instead of restarting;
        /// requires the prior output directory to exist
        #[arg(long)]
        resume: bool,

        /// Directory holding the external arg-* tools (default: PATH)
        #[arg(long, value_name = "DIR")]
        tools_dir: Option<PathBuf>,
    },

    /// Extract one summary statistic from sampled ARGs
    Extract {
        /// Which statistic to extract
        #[arg(long, value_enum, value_name = "STAT")]
        stat: Statistic,

        /// SMC path pattern with %d for the sample index
        #[arg(value_name = "SMC_PATTERN")]
        smc_pattern: String,

        /// Sites file (required by the ages extractor)
        #[arg(short = 's', long, value_name = "FILE")]
        sites: Option<PathBuf>,

        /// Write the report here instead of stdout
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Directory holding the external arg-* tools (default: PATH)
        #[arg(long, value_name = "DIR")]
        tools_dir: Option<PathBuf>,
    },

    /// Check every site of a sampled ARG for branch compatibility
    Validate {
        /// Sampled ARG (.smc or .smc.gz)
        #[arg(long, value_name = "FILE")]
        arg: PathBuf,

        /// Sites file the ARG was sampled from
        #[arg(short = 's', long, value_name = "FILE")]
        sites: PathBuf,

        /// Number of worker threads (default: all cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,
    },

    /// Run the full pipeline: simulate, sample, resume, extract
    Pipeline {
        /// Output root directory (cleared before the run)
        #[arg(short = 'o', long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Number of sampled lineages
        #[arg(short = 'k', long, value_name = "INT", default_value_t = defaults::SAMPLES)]
        samples: u32,

        /// Sequence length in bases
        #[arg(short = 'L', long, value_name = "INT", default_value_t = defaults::SEQLEN)]
        seqlen: u64,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        sampler: SamplerArgs,

        /// Extended iteration budget for an extra resumed sampler run
        #[arg(long, value_name = "INT")]
        resume_iters: Option<u32>,

        /// Directory holding the external arg-* tools (default: PATH)
        #[arg(long, value_name = "DIR")]
        tools_dir: Option<PathBuf>,
    },
}

impl ModelArgs {
    fn sim_params(&self, samples: u32, seqlen: u64) -> SimParams {
        SimParams {
            samples,
            seqlen,
            popsize: self.popsize,
            recomb_rate: self.recomb_rate,
            mut_rate: self.mut_rate,
            ntimes: self.ntimes,
            maxtime: self.maxtime,
        }
    }

    fn sample_params(&self, sampler: &SamplerArgs, quiet: bool) -> SampleParams {
        SampleParams {
            popsize: self.popsize,
            recomb_rate: self.recomb_rate,
            mut_rate: self.mut_rate,
            ntimes: self.ntimes,
            maxtime: self.maxtime,
            chains: sampler.chains,
            iters: sampler.iters,
            sample_step: sampler.sample_step,
            seed: sampler.seed,
            quiet,
        }
    }
}

fn init_logger(verbosity: i32) {
    // Map verbosity (1=error, 2=warning, 3=message, 4=debug, 5+=trace)
    // to Rust log levels
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn configure_thread_pool(threads: Option<usize>) {
    let mut num_threads = threads.unwrap_or_else(num_cpus::get);
    if num_threads < 1 {
        log::warn!("Invalid thread count {}, using 1 thread", num_threads);
        num_threads = 1;
    }
    let max_threads = num_cpus::get() * 2;
    if num_threads > max_threads {
        log::warn!(
            "Thread count {} exceeds recommended maximum {}, capping at {}",
            num_threads,
            max_threads,
            max_threads
        );
        num_threads = max_threads;
    }
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        log::warn!(
            "Failed to configure thread pool: {} (may already be initialized)",
            e
        );
    }
}

fn run_validate(arg_path: &Path, sites_path: &Path) -> anyhow::Result<()> {
    let arg = LocalTrees::read(arg_path)?;
    let sites = Sites::read(sites_path)?;
    log::info!(
        "loaded {} local trees over [{}, {}] and {} sites for {} samples",
        arg.blocks.len(),
        arg.start + 1,
        arg.end,
        sites.num_sites(),
        sites.num_samples()
    );
    let report = compat::validate(&arg, &sites)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report.write_text(&mut out)?;
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbosity);

    let result: anyhow::Result<()> = match cli.command {
        Commands::Simulate {
            out_dir,
            samples,
            seqlen,
            model,
            tools_dir,
        } => {
            let tools = Tools::new(tools_dir);
            pipeline::make_clean_dir(&out_dir)
                .and_then(|()| {
                    simulate_stage(&tools, &model.sim_params(samples, seqlen), &out_dir.join("0"))
                        .run()
                })
                .map_err(Into::into)
        }

        Commands::Sample {
            sites,
            out_dir,
            model,
            sampler,
            resume,
            tools_dir,
        } => {
            let tools = Tools::new(tools_dir);
            let params = model.sample_params(&sampler, cli.verbosity <= 2);
            let prepare = if resume {
                pipeline::require_dir(&out_dir)
            } else {
                pipeline::make_clean_dir(&out_dir)
            };
            prepare
                .and_then(|()| {
                    sample_stage(&tools, &sites, &params, &out_dir.join("out"), resume).run()
                })
                .map_err(Into::into)
        }

        Commands::Extract {
            stat,
            smc_pattern,
            sites,
            output,
            tools_dir,
        } => {
            let tools = Tools::new(tools_dir);
            extract_stage(&tools, stat, &smc_pattern, sites.as_deref(), output.as_deref())
                .and_then(|stage| stage.run())
                .map_err(Into::into)
        }

        Commands::Validate { arg, sites, threads } => {
            configure_thread_pool(threads);
            run_validate(&arg, &sites)
        }

        Commands::Pipeline {
            out_dir,
            samples,
            seqlen,
            model,
            sampler,
            resume_iters,
            tools_dir,
        } => {
            let cfg = PipelineConfig {
                out_dir,
                tools: Tools::new(tools_dir),
                sim: model.sim_params(samples, seqlen),
                sample: model.sample_params(&sampler, cli.verbosity <= 2),
                resume_iters,
            };
            pipeline::run_pipeline(&cfg).map_err(Into::into)
        }
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
