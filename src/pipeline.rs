// External stage orchestration.
//
// The pipeline drives four kinds of external tools in strict sequence:
// a simulator (arg-sim), a sampler (arg-sample), an optional resumed
// sampler run, and the statistic extractors (arg-extract-*). A stage
// either exits 0 or kills the whole run; there is no retry, because a
// silent retry could mask a non-deterministic sampler defect.
//
// Directory lifecycle: fresh runs clear their working directory before
// the stage executes; resume runs require the prior directory to exist
// and leave its contents alone. Checkpoint contents are opaque here,
// the sampler finds and interprets them itself.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use clap::ValueEnum;

use crate::error::{ArgError, Result};

/// Where to find the external `arg-*` tools.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    dir: Option<PathBuf>,
}

impl Tools {
    /// Resolve tools inside `dir`, or on `PATH` when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// One external pipeline stage: a named command with its arguments.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    stdout_to: Option<PathBuf>,
}

impl Stage {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Redirect the stage's standard output into `path`.
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_to = Some(path.to_path_buf());
        self
    }

    /// The command as a shell-style string, for logs and errors.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the stage to completion. Non-zero exit and signal
    /// termination are both fatal; an interrupt forwarded to the child
    /// surfaces here as `StageSignaled`.
    pub fn run(&self) -> Result<()> {
        log::info!("stage '{}': {}", self.name, self.command_line());
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(path) = &self.stdout_to {
            cmd.stdout(Stdio::from(File::create(path)?));
        }
        let status = cmd.status().map_err(|e| ArgError::StageSpawn {
            stage: self.name.clone(),
            source: e,
        })?;
        match status.code() {
            Some(0) => {
                log::info!("stage '{}' succeeded", self.name);
                Ok(())
            }
            Some(code) => Err(ArgError::StageFailed {
                stage: self.name.clone(),
                code,
                command: self.command_line(),
            }),
            None => Err(ArgError::StageSignaled {
                stage: self.name.clone(),
                command: self.command_line(),
            }),
        }
    }
}

/// Run stages strictly in sequence, aborting on the first failure.
pub fn run_stages(stages: &[Stage]) -> Result<()> {
    for stage in stages {
        stage.run()?;
    }
    Ok(())
}

/// Remove `path` if it exists and recreate it empty.
pub fn make_clean_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Precondition for resume runs: the prior output directory must
/// already exist. Never creates it.
pub fn require_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(ArgError::ResumeMissing(path.to_path_buf()));
    }
    Ok(())
}

/// Simulator parameters (arg-sim).
#[derive(Debug, Clone)]
pub struct SimParams {
    pub samples: u32,
    pub seqlen: u64,
    pub popsize: f64,
    pub recomb_rate: f64,
    pub mut_rate: f64,
    pub ntimes: u32,
    pub maxtime: f64,
}

/// Sampler parameters (arg-sample).
#[derive(Debug, Clone)]
pub struct SampleParams {
    pub popsize: f64,
    pub recomb_rate: f64,
    pub mut_rate: f64,
    pub ntimes: u32,
    pub maxtime: f64,
    pub chains: u32,
    pub iters: u32,
    pub sample_step: u32,
    pub seed: u64,
    pub quiet: bool,
}

/// Simulate a ground-truth ARG and sites file under `out_prefix`.
pub fn simulate_stage(tools: &Tools, params: &SimParams, out_prefix: &Path) -> Stage {
    Stage::new("simulate", tools.resolve("arg-sim"))
        .arg("-k")
        .arg(params.samples.to_string())
        .arg("-L")
        .arg(params.seqlen.to_string())
        .arg("-N")
        .arg(params.popsize.to_string())
        .arg("-r")
        .arg(params.recomb_rate.to_string())
        .arg("-m")
        .arg(params.mut_rate.to_string())
        .arg("--ntimes")
        .arg(params.ntimes.to_string())
        .arg("--maxtime")
        .arg(params.maxtime.to_string())
        .arg("-o")
        .path_arg(out_prefix)
}

/// Sample ARGs from `sites` under `out_prefix`. With `resume` the
/// sampler continues from its last checkpoint instead of restarting,
/// so `params.iters` should carry the extended budget.
pub fn sample_stage(
    tools: &Tools,
    sites: &Path,
    params: &SampleParams,
    out_prefix: &Path,
    resume: bool,
) -> Stage {
    let mut stage = Stage::new(
        if resume { "resume-sample" } else { "sample" },
        tools.resolve("arg-sample"),
    );
    if params.quiet {
        stage = stage.arg("-q");
    }
    stage = stage
        .arg("-s")
        .path_arg(sites)
        .arg("-x")
        .arg(params.seed.to_string())
        .arg("-N")
        .arg(params.popsize.to_string())
        .arg("-r")
        .arg(params.recomb_rate.to_string())
        .arg("-m")
        .arg(params.mut_rate.to_string())
        .arg("--ntimes")
        .arg(params.ntimes.to_string())
        .arg("--maxtime")
        .arg(params.maxtime.to_string())
        .arg("-c")
        .arg(params.chains.to_string())
        .arg("-n")
        .arg(params.iters.to_string())
        .arg("--sample-step")
        .arg(params.sample_step.to_string());
    if resume {
        stage = stage.arg("--resume");
    }
    stage.arg("-o").path_arg(out_prefix)
}

/// Summary statistic extracted from sampled ARGs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Statistic {
    Tmrca,
    Popsize,
    Breaks,
    Recomb,
    Treelen,
    Ages,
}

impl Statistic {
    pub const ALL: [Statistic; 6] = [
        Statistic::Tmrca,
        Statistic::Popsize,
        Statistic::Breaks,
        Statistic::Recomb,
        Statistic::Treelen,
        Statistic::Ages,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Statistic::Tmrca => "tmrca",
            Statistic::Popsize => "popsize",
            Statistic::Breaks => "breaks",
            Statistic::Recomb => "recomb",
            Statistic::Treelen => "treelen",
            Statistic::Ages => "ages",
        }
    }
}

/// Build an extractor stage over a `%d`-patterned SMC path. The ages
/// extractor also needs the sites file; the others ignore it.
pub fn extract_stage(
    tools: &Tools,
    stat: Statistic,
    smc_pattern: &str,
    sites: Option<&Path>,
    output: Option<&Path>,
) -> Result<Stage> {
    let tool = format!("arg-extract-{}", stat.label());
    let mut stage = Stage::new(format!("extract-{}", stat.label()), tools.resolve(&tool))
        .arg(smc_pattern);
    if stat == Statistic::Ages {
        let sites = sites.ok_or_else(|| {
            ArgError::malformed("the ages extractor requires a sites file")
        })?;
        stage = stage.path_arg(sites);
    }
    if let Some(path) = output {
        stage = stage.stdout_to(path);
    }
    Ok(stage)
}

/// A full staged run under one output root.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub out_dir: PathBuf,
    pub tools: Tools,
    pub sim: SimParams,
    pub sample: SampleParams,
    /// Extended iteration budget for an extra resumed sampler run.
    pub resume_iters: Option<u32>,
}

/// Drive simulate -> sample -> (optional resume) -> all extractors.
///
/// The first failing stage aborts everything after it; the error names
/// the stage and carries its exit code.
pub fn run_pipeline(cfg: &PipelineConfig) -> Result<()> {
    make_clean_dir(&cfg.out_dir)?;
    let prefix = cfg.out_dir.join("0");
    simulate_stage(&cfg.tools, &cfg.sim, &prefix).run()?;

    let sites = cfg.out_dir.join("0.sites");
    let sample_dir = cfg.out_dir.join("0.sample");
    make_clean_dir(&sample_dir)?;
    let out_prefix = sample_dir.join("out");
    sample_stage(&cfg.tools, &sites, &cfg.sample, &out_prefix, false).run()?;

    if let Some(iters) = cfg.resume_iters {
        require_dir(&sample_dir)?;
        let mut params = cfg.sample.clone();
        params.iters = iters;
        sample_stage(&cfg.tools, &sites, &params, &out_prefix, true).run()?;
    }

    let pattern = format!("{}.%d.smc.gz", out_prefix.display());
    for stat in Statistic::ALL {
        let report = cfg.out_dir.join(format!("0.{}.txt", stat.label()));
        extract_stage(&cfg.tools, stat, &pattern, Some(&sites), Some(&report))?.run()?;
    }
    log::info!("pipeline finished under {}", cfg.out_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = PathBuf::from(format!("target/test_pipeline_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_tools_resolve() {
        let bare = Tools::new(None);
        assert_eq!(bare.resolve("arg-sim"), PathBuf::from("arg-sim"));
        let dir = Tools::new(Some(PathBuf::from("/opt/arg/bin")));
        assert_eq!(dir.resolve("arg-sim"), PathBuf::from("/opt/arg/bin/arg-sim"));
    }

    #[test]
    fn test_simulate_stage_command_line() {
        let params = SimParams {
            samples: 8,
            seqlen: 100_000,
            popsize: 1e4,
            recomb_rate: 1.5e-8,
            mut_rate: 2.5e-8,
            ntimes: 20,
            maxtime: 200e3,
        };
        let stage = simulate_stage(&Tools::new(None), &params, Path::new("out/0"));
        let line = stage.command_line();
        assert!(line.starts_with("arg-sim -k 8 -L 100000 -N 10000"));
        assert!(line.contains("--ntimes 20"));
        assert!(line.ends_with("-o out/0"));
    }

    #[test]
    fn test_sample_stage_resume_flag() {
        let params = SampleParams {
            popsize: 1e4,
            recomb_rate: 1.5e-8,
            mut_rate: 2.5e-8,
            ntimes: 20,
            maxtime: 200e3,
            chains: 1,
            iters: 20,
            sample_step: 10,
            seed: 1,
            quiet: true,
        };
        let tools = Tools::new(None);
        let fresh = sample_stage(&tools, Path::new("0.sites"), &params, Path::new("out"), false);
        assert!(!fresh.command_line().contains("--resume"));
        assert_eq!(fresh.name(), "sample");
        let resumed = sample_stage(&tools, Path::new("0.sites"), &params, Path::new("out"), true);
        assert!(resumed.command_line().contains("--resume"));
        assert_eq!(resumed.name(), "resume-sample");
    }

    #[test]
    fn test_extract_ages_requires_sites() {
        let tools = Tools::new(None);
        let err = extract_stage(&tools, Statistic::Ages, "out.%d.smc.gz", None, None).unwrap_err();
        assert!(err.to_string().contains("sites"));
        let ok = extract_stage(
            &tools,
            Statistic::Ages,
            "out.%d.smc.gz",
            Some(Path::new("0.sites")),
            None,
        )
        .unwrap();
        assert!(ok.command_line().ends_with("out.%d.smc.gz 0.sites"));
    }

    #[test]
    fn test_make_clean_dir_clears_stale_artifacts() {
        let dir = test_dir("clean");
        let stale = dir.join("stale.txt");
        fs::write(&stale, "old").unwrap();
        make_clean_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(!stale.exists());
    }

    #[test]
    fn test_require_dir_fails_fast_on_missing() {
        let dir = test_dir("require");
        let missing = dir.join("not_there");
        let err = require_dir(&missing).unwrap_err();
        assert!(matches!(err, ArgError::ResumeMissing(_)));
        // must not have been created as a side effect
        assert!(!missing.exists());
        assert!(require_dir(&dir).is_ok());
    }
}
