// src/defaults.rs

// Model parameters
pub const POPSIZE: f64 = 1e4;
pub const MUTATION_RATE: f64 = 2.5e-8;
pub const RECOMB_RATE: f64 = 1.5e-8;
pub const NTIMES: u32 = 20;
pub const MAX_TIME: f64 = 200e3;

// Sampler search parameters
pub const ITERS: u32 = 1000;
pub const SAMPLE_STEP: u32 = 10;
pub const CHAINS: u32 = 1;
pub const SEED: u64 = 1;

// Simulator parameters
pub const SAMPLES: u32 = 8;
pub const SEQLEN: u64 = 100_000;

// Other constants
pub const VERBOSITY: i32 = 3;
