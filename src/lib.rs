pub mod compat; // Infinite-sites bipartition compatibility validator
pub mod defaults;
pub mod error;
pub mod pipeline; // External stage orchestration (simulate/sample/extract)
pub mod sites; // Sites format reader/writer (variant columns)
pub mod smc; // SMC format reader (ARG as local trees)
pub mod tree; // Rooted trees, newick parsing, leaf bitsets
pub mod utils;
