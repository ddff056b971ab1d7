// SMC format reader: a sampled ARG as a sequence of local trees.
//
//   NAMES   <name> ...
//   REGION  <chrom> <start> <end>       1-based inclusive start
//   TREE    <start> <end> <newick>      local tree for one block
//   SPR     <pos> <rnode> <rtime> <cnode> <ctime>
//
// TREE blocks are 1-based inclusive in the file and 0-based half-open
// in memory. Newick leaves are integer indices into NAMES. SPR lines
// describe the recombination between adjacent blocks; the validator
// only needs their count.
//
// Reading fails loudly on structural corruption: blocks out of order,
// gaps or overlaps in coverage, or trees whose leaf set is not exactly
// the sample universe. A file that parses is safe to validate.

use std::path::Path;

use crate::error::{ArgError, Result};
use crate::tree::{parse_newick, Tree};
use crate::utils::open_maybe_gz;

/// One genomic block and its local tree.
#[derive(Debug, Clone)]
pub struct LocalBlock {
    /// Block start, 0-based.
    pub start: i64,
    /// Block end, exclusive.
    pub end: i64,
    /// Raw local tree as parsed (not yet normalized).
    pub tree: Tree,
}

/// A sampled ARG: local trees covering a region without gaps or overlaps.
#[derive(Debug, Clone)]
pub struct LocalTrees {
    pub chrom: String,
    /// Region start, 0-based.
    pub start: i64,
    /// Region end, exclusive.
    pub end: i64,
    /// Ordered sample names; newick leaf indices refer to this order.
    pub names: Vec<String>,
    pub blocks: Vec<LocalBlock>,
    /// Number of SPR (recombination) records seen.
    pub num_sprs: usize,
}

impl LocalTrees {
    pub fn num_samples(&self) -> usize {
        self.names.len()
    }

    /// Read an SMC file (`.smc` or `.smc.gz`).
    pub fn read(path: &Path) -> Result<LocalTrees> {
        let reader = open_maybe_gz(path)?;
        Self::parse(reader, &path.display().to_string())
    }

    /// Parse the SMC format from any line source. `path` is only used
    /// in error messages.
    pub fn parse(reader: impl std::io::BufRead, path: &str) -> Result<LocalTrees> {
        let mut chrom = String::new();
        let mut start: i64 = -1;
        let mut end: i64 = -1;
        let mut names: Vec<String> = Vec::new();
        let mut blocks: Vec<LocalBlock> = Vec::new();
        let mut num_sprs = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = idx + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("NAMES\t") {
                names = rest.split('\t').map(str::to_owned).collect();
                if names.iter().any(String::is_empty) {
                    return Err(ArgError::parse(path, lineno, "empty sample name"));
                }
            } else if let Some(rest) = line.strip_prefix("REGION\t") {
                let fields: Vec<&str> = rest.split('\t').collect();
                if fields.len() != 3 {
                    return Err(ArgError::parse(path, lineno, "bad REGION format"));
                }
                chrom = fields[0].to_owned();
                let s: i64 = fields[1]
                    .parse()
                    .map_err(|_| ArgError::parse(path, lineno, "bad REGION start"))?;
                end = fields[2]
                    .parse()
                    .map_err(|_| ArgError::parse(path, lineno, "bad REGION end"))?;
                start = s - 1;
            } else if let Some(rest) = line.strip_prefix("TREE\t") {
                if names.is_empty() {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        "NAMES line must come before TREE lines",
                    ));
                }
                let mut fields = rest.splitn(3, '\t');
                let (bs, be, newick) = match (fields.next(), fields.next(), fields.next()) {
                    (Some(a), Some(b), Some(c)) => (a, b, c),
                    _ => return Err(ArgError::parse(path, lineno, "bad TREE format")),
                };
                let block_start: i64 = bs
                    .parse()
                    .map_err(|_| ArgError::parse(path, lineno, "bad TREE start"))?;
                let block_end: i64 = be
                    .parse()
                    .map_err(|_| ArgError::parse(path, lineno, "bad TREE end"))?;
                let tree = parse_newick(newick)
                    .map_err(|e| ArgError::parse(path, lineno, format!("bad TREE newick: {e}")))?;
                check_leaves(&tree, names.len())
                    .map_err(|msg| ArgError::parse(path, lineno, msg))?;
                blocks.push(LocalBlock {
                    start: block_start - 1,
                    end: block_end,
                    tree,
                });
            } else if line.starts_with("SPR\t") {
                num_sprs += 1;
            } else {
                return Err(ArgError::parse(
                    path,
                    lineno,
                    format!("unrecognized line: {}", line.split('\t').next().unwrap_or("")),
                ));
            }
        }

        if names.is_empty() {
            return Err(ArgError::malformed(format!("{path}: no NAMES line")));
        }
        if start < 0 || end <= start {
            return Err(ArgError::malformed(format!("{path}: no valid REGION line")));
        }

        let arg = LocalTrees {
            chrom,
            start,
            end,
            names,
            blocks,
            num_sprs,
        };
        arg.check_coverage()?;
        Ok(arg)
    }

    /// Verify that blocks exactly partition `[start, end)`. Fatal on
    /// any gap, overlap, or missing coverage at either end.
    pub fn check_coverage(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(ArgError::malformed("ARG contains no local trees"));
        }
        let mut expected = self.start;
        for block in &self.blocks {
            if block.start != expected {
                return Err(ArgError::malformed(format!(
                    "local tree blocks do not tile the region: expected a block \
                     starting at {} but found one starting at {}",
                    expected + 1,
                    block.start + 1
                )));
            }
            if block.end <= block.start {
                return Err(ArgError::malformed(format!(
                    "empty local tree block at {}",
                    block.start + 1
                )));
            }
            expected = block.end;
        }
        if expected != self.end {
            return Err(ArgError::malformed(format!(
                "local tree blocks end at {} but the region ends at {}",
                expected, self.end
            )));
        }
        Ok(())
    }
}

fn check_leaves(tree: &Tree, n_samples: usize) -> std::result::Result<(), String> {
    let mut seen = vec![false; n_samples];
    for label in tree.leaf_labels() {
        if label >= n_samples {
            return Err(format!(
                "leaf index {label} out of range for {n_samples} samples"
            ));
        }
        if seen[label] {
            return Err(format!("leaf index {label} appears twice"));
        }
        seen[label] = true;
    }
    if let Some(missing) = seen.iter().position(|&s| !s) {
        return Err(format!("leaf index {missing} missing from tree"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FIXTURE: &str = "NAMES\tA\tB\tC\tD\n\
        REGION\tchr1\t1\t100\n\
        TREE\t1\t40\t((0:10,1:10)4:20,(2:10,3:10)5:20)6;\n\
        SPR\t40\t4\t25.0\t5\t25.0\n\
        TREE\t41\t100\t((0:10,2:10)4:20,(1:10,3:10)5:20)6;\n";

    fn parse(text: &str) -> Result<LocalTrees> {
        LocalTrees::parse(Cursor::new(text.as_bytes()), "test.smc")
    }

    #[test]
    fn test_parse_basic() {
        let arg = parse(FIXTURE).unwrap();
        assert_eq!(arg.names, vec!["A", "B", "C", "D"]);
        assert_eq!((arg.start, arg.end), (0, 100));
        assert_eq!(arg.blocks.len(), 2);
        assert_eq!(arg.num_sprs, 1);
        // 1-based inclusive [1,40] becomes 0-based half-open [0,40)
        assert_eq!((arg.blocks[0].start, arg.blocks[0].end), (0, 40));
        assert_eq!((arg.blocks[1].start, arg.blocks[1].end), (40, 100));
        assert_eq!(arg.blocks[0].tree.num_leaves(), 4);
    }

    #[test]
    fn test_reject_coverage_gap() {
        let text = "NAMES\tA\tB\n\
            REGION\tchr1\t1\t100\n\
            TREE\t1\t40\t(0:10,1:10)2;\n\
            TREE\t51\t100\t(0:10,1:10)2;\n";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("do not tile"));
    }

    #[test]
    fn test_reject_coverage_overlap() {
        let text = "NAMES\tA\tB\n\
            REGION\tchr1\t1\t100\n\
            TREE\t1\t60\t(0:10,1:10)2;\n\
            TREE\t41\t100\t(0:10,1:10)2;\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn test_reject_short_coverage() {
        let text = "NAMES\tA\tB\n\
            REGION\tchr1\t1\t100\n\
            TREE\t1\t60\t(0:10,1:10)2;\n";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("region ends"));
    }

    #[test]
    fn test_reject_bad_leaf_universe() {
        // leaf 1 appears twice, leaf 0 missing
        let text = "NAMES\tA\tB\n\
            REGION\tchr1\t1\t100\n\
            TREE\t1\t100\t(1:10,1:10)2;\n";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("appears twice"));
        // leaf index beyond the sample count
        let text = "NAMES\tA\tB\n\
            REGION\tchr1\t1\t100\n\
            TREE\t1\t100\t(0:10,5:10)2;\n";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_reject_unknown_line() {
        let err = parse("NAMES\tA\tB\nREGION\tchr1\t1\t10\nBOGUS\tx\n").unwrap_err();
        assert!(err.to_string().contains("unrecognized"));
    }
}
