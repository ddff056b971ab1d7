// Sites format reader/writer.
//
// A sites file holds the variant columns of an alignment:
//
//   NAMES   <name> ...          ordered sample names
//   REGION  <chrom> <start> <end>   1-based inclusive start
//   POPS    <int> ...           optional population labels
//   <pos>   <column>            one line per variant site
//
// Coordinates are 1-based in the file and 0-based half-open in memory;
// the conversion happens only here. Site positions must be strictly
// increasing, every column must have one character per sample, and the
// allele alphabet is {A,C,G,T,N} (lower case accepted, upper-cased on
// read). Any violation is fatal: readers never silently drop data.

use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::{ArgError, Result};
use crate::utils::open_maybe_gz;

/// Variant-site matrix for a genomic region.
#[derive(Debug, Clone)]
pub struct Sites {
    /// Chromosome name from the REGION line.
    pub chrom: String,
    /// Region start, 0-based.
    pub start: i64,
    /// Region end, exclusive.
    pub end: i64,
    /// Ordered sample names; column characters align to this order.
    pub names: Vec<String>,
    /// Site positions, 0-based, strictly increasing.
    pub positions: Vec<i64>,
    /// One allele column per position, `columns[i].len() == names.len()`.
    pub columns: Vec<Vec<u8>>,
}

impl Sites {
    pub fn num_samples(&self) -> usize {
        self.names.len()
    }

    pub fn num_sites(&self) -> usize {
        self.positions.len()
    }

    /// Iterate sites with `start <= pos < end` in position order.
    pub fn iter_region(&self, start: i64, end: i64) -> impl Iterator<Item = (i64, &[u8])> {
        let lo = self.positions.partition_point(|&p| p < start);
        let hi = self.positions.partition_point(|&p| p < end);
        self.positions[lo..hi]
            .iter()
            .copied()
            .zip(self.columns[lo..hi].iter().map(|c| c.as_slice()))
    }

    /// Read a sites file (`.sites` or `.sites.gz`).
    pub fn read(path: &Path) -> Result<Sites> {
        let reader = open_maybe_gz(path)?;
        Self::parse(reader, &path.display().to_string())
    }

    /// Parse the sites format from any line source. `path` is only used
    /// in error messages.
    pub fn parse(reader: impl BufRead, path: &str) -> Result<Sites> {
        let mut chrom = String::new();
        let mut start: i64 = -1;
        let mut end: i64 = -1;
        let mut names: Vec<String> = Vec::new();
        let mut positions: Vec<i64> = Vec::new();
        let mut columns: Vec<Vec<u8>> = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = idx + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("NAMES\t") {
                names = rest.split('\t').map(str::to_owned).collect();
                if let Some(i) = names.iter().position(String::is_empty) {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        format!("name for sequence {} is empty", i + 1),
                    ));
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
                start = s - 1; // convert to 0-based
            } else if line.starts_with("RANGE\t") {
                return Err(ArgError::parse(
                    path,
                    lineno,
                    "deprecated RANGE line detected (use REGION instead)",
                ));
            } else if let Some(rest) = line.strip_prefix("POPS\t") {
                if names.is_empty() {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        "NAMES line must come before POPS line",
                    ));
                }
                let count = rest.split('\t').count();
                if count != names.len() {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        format!(
                            "POPS line has {} entries but NAMES has {}",
                            count,
                            names.len()
                        ),
                    ));
                }
                // population labels have no consumer in this harness
            } else {
                // site line: <pos>\t<column>
                if names.is_empty() {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        "NAMES line must come before site lines",
                    ));
                }
                let (pos_str, col_str) = line.split_once('\t').ok_or_else(|| {
                    ArgError::parse(path, lineno, "site line is missing a column field")
                })?;
                let pos: i64 = pos_str.parse().map_err(|_| {
                    ArgError::parse(path, lineno, "first column is not an integer")
                })?;
                let pos = pos - 1; // convert to 0-based
                if pos < start || pos >= end {
                    return Err(ArgError::parse(
                        path,
                        lineno,
                        format!("site position {} outside region", pos + 1),
                    ));
                }
                let column = parse_column(col_str, names.len())
                    .map_err(|msg| ArgError::parse(path, lineno, msg))?;
                if let Some(&last) = positions.last() {
                    if last >= pos {
                        return Err(ArgError::parse(
                            path,
                            lineno,
                            "sites must be sorted and unique",
                        ));
                    }
                }
                positions.push(pos);
                columns.push(column);
            }
        }

        if names.is_empty() {
            return Err(ArgError::malformed(format!("{path}: no NAMES line")));
        }
        if start < 0 || end <= start {
            return Err(ArgError::malformed(format!("{path}: no valid REGION line")));
        }

        Ok(Sites {
            chrom,
            start,
            end,
            names,
            positions,
            columns,
        })
    }

    /// Write the sites format. Constant columns carry no information
    /// and are skipped, matching what the simulator emits.
    pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        let mut header = String::from("NAMES");
        for name in &self.names {
            let _ = write!(header, "\t{name}");
        }
        writeln!(w, "{header}")?;
        writeln!(w, "REGION\t{}\t{}\t{}", self.chrom, self.start + 1, self.end)?;
        for (pos, col) in self.positions.iter().zip(&self.columns) {
            if col.iter().all(|&c| c == col[0]) {
                continue;
            }
            let col_str = std::str::from_utf8(col).expect("allele columns are ASCII");
            writeln!(w, "{}\t{}", pos + 1, col_str)?;
        }
        Ok(())
    }
}

fn parse_column(col_str: &str, n_names: usize) -> std::result::Result<Vec<u8>, String> {
    if col_str.len() != n_names {
        return Err(format!(
            "the number of bases given, {}, does not match the number of sequences {}",
            col_str.len(),
            n_names
        ));
    }
    let mut column = Vec::with_capacity(n_names);
    for c in col_str.bytes() {
        let c = c.to_ascii_uppercase();
        if !matches!(c, b'A' | b'C' | b'G' | b'T' | b'N') {
            return Err(format!("invalid sequence character '{}'", c as char));
        }
        column.push(c);
    }
    Ok(column)
}
