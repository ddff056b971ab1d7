// Infinite-sites compatibility validation.
//
// Under the infinite-sites model every variant site mutates exactly
// once, so its allele split must correspond to a single branch of the
// local tree covering the site. `validate` checks this for every site
// of a sampled ARG: split the column into its minority side, then look
// for a tree edge whose subtree holds exactly that side (or its
// complement, since the split may sit on either side of the root).
//
// A non-compatible site is the validator's output signal, not an
// error: it means either a recurrent mutation in the data or a
// reconstruction error in the sampler, and this crate does not
// distinguish the two.

use rayon::prelude::*;

use crate::error::{ArgError, Result};
use crate::sites::Sites;
use crate::smc::LocalTrees;
use crate::tree::{LeafSet, Tree};

/// Minority split of one allele column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteSplit {
    /// Every sample carries the same allele; the site is uninformative.
    Constant,
    /// Two alleles; the smaller side of the induced bipartition.
    Biallelic(LeafSet),
    /// More than two distinct alleles, violating the two-allele
    /// assumption. Never folded into a two-way split.
    MultiAllelic,
}

/// Split a column into the two parts sharing / not sharing the allele
/// at index 0 and return the smaller part as a set of sample indices.
/// On a size tie the part excluding index 0 is the canonical side;
/// `match_branch` tests both a subtree and its complement, so the
/// tie-break only fixes which set is reported.
pub fn site_split(column: &[u8]) -> SiteSplit {
    let reference = column[0];
    let mut part1 = LeafSet::new(column.len());
    let mut part2 = LeafSet::new(column.len());
    let mut second: Option<u8> = None;
    for (i, &c) in column.iter().enumerate() {
        if c == reference {
            part1.insert(i);
        } else {
            match second {
                None => second = Some(c),
                Some(s) if s == c => {}
                Some(_) => return SiteSplit::MultiAllelic,
            }
            part2.insert(i);
        }
    }
    if second.is_none() {
        return SiteSplit::Constant;
    }
    if part1.len() < part2.len() {
        SiteSplit::Biallelic(part1)
    } else {
        SiteSplit::Biallelic(part2)
    }
}

/// Find the edge (identified by its child node) whose removal isolates
/// exactly `target`, or `None` when no edge induces that bipartition.
///
/// `leaf_sets` must come from `tree.leaf_sets` on the same normalized
/// tree. The root is skipped, as is any node holding the full leaf
/// universe. A node matches on its subtree set or on the target's
/// complement, covering both rootings of the split.
pub fn match_branch(tree: &Tree, leaf_sets: &[LeafSet], target: &LeafSet) -> Option<usize> {
    let root = tree.root();
    let universe = &leaf_sets[root];
    let complement = target.complement();
    for id in 0..tree.num_nodes() {
        if id == root || &leaf_sets[id] == universe {
            continue;
        }
        if &leaf_sets[id] == target || leaf_sets[id] == complement {
            return Some(id);
        }
    }
    None
}

/// One site whose split matches no branch of its covering local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncompatSite {
    /// Site position, 0-based.
    pub pos: i64,
    /// Covering block, 0-based half-open.
    pub block_start: i64,
    pub block_end: i64,
    /// The observed allele column.
    pub column: Vec<u8>,
}

/// Result of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatReport {
    /// Non-compatible sites in ascending position order.
    pub noncompat: Vec<NoncompatSite>,
    /// Positions of multi-allelic sites, excluded from the
    /// compatibility count.
    pub multiallelic: Vec<i64>,
    /// Sites tested against a local tree (constant and biallelic).
    pub sites_checked: usize,
}

impl CompatReport {
    pub fn is_compatible(&self) -> bool {
        self.noncompat.is_empty()
    }

    /// Human-readable report with 1-based positions. Always states the
    /// total, including an explicit line when nothing was flagged.
    pub fn write_text(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        for site in &self.noncompat {
            writeln!(
                w,
                "noncompat\t{}\tblock\t{}\t{}\t{}",
                site.pos + 1,
                site.block_start + 1,
                site.block_end,
                String::from_utf8_lossy(&site.column),
            )?;
        }
        for pos in &self.multiallelic {
            writeln!(w, "multiallelic\t{}", pos + 1)?;
        }
        writeln!(w, "sites checked: {}", self.sites_checked)?;
        if self.noncompat.is_empty() {
            writeln!(w, "no violations found")?;
        } else {
            writeln!(w, "non-compatible sites: {}", self.noncompat.len())?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct BlockReport {
    noncompat: Vec<NoncompatSite>,
    multiallelic: Vec<i64>,
    checked: usize,
}

/// Check every variant site of `sites` against the local tree covering
/// it in `arg`.
///
/// Preconditions, each fatal before any site is processed: the blocks
/// must tile the ARG region, the ARG must cover the sites region, and
/// both artifacts must name the same samples in the same order. Blocks
/// are independent and validated in parallel; per-block results are
/// merged in block order, so repeated runs produce identical reports.
pub fn validate(arg: &LocalTrees, sites: &Sites) -> Result<CompatReport> {
    arg.check_coverage()?;
    if arg.names != sites.names {
        return Err(ArgError::malformed(format!(
            "ARG names do not match sites names ({} vs {} samples)",
            arg.num_samples(),
            sites.num_samples()
        )));
    }
    if arg.chrom != sites.chrom {
        return Err(ArgError::malformed(format!(
            "ARG is for {} but sites are for {}",
            arg.chrom, sites.chrom
        )));
    }
    if arg.start > sites.start || arg.end < sites.end {
        return Err(ArgError::malformed(format!(
            "ARG region [{}, {}] does not cover sites region [{}, {}]",
            arg.start + 1,
            arg.end,
            sites.start + 1,
            sites.end
        )));
    }

    let n_samples = sites.num_samples();
    let partials: Vec<BlockReport> = arg
        .blocks
        .par_iter()
        .map(|block| {
            let tree = block.tree.normalize();
            let leaf_sets = tree.leaf_sets(n_samples);
            let mut out = BlockReport::default();
            for (pos, column) in sites.iter_region(block.start, block.end) {
                match site_split(column) {
                    SiteSplit::Constant => out.checked += 1,
                    SiteSplit::MultiAllelic => {
                        log::warn!("multi-allelic site at position {}", pos + 1);
                        out.multiallelic.push(pos);
                    }
                    SiteSplit::Biallelic(split) => {
                        out.checked += 1;
                        if match_branch(&tree, &leaf_sets, &split).is_none() {
                            log::debug!(
                                "non-compatible site at position {} in block [{}, {})",
                                pos + 1,
                                block.start + 1,
                                block.end
                            );
                            out.noncompat.push(NoncompatSite {
                                pos,
                                block_start: block.start,
                                block_end: block.end,
                                column: column.to_vec(),
                            });
                        }
                    }
                }
            }
            out
        })
        .collect();

    let mut report = CompatReport::default();
    for partial in partials {
        report.noncompat.extend(partial.noncompat);
        report.multiallelic.extend(partial.multiallelic);
        report.sites_checked += partial.checked;
    }
    // block order already yields ascending positions; sorting keeps the
    // report canonical if that ever changes
    report.noncompat.sort_by_key(|s| s.pos);
    report.multiallelic.sort_unstable();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc::LocalBlock;
    use crate::tree::parse_newick;

    fn set(universe: usize, members: &[usize]) -> LeafSet {
        let mut s = LeafSet::new(universe);
        for &m in members {
            s.insert(m);
        }
        s
    }

    #[test]
    fn test_split_minority_side() {
        // A A C C -> minority is either side; tie goes to part 2
        assert_eq!(site_split(b"AACC"), SiteSplit::Biallelic(set(4, &[2, 3])));
        // A C C C -> {0} is strictly smaller
        assert_eq!(site_split(b"ACCC"), SiteSplit::Biallelic(set(4, &[0])));
    }

    #[test]
    fn test_split_symmetry() {
        // swapping which allele is "first" must not change the set
        let a = site_split(b"ACACC");
        let b = site_split(b"CACAA");
        assert_eq!(a, b);
        assert_eq!(a, SiteSplit::Biallelic(set(5, &[0, 2])));
    }

    #[test]
    fn test_split_constant_column() {
        assert_eq!(site_split(b"AAAA"), SiteSplit::Constant);
    }

    #[test]
    fn test_split_multiallelic() {
        assert_eq!(site_split(b"ACGA"), SiteSplit::MultiAllelic);
        // N is an ordinary character, so A/C/N is three alleles
        assert_eq!(site_split(b"ACNA"), SiteSplit::MultiAllelic);
    }

    #[test]
    fn test_match_every_edge_round_trips() {
        let tree = parse_newick("((0,1),(2,3),4)").unwrap().normalize();
        let sets = tree.leaf_sets(5);
        for id in 0..tree.num_nodes() {
            if id == tree.root() {
                continue;
            }
            let found = match_branch(&tree, &sets, &sets[id]);
            assert_eq!(found, Some(id), "edge above node {id} not recovered");
        }
    }

    #[test]
    fn test_match_accepts_complement() {
        let tree = parse_newick("((0,1),(2,3))").unwrap().normalize();
        let sets = tree.leaf_sets(4);
        let target = set(4, &[0, 1]);
        let node = match_branch(&tree, &sets, &target).unwrap();
        assert_eq!(sets[node], target);
        // the complement names the same edge from the other side
        let node2 = match_branch(&tree, &sets, &target.complement()).unwrap();
        assert_eq!(sets[node2], target);
    }

    #[test]
    fn test_match_rejects_cross_split() {
        let tree = parse_newick("((0,1),(2,3))").unwrap().normalize();
        let sets = tree.leaf_sets(4);
        assert_eq!(match_branch(&tree, &sets, &set(4, &[0, 2])), None);
    }

    fn four_sample_fixture(columns: &[(i64, &[u8; 4])]) -> (LocalTrees, Sites) {
        let names: Vec<String> = ["A", "B", "C", "D"].map(String::from).to_vec();
        let arg = LocalTrees {
            chrom: "chr1".into(),
            start: 0,
            end: 100,
            names: names.clone(),
            blocks: vec![LocalBlock {
                start: 0,
                end: 100,
                tree: parse_newick("((0,1),(2,3))").unwrap(),
            }],
            num_sprs: 0,
        };
        let sites = Sites {
            chrom: "chr1".into(),
            start: 0,
            end: 100,
            names,
            positions: columns.iter().map(|(p, _)| *p).collect(),
            columns: columns.iter().map(|(_, c)| c.to_vec()).collect(),
        };
        (arg, sites)
    }

    #[test]
    fn test_validate_compatible_site() {
        let (arg, sites) = four_sample_fixture(&[(10, b"AACC")]);
        let report = validate(&arg, &sites).unwrap();
        assert!(report.is_compatible());
        assert_eq!(report.sites_checked, 1);
    }

    #[test]
    fn test_validate_flags_incompatible_site() {
        let (arg, sites) = four_sample_fixture(&[(10, b"ACAC")]);
        let report = validate(&arg, &sites).unwrap();
        assert_eq!(report.noncompat.len(), 1);
        let site = &report.noncompat[0];
        assert_eq!(site.pos, 10);
        assert_eq!((site.block_start, site.block_end), (0, 100));
        assert_eq!(site.column, b"ACAC");
    }

    #[test]
    fn test_validate_multiallelic_is_a_warning() {
        let (arg, sites) = four_sample_fixture(&[(10, b"ACGA"), (20, b"AACC")]);
        let report = validate(&arg, &sites).unwrap();
        assert!(report.is_compatible());
        assert_eq!(report.multiallelic, vec![10]);
        assert_eq!(report.sites_checked, 1);
    }

    #[test]
    fn test_validate_rejects_name_mismatch() {
        let (arg, mut sites) = four_sample_fixture(&[(10, b"AACC")]);
        sites.names[3] = "E".into();
        let err = validate(&arg, &sites).unwrap_err();
        assert!(err.to_string().contains("names"));
    }

    #[test]
    fn test_report_text_explicit_on_zero() {
        let (arg, sites) = four_sample_fixture(&[(10, b"AACC")]);
        let report = validate(&arg, &sites).unwrap();
        let mut buf = Vec::new();
        report.write_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("no violations found"));
        assert!(text.contains("sites checked: 1"));
    }
}
