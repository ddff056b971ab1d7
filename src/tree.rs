// Rooted leaf-labeled trees.
//
// Local trees arrive as newick strings whose leaves are integer sample
// indices; internal labels, branch lengths and NHX comments are parsed
// past and discarded. Trees are stored as a node arena with the root at
// index 0 and parents always preceding their children.
//
// Raw parsed trees may contain single-child internal nodes. `normalize`
// splices those out into a fresh tree rather than mutating in place, so
// a validation pass never observes a half-rewritten topology.

use crate::error::{ArgError, Result};

/// One node of a rooted tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Sample index for leaves, `None` for internal nodes.
    pub leaf: Option<usize>,
}

/// Rooted tree over integer-labeled leaves.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.leaf.is_some()).count()
    }

    /// Sample indices present at the leaves, in arbitrary order.
    pub fn leaf_labels(&self) -> Vec<usize> {
        self.nodes.iter().filter_map(|n| n.leaf).collect()
    }

    /// Return a copy of this tree with every single-child internal node
    /// spliced out. After normalization every internal node has at
    /// least two children.
    pub fn normalize(&self) -> Tree {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let root = self.compress(self.root, None, &mut nodes);
        Tree { nodes, root }
    }

    fn compress(&self, id: usize, parent: Option<usize>, out: &mut Vec<Node>) -> usize {
        // skip down chains of single-child internal nodes
        let mut id = id;
        while self.nodes[id].leaf.is_none() && self.nodes[id].children.len() == 1 {
            id = self.nodes[id].children[0];
        }
        let new_id = out.len();
        out.push(Node {
            parent,
            children: Vec::with_capacity(self.nodes[id].children.len()),
            leaf: self.nodes[id].leaf,
        });
        for &child in &self.nodes[id].children {
            let new_child = self.compress(child, Some(new_id), out);
            out[new_id].children.push(new_child);
        }
        new_id
    }

    /// Subtree leaf set for every node, as bitsets over sample indices.
    /// Computed fresh per call; nothing is cached on the tree itself.
    pub fn leaf_sets(&self, universe_size: usize) -> Vec<LeafSet> {
        let mut sets = vec![LeafSet::new(universe_size); self.nodes.len()];
        self.fill_leaf_set(self.root, universe_size, &mut sets);
        sets
    }

    fn fill_leaf_set(&self, id: usize, universe_size: usize, sets: &mut Vec<LeafSet>) {
        let mut set = LeafSet::new(universe_size);
        if let Some(label) = self.nodes[id].leaf {
            set.insert(label);
        }
        for &child in &self.nodes[id].children {
            self.fill_leaf_set(child, universe_size, sets);
            set.union_with(&sets[child]);
        }
        sets[id] = set;
    }
}

/// Compact set of sample indices backed by 64-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSet {
    words: Vec<u64>,
    universe_size: usize,
}

impl LeafSet {
    pub fn new(universe_size: usize) -> Self {
        Self {
            words: vec![0; universe_size.div_ceil(64)],
            universe_size,
        }
    }

    pub fn insert(&mut self, index: usize) {
        debug_assert!(index < self.universe_size);
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.universe_size && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    pub fn union_with(&mut self, other: &LeafSet) {
        debug_assert_eq!(self.universe_size, other.universe_size);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Members not in this set, within the same universe.
    pub fn complement(&self) -> LeafSet {
        let mut words: Vec<u64> = self.words.iter().map(|w| !w).collect();
        // mask off bits beyond the universe in the last word
        let tail = self.universe_size % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        LeafSet {
            words,
            universe_size: self.universe_size,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.universe_size).filter(move |&i| self.contains(i))
    }
}

/// Parse a newick tree whose leaf labels are integer sample indices.
///
/// Accepts internal node labels, branch lengths (`:0.5`) and bracketed
/// NHX comments (`[&&NHX:...]`), all of which are discarded.
pub fn parse_newick(text: &str) -> Result<Tree> {
    let mut parser = NewickParser {
        buf: text.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    let root = parser.parse_clade(None)?;
    parser.skip_whitespace();
    if parser.peek() == Some(b';') {
        parser.pos += 1;
        parser.skip_whitespace();
    }
    if parser.pos != parser.buf.len() {
        return Err(ArgError::malformed(format!(
            "trailing characters in newick at byte {}",
            parser.pos
        )));
    }
    Ok(Tree {
        nodes: parser.nodes,
        root,
    })
}

struct NewickParser<'a> {
    buf: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> NewickParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_clade(&mut self, parent: Option<usize>) -> Result<usize> {
        self.skip_whitespace();
        let id = if self.peek() == Some(b'(') {
            self.pos += 1;
            let id = self.nodes.len();
            self.nodes.push(Node {
                parent,
                children: Vec::new(),
                leaf: None,
            });
            loop {
                let child = self.parse_clade(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => {
                        return Err(ArgError::malformed(format!(
                            "expected ',' or ')' in newick at byte {}",
                            self.pos
                        )))
                    }
                }
            }
            // internal node label, if any, is discarded
            self.take_label();
            id
        } else {
            let label = self.take_label();
            let sample: usize = label.parse().map_err(|_| {
                ArgError::malformed(format!("newick leaf label '{label}' is not a sample index"))
            })?;
            let id = self.nodes.len();
            self.nodes.push(Node {
                parent,
                children: Vec::new(),
                leaf: Some(sample),
            });
            id
        };

        self.skip_branch_length()?;
        self.skip_comment()?;
        Ok(id)
    }

    fn take_label(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, b'(' | b')' | b',' | b':' | b';' | b'[') && !c.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned()
    }

    fn skip_branch_length(&mut self) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            let start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'))
            {
                self.pos += 1;
            }
            if self.pos == start {
                return Err(ArgError::malformed(format!(
                    "missing branch length after ':' at byte {}",
                    self.pos
                )));
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) -> Result<()> {
        if self.peek() == Some(b'[') {
            while let Some(c) = self.peek() {
                self.pos += 1;
                if c == b']' {
                    return Ok(());
                }
            }
            return Err(ArgError::malformed("unterminated '[' comment in newick"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let tree = parse_newick("((0,1),(2,3))").unwrap();
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.num_nodes(), 7);
        let mut labels = tree.leaf_labels();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_lengths_labels_comments() {
        let text = "((0:148.4,1:148.4)5:483.3[&&NHX:age=148.4],\
                    (2:148.4,3:148.4)6:483.3)7[&&NHX:age=631.7];";
        let tree = parse_newick(text).unwrap();
        assert_eq!(tree.num_leaves(), 4);
        // internal labels must not become leaves
        assert_eq!(tree.num_nodes(), 7);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_newick("((0,1)").is_err());
        assert!(parse_newick("(x,y)").is_err());
        assert!(parse_newick("(0,1))").is_err());
    }

    #[test]
    fn test_normalize_collapses_single_children() {
        // degenerate chain above leaf 2 and above the root
        let tree = parse_newick("(((0,1),((2))))").unwrap();
        let norm = tree.normalize();
        assert_eq!(norm.num_leaves(), 3);
        // root has two children, one of which is the leaf 2 directly
        let root = norm.node(norm.root());
        assert_eq!(root.children.len(), 2);
        for n in 0..norm.num_nodes() {
            let node = norm.node(n);
            assert!(node.leaf.is_some() || node.children.len() >= 2);
        }
    }

    #[test]
    fn test_normalize_is_a_new_value() {
        let tree = parse_newick("((0),(1,2))").unwrap();
        let before = tree.num_nodes();
        let _ = tree.normalize();
        assert_eq!(tree.num_nodes(), before);
    }

    #[test]
    fn test_leaf_sets() {
        let tree = parse_newick("((0,1),(2,3))").unwrap();
        let sets = tree.leaf_sets(4);
        let root_set = &sets[tree.root()];
        assert_eq!(root_set.len(), 4);
        // some node has exactly {0,1}
        let mut expected = LeafSet::new(4);
        expected.insert(0);
        expected.insert(1);
        assert!(sets.iter().any(|s| *s == expected));
    }

    #[test]
    fn test_leafset_complement() {
        let mut set = LeafSet::new(70);
        set.insert(0);
        set.insert(69);
        let comp = set.complement();
        assert_eq!(comp.len(), 68);
        assert!(!comp.contains(0));
        assert!(!comp.contains(69));
        assert!(comp.contains(1));
        assert_eq!(comp.complement(), set);
    }

    #[test]
    fn test_leafset_iter() {
        let mut set = LeafSet::new(10);
        set.insert(3);
        set.insert(7);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 7]);
    }
}
