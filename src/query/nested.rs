//! Nested (parent/child) matchers.
//!
//! Both rely on the contiguous-block invariant: a parent and its children
//! are indexed as one group, so within a segment the children of parent
//! `p` occupy the document range between `p` and the next parent bit.
//! Groups never span segments, so these matchers operate per segment with
//! a parent bitmap built from the parent query.

use std::sync::Arc;

use crate::error::Result;
use crate::query::matcher::Matcher;
use crate::query::Term;
use crate::util::bitset::BitSet;

/// Maps matching children to their parents: for every document matched by
/// the child query, emits the nearest prior document in the parent set,
/// once, with the children's scores summed.
#[derive(Debug)]
pub struct NestedParentMatcher {
    parents: Arc<BitSet>,
    child: Box<dyn Matcher>,
    current_parent: u64,
    current_score: f32,
    exhausted: bool,
}

impl NestedParentMatcher {
    /// Build from the segment's parent bitmap and a child matcher.
    pub fn new(parents: Arc<BitSet>, child: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = NestedParentMatcher {
            parents,
            child,
            current_parent: 0,
            current_score: 0.0,
            exhausted: false,
        };
        matcher.gather_next_parent()?;
        Ok(matcher)
    }

    /// Find the next parent with at least one matching child and
    /// accumulate that group's score.
    fn gather_next_parent(&mut self) -> Result<bool> {
        loop {
            if self.child.is_exhausted() {
                self.exhausted = true;
                self.current_parent = u64::MAX;
                return Ok(false);
            }
            let child_doc = self.child.doc_id();
            // The nearest parent strictly before the child; a child with
            // no prior parent is an orphan and is skipped.
            let parent = if child_doc == 0 {
                None
            } else {
                self.parents.prev_set_bit(child_doc as usize - 1)
            };
            let Some(parent) = parent else {
                if !self.child.next()? {
                    self.exhausted = true;
                    self.current_parent = u64::MAX;
                    return Ok(false);
                }
                continue;
            };

            // Accumulate every matching child of this group.
            let parent = parent as u64;
            let group_end = self
                .parents
                .next_set_bit(parent as usize + 1)
                .map(|bit| bit as u64)
                .unwrap_or(u64::MAX);
            let mut score = 0.0f32;
            loop {
                let doc = self.child.doc_id();
                if self.child.is_exhausted() || doc >= group_end {
                    break;
                }
                score += self.child.score();
                if !self.child.next()? {
                    break;
                }
            }
            self.current_parent = parent;
            self.current_score = score;
            return Ok(true);
        }
    }
}

impl Matcher for NestedParentMatcher {
    fn doc_id(&self) -> u64 {
        if self.exhausted {
            u64::MAX
        } else {
            self.current_parent
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.gather_next_parent()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        while self.current_parent < target {
            if !self.next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn cost(&self) -> u64 {
        self.child.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn weight(&self) -> f32 {
        self.score()
    }

    fn score(&self) -> f32 {
        if self.exhausted {
            0.0
        } else {
            self.current_score
        }
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        // Child positions have moved past the group; report the child
        // query's terms for the parent hit itself only.
        let _ = (doc_id, out);
    }
}

/// Emits the children of matching parents: for each parent produced by
/// the parent matcher, the documents between it and the next parent.
#[derive(Debug)]
pub struct NestedChildrenMatcher {
    parents: Arc<BitSet>,
    parent_matcher: Box<dyn Matcher>,
    live: Option<Arc<BitSet>>,
    max_doc: u64,
    current_child: u64,
    group_end: u64,
    exhausted: bool,
}

impl NestedChildrenMatcher {
    /// Build from the parent bitmap, a matcher over qualifying parents,
    /// the segment's live set and its document count.
    pub fn new(
        parents: Arc<BitSet>,
        parent_matcher: Box<dyn Matcher>,
        live: Option<Arc<BitSet>>,
        max_doc: u64,
    ) -> Result<Self> {
        let mut matcher = NestedChildrenMatcher {
            parents,
            parent_matcher,
            live,
            max_doc,
            current_child: 0,
            group_end: 0,
            exhausted: false,
        };
        matcher.advance_to_child()?;
        Ok(matcher)
    }

    fn is_live(&self, doc_id: u64) -> bool {
        match &self.live {
            Some(live) => live.contains(doc_id as usize),
            None => true,
        }
    }

    /// Move to the next live child document, entering new parent groups
    /// as needed.
    fn advance_to_child(&mut self) -> Result<bool> {
        loop {
            // Inside a group: emit the next live child.
            while self.current_child < self.group_end {
                let candidate = self.current_child;
                self.current_child += 1;
                if self.is_live(candidate) && !self.parents.contains(candidate as usize) {
                    self.current_child = candidate;
                    return Ok(true);
                }
            }

            // Find the next qualifying parent.
            loop {
                if self.parent_matcher.is_exhausted() {
                    self.exhausted = true;
                    self.current_child = u64::MAX;
                    return Ok(false);
                }
                let parent = self.parent_matcher.doc_id();
                self.parent_matcher.next()?;
                if !self.parents.contains(parent as usize) {
                    continue;
                }
                self.current_child = parent + 1;
                self.group_end = self
                    .parents
                    .next_set_bit(parent as usize + 1)
                    .map(|bit| bit as u64)
                    .unwrap_or(self.max_doc);
                break;
            }
        }
    }
}

impl Matcher for NestedChildrenMatcher {
    fn doc_id(&self) -> u64 {
        if self.exhausted {
            u64::MAX
        } else {
            self.current_child
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.current_child += 1;
        self.advance_to_child()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        while self.current_child < target {
            if !self.next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn cost(&self) -> u64 {
        self.max_doc
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::matcher::BitSetMatcher;

    fn bits(ids: &[usize], len: usize) -> Arc<BitSet> {
        let mut set = BitSet::new(len);
        for &id in ids {
            set.insert(id);
        }
        Arc::new(set)
    }

    fn drain(matcher: &mut dyn Matcher) -> Vec<u64> {
        let mut out = Vec::new();
        while !matcher.is_exhausted() {
            out.push(matcher.doc_id());
            if !matcher.next().unwrap() {
                break;
            }
        }
        out
    }

    #[test]
    fn test_nested_parent_maps_children_to_parents() {
        // Parents at 0 and 3; children 1, 2 belong to 0; children 4, 5
        // belong to 3.
        let parents = bits(&[0, 3], 6);
        let child = Box::new(BitSetMatcher::new(bits(&[2, 4, 5], 6)));
        let mut matcher = NestedParentMatcher::new(parents, child).unwrap();
        assert_eq!(drain(&mut matcher), vec![0, 3]);
    }

    #[test]
    fn test_nested_parent_sums_child_scores() {
        let parents = bits(&[0], 4);
        let child = Box::new(BitSetMatcher::new(bits(&[1, 2, 3], 4)));
        let matcher = NestedParentMatcher::new(parents, child).unwrap();
        assert_eq!(matcher.doc_id(), 0);
        assert_eq!(matcher.score(), 3.0);
    }

    #[test]
    fn test_nested_parent_skips_orphans() {
        // A child before any parent has no home.
        let parents = bits(&[2], 6);
        let child = Box::new(BitSetMatcher::new(bits(&[0, 1, 4], 6)));
        let mut matcher = NestedParentMatcher::new(parents, child).unwrap();
        assert_eq!(drain(&mut matcher), vec![2]);
    }

    #[test]
    fn test_nested_children_emits_group_ranges() {
        // Parents at 0 and 3; only parent 0 qualifies.
        let parents = bits(&[0, 3], 6);
        let qualifying = Box::new(BitSetMatcher::new(bits(&[0], 6)));
        let mut matcher =
            NestedChildrenMatcher::new(parents, qualifying, None, 6).unwrap();
        assert_eq!(drain(&mut matcher), vec![1, 2]);
    }

    #[test]
    fn test_nested_children_last_group_runs_to_max_doc() {
        let parents = bits(&[0, 3], 6);
        let qualifying = Box::new(BitSetMatcher::new(bits(&[0, 3], 6)));
        let mut matcher =
            NestedChildrenMatcher::new(parents, qualifying, None, 6).unwrap();
        assert_eq!(drain(&mut matcher), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_nested_children_respects_live_docs() {
        let parents = bits(&[0], 5);
        let qualifying = Box::new(BitSetMatcher::new(bits(&[0], 5)));
        let live = bits(&[0, 1, 3, 4], 5); // doc 2 deleted
        let mut matcher =
            NestedChildrenMatcher::new(parents, qualifying, Some(live), 5).unwrap();
        assert_eq!(drain(&mut matcher), vec![1, 3, 4]);
    }
}
