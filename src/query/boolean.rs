//! Boolean matcher combinators: union, intersection, and-not, and-maybe,
//! require, disjunction-max and inverse.

use std::sync::Arc;

use crate::error::Result;
use crate::query::matcher::Matcher;
use crate::query::Term;
use crate::util::bitset::BitSet;

/// N-ary union: matches documents matched by at least `min_match`
/// children; the score is the sum over aligned children, optionally
/// scaled by a bonus for matching more of them.
#[derive(Debug)]
pub struct UnionMatcher {
    children: Vec<Box<dyn Matcher>>,
    min_match: usize,
    scale: Option<f32>,
    current: u64,
    exhausted: bool,
    cost: u64,
}

impl UnionMatcher {
    /// Union with `min_match = 1` and no bonus.
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Result<Self> {
        UnionMatcher::with_options(children, 1, None)
    }

    /// Union with a minimum-should-match count and an optional group
    /// bonus scale.
    pub fn with_options(
        children: Vec<Box<dyn Matcher>>,
        min_match: usize,
        scale: Option<f32>,
    ) -> Result<Self> {
        let cost = children.iter().map(|child| child.cost()).sum();
        let mut matcher = UnionMatcher {
            children,
            min_match: min_match.max(1),
            scale,
            current: 0,
            exhausted: false,
            cost,
        };
        matcher.find_current()?;
        Ok(matcher)
    }

    fn matched_count(&self) -> usize {
        self.children
            .iter()
            .filter(|child| child.doc_id() == self.current)
            .count()
    }

    /// Set `current` to the smallest id with at least `min_match` aligned
    /// children, advancing past ids that fall short.
    fn find_current(&mut self) -> Result<bool> {
        loop {
            let min_doc = self
                .children
                .iter()
                .map(|child| child.doc_id())
                .min()
                .unwrap_or(u64::MAX);
            if min_doc == u64::MAX {
                self.exhausted = true;
                self.current = u64::MAX;
                return Ok(false);
            }
            self.current = min_doc;
            if self.matched_count() >= self.min_match {
                return Ok(true);
            }
            self.advance_children_at(min_doc)?;
        }
    }

    fn advance_children_at(&mut self, doc_id: u64) -> Result<()> {
        for child in &mut self.children {
            if child.doc_id() == doc_id {
                child.next()?;
            }
        }
        Ok(())
    }

    fn bonus(&self) -> f32 {
        match self.scale {
            Some(scale) if self.children.len() > 1 => {
                let matched = self.matched_count() as f32;
                let total = self.children.len() as f32;
                1.0 + scale * (matched - 1.0) / (total - 1.0)
            }
            _ => 1.0,
        }
    }

    fn max_bonus(&self) -> f32 {
        match self.scale {
            Some(scale) if self.children.len() > 1 => 1.0 + scale,
            _ => 1.0,
        }
    }
}

impl Matcher for UnionMatcher {
    fn doc_id(&self) -> u64 {
        if self.exhausted {
            u64::MAX
        } else {
            self.current
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.advance_children_at(self.current)?;
        self.find_current()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.current >= target {
            return Ok(true);
        }
        for child in &mut self.children {
            if !child.is_exhausted() && child.doc_id() < target {
                child.skip_to(target)?;
            }
        }
        self.find_current()
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn weight(&self) -> f32 {
        self.children
            .iter()
            .filter(|child| child.doc_id() == self.current)
            .map(|child| child.weight())
            .sum()
    }

    fn score(&self) -> f32 {
        let sum: f32 = self
            .children
            .iter()
            .filter(|child| child.doc_id() == self.current)
            .map(|child| child.score())
            .sum();
        sum * self.bonus()
    }

    fn supports_block_quality(&self) -> bool {
        self.children
            .iter()
            .all(|child| child.supports_block_quality())
    }

    fn block_max_score(&self) -> f32 {
        let sum: f32 = self
            .children
            .iter()
            .filter(|child| !child.is_exhausted())
            .map(|child| child.block_max_score())
            .sum();
        sum * self.max_bonus()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.block_max_score() > min_score {
            return self.next();
        }
        // Advance the weakest child past its block while the whole union
        // cannot beat the threshold; docs skipped that way are bounded by
        // the child's own share of the total.
        while !self.exhausted && self.block_max_score() <= min_score {
            let weakest = self
                .children
                .iter()
                .enumerate()
                .filter(|(_, child)| !child.is_exhausted())
                .min_by(|(_, a), (_, b)| {
                    a.block_max_score()
                        .partial_cmp(&b.block_max_score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(idx, _)| idx);
            let Some(idx) = weakest else {
                self.exhausted = true;
                self.current = u64::MAX;
                return Ok(false);
            };
            let others: f32 = self
                .children
                .iter()
                .enumerate()
                .filter(|(other, child)| *other != idx && !child.is_exhausted())
                .map(|(_, child)| child.block_max_score())
                .sum();
            self.children[idx].skip_to_quality((min_score - others).max(0.0))?;
            if !self.find_current()? {
                return Ok(false);
            }
        }
        Ok(!self.exhausted)
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        for child in &self.children {
            child.matching_terms(doc_id, out);
        }
    }
}

/// N-ary intersection: every child must match; scores add.
#[derive(Debug)]
pub struct IntersectionMatcher {
    children: Vec<Box<dyn Matcher>>,
    current: u64,
    exhausted: bool,
    cost: u64,
}

impl IntersectionMatcher {
    /// Intersect `children` (must be non-empty).
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Result<Self> {
        let exhausted = children.is_empty() || children.iter().any(|child| child.is_exhausted());
        let cost = children.iter().map(|child| child.cost()).min().unwrap_or(0);
        let mut matcher = IntersectionMatcher {
            children,
            current: 0,
            exhausted,
            cost,
        };
        if !matcher.exhausted {
            matcher.align()?;
        } else {
            matcher.current = u64::MAX;
        }
        Ok(matcher)
    }

    /// Advance the lagging children until all agree on one document.
    fn align(&mut self) -> Result<bool> {
        loop {
            let mut max_doc = 0u64;
            for child in &self.children {
                let doc_id = child.doc_id();
                if doc_id == u64::MAX {
                    self.exhausted = true;
                    self.current = u64::MAX;
                    return Ok(false);
                }
                max_doc = max_doc.max(doc_id);
            }

            let mut all_aligned = true;
            for child in &mut self.children {
                if child.doc_id() < max_doc {
                    if !child.skip_to(max_doc)? {
                        self.exhausted = true;
                        self.current = u64::MAX;
                        return Ok(false);
                    }
                    if child.doc_id() != max_doc {
                        all_aligned = false;
                    }
                }
            }
            if all_aligned {
                self.current = max_doc;
                return Ok(true);
            }
        }
    }
}

impl Matcher for IntersectionMatcher {
    fn doc_id(&self) -> u64 {
        if self.exhausted {
            u64::MAX
        } else {
            self.current
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if !self.children[0].next()? {
            self.exhausted = true;
            self.current = u64::MAX;
            return Ok(false);
        }
        self.align()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.current >= target {
            return Ok(true);
        }
        if !self.children[0].skip_to(target)? {
            self.exhausted = true;
            self.current = u64::MAX;
            return Ok(false);
        }
        self.align()
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn weight(&self) -> f32 {
        self.children.iter().map(|child| child.weight()).sum()
    }

    fn score(&self) -> f32 {
        self.children.iter().map(|child| child.score()).sum()
    }

    fn supports_block_quality(&self) -> bool {
        self.children
            .iter()
            .all(|child| child.supports_block_quality())
    }

    fn block_max_score(&self) -> f32 {
        self.children
            .iter()
            .map(|child| child.block_max_score())
            .sum()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.block_max_score() > min_score {
            return self.next();
        }
        while !self.exhausted && self.block_max_score() <= min_score {
            // Push the weakest child past its block; the others' bounds
            // cover the remainder.
            let (idx, _) = self
                .children
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.block_max_score()
                        .partial_cmp(&b.block_max_score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("intersection has children");
            let others: f32 = self
                .children
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != idx)
                .map(|(_, child)| child.block_max_score())
                .sum();
            if !self.children[idx].skip_to_quality((min_score - others).max(0.0))? {
                self.exhausted = true;
                self.current = u64::MAX;
                return Ok(false);
            }
            if !self.align()? {
                return Ok(false);
            }
        }
        Ok(!self.exhausted)
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        for child in &self.children {
            child.matching_terms(doc_id, out);
        }
    }
}

/// Documents of `positive` not matched by `negative`; scored by
/// `positive` alone.
#[derive(Debug)]
pub struct AndNotMatcher {
    positive: Box<dyn Matcher>,
    negative: Box<dyn Matcher>,
}

impl AndNotMatcher {
    /// Build and align.
    pub fn new(positive: Box<dyn Matcher>, negative: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = AndNotMatcher { positive, negative };
        matcher.align()?;
        Ok(matcher)
    }

    fn align(&mut self) -> Result<bool> {
        while !self.positive.is_exhausted() {
            let doc_id = self.positive.doc_id();
            if !self.negative.is_exhausted() && self.negative.doc_id() < doc_id {
                self.negative.skip_to(doc_id)?;
            }
            if self.negative.is_exhausted() || self.negative.doc_id() != doc_id {
                return Ok(true);
            }
            if !self.positive.next()? {
                break;
            }
        }
        Ok(false)
    }
}

impl Matcher for AndNotMatcher {
    fn doc_id(&self) -> u64 {
        self.positive.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.positive.next()? {
            return Ok(false);
        }
        self.align()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.positive.skip_to(target)? {
            return Ok(false);
        }
        self.align()
    }

    fn cost(&self) -> u64 {
        self.positive.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.positive.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.positive.weight()
    }

    fn score(&self) -> f32 {
        self.positive.score()
    }

    fn supports_block_quality(&self) -> bool {
        self.positive.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        self.positive.block_max_score()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if !self.positive.skip_to_quality(min_score)? {
            return Ok(false);
        }
        self.align()
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.positive.matching_terms(doc_id, out);
    }
}

/// Driven by `required`; `optional` only contributes score when aligned.
#[derive(Debug)]
pub struct AndMaybeMatcher {
    required: Box<dyn Matcher>,
    optional: Box<dyn Matcher>,
}

impl AndMaybeMatcher {
    /// Build and align the optional side.
    pub fn new(required: Box<dyn Matcher>, optional: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = AndMaybeMatcher { required, optional };
        matcher.align_optional()?;
        Ok(matcher)
    }

    fn align_optional(&mut self) -> Result<()> {
        if self.required.is_exhausted() || self.optional.is_exhausted() {
            return Ok(());
        }
        let doc_id = self.required.doc_id();
        if self.optional.doc_id() < doc_id {
            self.optional.skip_to(doc_id)?;
        }
        Ok(())
    }

    fn optional_aligned(&self) -> bool {
        !self.required.is_exhausted()
            && !self.optional.is_exhausted()
            && self.optional.doc_id() == self.required.doc_id()
    }
}

impl Matcher for AndMaybeMatcher {
    fn doc_id(&self) -> u64 {
        self.required.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        let active = self.required.next()?;
        self.align_optional()?;
        Ok(active)
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        let active = self.required.skip_to(target)?;
        self.align_optional()?;
        Ok(active)
    }

    fn cost(&self) -> u64 {
        self.required.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.required.is_exhausted()
    }

    fn weight(&self) -> f32 {
        let mut weight = self.required.weight();
        if self.optional_aligned() {
            weight += self.optional.weight();
        }
        weight
    }

    fn score(&self) -> f32 {
        let mut score = self.required.score();
        if self.optional_aligned() {
            score += self.optional.score();
        }
        score
    }

    fn supports_block_quality(&self) -> bool {
        self.required.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        let optional = if self.optional.is_exhausted() {
            0.0
        } else {
            self.optional.block_max_score()
        };
        self.required.block_max_score() + optional
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        let optional = if self.optional.is_exhausted() {
            0.0
        } else {
            self.optional.block_max_score()
        };
        let active = self
            .required
            .skip_to_quality((min_score - optional).max(0.0))?;
        self.align_optional()?;
        Ok(active)
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.required.matching_terms(doc_id, out);
        self.optional.matching_terms(doc_id, out);
    }
}

/// Both sides must match; only `scored` contributes score.
#[derive(Debug)]
pub struct RequireMatcher {
    inner: IntersectionMatcher,
}

impl RequireMatcher {
    /// `scored` AND `required`, scored by `scored` alone.
    pub fn new(scored: Box<dyn Matcher>, required: Box<dyn Matcher>) -> Result<Self> {
        Ok(RequireMatcher {
            inner: IntersectionMatcher::new(vec![scored, required])?,
        })
    }

    fn scored(&self) -> &Box<dyn Matcher> {
        &self.inner.children[0]
    }
}

impl Matcher for RequireMatcher {
    fn doc_id(&self) -> u64 {
        self.inner.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.inner.skip_to(target)
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.scored().weight()
    }

    fn score(&self) -> f32 {
        self.scored().score()
    }

    fn supports_block_quality(&self) -> bool {
        self.scored().supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        self.scored().block_max_score()
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.scored().matching_terms(doc_id, out);
    }
}

/// Union scored as `max + tiebreak × (sum − max)`.
#[derive(Debug)]
pub struct DisjunctionMaxMatcher {
    inner: UnionMatcher,
    tiebreak: f32,
}

impl DisjunctionMaxMatcher {
    /// Build from children and a tiebreak factor in `[0, 1]`.
    pub fn new(children: Vec<Box<dyn Matcher>>, tiebreak: f32) -> Result<Self> {
        Ok(DisjunctionMaxMatcher {
            inner: UnionMatcher::new(children)?,
            tiebreak,
        })
    }

    fn aligned_scores(&self) -> (f32, f32) {
        let mut max = 0f32;
        let mut sum = 0f32;
        for child in &self.inner.children {
            if child.doc_id() == self.inner.current {
                let score = child.score();
                max = max.max(score);
                sum += score;
            }
        }
        (max, sum)
    }
}

impl Matcher for DisjunctionMaxMatcher {
    fn doc_id(&self) -> u64 {
        self.inner.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.inner.skip_to(target)
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.inner.weight()
    }

    fn score(&self) -> f32 {
        let (max, sum) = self.aligned_scores();
        max + self.tiebreak * (sum - max)
    }

    fn supports_block_quality(&self) -> bool {
        self.inner.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        let mut max = 0f32;
        let mut sum = 0f32;
        for child in &self.inner.children {
            if !child.is_exhausted() {
                let bound = child.block_max_score();
                max = max.max(bound);
                sum += bound;
            }
        }
        max + self.tiebreak * (sum - max)
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        // The union's sum bound dominates the dis-max bound, so its
        // skipping remains sound here.
        self.inner.skip_to_quality(min_score)
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.inner.matching_terms(doc_id, out)
    }
}

/// Live documents NOT matched by the child.
#[derive(Debug)]
pub struct InverseMatcher {
    child: Box<dyn Matcher>,
    live: Arc<BitSet>,
    current: Option<usize>,
}

impl InverseMatcher {
    /// Invert `child` against the live-docs set.
    pub fn new(child: Box<dyn Matcher>, live: Arc<BitSet>) -> Result<Self> {
        let mut matcher = InverseMatcher {
            child,
            live,
            current: None,
        };
        matcher.seek_from(0)?;
        Ok(matcher)
    }

    fn seek_from(&mut self, from: usize) -> Result<bool> {
        let mut candidate = from;
        loop {
            match self.live.next_set_bit(candidate) {
                None => {
                    self.current = None;
                    return Ok(false);
                }
                Some(bit) => {
                    let doc_id = bit as u64;
                    if !self.child.is_exhausted() && self.child.doc_id() < doc_id {
                        self.child.skip_to(doc_id)?;
                    }
                    if self.child.is_exhausted() || self.child.doc_id() != doc_id {
                        self.current = Some(bit);
                        return Ok(true);
                    }
                    candidate = bit + 1;
                }
            }
        }
    }
}

impl Matcher for InverseMatcher {
    fn doc_id(&self) -> u64 {
        self.current.map(|bit| bit as u64).unwrap_or(u64::MAX)
    }

    fn next(&mut self) -> Result<bool> {
        match self.current {
            Some(bit) => self.seek_from(bit + 1),
            None => Ok(false),
        }
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        match self.current {
            Some(bit) if (bit as u64) >= target => Ok(true),
            Some(_) => self.seek_from(target as usize),
            None => Ok(false),
        }
    }

    fn cost(&self) -> u64 {
        self.live.count() as u64
    }

    fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::matcher::BitSetMatcher;

    fn bits(ids: &[usize], len: usize) -> Box<dyn Matcher> {
        let mut set = BitSet::new(len);
        for &id in ids {
            set.insert(id);
        }
        Box::new(BitSetMatcher::new(Arc::new(set)))
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
    fn test_union() {
        let mut union =
            UnionMatcher::new(vec![bits(&[0, 4], 10), bits(&[2, 4, 8], 10)]).unwrap();
        assert_eq!(drain(&mut union), vec![0, 2, 4, 8]);
    }

    #[test]
    fn test_union_min_match() {
        let children = vec![bits(&[0, 2, 4], 10), bits(&[2, 4], 10), bits(&[4, 9], 10)];
        let mut union = UnionMatcher::with_options(children, 2, None).unwrap();
        assert_eq!(drain(&mut union), vec![2, 4]);
    }

    #[test]
    fn test_union_group_bonus() {
        let children = vec![bits(&[1, 2], 10), bits(&[2], 10)];
        let union = UnionMatcher::with_options(children, 1, Some(1.0)).unwrap();
        // doc 1: one child matched, no bonus.
        assert_eq!(union.doc_id(), 1);
        assert_eq!(union.score(), 1.0);
        let mut union = union;
        union.next().unwrap();
        // doc 2: both matched, scale 1.0 doubles the summed score.
        assert_eq!(union.doc_id(), 2);
        assert_eq!(union.score(), 4.0);
    }

    #[test]
    fn test_intersection() {
        let children = vec![bits(&[0, 2, 4, 6], 10), bits(&[2, 6, 9], 10)];
        let mut inter = IntersectionMatcher::new(children).unwrap();
        assert_eq!(drain(&mut inter), vec![2, 6]);
    }

    #[test]
    fn test_intersection_skip_to() {
        let children = vec![bits(&[0, 2, 4, 6, 8], 10), bits(&[2, 4, 6, 8], 10)];
        let mut inter = IntersectionMatcher::new(children).unwrap();
        assert!(inter.skip_to(5).unwrap());
        assert_eq!(inter.doc_id(), 6);
        assert!(!inter.skip_to(9).unwrap());
    }

    #[test]
    fn test_empty_intersection() {
        let inter = IntersectionMatcher::new(vec![]).unwrap();
        assert!(inter.is_exhausted());

        let children = vec![bits(&[1], 4), bits(&[2], 4)];
        let inter = IntersectionMatcher::new(children).unwrap();
        assert!(inter.is_exhausted());
    }

    #[test]
    fn test_and_not() {
        let mut matcher = AndNotMatcher::new(bits(&[0, 1, 2, 3], 10), bits(&[1, 3], 10)).unwrap();
        assert_eq!(drain(&mut matcher), vec![0, 2]);
    }

    #[test]
    fn test_and_maybe() {
        let mut matcher = AndMaybeMatcher::new(bits(&[1, 3, 5], 10), bits(&[3, 9], 10)).unwrap();
        assert_eq!(matcher.doc_id(), 1);
        assert_eq!(matcher.score(), 1.0);
        matcher.next().unwrap();
        assert_eq!(matcher.doc_id(), 3);
        // Optional aligned: scores add.
        assert_eq!(matcher.score(), 2.0);
        matcher.next().unwrap();
        assert_eq!(matcher.doc_id(), 5);
        assert_eq!(matcher.score(), 1.0);
    }

    #[test]
    fn test_require_scores_from_first() {
        let matcher = RequireMatcher::new(bits(&[2, 4], 10), bits(&[2, 3, 4], 10)).unwrap();
        assert_eq!(matcher.doc_id(), 2);
        assert_eq!(matcher.score(), 1.0);
    }

    #[test]
    fn test_disjunction_max() {
        let matcher =
            DisjunctionMaxMatcher::new(vec![bits(&[1], 10), bits(&[1, 2], 10)], 0.5).unwrap();
        assert_eq!(matcher.doc_id(), 1);
        // Two children at score 1.0 each: 1.0 + 0.5 * (2.0 - 1.0).
        assert_eq!(matcher.score(), 1.5);
    }

    #[test]
    fn test_inverse() {
        let live = Arc::new(BitSet::full(6));
        let mut matcher = InverseMatcher::new(bits(&[1, 4], 6), live).unwrap();
        assert_eq!(drain(&mut matcher), vec![0, 2, 3, 5]);
    }

    #[test]
    fn test_inverse_respects_live_docs() {
        let mut live = BitSet::full(6);
        live.remove(0);
        live.remove(5);
        let mut matcher = InverseMatcher::new(bits(&[2], 6), Arc::new(live)).unwrap();
        assert_eq!(drain(&mut matcher), vec![1, 3, 4]);
    }
}
