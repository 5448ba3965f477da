//! The matcher contract and leaf matchers.
//!
//! A matcher is a stateful forward iterator over ascending document ids
//! with per-document weights and scores. Combinators mirror the query
//! algebra; every combinator preserves the core contract:
//!
//! - `doc_id()` is `u64::MAX` once exhausted,
//! - `next()`/`skip_to()` return whether the matcher is still active,
//! - `skip_to(t)` never moves backwards and lands on the first id `>= t`,
//! - `skip_to_quality(q)` may only skip documents whose score bound is at
//!   most `q`.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::query::Term;
use crate::reader::SegmentPostings;
use crate::scoring::TermScorer;
use crate::util::bitset::BitSet;

/// Streaming iterator over matching document ids.
pub trait Matcher: Send + Debug {
    /// Current document id; `u64::MAX` when exhausted.
    fn doc_id(&self) -> u64;

    /// Move to the next matching document.
    fn next(&mut self) -> Result<bool>;

    /// Advance to the first document `>= target`.
    fn skip_to(&mut self, target: u64) -> Result<bool>;

    /// Estimated number of documents this matcher iterates.
    fn cost(&self) -> u64;

    /// True once the stream has ended.
    fn is_exhausted(&self) -> bool;

    /// Raw term weight at the current document.
    fn weight(&self) -> f32 {
        if self.is_exhausted() {
            0.0
        } else {
            1.0
        }
    }

    /// Model-scored value at the current document.
    fn score(&self) -> f32 {
        self.weight()
    }

    /// Whether block-max pruning is usable on this subtree.
    fn supports_block_quality(&self) -> bool {
        false
    }

    /// Upper bound on the score within the current block.
    fn block_max_score(&self) -> f32 {
        f32::INFINITY
    }

    /// Advance past the current document, then keep skipping documents in
    /// blocks whose score bound is at most `min_score`. The fallback just
    /// steps forward once.
    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        let _ = min_score;
        self.next()
    }

    /// Append the query terms that match at `doc_id` (used by
    /// terms-recording collectors).
    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        let _ = (doc_id, out);
    }
}

impl Matcher for Box<dyn Matcher> {
    fn doc_id(&self) -> u64 {
        self.as_ref().doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        self.as_mut().next()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.as_mut().skip_to(target)
    }

    fn cost(&self) -> u64 {
        self.as_ref().cost()
    }

    fn is_exhausted(&self) -> bool {
        self.as_ref().is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.as_ref().weight()
    }

    fn score(&self) -> f32 {
        self.as_ref().score()
    }

    fn supports_block_quality(&self) -> bool {
        self.as_ref().supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        self.as_ref().block_max_score()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        self.as_mut().skip_to_quality(min_score)
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.as_ref().matching_terms(doc_id, out)
    }
}

/// Matches nothing.
#[derive(Debug, Default)]
pub struct EmptyMatcher;

impl EmptyMatcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        EmptyMatcher
    }
}

impl Matcher for EmptyMatcher {
    fn doc_id(&self) -> u64 {
        u64::MAX
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn skip_to(&mut self, _target: u64) -> Result<bool> {
        Ok(false)
    }

    fn cost(&self) -> u64 {
        0
    }

    fn is_exhausted(&self) -> bool {
        true
    }
}

/// Matches the set bits of a bitmap with a constant weight. Used for
/// `Every`, filters and inverses.
#[derive(Debug)]
pub struct BitSetMatcher {
    bits: Arc<BitSet>,
    current: Option<usize>,
}

impl BitSetMatcher {
    /// Create a matcher over `bits`.
    pub fn new(bits: Arc<BitSet>) -> Self {
        let current = bits.next_set_bit(0);
        BitSetMatcher { bits, current }
    }
}

impl Matcher for BitSetMatcher {
    fn doc_id(&self) -> u64 {
        self.current.map(|bit| bit as u64).unwrap_or(u64::MAX)
    }

    fn next(&mut self) -> Result<bool> {
        if let Some(bit) = self.current {
            self.current = self.bits.next_set_bit(bit + 1);
        }
        Ok(self.current.is_some())
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        match self.current {
            Some(bit) if (bit as u64) >= target => Ok(true),
            Some(_) => {
                self.current = self.bits.next_set_bit(target as usize);
                Ok(self.current.is_some())
            }
            None => Ok(false),
        }
    }

    fn cost(&self) -> u64 {
        self.bits.count() as u64
    }

    fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }
}

/// The leaf matcher: one term's postings in one segment, scored.
pub struct TermMatcher {
    term: Term,
    field_id: u16,
    postings: SegmentPostings,
    scorer: Box<dyn TermScorer>,
}

impl TermMatcher {
    /// Wrap a posting cursor with its scorer.
    pub fn new(
        term: Term,
        field_id: u16,
        postings: SegmentPostings,
        scorer: Box<dyn TermScorer>,
    ) -> Self {
        TermMatcher {
            term,
            field_id,
            postings,
            scorer,
        }
    }

    /// Positions at the current document.
    pub fn positions(&self) -> &[u32] {
        self.postings.positions()
    }

    /// The underlying posting cursor.
    pub fn postings(&self) -> &SegmentPostings {
        &self.postings
    }
}

impl Debug for TermMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermMatcher")
            .field("term", &self.term)
            .field("doc_id", &self.doc_id())
            .finish()
    }
}

impl Matcher for TermMatcher {
    fn doc_id(&self) -> u64 {
        self.postings.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        self.postings.advance()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.postings.is_exhausted() {
            return Ok(false);
        }
        if self.postings.doc_id() >= target {
            return Ok(true);
        }
        self.postings.skip_to(target)
    }

    fn cost(&self) -> u64 {
        self.postings.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.postings.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.postings.weight()
    }

    fn score(&self) -> f32 {
        let doc_id = self.postings.doc_id();
        if doc_id == u64::MAX {
            return 0.0;
        }
        let length = self.postings.field_length(self.field_id, doc_id);
        self.scorer.score(self.postings.weight(), length)
    }

    fn supports_block_quality(&self) -> bool {
        self.scorer.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        if self.postings.is_exhausted() {
            0.0
        } else {
            self.scorer.max_score(self.postings.block_max_weight())
        }
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if self.postings.is_exhausted() {
            return Ok(false);
        }
        if self.block_max_score() > min_score {
            return self.postings.advance();
        }
        while !self.postings.is_exhausted() && self.block_max_score() <= min_score {
            if !self.postings.skip_past_block()? {
                return Ok(false);
            }
        }
        Ok(!self.postings.is_exhausted())
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        if self.doc_id() == doc_id {
            out.push(self.term.clone());
        }
    }
}

/// Replaces a child's scores with a constant.
#[derive(Debug)]
pub struct ConstantScoreMatcher {
    child: Box<dyn Matcher>,
    score: f32,
    done: bool,
}

impl ConstantScoreMatcher {
    /// Wrap `child`, scoring every match as `score`.
    pub fn new(child: Box<dyn Matcher>, score: f32) -> Self {
        ConstantScoreMatcher {
            child,
            score,
            done: false,
        }
    }
}

impl Matcher for ConstantScoreMatcher {
    fn doc_id(&self) -> u64 {
        if self.done {
            u64::MAX
        } else {
            self.child.doc_id()
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        self.child.next()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        self.child.skip_to(target)
    }

    fn cost(&self) -> u64 {
        self.child.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.done || self.child.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.score
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn supports_block_quality(&self) -> bool {
        true
    }

    fn block_max_score(&self) -> f32 {
        self.score
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if self.score <= min_score {
            // No document in this subtree can ever beat the threshold.
            self.done = true;
            return Ok(false);
        }
        self.child.next()
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        if !self.done {
            self.child.matching_terms(doc_id, out)
        }
    }
}

/// Restricts a child to documents present in an allow set.
#[derive(Debug)]
pub struct FilterMatcher {
    child: Box<dyn Matcher>,
    allow: Arc<BitSet>,
}

impl FilterMatcher {
    /// Wrap `child`, keeping only documents in `allow`.
    pub fn new(child: Box<dyn Matcher>, allow: Arc<BitSet>) -> Result<Self> {
        let mut matcher = FilterMatcher { child, allow };
        matcher.align()?;
        Ok(matcher)
    }

    fn align(&mut self) -> Result<bool> {
        while !self.child.is_exhausted() {
            if self.allow.contains(self.child.doc_id() as usize) {
                return Ok(true);
            }
            if !self.child.next()? {
                break;
            }
        }
        Ok(false)
    }
}

impl Matcher for FilterMatcher {
    fn doc_id(&self) -> u64 {
        self.child.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.child.next()? {
            return Ok(false);
        }
        self.align()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.child.skip_to(target)? {
            return Ok(false);
        }
        self.align()
    }

    fn cost(&self) -> u64 {
        self.child.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.child.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.child.weight()
    }

    fn score(&self) -> f32 {
        self.child.score()
    }

    fn supports_block_quality(&self) -> bool {
        self.child.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        self.child.block_max_score()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if !self.child.skip_to_quality(min_score)? {
            return Ok(false);
        }
        self.align()
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.child.matching_terms(doc_id, out)
    }
}

/// Excludes documents present in a deny set.
#[derive(Debug)]
pub struct ExcludeMatcher {
    child: Box<dyn Matcher>,
    deny: Arc<BitSet>,
}

impl ExcludeMatcher {
    /// Wrap `child`, dropping documents in `deny`.
    pub fn new(child: Box<dyn Matcher>, deny: Arc<BitSet>) -> Result<Self> {
        let mut matcher = ExcludeMatcher { child, deny };
        matcher.align()?;
        Ok(matcher)
    }

    fn align(&mut self) -> Result<bool> {
        while !self.child.is_exhausted() {
            if !self.deny.contains(self.child.doc_id() as usize) {
                return Ok(true);
            }
            if !self.child.next()? {
                break;
            }
        }
        Ok(false)
    }
}

impl Matcher for ExcludeMatcher {
    fn doc_id(&self) -> u64 {
        self.child.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.child.next()? {
            return Ok(false);
        }
        self.align()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.child.skip_to(target)? {
            return Ok(false);
        }
        self.align()
    }

    fn cost(&self) -> u64 {
        self.child.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.child.is_exhausted()
    }

    fn weight(&self) -> f32 {
        self.child.weight()
    }

    fn score(&self) -> f32 {
        self.child.score()
    }

    fn supports_block_quality(&self) -> bool {
        self.child.supports_block_quality()
    }

    fn block_max_score(&self) -> f32 {
        self.child.block_max_score()
    }

    fn skip_to_quality(&mut self, min_score: f32) -> Result<bool> {
        if !self.child.skip_to_quality(min_score)? {
            return Ok(false);
        }
        self.align()
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        self.child.matching_terms(doc_id, out)
    }
}
