//! Phrase matching.
//!
//! Two variants: the positional matcher intersects the phrase terms'
//! posting streams and verifies adjacency from recorded positions; the
//! vector-based matcher reads positions from the field's forward vector
//! instead, for fields whose postings do not carry positions.
//!
//! Adjacency uses a slop budget: consecutive phrase terms must move
//! forward, a gap of `g` positions costs `g − 1` units, and a document
//! matches when some assignment of positions keeps the total within
//! `slop`. For a two-term phrase this is exactly `0 < p₂ − p₁ ≤ slop + 1`.

use crate::error::Result;
use crate::query::matcher::Matcher;
use crate::query::Term;
use crate::reader::{SegmentPostings, SegmentReader};
use crate::scoring::TermScorer;

/// Count the phrase occurrences given each term's ascending positions.
/// Returns 0 when the phrase does not occur within the slop budget.
pub(crate) fn phrase_occurrences(position_lists: &[&[u32]], slop: u32) -> u32 {
    if position_lists.is_empty() || position_lists.iter().any(|positions| positions.is_empty()) {
        return 0;
    }

    // Candidate chain ends: (position of the last matched term, slop used).
    let mut chains: Vec<(u32, u32)> = position_lists[0].iter().map(|&pos| (pos, 0)).collect();

    for positions in &position_lists[1..] {
        let mut next: Vec<(u32, u32)> = Vec::new();
        for &pos in *positions {
            let mut best: Option<u32> = None;
            for &(end, used) in &chains {
                if pos > end {
                    let cost = used + (pos - end - 1);
                    if cost <= slop {
                        best = Some(best.map_or(cost, |b: u32| b.min(cost)));
                    }
                }
            }
            if let Some(used) = best {
                next.push((pos, used));
            }
        }
        chains = next;
        if chains.is_empty() {
            return 0;
        }
    }
    chains.len() as u32
}

/// Positional phrase matcher: intersects the terms' postings and walks
/// their positions.
pub struct PhraseMatcher {
    terms: Vec<Term>,
    field_id: u16,
    slop: u32,
    legs: Vec<(SegmentPostings, Box<dyn TermScorer>)>,
    current: u64,
    occurrences: u32,
    exhausted: bool,
}

impl PhraseMatcher {
    /// Build from one posting cursor and scorer per phrase term, in
    /// phrase order.
    pub fn new(
        terms: Vec<Term>,
        field_id: u16,
        slop: u32,
        legs: Vec<(SegmentPostings, Box<dyn TermScorer>)>,
    ) -> Result<Self> {
        let exhausted =
            legs.is_empty() || legs.iter().any(|(postings, _)| postings.is_exhausted());
        let mut matcher = PhraseMatcher {
            terms,
            field_id,
            slop,
            legs,
            current: 0,
            occurrences: 0,
            exhausted,
        };
        if !matcher.exhausted {
            matcher.find_next_match(0)?;
        } else {
            matcher.current = u64::MAX;
        }
        Ok(matcher)
    }

    /// Align all legs on a document at or after `target` where the phrase
    /// occurs.
    fn find_next_match(&mut self, target: u64) -> Result<bool> {
        let mut target = target;
        loop {
            // Intersection alignment over the legs.
            let mut max_doc = target;
            for (postings, _) in &self.legs {
                let doc_id = postings.doc_id();
                if doc_id == u64::MAX {
                    return self.give_up();
                }
                max_doc = max_doc.max(doc_id);
            }
            let mut aligned = true;
            for (postings, _) in &mut self.legs {
                if postings.doc_id() < max_doc {
                    if !postings.skip_to(max_doc)? {
                        aligned = false;
                        break;
                    }
                    if postings.doc_id() != max_doc {
                        aligned = false;
                    }
                }
            }
            if self.legs.iter().any(|(postings, _)| postings.is_exhausted()) {
                return self.give_up();
            }
            if !aligned {
                continue;
            }

            // All legs on max_doc: verify positions.
            let position_lists: Vec<&[u32]> = self
                .legs
                .iter()
                .map(|(postings, _)| postings.positions())
                .collect();
            let occurrences = phrase_occurrences(&position_lists, self.slop);
            if occurrences > 0 {
                self.current = max_doc;
                self.occurrences = occurrences;
                return Ok(true);
            }

            // No phrase here; move the first leg forward and realign.
            if !self.legs[0].0.advance()? {
                return self.give_up();
            }
            target = max_doc + 1;
        }
    }

    fn give_up(&mut self) -> Result<bool> {
        self.exhausted = true;
        self.current = u64::MAX;
        Ok(false)
    }

    /// Number of phrase occurrences in the current document.
    pub fn occurrences(&self) -> u32 {
        if self.exhausted {
            0
        } else {
            self.occurrences
        }
    }
}

impl std::fmt::Debug for PhraseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhraseMatcher")
            .field("terms", &self.terms)
            .field("slop", &self.slop)
            .field("doc_id", &self.doc_id())
            .finish()
    }
}

impl Matcher for PhraseMatcher {
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
        if !self.legs[0].0.advance()? {
            return self.give_up();
        }
        self.find_next_match(self.current + 1)
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.current >= target {
            return Ok(true);
        }
        if !self.legs[0].0.skip_to(target)? {
            return self.give_up();
        }
        self.find_next_match(target)
    }

    fn cost(&self) -> u64 {
        self.legs
            .iter()
            .map(|(postings, _)| postings.cost())
            .min()
            .unwrap_or(0)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn weight(&self) -> f32 {
        if self.exhausted {
            0.0
        } else {
            self.occurrences as f32
        }
    }

    fn score(&self) -> f32 {
        if self.exhausted {
            return 0.0;
        }
        self.legs
            .iter()
            .map(|(postings, scorer)| {
                let length = postings.field_length(self.field_id, self.current);
                scorer.score(postings.weight(), length)
            })
            .sum()
    }

    fn supports_block_quality(&self) -> bool {
        false
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        if !self.exhausted && self.current == doc_id {
            out.extend(self.terms.iter().cloned());
        }
    }
}

/// Phrase matcher that verifies positions against the field's forward
/// vector instead of the inverted postings.
pub struct VectorPhraseMatcher {
    reader: SegmentReader,
    field: String,
    terms: Vec<Term>,
    term_bytes: Vec<Vec<u8>>,
    slop: u32,
    child: Box<dyn Matcher>,
    current: u64,
    exhausted: bool,
}

impl VectorPhraseMatcher {
    /// Build over the intersection `child` of the phrase terms' document
    /// streams.
    pub fn new(
        reader: SegmentReader,
        field: String,
        terms: Vec<Term>,
        term_bytes: Vec<Vec<u8>>,
        slop: u32,
        child: Box<dyn Matcher>,
    ) -> Result<Self> {
        let exhausted = child.is_exhausted();
        let mut matcher = VectorPhraseMatcher {
            reader,
            field,
            terms,
            term_bytes,
            slop,
            child,
            current: 0,
            exhausted,
        };
        if !matcher.exhausted {
            matcher.verify_forward()?;
        } else {
            matcher.current = u64::MAX;
        }
        Ok(matcher)
    }

    /// Advance the child until a document's vector confirms the phrase.
    fn verify_forward(&mut self) -> Result<bool> {
        while !self.child.is_exhausted() {
            let doc_id = self.child.doc_id();
            if self.vector_has_phrase(doc_id)? {
                self.current = doc_id;
                return Ok(true);
            }
            if !self.child.next()? {
                break;
            }
        }
        self.exhausted = true;
        self.current = u64::MAX;
        Ok(false)
    }

    fn vector_has_phrase(&self, doc_id: u64) -> Result<bool> {
        let Some(vector) = self.reader.vector(doc_id, &self.field)? else {
            return Ok(false);
        };
        let mut position_lists: Vec<&[u32]> = Vec::with_capacity(self.term_bytes.len());
        for term in &self.term_bytes {
            match vector
                .binary_search_by(|(entry, _)| entry.as_slice().cmp(term.as_slice()))
            {
                Ok(idx) => position_lists.push(&vector[idx].1),
                Err(_) => return Ok(false),
            }
        }
        Ok(phrase_occurrences(&position_lists, self.slop) > 0)
    }
}

impl std::fmt::Debug for VectorPhraseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorPhraseMatcher")
            .field("field", &self.field)
            .field("terms", &self.terms)
            .field("doc_id", &self.doc_id())
            .finish()
    }
}

impl Matcher for VectorPhraseMatcher {
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
        if !self.child.next()? {
            self.exhausted = true;
            self.current = u64::MAX;
            return Ok(false);
        }
        self.verify_forward()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.current >= target {
            return Ok(true);
        }
        if !self.child.skip_to(target)? {
            self.exhausted = true;
            self.current = u64::MAX;
            return Ok(false);
        }
        self.verify_forward()
    }

    fn cost(&self) -> u64 {
        self.child.cost()
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn weight(&self) -> f32 {
        self.child.weight()
    }

    fn score(&self) -> f32 {
        if self.exhausted {
            0.0
        } else {
            self.child.score()
        }
    }

    fn matching_terms(&self, doc_id: u64, out: &mut Vec<Term>) {
        if !self.exhausted && self.current == doc_id {
            out.extend(self.terms.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_pair() {
        // "little lamb" at positions 3, 4.
        assert_eq!(phrase_occurrences(&[&[3], &[4]], 0), 1);
        assert_eq!(phrase_occurrences(&[&[3], &[4]], 1), 1);
    }

    #[test]
    fn test_pair_with_gap() {
        // Positions 0 and 4: gap of 4, costs 3 slop units.
        assert_eq!(phrase_occurrences(&[&[0], &[4]], 1), 0);
        assert_eq!(phrase_occurrences(&[&[0], &[4]], 3), 1);
        assert_eq!(phrase_occurrences(&[&[0], &[4]], 4), 1);
    }

    #[test]
    fn test_order_matters() {
        // Second term before the first never matches.
        assert_eq!(phrase_occurrences(&[&[5], &[2]], 10), 0);
        assert_eq!(phrase_occurrences(&[&[5], &[5]], 10), 0);
    }

    #[test]
    fn test_three_terms_budget_is_total() {
        // Gaps of 1 and 1: each costs 0.
        assert_eq!(phrase_occurrences(&[&[0], &[1], &[2]], 0), 1);
        // Gaps 2 then 2 cost 1 + 1 = 2 total.
        assert_eq!(phrase_occurrences(&[&[0], &[2], &[4]], 1), 0);
        assert_eq!(phrase_occurrences(&[&[0], &[2], &[4]], 2), 1);
    }

    #[test]
    fn test_multiple_occurrences() {
        // "a b" at (0,1) and (5,6).
        assert_eq!(phrase_occurrences(&[&[0, 5], &[1, 6]], 0), 2);
    }

    #[test]
    fn test_missing_positions() {
        assert_eq!(phrase_occurrences(&[&[], &[1]], 3), 0);
        assert_eq!(phrase_occurrences(&[], 3), 0);
    }
}
