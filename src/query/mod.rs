//! The query algebra.
//!
//! [`Query`] is an immutable, comparable, hashable sum type describing the
//! user's intent. A query is executed by building one matcher tree per
//! segment via [`Query::matcher`]; expanding variants (prefix, wildcard,
//! regex, range, fuzzy, variations) enumerate the term dictionary first and
//! execute as unions of term matchers, bounded by the context's term cap.
//!
//! `normalize()` flattens nested groups, removes empty branches and
//! rewrites `Not` into `AndNot` form; matcher construction accepts
//! non-normalized trees but collectors should normalize once up front.

pub mod boolean;
pub mod matcher;
pub mod multi_term;
pub mod nested;
pub mod phrase;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::analysis::{AnalyzerRegistry, TokenStream};
use crate::error::{Result, SalixError};
use crate::query::boolean::{
    AndMaybeMatcher, AndNotMatcher, DisjunctionMaxMatcher, IntersectionMatcher, UnionMatcher,
};
use crate::query::matcher::{
    BitSetMatcher, ConstantScoreMatcher, EmptyMatcher, Matcher, TermMatcher,
};
use crate::query::nested::{NestedChildrenMatcher, NestedParentMatcher};
use crate::query::phrase::{PhraseMatcher, VectorPhraseMatcher};
use crate::reader::{MultiReader, SegmentReader};
use crate::schema::{numeric_key_bytes, FieldDef, FieldKind};
use crate::scoring::{TermStats, WeightingModel};
use crate::util::bitset::BitSet;

/// A `(field, text)` pair: the leaf unit of queries and of matched-term
/// reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    /// Field name.
    pub field: String,
    /// Term text as given in the query.
    pub text: String,
}

impl Term {
    /// Create a term.
    pub fn new<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

/// Default cap on expanding-query term enumeration.
pub const DEFAULT_TERM_CAP: usize = 1024;

/// The algebraic representation of a search request.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Match documents containing a term.
    Term {
        /// Field name.
        field: String,
        /// Term text (analyzed with the field's analyzer at execution).
        text: String,
        /// Score multiplier.
        boost: f32,
    },
    /// Intersection of subqueries.
    And(Vec<Query>),
    /// Union of subqueries.
    Or {
        /// The subqueries.
        subqueries: Vec<Query>,
        /// Minimum number of subqueries that must match (>= 1).
        minimum_should_match: usize,
        /// Optional bonus scale rewarding documents that match more
        /// subqueries.
        scale: Option<f32>,
    },
    /// Negation; resolved in a conjunctive context, or against all live
    /// documents when standalone.
    Not(Box<Query>),
    /// Documents of `positive` minus documents of `negative`.
    AndNot {
        /// The matching side.
        positive: Box<Query>,
        /// The excluding side.
        negative: Box<Query>,
    },
    /// `required` must match; `optional` only adds score.
    AndMaybe {
        /// The driving side.
        required: Box<Query>,
        /// The score-only side.
        optional: Box<Query>,
    },
    /// Both match, scored by `scored` alone.
    Require {
        /// The scored side.
        scored: Box<Query>,
        /// The unscored requirement.
        required: Box<Query>,
    },
    /// Union scored as `max + tiebreak × (sum − max)`.
    DisjunctionMax {
        /// The subqueries.
        subqueries: Vec<Query>,
        /// Tiebreak factor in `[0, 1]`.
        tiebreak: f32,
    },
    /// Terms in order within a slop budget.
    Phrase {
        /// Field name.
        field: String,
        /// The phrase terms, in order.
        terms: Vec<String>,
        /// Slop budget; 0 demands adjacency.
        slop: u32,
        /// Score multiplier.
        boost: f32,
    },
    /// All terms starting with a prefix.
    Prefix {
        /// Field name.
        field: String,
        /// The prefix text.
        prefix: String,
    },
    /// Shell-style pattern over terms (`*`, `?`).
    Wildcard {
        /// Field name.
        field: String,
        /// The pattern.
        pattern: String,
    },
    /// Regular expression over terms.
    Regex {
        /// Field name.
        field: String,
        /// The pattern, anchored over the whole term.
        pattern: String,
    },
    /// Lexicographic term range.
    TermRange {
        /// Field name.
        field: String,
        /// Lower bound text, or open.
        lower: Option<String>,
        /// Upper bound text, or open.
        upper: Option<String>,
        /// Whether the lower bound is inclusive.
        include_lower: bool,
        /// Whether the upper bound is inclusive.
        include_upper: bool,
    },
    /// Numeric range over a numeric field.
    NumericRange {
        /// Field name.
        field: String,
        /// Lower bound, or open.
        lower: Option<i64>,
        /// Upper bound, or open.
        upper: Option<i64>,
        /// Whether the lower bound is inclusive.
        include_lower: bool,
        /// Whether the upper bound is inclusive.
        include_upper: bool,
    },
    /// Datetime range over a datetime field.
    DateRange {
        /// Field name.
        field: String,
        /// Lower bound, or open.
        lower: Option<DateTime<Utc>>,
        /// Upper bound, or open.
        upper: Option<DateTime<Utc>>,
        /// Whether the lower bound is inclusive.
        include_lower: bool,
        /// Whether the upper bound is inclusive.
        include_upper: bool,
    },
    /// Terms within a bounded edit distance.
    FuzzyTerm {
        /// Field name.
        field: String,
        /// The source text.
        text: String,
        /// Maximum edit distance (at most 2 is sensible).
        max_edits: u32,
        /// Number of leading characters that must match exactly.
        prefix_len: usize,
    },
    /// English inflection variations of a word.
    Variations {
        /// Field name.
        field: String,
        /// The source word.
        text: String,
    },
    /// Every live document, optionally restricted to documents carrying
    /// a field.
    Every(Option<String>),
    /// For each matching child, the nearest prior parent.
    NestedParent {
        /// Query defining the parent set.
        parents: Box<Query>,
        /// Query over child documents.
        children: Box<Query>,
    },
    /// For each matching parent, its children.
    NestedChildren {
        /// Query defining the parent set.
        parents: Box<Query>,
        /// Query selecting which parents qualify.
        parent_filter: Box<Query>,
    },
    /// Replace a subquery's scores with a constant.
    ConstantScore {
        /// The wrapped query.
        query: Box<Query>,
        /// The constant score.
        score: f32,
    },
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Query::Term { field, text, boost } => {
                field.hash(state);
                text.hash(state);
                boost.to_bits().hash(state);
            }
            Query::And(subqueries) => subqueries.hash(state),
            Query::Or {
                subqueries,
                minimum_should_match,
                scale,
            } => {
                subqueries.hash(state);
                minimum_should_match.hash(state);
                scale.map(f32::to_bits).hash(state);
            }
            Query::Not(inner) => inner.hash(state),
            Query::AndNot { positive, negative } => {
                positive.hash(state);
                negative.hash(state);
            }
            Query::AndMaybe { required, optional } => {
                required.hash(state);
                optional.hash(state);
            }
            Query::Require { scored, required } => {
                scored.hash(state);
                required.hash(state);
            }
            Query::DisjunctionMax {
                subqueries,
                tiebreak,
            } => {
                subqueries.hash(state);
                tiebreak.to_bits().hash(state);
            }
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => {
                field.hash(state);
                terms.hash(state);
                slop.hash(state);
                boost.to_bits().hash(state);
            }
            Query::Prefix { field, prefix } => {
                field.hash(state);
                prefix.hash(state);
            }
            Query::Wildcard { field, pattern } | Query::Regex { field, pattern } => {
                field.hash(state);
                pattern.hash(state);
            }
            Query::TermRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                field.hash(state);
                lower.hash(state);
                upper.hash(state);
                include_lower.hash(state);
                include_upper.hash(state);
            }
            Query::NumericRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                field.hash(state);
                lower.hash(state);
                upper.hash(state);
                include_lower.hash(state);
                include_upper.hash(state);
            }
            Query::DateRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                field.hash(state);
                lower.hash(state);
                upper.hash(state);
                include_lower.hash(state);
                include_upper.hash(state);
            }
            Query::FuzzyTerm {
                field,
                text,
                max_edits,
                prefix_len,
            } => {
                field.hash(state);
                text.hash(state);
                max_edits.hash(state);
                prefix_len.hash(state);
            }
            Query::Variations { field, text } => {
                field.hash(state);
                text.hash(state);
            }
            Query::Every(field) => field.hash(state),
            Query::NestedParent { parents, children } => {
                parents.hash(state);
                children.hash(state);
            }
            Query::NestedChildren {
                parents,
                parent_filter,
            } => {
                parents.hash(state);
                parent_filter.hash(state);
            }
            Query::ConstantScore { query, score } => {
                query.hash(state);
                score.to_bits().hash(state);
            }
        }
    }
}

impl Query {
    /// A term query with no extra boost.
    pub fn term<F: Into<String>, T: Into<String>>(field: F, text: T) -> Query {
        Query::Term {
            field: field.into(),
            text: text.into(),
            boost: 1.0,
        }
    }

    /// An intersection.
    pub fn and(subqueries: Vec<Query>) -> Query {
        Query::And(subqueries)
    }

    /// A plain union.
    pub fn or(subqueries: Vec<Query>) -> Query {
        Query::Or {
            subqueries,
            minimum_should_match: 1,
            scale: None,
        }
    }

    /// A negation.
    pub fn not(query: Query) -> Query {
        Query::Not(Box::new(query))
    }

    /// `positive` minus `negative`.
    pub fn and_not(positive: Query, negative: Query) -> Query {
        Query::AndNot {
            positive: Box::new(positive),
            negative: Box::new(negative),
        }
    }

    /// `required`, with `optional` adding score where aligned.
    pub fn and_maybe(required: Query, optional: Query) -> Query {
        Query::AndMaybe {
            required: Box::new(required),
            optional: Box::new(optional),
        }
    }

    /// A phrase with a slop budget.
    pub fn phrase<F: Into<String>>(field: F, terms: Vec<&str>, slop: u32) -> Query {
        Query::Phrase {
            field: field.into(),
            terms: terms.into_iter().map(str::to_string).collect(),
            slop,
            boost: 1.0,
        }
    }

    /// Flatten nested groups, drop empty branches, collapse singletons
    /// and rewrite `Not` into `AndNot` form.
    pub fn normalize(self) -> Query {
        match self {
            Query::And(subqueries) => {
                let mut positives = Vec::new();
                let mut negatives = Vec::new();
                for sub in subqueries {
                    match sub {
                        // Catch negations before they rewrite themselves.
                        Query::Not(inner) => negatives.push(inner.normalize()),
                        other => match other.normalize() {
                            Query::And(inner) => positives.extend(inner),
                            other => positives.push(other),
                        },
                    }
                }
                let positive = match positives.len() {
                    0 => Query::Every(None),
                    1 => positives.pop().expect("one element"),
                    _ => Query::And(positives),
                };
                match negatives.len() {
                    0 => positive,
                    1 => Query::and_not(positive, negatives.pop().expect("one element")),
                    _ => Query::and_not(positive, Query::or(negatives)),
                }
            }
            Query::Or {
                subqueries,
                minimum_should_match,
                scale,
            } => {
                let plain = minimum_should_match <= 1 && scale.is_none();
                let mut flat = Vec::new();
                for sub in subqueries {
                    match sub.normalize() {
                        Query::Or {
                            subqueries: inner,
                            minimum_should_match: 1,
                            scale: None,
                        } if plain => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if plain && flat.len() == 1 {
                    return flat.pop().expect("one element");
                }
                Query::Or {
                    subqueries: flat,
                    minimum_should_match,
                    scale,
                }
            }
            Query::Not(inner) => match inner.normalize() {
                // Double negation cancels.
                Query::AndNot { positive, negative }
                    if matches!(*positive, Query::Every(None)) =>
                {
                    *negative
                }
                other => Query::and_not(Query::Every(None), other),
            },
            Query::AndNot { positive, negative } => Query::AndNot {
                positive: Box::new(positive.normalize()),
                negative: Box::new(negative.normalize()),
            },
            Query::AndMaybe { required, optional } => Query::AndMaybe {
                required: Box::new(required.normalize()),
                optional: Box::new(optional.normalize()),
            },
            Query::Require { scored, required } => Query::Require {
                scored: Box::new(scored.normalize()),
                required: Box::new(required.normalize()),
            },
            Query::DisjunctionMax {
                subqueries,
                tiebreak,
            } => Query::DisjunctionMax {
                subqueries: subqueries.into_iter().map(Query::normalize).collect(),
                tiebreak,
            },
            Query::NestedParent { parents, children } => Query::NestedParent {
                parents: Box::new(parents.normalize()),
                children: Box::new(children.normalize()),
            },
            Query::NestedChildren {
                parents,
                parent_filter,
            } => Query::NestedChildren {
                parents: Box::new(parents.normalize()),
                parent_filter: Box::new(parent_filter.normalize()),
            },
            Query::ConstantScore { query, score } => Query::ConstantScore {
                query: Box::new(query.normalize()),
                score,
            },
            leaf => leaf,
        }
    }

    /// Build this query's matcher over one segment.
    pub fn matcher(
        &self,
        segment: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<Box<dyn Matcher>> {
        match self {
            Query::Term { field, text, boost } => {
                leaf_term_matcher(segment, ctx, field, text, *boost)
            }
            Query::And(subqueries) => {
                if subqueries.is_empty() {
                    return Ok(Box::new(EmptyMatcher::new()));
                }
                let children = subqueries
                    .iter()
                    .map(|sub| sub.matcher(segment, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(IntersectionMatcher::new(children)?))
            }
            Query::Or {
                subqueries,
                minimum_should_match,
                scale,
            } => {
                if subqueries.is_empty() {
                    return Ok(Box::new(EmptyMatcher::new()));
                }
                let children = subqueries
                    .iter()
                    .map(|sub| sub.matcher(segment, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(UnionMatcher::with_options(
                    children,
                    *minimum_should_match,
                    *scale,
                )?))
            }
            Query::Not(inner) => {
                let rewritten = Query::and_not(Query::Every(None), (**inner).clone());
                rewritten.matcher(segment, ctx)
            }
            Query::AndNot { positive, negative } => Ok(Box::new(AndNotMatcher::new(
                positive.matcher(segment, ctx)?,
                negative.matcher(segment, ctx)?,
            )?)),
            Query::AndMaybe { required, optional } => Ok(Box::new(AndMaybeMatcher::new(
                required.matcher(segment, ctx)?,
                optional.matcher(segment, ctx)?,
            )?)),
            Query::Require { scored, required } => Ok(Box::new(boolean::RequireMatcher::new(
                scored.matcher(segment, ctx)?,
                required.matcher(segment, ctx)?,
            )?)),
            Query::DisjunctionMax {
                subqueries,
                tiebreak,
            } => {
                if subqueries.is_empty() {
                    return Ok(Box::new(EmptyMatcher::new()));
                }
                let children = subqueries
                    .iter()
                    .map(|sub| sub.matcher(segment, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(DisjunctionMaxMatcher::new(children, *tiebreak)?))
            }
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => phrase_matcher(segment, ctx, field, terms, *slop, *boost),
            Query::Prefix { field, prefix } => {
                let def = ctx.expect_indexed(field)?;
                let prefix_bytes = analyzed_bytes(ctx, def, prefix)?
                    .unwrap_or_else(|| prefix.as_bytes().to_vec());
                let terms =
                    multi_term::expand_prefix(segment, field, &prefix_bytes, ctx.term_cap)?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::Wildcard { field, pattern } => {
                ctx.expect_indexed(field)?;
                let (regex, literal_prefix) = multi_term::wildcard_to_regex(pattern)?;
                let terms = multi_term::expand_regex(
                    segment,
                    field,
                    &regex,
                    &literal_prefix,
                    ctx.term_cap,
                )?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::Regex { field, pattern } => {
                ctx.expect_indexed(field)?;
                let (regex, literal_prefix) = multi_term::compile_term_regex(pattern)?;
                let terms = multi_term::expand_regex(
                    segment,
                    field,
                    &regex,
                    &literal_prefix,
                    ctx.term_cap,
                )?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::TermRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                ctx.expect_indexed(field)?;
                let terms = multi_term::expand_range(
                    segment,
                    field,
                    lower.as_ref().map(|text| text.as_bytes()),
                    upper.as_ref().map(|text| text.as_bytes()),
                    *include_lower,
                    *include_upper,
                    ctx.term_cap,
                )?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::NumericRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                ctx.expect_indexed(field)?;
                let lower = lower.map(numeric_key_bytes);
                let upper = upper.map(numeric_key_bytes);
                let terms = multi_term::expand_range(
                    segment,
                    field,
                    lower.as_ref().map(|bytes| bytes.as_slice()),
                    upper.as_ref().map(|bytes| bytes.as_slice()),
                    *include_lower,
                    *include_upper,
                    ctx.term_cap,
                )?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::DateRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                // Datetimes are indexed as epoch milliseconds.
                let rewritten = Query::NumericRange {
                    field: field.clone(),
                    lower: lower.map(|dt| dt.timestamp_millis()),
                    upper: upper.map(|dt| dt.timestamp_millis()),
                    include_lower: *include_lower,
                    include_upper: *include_upper,
                };
                rewritten.matcher(segment, ctx)
            }
            Query::FuzzyTerm {
                field,
                text,
                max_edits,
                prefix_len,
            } => {
                ctx.expect_indexed(field)?;
                let terms = multi_term::expand_fuzzy(
                    segment,
                    field,
                    text,
                    *max_edits,
                    *prefix_len,
                    ctx.term_cap,
                )?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::Variations { field, text } => {
                ctx.expect_indexed(field)?;
                let terms = multi_term::expand_variations(segment, field, text, ctx.term_cap)?;
                union_of_terms(segment, ctx, field, terms)
            }
            Query::Every(field) => every_matcher(segment, field.as_deref()),
            Query::NestedParent { parents, children } => {
                let parent_bits = Arc::new(matcher_to_bitset(
                    parents.matcher(segment, ctx)?,
                    segment.max_doc(),
                )?);
                let child = children.matcher(segment, ctx)?;
                Ok(Box::new(NestedParentMatcher::new(parent_bits, child)?))
            }
            Query::NestedChildren {
                parents,
                parent_filter,
            } => {
                let parent_bits = Arc::new(matcher_to_bitset(
                    parents.matcher(segment, ctx)?,
                    segment.max_doc(),
                )?);
                let qualifying = parent_filter.matcher(segment, ctx)?;
                let live = segment.live_docs().map(|bits| Arc::new(bits.clone()));
                Ok(Box::new(NestedChildrenMatcher::new(
                    parent_bits,
                    qualifying,
                    live,
                    segment.max_doc(),
                )?))
            }
            Query::ConstantScore { query, score } => {
                let child = query.matcher(segment, ctx)?;
                Ok(Box::new(ConstantScoreMatcher::new(child, *score)))
            }
        }
    }

    /// Every `(field, text)` leaf term mentioned by this query, for
    /// terms-recording searches.
    pub fn terms(&self, out: &mut Vec<Term>) {
        match self {
            Query::Term { field, text, .. } => out.push(Term::new(field.clone(), text.clone())),
            Query::Phrase { field, terms, .. } => {
                for text in terms {
                    out.push(Term::new(field.clone(), text.clone()));
                }
            }
            Query::And(subqueries) => {
                for sub in subqueries {
                    sub.terms(out);
                }
            }
            Query::Or { subqueries, .. } | Query::DisjunctionMax { subqueries, .. } => {
                for sub in subqueries {
                    sub.terms(out);
                }
            }
            Query::Not(inner) => inner.terms(out),
            Query::AndNot { positive, .. } => positive.terms(out),
            Query::AndMaybe { required, optional } => {
                required.terms(out);
                optional.terms(out);
            }
            Query::Require { scored, required } => {
                scored.terms(out);
                required.terms(out);
            }
            Query::NestedParent { children, .. } => children.terms(out),
            Query::ConstantScore { query, .. } => query.terms(out),
            _ => {}
        }
    }
}

/// Ambient state for matcher construction: index-wide statistics, the
/// weighting model, analyzers and expansion limits.
pub struct SearchContext<'a> {
    /// The index-wide reader, for global term statistics.
    pub reader: &'a MultiReader,
    /// The scoring model.
    pub weighting: &'a dyn WeightingModel,
    /// Analyzer registry for resolving query text.
    pub analyzers: &'a AnalyzerRegistry,
    /// Cap on expanding-query enumeration.
    pub term_cap: usize,
}

impl<'a> SearchContext<'a> {
    fn expect_indexed(&self, field: &str) -> Result<&'a FieldDef> {
        let reader: &'a MultiReader = self.reader;
        let def = reader
            .schema()
            .field(field)
            .ok_or_else(|| SalixError::NoSuchField(field.to_string()))?;
        if !def.indexed {
            return Err(SalixError::field(format!("field '{field}' is not indexed")));
        }
        Ok(def)
    }
}

/// Resolve query text to the bytes indexed for `field`.
fn term_bytes_for_field(
    ctx: &SearchContext<'_>,
    def: &FieldDef,
    field: &str,
    text: &str,
) -> Result<Option<Vec<u8>>> {
    match def.kind {
        FieldKind::Text | FieldKind::Id => analyzed_bytes(ctx, def, text),
        FieldKind::Numeric => {
            let value: i64 = text.parse().map_err(|_| {
                SalixError::query(format!("'{text}' is not numeric (field '{field}')"))
            })?;
            Ok(Some(numeric_key_bytes(value).to_vec()))
        }
        FieldKind::DateTime => {
            let millis = match DateTime::parse_from_rfc3339(text) {
                Ok(dt) => dt.timestamp_millis(),
                Err(_) => text.parse::<i64>().map_err(|_| {
                    SalixError::query(format!(
                        "'{text}' is not a datetime (field '{field}')"
                    ))
                })?,
            };
            Ok(Some(numeric_key_bytes(millis).to_vec()))
        }
        FieldKind::Boolean => {
            let value = match text {
                "true" | "1" | "yes" => 1i64,
                "false" | "0" | "no" => 0i64,
                _ => {
                    return Err(SalixError::query(format!(
                        "'{text}' is not boolean (field '{field}')"
                    )))
                }
            };
            Ok(Some(numeric_key_bytes(value).to_vec()))
        }
        FieldKind::Stored => Err(SalixError::field(format!(
            "field '{field}' is stored-only"
        ))),
    }
}

/// Run text through the field's analyzer and take the first token.
fn analyzed_bytes(
    ctx: &SearchContext<'_>,
    def: &FieldDef,
    text: &str,
) -> Result<Option<Vec<u8>>> {
    let Some(analyzer_name) = def.analyzer.as_deref() else {
        return Ok(Some(text.as_bytes().to_vec()));
    };
    let analyzer = ctx.analyzers.get(analyzer_name)?;
    let mut stream = analyzer.analyze(text);
    Ok(stream.next_token().map(|token| token.text.clone().into_bytes()))
}

fn leaf_term_matcher(
    segment: &SegmentReader,
    ctx: &SearchContext<'_>,
    field: &str,
    text: &str,
    boost: f32,
) -> Result<Box<dyn Matcher>> {
    let def = ctx.expect_indexed(field)?;
    let Some(bytes) = term_bytes_for_field(ctx, def, field, text)? else {
        // The text analyzed away entirely (for example a stop word).
        return Ok(Box::new(EmptyMatcher::new()));
    };
    term_matcher_for_bytes(segment, ctx, field, def, &bytes, text, boost)
}

fn term_matcher_for_bytes(
    segment: &SegmentReader,
    ctx: &SearchContext<'_>,
    field: &str,
    def: &FieldDef,
    bytes: &[u8],
    display: &str,
    boost: f32,
) -> Result<Box<dyn Matcher>> {
    let Some(postings) = segment.postings(field, bytes)? else {
        return Ok(Box::new(EmptyMatcher::new()));
    };
    let stats = match ctx.reader.term_info(field, bytes)? {
        Some((doc_freq, total_freq)) => TermStats {
            doc_freq,
            total_freq,
        },
        None => TermStats::default(),
    };
    let scorer = ctx
        .weighting
        .scorer(field, stats, ctx.reader.stats(), def.boost * boost);
    let field_id = ctx.reader.schema().expect_field_id(field)?;
    Ok(Box::new(TermMatcher::new(
        Term::new(field, display),
        field_id,
        postings,
        scorer,
    )))
}

/// A union of term matchers for an expanded term set.
fn union_of_terms(
    segment: &SegmentReader,
    ctx: &SearchContext<'_>,
    field: &str,
    terms: Vec<Vec<u8>>,
) -> Result<Box<dyn Matcher>> {
    if terms.is_empty() {
        return Ok(Box::new(EmptyMatcher::new()));
    }
    let def = ctx.expect_indexed(field)?;
    let mut children: Vec<Box<dyn Matcher>> = Vec::with_capacity(terms.len());
    for bytes in &terms {
        let display = String::from_utf8_lossy(bytes).into_owned();
        children.push(term_matcher_for_bytes(
            segment, ctx, field, def, bytes, &display, 1.0,
        )?);
    }
    if children.len() == 1 {
        return Ok(children.pop().expect("one element"));
    }
    Ok(Box::new(UnionMatcher::new(children)?))
}

fn phrase_matcher(
    segment: &SegmentReader,
    ctx: &SearchContext<'_>,
    field: &str,
    terms: &[String],
    slop: u32,
    boost: f32,
) -> Result<Box<dyn Matcher>> {
    let def = ctx.expect_indexed(field)?;
    if terms.is_empty() {
        return Ok(Box::new(EmptyMatcher::new()));
    }

    let mut term_bytes = Vec::with_capacity(terms.len());
    let mut display_terms = Vec::with_capacity(terms.len());
    for text in terms {
        let Some(bytes) = term_bytes_for_field(ctx, def, field, text)? else {
            // A phrase term that analyzes away can never be satisfied.
            return Ok(Box::new(EmptyMatcher::new()));
        };
        term_bytes.push(bytes);
        display_terms.push(Term::new(field, text.clone()));
    }

    let field_id = ctx.reader.schema().expect_field_id(field)?;

    if def.format.positions {
        let mut legs = Vec::with_capacity(term_bytes.len());
        for bytes in &term_bytes {
            let Some(postings) = segment.postings(field, bytes)? else {
                return Ok(Box::new(EmptyMatcher::new()));
            };
            let stats = match ctx.reader.term_info(field, bytes)? {
                Some((doc_freq, total_freq)) => TermStats {
                    doc_freq,
                    total_freq,
                },
                None => TermStats::default(),
            };
            let scorer = ctx
                .weighting
                .scorer(field, stats, ctx.reader.stats(), def.boost * boost);
            legs.push((postings, scorer));
        }
        return Ok(Box::new(PhraseMatcher::new(
            display_terms,
            field_id,
            slop,
            legs,
        )?));
    }

    if def.vectors {
        // No positions in the postings: intersect document streams and
        // verify against the forward vector.
        let mut children: Vec<Box<dyn Matcher>> = Vec::with_capacity(term_bytes.len());
        for (bytes, term) in term_bytes.iter().zip(&display_terms) {
            children.push(term_matcher_for_bytes(
                segment, ctx, field, def, bytes, &term.text, boost,
            )?);
        }
        let child = Box::new(IntersectionMatcher::new(children)?);
        return Ok(Box::new(VectorPhraseMatcher::new(
            segment.clone(),
            field.to_string(),
            display_terms,
            term_bytes,
            slop,
            child,
        )?));
    }

    Err(SalixError::field(format!(
        "field '{field}' records neither positions nor vectors; phrase queries need one"
    )))
}

/// Every live document, optionally restricted to those carrying `field`.
fn every_matcher(segment: &SegmentReader, field: Option<&str>) -> Result<Box<dyn Matcher>> {
    let max_doc = segment.max_doc() as usize;
    let mut bits = match segment.live_docs() {
        Some(live) => live.clone(),
        None => BitSet::full(max_doc),
    };
    if let Some(field) = field {
        let mut with_field = BitSet::new(max_doc);
        for doc_id in 0..max_doc as u64 {
            if segment.doc_has_field(doc_id, field)? {
                with_field.insert(doc_id as usize);
            }
        }
        bits.intersect_with(&with_field);
    }
    Ok(Box::new(BitSetMatcher::new(Arc::new(bits))))
}

/// Drain a matcher into a bitmap of its matching documents.
pub(crate) fn matcher_to_bitset(
    mut matcher: Box<dyn Matcher>,
    max_doc: u64,
) -> Result<BitSet> {
    let mut bits = BitSet::new(max_doc as usize);
    while !matcher.is_exhausted() {
        bits.insert(matcher.doc_id() as usize);
        if !matcher.next()? {
            break;
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(query: &Query) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_value_equality_and_hash() {
        let a = Query::and(vec![
            Query::term("body", "apple"),
            Query::term("body", "pie"),
        ]);
        let b = Query::and(vec![
            Query::term("body", "apple"),
            Query::term("body", "pie"),
        ]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Query::or(vec![
            Query::term("body", "apple"),
            Query::term("body", "pie"),
        ]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_normalize_flattens_and() {
        let query = Query::and(vec![
            Query::and(vec![
                Query::term("a", "x"),
                Query::term("a", "y"),
            ]),
            Query::term("a", "z"),
        ]);
        match query.normalize() {
            Query::And(subs) => assert_eq!(subs.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_collapses_singletons() {
        let query = Query::and(vec![Query::term("a", "x")]);
        assert_eq!(query.normalize(), Query::term("a", "x"));

        let query = Query::or(vec![Query::term("a", "x")]);
        assert_eq!(query.normalize(), Query::term("a", "x"));
    }

    #[test]
    fn test_normalize_rewrites_not() {
        let query = Query::not(Query::term("a", "x"));
        match query.normalize() {
            Query::AndNot { positive, negative } => {
                assert_eq!(*positive, Query::Every(None));
                assert_eq!(*negative, Query::term("a", "x"));
            }
            other => panic!("expected AndNot, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_double_negation() {
        let query = Query::not(Query::not(Query::term("a", "x")));
        assert_eq!(query.normalize(), Query::term("a", "x"));
    }

    #[test]
    fn test_normalize_and_with_not_becomes_and_not() {
        let query = Query::and(vec![
            Query::term("a", "x"),
            Query::not(Query::term("a", "y")),
        ]);
        match query.normalize() {
            Query::AndNot { positive, negative } => {
                assert_eq!(*positive, Query::term("a", "x"));
                // The inner Not was itself normalized to AndNot(Every, y)
                // and unwrapped back to the bare negative.
                assert_eq!(*negative, Query::term("a", "y"));
            }
            other => panic!("expected AndNot, got {other:?}"),
        }
    }

    #[test]
    fn test_query_terms_collection() {
        let query = Query::and(vec![
            Query::term("body", "apple"),
            Query::phrase("body", vec!["little", "lamb"], 1),
        ]);
        let mut terms = Vec::new();
        query.terms(&mut terms);
        assert_eq!(terms.len(), 3);
        assert!(terms.contains(&Term::new("body", "lamb")));
    }
}
