//! Consensus strategies: collapse N candidate answers into one.

pub mod aggregation;
pub mod cluster;
pub mod similarity;
pub mod voting;

use futures::future::BoxFuture;
use serde::Serialize;

use quorum_core::error::Result;

pub use aggregation::AggregationStrategy;
pub use cluster::{cluster, Cluster};
pub use similarity::{LexicalSimilarity, SimilarityMatrix};
pub use voting::VotingStrategy;

/// Default clustering threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Score reported by voting when there is only one candidate.
pub const SINGLE_CANDIDATE_SCORE: f64 = 1.0;

/// One candidate answer and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Step (or agent) that produced the text, if known.
    pub source: Option<String>,
    pub text: String,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            source: None,
            text: text.into(),
        }
    }

    pub fn from_source(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            text: text.into(),
        }
    }
}

/// Ordered candidate answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsensusInput {
    pub candidates: Vec<Candidate>,
}

impl ConsensusInput {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(Candidate::new).collect())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Merged or selected text plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub text: String,
    /// Indices into the input of the candidates that contributed to `text`.
    pub contributors: Vec<usize>,
    /// Size of the winning group (voting) or number of candidates covered (aggregation).
    pub group_size: usize,
    pub score: f64,
    /// Every cluster found, as candidate indices.
    pub clusters: Vec<Vec<usize>>,
}

impl ConsensusResult {
    /// Identity result for a single candidate.
    pub(crate) fn single(input: &ConsensusInput, score: f64) -> Self {
        let text = input
            .candidates
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default();
        Self {
            text,
            contributors: vec![0],
            group_size: 1,
            score,
            clusters: vec![vec![0]],
        }
    }
}

/// An algorithm collapsing multiple candidate responses into one result.
pub trait ConsensusStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Fails with `EmptyInput` when given zero candidates.
    fn run<'a>(&'a self, input: &'a ConsensusInput) -> BoxFuture<'a, Result<ConsensusResult>>;
}
