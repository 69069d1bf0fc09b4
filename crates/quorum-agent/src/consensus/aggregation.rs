use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::Similarity;

use super::cluster::cluster;
use super::similarity::{LexicalSimilarity, SimilarityMatrix};
use super::{ConsensusInput, ConsensusResult, ConsensusStrategy};

/// Keeps one representative from every cluster so minority answers survive the merge.
pub struct AggregationStrategy {
    similarity: Arc<dyn Similarity>,
    threshold: f64,
    separator: String,
}

impl AggregationStrategy {
    pub fn new(similarity: Arc<dyn Similarity>, threshold: f64) -> Self {
        Self {
            similarity,
            threshold,
            separator: "\n".to_string(),
        }
    }

    pub fn lexical(threshold: f64) -> Self {
        Self::new(Arc::new(LexicalSimilarity), threshold)
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    async fn aggregate(&self, input: &ConsensusInput) -> Result<ConsensusResult> {
        match input.len() {
            0 => return Err(QuorumError::EmptyInput),
            1 => return Ok(ConsensusResult::single(input, 1.0)),
            _ => {}
        }

        let texts = input.texts();
        let matrix = SimilarityMatrix::compute(self.similarity.as_ref(), &texts).await;
        let mut clusters = cluster(&matrix, self.threshold);
        // Stable sort keeps first-appearance order within equal sizes.
        clusters.sort_by(|a, b| b.size().cmp(&a.size()));

        let representatives: Vec<usize> =
            clusters.iter().map(|c| c.representative(&matrix)).collect();
        let text = representatives
            .iter()
            .map(|&i| input.candidates[i].text.trim())
            .collect::<Vec<_>>()
            .join(&self.separator);

        let score = clusters
            .iter()
            .map(|c| c.mean_similarity(&matrix) * c.size() as f64)
            .sum::<f64>()
            / input.len() as f64;

        debug!(
            candidates = input.len(),
            clusters = clusters.len(),
            "Aggregation complete"
        );

        Ok(ConsensusResult {
            text,
            contributors: representatives,
            group_size: input.len(),
            score,
            clusters: clusters.iter().map(|c| c.members.clone()).collect(),
        })
    }
}

impl ConsensusStrategy for AggregationStrategy {
    fn name(&self) -> &str {
        "aggregation"
    }

    fn run<'a>(&'a self, input: &'a ConsensusInput) -> BoxFuture<'a, Result<ConsensusResult>> {
        Box::pin(self.aggregate(input))
    }
}
