use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::Similarity;

use super::cluster::{cluster, Cluster};
use super::similarity::{LexicalSimilarity, SimilarityMatrix};
use super::{ConsensusInput, ConsensusResult, ConsensusStrategy, SINGLE_CANDIDATE_SCORE};

/// Picks the largest group of mutually similar answers and returns its most
/// central member.
pub struct VotingStrategy {
    similarity: Arc<dyn Similarity>,
    threshold: f64,
}

impl VotingStrategy {
    pub fn new(similarity: Arc<dyn Similarity>, threshold: f64) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Voting with the built-in lexical similarity.
    pub fn lexical(threshold: f64) -> Self {
        Self::new(Arc::new(LexicalSimilarity), threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn vote(&self, input: &ConsensusInput) -> Result<ConsensusResult> {
        match input.len() {
            0 => return Err(QuorumError::EmptyInput),
            1 => return Ok(ConsensusResult::single(input, SINGLE_CANDIDATE_SCORE)),
            _ => {}
        }

        let texts = input.texts();
        let matrix = SimilarityMatrix::compute(self.similarity.as_ref(), &texts).await;
        let clusters = cluster(&matrix, self.threshold);

        // Largest group wins; ties go to higher intra-group similarity, then first appearance.
        let mut winner: &Cluster = &clusters[0];
        let mut winner_total = winner.total_similarity(&matrix);
        for candidate in &clusters[1..] {
            let total = candidate.total_similarity(&matrix);
            if candidate.size() > winner.size()
                || (candidate.size() == winner.size() && total > winner_total)
            {
                winner = candidate;
                winner_total = total;
            }
        }

        let representative = winner.representative(&matrix);
        let score = winner.mean_similarity(&matrix);
        debug!(
            candidates = input.len(),
            clusters = clusters.len(),
            group_size = winner.size(),
            score,
            "Voting complete"
        );

        Ok(ConsensusResult {
            text: input.candidates[representative].text.clone(),
            contributors: winner.members.clone(),
            group_size: winner.size(),
            score,
            clusters: clusters.iter().map(|c| c.members.clone()).collect(),
        })
    }
}

impl ConsensusStrategy for VotingStrategy {
    fn name(&self) -> &str {
        "voting"
    }

    fn run<'a>(&'a self, input: &'a ConsensusInput) -> BoxFuture<'a, Result<ConsensusResult>> {
        Box::pin(self.vote(input))
    }
}
