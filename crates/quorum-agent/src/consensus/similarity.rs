use std::collections::HashSet;

use futures::future::{join_all, BoxFuture};

use quorum_core::traits::Similarity;

const STOP_WORDS: &[&str] = &[
    "the", "and", "are", "was", "were", "but", "not", "for", "with", "this", "that", "these",
    "those", "its", "has", "have", "had", "you", "your", "from", "they", "them", "then",
    "than", "into", "our", "out", "very", "also", "just", "can", "will", "would", "should",
    "could", "been", "being", "there", "their", "what", "which", "who", "how", "why", "when",
    "where", "all", "any", "some", "such",
];

/// Jaccard overlap of lowercase content words.
///
/// Tokens of two characters or fewer and common stop words are ignored, so
/// "The sky is blue." and "The sky is blue indeed." share {sky, blue}. Texts
/// without content words only match when their normalized forms are equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl LexicalSimilarity {
    pub fn words(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 2)
            .filter(|w| !STOP_WORDS.contains(w))
            .map(str::to_string)
            .collect()
    }

    /// Lowercase alphanumeric tokens joined by single spaces.
    pub fn normalized(text: &str) -> String {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn jaccard(a: &str, b: &str) -> f64 {
        let left = Self::words(a);
        let right = Self::words(b);
        if left.is_empty() || right.is_empty() {
            return if Self::normalized(a) == Self::normalized(b) {
                1.0
            } else {
                0.0
            };
        }
        let shared = left.intersection(&right).count();
        let union = left.union(&right).count();
        shared as f64 / union as f64
    }
}

impl Similarity for LexicalSimilarity {
    fn score<'a>(&'a self, a: &'a str, b: &'a str) -> BoxFuture<'a, f64> {
        Box::pin(std::future::ready(Self::jaccard(a, b)))
    }
}

/// Symmetric pairwise scores, with 1.0 on the diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    scores: Vec<f64>,
}

impl SimilarityMatrix {
    /// Score every unordered pair concurrently. Scores are clamped into
    /// `[0, 1]`; non-finite scores count as 0.
    pub async fn compute(similarity: &dyn Similarity, texts: &[&str]) -> Self {
        let size = texts.len();
        let pairs: Vec<(usize, usize)> = (0..size)
            .flat_map(|i| (i + 1..size).map(move |j| (i, j)))
            .collect();

        let scored = join_all(
            pairs
                .iter()
                .map(|&(i, j)| similarity.score(texts[i], texts[j])),
        )
        .await;

        let mut scores = vec![0.0; size * size];
        for i in 0..size {
            scores[i * size + i] = 1.0;
        }
        for (&(i, j), score) in pairs.iter().zip(scored) {
            let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
            scores[i * size + j] = score;
            scores[j * size + i] = score;
        }
        Self { size, scores }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.scores[i * self.size + j]
    }
}
