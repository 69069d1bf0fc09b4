use super::similarity::SimilarityMatrix;

/// Candidates grouped by transitive similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Candidate indices, ascending.
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn first(&self) -> usize {
        self.members[0]
    }

    /// Sum of pairwise scores between distinct members.
    pub fn total_similarity(&self, matrix: &SimilarityMatrix) -> f64 {
        let mut total = 0.0;
        for (n, &i) in self.members.iter().enumerate() {
            for &j in &self.members[n + 1..] {
                total += matrix.get(i, j);
            }
        }
        total
    }

    /// Mean pairwise score; 1.0 for a singleton.
    pub fn mean_similarity(&self, matrix: &SimilarityMatrix) -> f64 {
        let n = self.size();
        if n < 2 {
            return 1.0;
        }
        let pairs = (n * (n - 1) / 2) as f64;
        self.total_similarity(matrix) / pairs
    }

    /// The member most similar to the rest of the cluster (earliest on ties).
    pub fn representative(&self, matrix: &SimilarityMatrix) -> usize {
        let mut best = self.first();
        let mut best_score = f64::NEG_INFINITY;
        for &i in &self.members {
            let score: f64 = self
                .members
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| matrix.get(i, j))
                .sum();
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        best
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index stays root so roots follow first appearance.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

/// Group candidates whose pairwise score is at least `threshold`, transitively.
/// Clusters come back ordered by their first member.
pub fn cluster(matrix: &SimilarityMatrix, threshold: f64) -> Vec<Cluster> {
    let n = matrix.len();
    let mut sets = DisjointSet::new(n);
    for i in 0..n {
        for j in i + 1..n {
            if matrix.get(i, j) >= threshold {
                sets.union(i, j);
            }
        }
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut slot_of_root = vec![usize::MAX; n];
    for i in 0..n {
        let root = sets.find(i);
        if slot_of_root[root] == usize::MAX {
            slot_of_root[root] = clusters.len();
            clusters.push(Cluster { members: Vec::new() });
        }
        clusters[slot_of_root[root]].members.push(i);
    }
    clusters
}
