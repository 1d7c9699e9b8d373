//! Infrastructure dependency graph and blast-radius scoring
//!
//! The topology is data: it is read from TOML at startup (or the bundled
//! default) and is read-only afterwards. Scoring only depends on
//! reachability, so any graph shape works, cycles included.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use crate::errors::{AssureError, AssureResult};
use crate::risk_types::BlastRadiusResult;

const DEFAULT_GRAPH: &str = include_str!("../config/dependency_graph.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    /// Edges with a non-positive weight are disabled
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastScoring {
    pub per_node: f64,
    pub max_score: f64,
    pub no_match_floor: f64,
}

impl Default for BlastScoring {
    fn default() -> Self {
        Self {
            per_node: 20.0,
            max_score: 100.0,
            no_match_floor: 5.0,
        }
    }
}

/// On-disk shape of a graph definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub scoring: BlastScoring,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    /// Keyword (matched against lower-cased request text) to seed node id
    #[serde(default)]
    pub keywords: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct DependencyGraph {
    ids: Vec<String>,
    adjacency: Vec<Vec<usize>>,
    keywords: Vec<(String, usize)>,
    scoring: BlastScoring,
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

impl DependencyGraph {
    pub fn from_spec(spec: GraphSpec) -> AssureResult<Self> {
        let mut index = HashMap::new();
        let mut ids = Vec::with_capacity(spec.nodes.len());
        for node in spec.nodes {
            if index.contains_key(&node.id) {
                return Err(AssureError::graph(format!("duplicate node '{}'", node.id)));
            }
            index.insert(node.id.clone(), ids.len());
            ids.push(node.id);
        }

        let lookup = |id: &str, context: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| AssureError::graph(format!("{context} references unknown node '{id}'")))
        };

        let mut adjacency = vec![Vec::new(); ids.len()];
        for edge in &spec.edges {
            let from = lookup(&edge.from, "edge")?;
            let to = lookup(&edge.to, "edge")?;
            if edge.weight > 0.0 {
                adjacency[from].push(to);
            }
        }

        let mut keywords = Vec::with_capacity(spec.keywords.len());
        for (keyword, node) in spec.keywords {
            let target = lookup(&node, "keyword")?;
            keywords.push((keyword.to_lowercase(), target));
        }

        if spec.scoring.per_node < 0.0 || spec.scoring.no_match_floor <= 0.0 {
            return Err(AssureError::graph(
                "scoring.per_node must be non-negative and scoring.no_match_floor positive",
            ));
        }

        Ok(Self {
            ids,
            adjacency,
            keywords,
            scoring: spec.scoring,
        })
    }

    pub fn from_toml_str(text: &str) -> AssureResult<Self> {
        let spec: GraphSpec = toml::from_str(text)
            .map_err(|e| AssureError::graph(format!("invalid graph definition: {e}")))?;
        Self::from_spec(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AssureResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AssureError::persistence(format!("reading graph {}", path.display()), e))?;
        Self::from_toml_str(&text)
    }

    /// The topology shipped with the crate
    pub fn bundled() -> AssureResult<Self> {
        Self::from_toml_str(DEFAULT_GRAPH)
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Seed nodes whose keyword occurs in `text` as whole tokens,
    /// de-duplicated. A multi-word keyword must appear as a contiguous run.
    pub fn match_seeds(&self, text: &str) -> BTreeSet<usize> {
        let text = text.to_lowercase();
        let words = tokens(&text);
        self.keywords
            .iter()
            .filter(|(keyword, _)| {
                let wanted = tokens(keyword);
                !wanted.is_empty() && words.windows(wanted.len()).any(|run| run == wanted.as_slice())
            })
            .map(|(_, node)| *node)
            .collect()
    }

    /// Nodes reachable from `seed` along enabled edges, excluding the seed
    pub fn descendants(&self, seed: usize) -> BTreeSet<usize> {
        let mut visited = vec![false; self.ids.len()];
        let mut queue = VecDeque::new();
        let mut found = BTreeSet::new();

        visited[seed] = true;
        queue.push_back(seed);
        while let Some(node) = queue.pop_front() {
            for &next in &self.adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    found.insert(next);
                    queue.push_back(next);
                }
            }
        }
        found
    }

    pub fn calculate_blast_radius(&self, text: &str) -> BlastRadiusResult {
        let seeds = self.match_seeds(text);
        if seeds.is_empty() {
            return BlastRadiusResult {
                score: self.scoring.no_match_floor,
                reachable: 0,
                seeds: Vec::new(),
            };
        }

        let mut total = 0.0;
        let mut reachable = 0;
        for &seed in &seeds {
            let count = self.descendants(seed).len();
            reachable += count;
            total += (count as f64 + 1.0) * self.scoring.per_node;
        }

        BlastRadiusResult {
            score: total.min(self.scoring.max_score),
            reachable,
            seeds: seeds.iter().map(|&i| self.ids[i].clone()).collect(),
        }
    }
}
