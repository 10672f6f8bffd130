//! Semantic tool discovery: ranks registry tools against a natural-language
//! query using embeddings plus a flat bonus per matched tag.

pub mod encoder;

use std::sync::Arc;

use serde::Serialize;

use crate::{
    core::error::{GatewayError, GatewayResult},
    registry::ToolRegistry,
};

pub use encoder::{cosine_similarity, Encoder, HashingEncoder, EMBEDDING_DIM};

/// Flat score bonus per tag shared between the request and a tool.
const TAG_BONUS: f32 = 0.2;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

/// One ranked discovery result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMatch {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub score: f32,
    pub matched_tags: Vec<String>,
    pub estimated_tokens: u32,
    pub server: String,
}

pub struct DiscoveryService {
    registry: Arc<ToolRegistry>,
    encoder: Arc<dyn Encoder>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<ToolRegistry>, encoder: Arc<dyn Encoder>) -> Self {
        Self { registry, encoder }
    }

    /// Rank tools for `query`. Pure over a registry snapshot: the same
    /// snapshot, query, tags, and limit always yield the same list.
    pub fn discover(
        &self,
        query: &str,
        context: Option<&str>,
        tags: &[String],
        limit: Option<usize>,
    ) -> GatewayResult<Vec<ToolMatch>> {
        if query.trim().is_empty() {
            return Err(GatewayError::Discovery {
                reason: "query must not be empty".to_string(),
            });
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let candidates: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|tool| tags.is_empty() || tool.tags.iter().any(|t| tags.contains(t)))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_text = match context {
            Some(context) if !context.is_empty() => format!("{} {}", query, context),
            _ => query.to_string(),
        };
        let query_vec = self.encoder.encode(&query_text);

        let mut matches: Vec<ToolMatch> = candidates
            .into_iter()
            .map(|tool| {
                let tool_vec =
                    tool.embedding_or_init(|| self.encoder.encode(&tool.embedding_text()));
                let similarity = cosine_similarity(&query_vec, tool_vec);

                let matched_tags: Vec<String> = tool
                    .tags
                    .iter()
                    .filter(|t| tags.contains(t))
                    .cloned()
                    .collect();
                let score = (similarity + TAG_BONUS * matched_tags.len() as f32).clamp(0.0, 1.0);

                ToolMatch {
                    tool_id: tool.id.clone(),
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    score,
                    matched_tags,
                    estimated_tokens: tool.estimated_tokens,
                    server: tool.server.clone(),
                }
            })
            .collect();

        // descending score, ascending id on ties
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}
