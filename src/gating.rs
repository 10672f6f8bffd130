//! Token- and count-budgeted tool selection, plus the provisioned set that
//! `execute_tool` can be told to enforce.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::{
    core::error::{GatewayError, GatewayResult},
    registry::{Tool, ToolRegistry},
};

/// A tool shaped for MCP export.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedTool {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub token_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionMetadata {
    pub total_tokens: u32,
    pub gating_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub tools: Vec<ProvisionedTool>,
    pub metadata: ProvisionMetadata,
}

#[derive(Default)]
struct UsageState {
    seq: u64,
    /// tool id -> (invocation count, last-use sequence number)
    entries: HashMap<String, (u64, u64)>,
}

pub struct GatingService {
    registry: Arc<ToolRegistry>,
    max_tools_ceiling: usize,
    max_tokens_ceiling: u32,
    require_provisioning: bool,
    provisioned: RwLock<HashSet<String>>,
    usage: Mutex<UsageState>,
}

impl GatingService {
    pub fn new(
        registry: Arc<ToolRegistry>,
        max_tools_ceiling: usize,
        max_tokens_ceiling: u32,
        require_provisioning: bool,
    ) -> Self {
        Self {
            registry,
            max_tools_ceiling,
            max_tokens_ceiling,
            require_provisioning,
            provisioned: RwLock::new(HashSet::new()),
            usage: Mutex::new(UsageState::default()),
        }
    }

    pub fn require_provisioning(&self) -> bool {
        self.require_provisioning
    }

    /// Record a tool invocation; feeds the recency-ordered candidate list.
    pub fn record_use(&self, tool_id: &str) {
        let mut usage = self.usage.lock();
        usage.seq += 1;
        let seq = usage.seq;
        let entry = usage.entries.entry(tool_id.to_string()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = seq;
    }

    pub fn is_provisioned(&self, tool_id: &str) -> bool {
        self.provisioned.read().contains(tool_id)
    }

    /// Per-tool invocation counts (in-process analytics).
    pub fn usage_counts(&self) -> HashMap<String, u64> {
        self.usage
            .lock()
            .entries
            .iter()
            .map(|(id, (count, _))| (id.clone(), *count))
            .collect()
    }

    /// Select a bounded subset of tools. With explicit `tool_ids` the input
    /// order is kept and unknown ids are skipped; otherwise candidates come
    /// most-recently-used first, then registry order.
    pub fn provision(
        &self,
        tool_ids: Option<&[String]>,
        max_tools: Option<usize>,
        context_tokens: Option<u32>,
    ) -> GatewayResult<ProvisionOutcome> {
        let max_tools = max_tools
            .unwrap_or(self.max_tools_ceiling)
            .min(self.max_tools_ceiling)
            .max(1);
        let context_tokens = context_tokens
            .unwrap_or(self.max_tokens_ceiling)
            .min(self.max_tokens_ceiling);

        let candidates: Vec<Arc<Tool>> = match tool_ids {
            Some(ids) => ids.iter().filter_map(|id| self.registry.get(id)).collect(),
            None => self.recency_ordered_candidates(max_tools * 2),
        };

        let mut accepted: Vec<ProvisionedTool> = Vec::new();
        let mut total_tokens: u32 = 0;
        for tool in &candidates {
            if accepted.len() >= max_tools {
                break;
            }
            if total_tokens + tool.estimated_tokens <= context_tokens {
                total_tokens += tool.estimated_tokens;
                accepted.push(ProvisionedTool {
                    tool_id: tool.id.clone(),
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                    token_count: tool.estimated_tokens,
                });
            }
        }

        if accepted.is_empty() && !candidates.is_empty() {
            return Err(GatewayError::BudgetExceeded {
                context_tokens,
                max_tools,
            });
        }

        if self.require_provisioning {
            let mut provisioned = self.provisioned.write();
            provisioned.clear();
            provisioned.extend(accepted.iter().map(|t| t.tool_id.clone()));
        }

        Ok(ProvisionOutcome {
            tools: accepted,
            metadata: ProvisionMetadata {
                total_tokens,
                gating_applied: true,
            },
        })
    }

    fn recency_ordered_candidates(&self, limit: usize) -> Vec<Arc<Tool>> {
        let usage = self.usage.lock();
        let mut tools = self.registry.all();
        // registry order is id-ascending; sort recently used tools in front
        tools.sort_by(|a, b| {
            let a_seq = usage.entries.get(&a.id).map(|(_, seq)| *seq).unwrap_or(0);
            let b_seq = usage.entries.get(&b.id).map(|(_, seq)| *seq).unwrap_or(0);
            b_seq.cmp(&a_seq).then_with(|| a.id.cmp(&b.id))
        });
        tools.truncate(limit);
        tools
    }
}
