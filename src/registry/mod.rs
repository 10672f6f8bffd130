//! In-memory tool registry: the union of every tool discovered across
//! backends, keyed by fully-qualified id (`<server>_<tool_name>`).
//!
//! Records are immutable; re-enumeration replaces a backend's whole set in
//! one step. Readers are never blocked and always observe either the old or
//! the new set for a server, never a mix. Writers are serialized.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

/// One exposed tool. Never mutated in place; replacement is by new record.
#[derive(Debug)]
pub struct Tool {
    /// Fully-qualified id: `<server>_<name>`
    pub id: String,
    /// Owning backend
    pub server: String,
    /// Tool name as the backend exposes it
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped input description
    pub parameters: Value,
    /// Lowercase tags derived from the description and backend config
    pub tags: Vec<String>,
    /// Heuristic token cost of exposing this tool
    pub estimated_tokens: u32,
    embedding: OnceCell<Vec<f32>>,
}

impl Tool {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        tags: Vec<String>,
        estimated_tokens: u32,
    ) -> Self {
        let server = server.into();
        let name = name.into();
        Self {
            id: format!("{}_{}", server, name),
            server,
            name,
            description: description.into(),
            parameters,
            tags,
            estimated_tokens,
            embedding: OnceCell::new(),
        }
    }

    /// Cached embedding, if discovery has touched this record.
    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }

    /// Get the cached embedding or compute and cache it.
    pub fn embedding_or_init(&self, compute: impl FnOnce() -> Vec<f32>) -> &[f32] {
        self.embedding.get_or_init(compute)
    }

    /// Text fed to the encoder for this tool.
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.name, self.description, self.tags.join(" "))
    }
}

/// Registry of all tools across backends.
///
/// `by_server` holds the authoritative per-server slots; `by_id` is a lookup
/// index maintained under the same write lock. Slot swaps are atomic from a
/// reader's perspective.
pub struct ToolRegistry {
    by_server: DashMap<String, Arc<Vec<Arc<Tool>>>>,
    by_id: DashMap<String, Arc<Tool>>,
    write_lock: Mutex<()>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            by_server: DashMap::new(),
            by_id: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Atomically replace every tool for `server`.
    pub fn replace_server(&self, server: &str, tools: Vec<Tool>) {
        let _guard = self.write_lock.lock();

        let mut deduped: Vec<Arc<Tool>> = Vec::with_capacity(tools.len());
        for tool in tools {
            debug_assert_eq!(tool.server, server);
            if let Some(existing) = deduped.iter_mut().find(|t| t.id == tool.id) {
                warn!(server, id = %tool.id, "Duplicate tool id in enumeration, keeping last");
                *existing = Arc::new(tool);
            } else {
                deduped.push(Arc::new(tool));
            }
        }

        let old_ids: Vec<String> = self
            .by_server
            .get(server)
            .map(|slot| slot.iter().map(|t| t.id.clone()).collect())
            .unwrap_or_default();

        // Insert new index entries first so ids that survive the replacement
        // never go missing, then swap the slot, then drop stale entries.
        for tool in &deduped {
            self.by_id.insert(tool.id.clone(), Arc::clone(tool));
        }
        self.by_server
            .insert(server.to_string(), Arc::new(deduped));
        for old_id in old_ids {
            let still_present = self
                .by_server
                .get(server)
                .map(|slot| slot.iter().any(|t| t.id == old_id))
                .unwrap_or(false);
            if !still_present {
                self.by_id.remove(&old_id);
            }
        }
    }

    /// Drop every tool owned by `server`.
    pub fn remove_server(&self, server: &str) {
        let _guard = self.write_lock.lock();
        if let Some((_, slot)) = self.by_server.remove(server) {
            for tool in slot.iter() {
                self.by_id.remove(&tool.id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Tool>> {
        self.by_id.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every tool, ordered by id for deterministic iteration.
    pub fn all(&self) -> Vec<Arc<Tool>> {
        let mut tools: Vec<Arc<Tool>> = self
            .by_server
            .iter()
            .flat_map(|slot| slot.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// Tools for one server (the shared slot, not a copy).
    pub fn by_server(&self, server: &str) -> Option<Arc<Vec<Arc<Tool>>>> {
        self.by_server.get(server).map(|slot| Arc::clone(slot.value()))
    }

    pub fn count_by_server(&self) -> HashMap<String, usize> {
        self.by_server
            .iter()
            .map(|slot| (slot.key().clone(), slot.value().len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
