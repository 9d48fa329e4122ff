//! Tool-call reconstruction from fragmented argument deltas.
//!
//! Both vendor families stream a tool call's JSON arguments as string
//! fragments keyed by a response-local integer index. The id and name show
//! up once (usually on the first fragment) and fragments for different
//! indices may interleave.

use std::collections::HashMap;

use codeloop_core::tool::ToolCallRequest;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates tool-call fragments until the vendor says a call is complete.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    /// Indices in first-appearance order
    order: Vec<u64>,
    pending: HashMap<u64, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment for `index`.
    ///
    /// `id` and `name` are captured the first time they are non-empty for
    /// that index; later values are ignored.
    pub fn append(&mut self, index: u64, id: Option<&str>, name: Option<&str>, fragment: &str) {
        let call = self.pending.entry(index).or_insert_with(|| {
            self.order.push(index);
            PartialCall::default()
        });

        if call.id.is_empty()
            && let Some(id) = id.filter(|s| !s.is_empty())
        {
            call.id = id.to_string();
        }
        if call.name.is_empty()
            && let Some(name) = name.filter(|s| !s.is_empty())
        {
            call.name = name.to_string();
        }
        call.arguments.push_str(fragment);
    }

    /// Complete the call at `index`, if one is pending.
    pub fn finish(&mut self, index: u64) -> Option<ToolCallRequest> {
        let call = self.pending.remove(&index)?;
        self.order.retain(|i| *i != index);
        Some(Self::build(index, call))
    }

    /// Complete every pending call in first-appearance order.
    pub fn finish_all(&mut self) -> Vec<ToolCallRequest> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|index| {
                self.pending
                    .remove(&index)
                    .map(|call| Self::build(index, call))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn build(index: u64, call: PartialCall) -> ToolCallRequest {
        let id = if call.id.is_empty() {
            // Some OpenAI-compatible servers never send an id
            format!("call_{index}_{}", uuid::Uuid::new_v4().simple())
        } else {
            call.id
        };

        ToolCallRequest {
            id,
            name: call.name,
            input: parse_arguments(&call.arguments),
        }
    }
}

/// Parse buffered argument text into structured input.
///
/// Nothing buffered means an empty object. Text that is not valid JSON is
/// kept verbatim as a JSON string so the executor can report it.
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Tool call arguments are not valid JSON");
            serde_json::Value::String(raw.to_string())
        }
    }
}
