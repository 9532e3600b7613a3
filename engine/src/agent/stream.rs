//! Incremental parsing of streamed model output

use crate::llm::{ToolCall, ToolCallFragment};
use std::collections::{BTreeMap, HashSet};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// A classified piece of streamed answer text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Think(String),
    Say(String),
}

/// Splits streamed content into reasoning and answer text.
///
/// Text between `<think>` and `</think>` is reasoning. A closing marker seen
/// outside a reasoning block marks the text before it as reasoning too.
/// Markers may be split across deltas; a possible marker prefix at the end of
/// a delta is held back until the next one arrives.
#[derive(Debug, Default)]
pub struct ThinkSplitter {
    in_think: bool,
    pending: String,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one content delta
    pub fn push(&mut self, text: &str) -> Vec<Segment> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(text);

        let mut segments = Vec::new();
        loop {
            let next = if self.in_think {
                buffer.find(THINK_CLOSE).map(|pos| (pos, THINK_CLOSE))
            } else {
                earliest(&buffer, &[THINK_OPEN, THINK_CLOSE])
            };

            match next {
                Some((pos, marker)) => {
                    let before = &buffer[..pos];
                    let reasoning = self.in_think || marker == THINK_CLOSE;
                    push_segment(&mut segments, before, reasoning);
                    self.in_think = marker == THINK_OPEN;
                    buffer = buffer[pos + marker.len()..].to_string();
                }
                None => {
                    let held = held_suffix(&buffer, self.in_think);
                    let split = buffer.len() - held;
                    push_segment(&mut segments, &buffer[..split], self.in_think);
                    self.pending = buffer[split..].to_string();
                    break;
                }
            }
        }
        segments
    }

    /// Flush any held-back text at the end of the stream
    pub fn finish(&mut self) -> Vec<Segment> {
        let rest = std::mem::take(&mut self.pending);
        let mut segments = Vec::new();
        push_segment(&mut segments, &rest, self.in_think);
        segments
    }
}

fn earliest<'m>(haystack: &str, markers: &[&'m str]) -> Option<(usize, &'m str)> {
    markers
        .iter()
        .filter_map(|m| haystack.find(m).map(|pos| (pos, *m)))
        .min_by_key(|(pos, _)| *pos)
}

/// Length of the longest suffix of `buffer` that could begin a marker
fn held_suffix(buffer: &str, in_think: bool) -> usize {
    let markers: &[&str] = if in_think {
        &[THINK_CLOSE]
    } else {
        &[THINK_OPEN, THINK_CLOSE]
    };

    markers
        .iter()
        .flat_map(|marker| {
            (1..marker.len())
                .rev()
                .find(|&k| buffer.ends_with(&marker[..k]))
        })
        .max()
        .unwrap_or(0)
}

fn push_segment(segments: &mut Vec<Segment>, text: &str, reasoning: bool) {
    if text.is_empty() {
        return;
    }
    match (segments.last_mut(), reasoning) {
        (Some(Segment::Think(prev)), true) | (Some(Segment::Say(prev)), false) => {
            prev.push_str(text)
        }
        (_, true) => segments.push(Segment::Think(text.to_string())),
        (_, false) => segments.push(Segment::Say(text.to_string())),
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool calls from index-keyed fragments
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment: the last non-empty id wins, name and argument
    /// pieces are appended in arrival order.
    pub fn push(&mut self, fragment: &ToolCallFragment) {
        let call = self.calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = &fragment.name {
            call.name.push_str(name);
        }
        if let Some(arguments) = &fragment.arguments {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order. Missing or repeated ids are replaced
    /// so every call of the turn has a distinct id.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut seen = HashSet::new();
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() || seen.contains(&call.id) {
                    format!("call_{}_{}", index, uuid::Uuid::new_v4().simple())
                } else {
                    call.id
                };
                seen.insert(id.clone());
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect()
    }
}
