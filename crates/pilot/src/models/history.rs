use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::content::{ContentBlock, ToolResultContent};
use super::message::{Message, Role};
use crate::errors::ProtocolError;

/// Tracks which tool_use ids have been issued and which still await a result.
#[derive(Debug, Clone, Default, PartialEq)]
struct ToolUseLedger {
    issued: HashSet<String>,
    pending: VecDeque<String>,
}

impl ToolUseLedger {
    fn admit(&mut self, message: &Message) -> Result<(), ProtocolError> {
        if message.role == Role::Assistant && !self.pending.is_empty() {
            return Err(ProtocolError::UnresolvedToolUses(
                self.pending.iter().cloned().collect(),
            ));
        }

        for block in message.blocks() {
            match block {
                ContentBlock::ToolUse(tool_use) => {
                    if message.role != Role::Assistant {
                        return Err(ProtocolError::MisplacedBlock {
                            role: message.role,
                            block: block.kind(),
                        });
                    }
                    if !self.issued.insert(tool_use.id.clone()) {
                        return Err(ProtocolError::DuplicateToolUseId(tool_use.id.clone()));
                    }
                    self.pending.push_back(tool_use.id.clone());
                }
                ContentBlock::ToolResult(result) => {
                    if message.role != Role::User {
                        return Err(ProtocolError::MisplacedBlock {
                            role: message.role,
                            block: block.kind(),
                        });
                    }
                    let id = &result.tool_use_id;
                    if !self.issued.contains(id) {
                        return Err(ProtocolError::OrphanedToolResult(id.clone()));
                    }
                    match self.pending.front() {
                        Some(expected) if expected == id => {
                            self.pending.pop_front();
                        }
                        Some(expected) if self.pending.contains(id) => {
                            return Err(ProtocolError::OutOfOrderToolResult {
                                expected: expected.clone(),
                                found: id.clone(),
                            });
                        }
                        _ => return Err(ProtocolError::DuplicateToolResult(id.clone())),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// An append-only conversation that enforces tool_use/tool_result causality.
///
/// Every `tool_use` must be answered, in order and exactly once, by a `tool_result` in a
/// user message before the next assistant turn. Messages that would break this are rejected
/// with a [`ProtocolError`] and leave the history untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct History {
    messages: Vec<Message>,
    ledger: ToolUseLedger,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from existing messages, validating them in order
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, ProtocolError> {
        let mut history = History::new();
        for message in messages {
            history.push(message)?;
        }
        Ok(history)
    }

    pub fn push(&mut self, message: Message) -> Result<(), ProtocolError> {
        self.ledger.admit(&message)?;
        self.messages.push(message);
        Ok(())
    }

    /// Append several messages atomically: either all are accepted or none are
    pub fn extend(&mut self, messages: Vec<Message>) -> Result<(), ProtocolError> {
        let mut staged = self.ledger.clone();
        for message in &messages {
            staged.admit(message)?;
        }
        self.ledger = staged;
        self.messages.extend(messages);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ids of tool uses that have not been answered yet, oldest first
    pub fn pending_tool_uses(&self) -> Vec<&str> {
        self.ledger.pending.iter().map(String::as_str).collect()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Mutable access to the content of every tool result, oldest first.
    ///
    /// Only the content is exposed so ids and error flags cannot be rewritten.
    pub fn tool_result_contents_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut Vec<ToolResultContent>> + '_ {
        self.messages
            .iter_mut()
            .filter_map(|message| message.blocks_mut())
            .flat_map(|blocks| blocks.iter_mut())
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => Some(&mut result.content),
                _ => None,
            })
    }
}

impl TryFrom<Vec<Message>> for History {
    type Error = ProtocolError;

    fn try_from(messages: Vec<Message>) -> Result<Self, Self::Error> {
        History::from_messages(messages)
    }
}

impl From<History> for Vec<Message> {
    fn from(history: History) -> Self {
        history.messages
    }
}
