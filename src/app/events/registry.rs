use std::cmp::Reverse;
use std::collections::HashMap;

use super::Handler;

/// One registration: the handler plus its ordering metadata.
#[derive(Debug, Clone)]
pub struct ListenerEntry {
    pub handler: Handler,
    pub priority: i32,
    order: u64,
}

/// Stores listeners keyed by event name. Reads come back ordered by
/// `(-priority, insertion order)`: higher priority first, earlier
/// registration first among equals.
///
/// Registering the same handler twice makes it fire twice; there is no
/// deduplication. All operations are total: removing an absent listener or
/// querying an unknown event is a no-op.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    entries: HashMap<String, Vec<ListenerEntry>>,
    next_order: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &str, handler: Handler, priority: i32) {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.entry(event.to_string()).or_default().push(ListenerEntry {
            handler,
            priority,
            order,
        });
    }

    /// Removes the first entry matching the handler's identity, or every
    /// entry for the event when no handler is given. Dropping the last entry
    /// removes the event itself, so `has` reflects "at least one listener".
    pub fn remove(&mut self, event: &str, handler: Option<&Handler>) {
        match handler {
            None => {
                self.entries.remove(event);
            }
            Some(target) => {
                if let Some(entries) = self.entries.get_mut(event) {
                    if let Some(pos) = entries.iter().position(|e| e.handler.is_same(target)) {
                        entries.remove(pos);
                    }
                    if entries.is_empty() {
                        self.entries.remove(event);
                    }
                }
            }
        }
    }

    pub fn has(&self, event: &str) -> bool {
        self.entries.get(event).map(|e| !e.is_empty()).unwrap_or(false)
    }

    pub fn count(&self, event: &str) -> usize {
        self.entries.get(event).map(|e| e.len()).unwrap_or(0)
    }

    pub fn get(&self, event: &str) -> Vec<Handler> {
        self.ordered(event).into_iter().map(|e| e.handler.clone()).collect()
    }

    pub fn get_with_metadata(&self, event: &str) -> Vec<(Handler, i32)> {
        self.ordered(event)
            .into_iter()
            .map(|e| (e.handler.clone(), e.priority))
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn clear(&mut self, event: Option<&str>) {
        match event {
            Some(event) => {
                self.entries.remove(event);
            }
            None => self.entries.clear(),
        }
    }

    fn ordered(&self, event: &str) -> Vec<&ListenerEntry> {
        let mut entries: Vec<&ListenerEntry> = match self.entries.get(event) {
            Some(entries) => entries.iter().collect(),
            None => return Vec::new(),
        };
        entries.sort_by_key(|e| (Reverse(e.priority), e.order));
        entries
    }
}
