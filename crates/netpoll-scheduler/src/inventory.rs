//! Netbox inventory table and the refresh diff.
//!
//! Each inventory refresh delivers the full active population. The table is
//! diffed against it:
//!
//! - netboxes of unknown types are skipped;
//! - new ids are created and returned for enqueueing;
//! - known ids of the same type get the new descriptive snapshot and keep
//!   their schedule;
//! - known ids whose type changed are marked removed and replaced by a fresh
//!   netbox;
//! - ids missing from the refresh are marked removed.
//!
//! Removed netboxes stay in the run queue until they reach its head.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use netpoll_core::{Netbox, NetboxRecord, TypeRegistry};
use serde::{Deserialize, Serialize};

/// Counts and new netboxes from one refresh.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Netboxes that must be put on the run queue
    pub enqueue: Vec<Arc<Netbox>>,
    pub added: usize,
    /// Same type, descriptive data changed
    pub updated: usize,
    /// Type changed, record recreated
    pub replaced: usize,
    pub removed: usize,
    /// Skipped because their type is unknown
    pub unknown_type: usize,
    /// Skipped by the sysname filter
    pub filtered: usize,
}

impl RefreshOutcome {
    pub fn summary(&self, total: usize) -> RefreshSummary {
        RefreshSummary {
            total,
            added: self.added,
            updated: self.updated,
            replaced: self.replaced,
            removed: self.removed,
            unknown_type: self.unknown_type,
            filtered: self.filtered,
        }
    }
}

/// Counts reported by an inventory refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Live netboxes after the refresh
    pub total: usize,
    pub added: usize,
    pub updated: usize,
    pub replaced: usize,
    pub removed: usize,
    pub unknown_type: usize,
    pub filtered: usize,
}

/// Live netboxes by id.
#[derive(Default)]
pub struct NetboxTable {
    netboxes: DashMap<String, Arc<Netbox>>,
}

impl NetboxTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, netbox_id: &str) -> Option<Arc<Netbox>> {
        self.netboxes.get(netbox_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.netboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.netboxes.is_empty()
    }

    /// Every live netbox, ordered by sequence number.
    pub fn snapshot(&self) -> Vec<Arc<Netbox>> {
        let mut netboxes: Vec<_> = self.netboxes.iter().map(|e| e.value().clone()).collect();
        netboxes.sort_by_key(|nb| nb.seq());
        netboxes
    }

    /// Diff the table against a fresh inventory.
    pub fn apply(
        &self,
        records: Vec<NetboxRecord>,
        types: &TypeRegistry,
        sysname_filter: Option<&str>,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        let mut seen = HashSet::with_capacity(records.len());
        let mut seq = 0u64;

        for record in records {
            if let Some(pattern) = sysname_filter {
                if !sysname_matches(pattern, &record.sysname) {
                    outcome.filtered += 1;
                    continue;
                }
            }

            let Some(device_type) = types.get(&record.type_id) else {
                tracing::warn!(
                    netbox_id = %record.netbox_id,
                    sysname = %record.sysname,
                    type_id = %record.type_id,
                    "Netbox has unknown type, skipping"
                );
                outcome.unknown_type += 1;
                continue;
            };

            if !seen.insert(record.netbox_id.clone()) {
                tracing::warn!(netbox_id = %record.netbox_id, "Duplicate netbox id in inventory, skipping");
                continue;
            }
            seq += 1;

            let existing = self.get(&record.netbox_id);
            match existing {
                Some(netbox) if netbox.type_id() == record.type_id => {
                    netbox.set_seq(seq);
                    netbox.set_device_type(device_type);
                    if netbox.replace_record(record) {
                        outcome.updated += 1;
                    }
                }
                Some(netbox) => {
                    tracing::info!(
                        netbox_id = %netbox.id(),
                        old_type = %netbox.type_id(),
                        new_type = %record.type_id,
                        "Netbox changed type, recreating"
                    );
                    netbox.remove();
                    let replacement = Arc::new(Netbox::new(record, device_type, seq));
                    self.netboxes
                        .insert(replacement.id().to_string(), replacement.clone());
                    outcome.enqueue.push(replacement);
                    outcome.replaced += 1;
                }
                None => {
                    let netbox = Arc::new(Netbox::new(record, device_type, seq));
                    tracing::debug!(netbox_id = %netbox.id(), seq, "New netbox");
                    self.netboxes.insert(netbox.id().to_string(), netbox.clone());
                    outcome.enqueue.push(netbox);
                    outcome.added += 1;
                }
            }
        }

        self.netboxes.retain(|id, netbox| {
            if seen.contains(id) {
                return true;
            }
            tracing::debug!(netbox_id = %id, "Netbox no longer active");
            netbox.remove();
            outcome.removed += 1;
            false
        });

        outcome
    }

    /// Point every netbox at the registry's current snapshot of its type.
    ///
    /// Netboxes whose type is gone keep their old snapshot. Returns the number
    /// of netboxes updated.
    pub fn apply_types(&self, types: &TypeRegistry) -> usize {
        let mut updated = 0;
        for entry in self.netboxes.iter() {
            let netbox = entry.value();
            match types.get(&netbox.type_id()) {
                Some(device_type) => {
                    netbox.set_device_type(device_type);
                    updated += 1;
                }
                None => {
                    tracing::debug!(
                        netbox_id = %netbox.id(),
                        type_id = %netbox.type_id(),
                        "Type no longer registered, keeping old snapshot"
                    );
                }
            }
        }
        updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    AnyRun,
    AnyChar,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyChar,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            c => LikeToken::Literal(c),
        });
    }
    tokens
}

/// SQL `LIKE` match: `%` matches any run of characters, `_` exactly one,
/// and a backslash escapes the next character. Case-sensitive.
pub fn sysname_matches(pattern: &str, sysname: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = sysname.chars().collect();

    let (mut ti, mut si) = (0, 0);
    // Last `%` seen and the text position it currently covers up to
    let mut backtrack: Option<(usize, usize)> = None;

    while si < text.len() {
        match tokens.get(ti) {
            Some(LikeToken::AnyRun) => {
                backtrack = Some((ti, si));
                ti += 1;
            }
            Some(LikeToken::AnyChar) => {
                ti += 1;
                si += 1;
            }
            Some(LikeToken::Literal(c)) if *c == text[si] => {
                ti += 1;
                si += 1;
            }
            _ => match backtrack {
                Some((star, covered)) => {
                    ti = star + 1;
                    si = covered + 1;
                    backtrack = Some((star, covered + 1));
                }
                None => return false,
            },
        }
    }

    tokens[ti..].iter().all(|t| *t == LikeToken::AnyRun)
}
