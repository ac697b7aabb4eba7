//! Ephemeral awareness of other participants: identity and selection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::replica::ClientId;
use crate::model::position::Selection;

/// Display identity broadcast with presence updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub name: String,
    /// Any CSS color string.
    pub color: String,
}

impl LocalIdentity {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new("Anonymous", "#958df1")
    }
}

/// Last known state of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub client: ClientId,
    pub name: String,
    pub color: String,
    pub selection: Option<Selection>,
}

impl PresenceRecord {
    pub fn new(client: ClientId, identity: &LocalIdentity, selection: Option<Selection>) -> Self {
        Self {
            client,
            name: identity.name.clone(),
            color: identity.color.clone(),
            selection,
        }
    }
}

/// What the host draws for a remote participant. Never editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretDecoration {
    pub client: ClientId,
    pub label: String,
    pub color: String,
    pub selection: Option<Selection>,
}

/// Caret labelled with the participant's name in their color.
pub fn default_caret(record: &PresenceRecord) -> CaretDecoration {
    CaretDecoration {
        client: record.client,
        label: record.name.clone(),
        color: record.color.clone(),
        selection: record.selection.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTable {
    records: BTreeMap<ClientId, PresenceRecord>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether anything changed.
    pub fn upsert(&mut self, record: PresenceRecord) -> bool {
        match self.records.get(&record.client) {
            Some(existing) if *existing == record => false,
            _ => {
                self.records.insert(record.client, record);
                true
            }
        }
    }

    pub fn remove(&mut self, client: ClientId) -> Option<PresenceRecord> {
        self.records.remove(&client)
    }

    pub fn get(&self, client: ClientId) -> Option<&PresenceRecord> {
        self.records.get(&client)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceRecord> + '_ {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::position::Position;

    #[test]
    fn test_upsert_reports_changes() {
        let mut table = PresenceTable::new();
        let identity = LocalIdentity::new("Ada", "#ff0000");
        let record = PresenceRecord::new(7, &identity, None);
        assert!(table.upsert(record.clone()));
        assert!(!table.upsert(record.clone()));

        let moved = PresenceRecord::new(
            7,
            &identity,
            Some(Selection::caret(Position::new(vec![0], 2))),
        );
        assert!(table.upsert(moved));
        assert_eq!(table.len(), 1);
        assert!(table.remove(7).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_default_caret_uses_identity() {
        let record = PresenceRecord::new(3, &LocalIdentity::new("Bo", "teal"), None);
        let caret = default_caret(&record);
        assert_eq!(caret.label, "Bo");
        assert_eq!(caret.color, "teal");
        assert_eq!(caret.client, 3);
    }
}
