//! Per-entity storage record

use tempora_concurrency::PendingWrite;
use tempora_core::{EntityId, FactId, FactRow, LifecycleMarker, Span, StoreError, TypeName};

/// Everything the store holds about one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Entity id
    pub entity: EntityId,
    /// Registered type
    pub type_name: TypeName,
    /// Existence interval, once established
    pub existence: Option<Span>,
    /// Every fact version ever written, in insertion order
    pub facts: Vec<FactRow>,
    /// Lifecycle markers in insertion order
    pub markers: Vec<LifecycleMarker>,
    /// Bumped once per commit touching the entity; 0 means "absent"
    pub version: u64,
}

impl EntityRecord {
    /// Fresh record with no facts
    pub fn new(entity: EntityId, type_name: TypeName) -> Self {
        Self {
            entity,
            type_name,
            existence: None,
            facts: Vec::new(),
            markers: Vec::new(),
            version: 0,
        }
    }

    /// Row with the given id
    pub fn fact(&self, id: FactId) -> Option<&FactRow> {
        self.facts.iter().find(|r| r.id == id)
    }

    /// Apply one buffered write to an optional record
    ///
    /// `CreateEntity` turns `None` into a record; every other write requires
    /// one.
    pub fn apply_to(record: &mut Option<EntityRecord>, write: &PendingWrite) -> Result<(), StoreError> {
        if let PendingWrite::CreateEntity { entity, type_name } = write {
            if record.is_some() {
                return Err(StoreError::EntityExists(*entity));
            }
            *record = Some(EntityRecord::new(*entity, type_name.clone()));
            return Ok(());
        }
        match record {
            Some(r) => r.apply(write),
            None => Err(StoreError::MissingEntity(write.entity())),
        }
    }

    fn apply(&mut self, write: &PendingWrite) -> Result<(), StoreError> {
        match write {
            PendingWrite::CreateEntity { entity, .. } => Err(StoreError::EntityExists(*entity)),
            PendingWrite::CloseVersion {
                entity,
                fact_id,
                database_to,
            } => {
                let row = self
                    .facts
                    .iter_mut()
                    .find(|r| r.id == *fact_id && r.is_active())
                    .ok_or(StoreError::UnknownFact {
                        entity: *entity,
                        fact: *fact_id,
                    })?;
                row.fact.database = row
                    .fact
                    .database
                    .close_at(*database_to)
                    .map_err(|e| StoreError::Internal(format!("closing {}: {}", fact_id, e)))?;
                Ok(())
            }
            PendingWrite::InsertFact { row, .. } => {
                self.facts.push(row.clone());
                Ok(())
            }
            PendingWrite::SetExistence { directive, .. } => {
                self.existence = Some(directive.apply(self.existence.as_ref()));
                Ok(())
            }
            PendingWrite::Lifecycle { marker, .. } => {
                self.markers.push(*marker);
                Ok(())
            }
        }
    }
}
