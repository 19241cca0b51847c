// ============================================================================
// Entity Collection
// ============================================================================
//
// The ordered, in-memory source of truth for one open document. Every
// structural mutation renumbers `order` so the multiset of order values is
// exactly 0..n-1 with array position matching sort-by-order.

use crate::core::{Direction, Entity, EntityId, Result, SyncError};
use chrono::Utc;

/// Deep copy of a collection's state, taken before every optimistic
/// structural operation and replayed verbatim on failure.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot<P> {
    entries: Vec<Entity<P>>,
}

/// An ordered sequence of entities, unique by id.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCollection<P> {
    entries: Vec<Entity<P>>,
}

impl<P: Clone> Default for EntityCollection<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone> EntityCollection<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a collection from entities fetched remotely.
    ///
    /// The server's relative order is respected, but order values are
    /// renumbered locally: local contiguity is authoritative for display.
    pub fn from_entities(mut entities: Vec<Entity<P>>) -> Self {
        entities.sort_by_key(|entity| entity.order);
        let mut collection = Self { entries: entities };
        collection.renumber();
        collection
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entities(&self) -> &[Entity<P>] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Entity<P>> {
        self.entries.get(index)
    }

    pub fn get_by_id(&self, id: &EntityId) -> Option<&Entity<P>> {
        self.position_of(id).map(|index| &self.entries[index])
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.position_of(id).is_some()
    }

    /// Array position of the entity with the given id.
    pub fn position_of(&self, id: &EntityId) -> Option<usize> {
        self.entries.iter().position(|entity| &entity.id == id)
    }

    /// Current ids in display order, the shape the reorder gateway call takes.
    pub fn ordered_ids(&self) -> Vec<EntityId> {
        self.entries.iter().map(|entity| entity.id.clone()).collect()
    }

    /// Inserts an entity and renumbers everything at or after `index`.
    ///
    /// An index past the end appends. Contiguity holds on return.
    pub fn insert_at(&mut self, index: usize, entity: Entity<P>) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, entity);
        self.renumber();
    }

    /// Removes the matching entity and renumbers subsequent entities downward.
    ///
    /// An absent id is a no-op, not an error, so rollback replay stays
    /// idempotent. Returns whether an entity was removed.
    pub fn remove_by_id(&mut self, id: &EntityId) -> bool {
        let Some(index) = self.position_of(id) else {
            return false;
        };
        self.entries.remove(index);
        self.renumber();
        true
    }

    /// Overwrites an entity's payload in place, touching `updated_at`.
    ///
    /// Returns false if the id is absent. Identity and order are untouched.
    pub fn set_payload(&mut self, id: &EntityId, payload: P) -> bool {
        let Some(index) = self.position_of(id) else {
            return false;
        };
        let entity = &mut self.entries[index];
        entity.payload = payload;
        entity.updated_at = Utc::now();
        true
    }

    /// Swaps the entity with its immediate neighbor in `direction`.
    ///
    /// A boundary move (first up, last down) and an absent id are no-ops.
    /// Returns whether the collection changed.
    pub fn move_adjacent(&mut self, id: &EntityId, direction: Direction) -> bool {
        let Some(index) = self.position_of(id) else {
            return false;
        };
        let neighbor = match direction {
            Direction::Up => {
                if index == 0 {
                    return false;
                }
                index - 1
            }
            Direction::Down => {
                if index + 1 >= self.entries.len() {
                    return false;
                }
                index + 1
            }
        };
        self.entries.swap(index, neighbor);
        self.renumber();
        true
    }

    /// Renumbers the collection to match the array position of each id in
    /// `ordered_ids`.
    ///
    /// Fails without touching the collection unless `ordered_ids` is exactly
    /// a permutation of the current ids.
    pub fn replace_order(&mut self, ordered_ids: &[EntityId]) -> Result<()> {
        if ordered_ids.len() != self.entries.len() {
            return Err(SyncError::InvalidPermutation(format!(
                "expected {} ids, got {}",
                self.entries.len(),
                ordered_ids.len()
            )));
        }

        let mut targets = Vec::with_capacity(ordered_ids.len());
        for id in ordered_ids {
            let Some(index) = self.position_of(id) else {
                return Err(SyncError::InvalidPermutation(format!(
                    "id '{}' is not part of the collection",
                    id
                )));
            };
            if targets.contains(&index) {
                return Err(SyncError::InvalidPermutation(format!(
                    "id '{}' appears more than once",
                    id
                )));
            }
            targets.push(index);
        }

        let reordered: Vec<Entity<P>> = targets
            .into_iter()
            .map(|index| self.entries[index].clone())
            .collect();
        self.entries = reordered;
        self.renumber();
        Ok(())
    }

    /// Captures the full ordered state for rollback.
    pub fn snapshot(&self) -> CollectionSnapshot<P> {
        CollectionSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Replaces the entire ordered list with a previously captured snapshot.
    pub fn restore(&mut self, snapshot: CollectionSnapshot<P>) {
        self.entries = snapshot.entries;
    }

    fn renumber(&mut self) {
        for (index, entity) in self.entries.iter_mut().enumerate() {
            entity.order = index;
        }
    }

    #[cfg(test)]
    fn assert_contiguous(&self) {
        for (index, entity) in self.entries.iter().enumerate() {
            assert_eq!(
                entity.order, index,
                "order {} at position {} breaks contiguity",
                entity.order, index
            );
        }
    }
}
