//! Client replica — a disposable local copy of one room's notes.
//!
//! DESIGN
//! ======
//! The replica is plain synchronous state. It never talks to the network;
//! a session feeds it events and drains the outbound moves it produces.
//!
//! Every inbound event is applied with the same rules whether it came from a
//! peer or echoed back from this client's own request, so duplicates are
//! harmless:
//! - `Created` inserts or overwrites with the canonical note.
//! - `Updated` merges the supplied fields; an unknown id is materialized from
//!   a placeholder plus those fields.
//! - `Deleted` removes the note if present.
//! - `Dragging` moves a known note and is ignored for unknown ids.
//!
//! Peer-driven updates and drags set a short-lived "peer changed" mark per
//! note. A newer event on the same note pushes its deadline out rather than
//! stacking a second one.
//!
//! Nothing here rolls back. A failed durable request leaves the optimistic
//! local state in place until the next authoritative event or resync.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::event::ReplicationEvent;
use crate::frame::Frame;
use crate::model::{Note, NotePatch};

/// How long a note stays marked after a peer changed it.
pub const PEER_MARK_TTL: Duration = Duration::from_secs(1);

/// What an inbound event did to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Merged,
    Removed,
    Moved,
    Ignored,
}

/// One live position produced by a local drag, ready to go out as
/// `note_drag`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragMove {
    pub room_id: Uuid,
    pub note_id: Uuid,
    pub x: f64,
    pub y: f64,
}

impl DragMove {
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        ReplicationEvent::Dragging { room_id: self.room_id, note_id: self.note_id, x: self.x, y: self.y }.to_frame()
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveDrag {
    origin_x: f64,
    origin_y: f64,
}

#[derive(Debug, Default)]
pub struct Replica {
    room_id: Option<Uuid>,
    notes: HashMap<Uuid, Note>,
    marks: HashMap<Uuid, Instant>,
    drags: HashMap<Uuid, ActiveDrag>,
    stack: HashMap<Uuid, u64>,
    next_stack: u64,
}

impl Replica {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn room_id(&self) -> Option<Uuid> {
        self.room_id
    }

    #[must_use]
    pub fn note(&self, note_id: Uuid) -> Option<&Note> {
        self.notes.get(&note_id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes bottom-to-top in drawing order.
    #[must_use]
    pub fn stacked(&self) -> Vec<&Note> {
        let mut notes = self.notes.values().collect::<Vec<_>>();
        notes.sort_by_key(|note| self.stack.get(&note.id).copied().unwrap_or(0));
        notes
    }

    // =========================================================================
    // RESYNC
    // =========================================================================

    /// Throw away everything and adopt an authoritative snapshot.
    pub fn resync(&mut self, room_id: Uuid, notes: Vec<Note>) {
        self.clear();
        self.room_id = Some(room_id);
        for note in notes {
            self.raise(note.id);
            self.notes.insert(note.id, note);
        }
    }

    /// Forget the room entirely.
    pub fn clear(&mut self) {
        self.room_id = None;
        self.notes.clear();
        self.marks.clear();
        self.drags.clear();
        self.stack.clear();
        self.next_stack = 0;
    }

    // =========================================================================
    // INBOUND EVENTS
    // =========================================================================

    pub fn apply(&mut self, event: &ReplicationEvent) -> Applied {
        self.apply_at(event, Instant::now())
    }

    /// Reconcile one event as of `now`. Events for another room are ignored.
    pub fn apply_at(&mut self, event: &ReplicationEvent, now: Instant) -> Applied {
        if self.room_id != Some(event.room_id()) {
            return Applied::Ignored;
        }

        match event {
            ReplicationEvent::Created { note, .. } => {
                if self.notes.insert(note.id, note.clone()).is_some() {
                    Applied::Replaced
                } else {
                    self.raise(note.id);
                    Applied::Inserted
                }
            }
            ReplicationEvent::Updated { room_id, note_id, fields } => {
                if let Some(note) = self.notes.get_mut(note_id) {
                    note.apply(fields);
                    self.mark(*note_id, now);
                    Applied::Merged
                } else {
                    let mut note = Note::placeholder(*note_id, *room_id);
                    note.apply(fields);
                    self.notes.insert(*note_id, note);
                    self.raise(*note_id);
                    Applied::Inserted
                }
            }
            ReplicationEvent::Deleted { note_id, .. } => {
                if self.forget(*note_id).is_some() {
                    Applied::Removed
                } else {
                    Applied::Ignored
                }
            }
            ReplicationEvent::Dragging { note_id, x, y, .. } => {
                let Some(note) = self.notes.get_mut(note_id) else {
                    return Applied::Ignored;
                };
                note.x = *x;
                note.y = *y;
                self.mark(*note_id, now);
                Applied::Moved
            }
        }
    }

    // =========================================================================
    // LOCAL MUTATIONS
    // =========================================================================

    /// Fold in an authoritative note returned for one of our own requests.
    /// Returns false if the note belongs to another room.
    pub fn upsert_canonical(&mut self, note: Note) -> bool {
        if self.room_id != Some(note.room_id) {
            return false;
        }
        let id = note.id;
        if self.notes.insert(id, note).is_none() {
            self.raise(id);
        }
        true
    }

    /// Optimistic merge before the request goes out.
    pub fn update_local(&mut self, note_id: Uuid, patch: &NotePatch) -> Option<&Note> {
        let note = self.notes.get_mut(&note_id)?;
        note.apply(patch);
        Some(&*note)
    }

    /// Optimistic removal before the request goes out.
    pub fn remove_local(&mut self, note_id: Uuid) -> Option<Note> {
        self.forget(note_id)
    }

    // =========================================================================
    // DRAG
    // =========================================================================

    /// Start dragging a note. Raises it to the top of the stack.
    pub fn begin_drag(&mut self, note_id: Uuid) -> bool {
        let Some(note) = self.notes.get(&note_id) else {
            return false;
        };
        let origin = ActiveDrag { origin_x: note.x, origin_y: note.y };
        self.drags.entry(note_id).or_insert(origin);
        self.raise(note_id);
        true
    }

    #[must_use]
    pub fn is_dragging(&self, note_id: Uuid) -> bool {
        self.drags.contains_key(&note_id)
    }

    /// Move a note being dragged. `None` if no drag is active for it.
    pub fn drag_to(&mut self, note_id: Uuid, x: f64, y: f64) -> Option<DragMove> {
        if !self.drags.contains_key(&note_id) {
            return None;
        }
        let room_id = self.room_id?;
        let note = self.notes.get_mut(&note_id)?;
        note.x = x;
        note.y = y;
        Some(DragMove { room_id, note_id, x, y })
    }

    /// Finish a drag. Returns the position patch to persist.
    pub fn commit_drag(&mut self, note_id: Uuid) -> Option<NotePatch> {
        self.drags.remove(&note_id)?;
        let note = self.notes.get(&note_id)?;
        Some(NotePatch::position(note.x, note.y))
    }

    /// Abandon a drag and put the note back where it started.
    pub fn cancel_drag(&mut self, note_id: Uuid) -> bool {
        let Some(drag) = self.drags.remove(&note_id) else {
            return false;
        };
        if let Some(note) = self.notes.get_mut(&note_id) {
            note.x = drag.origin_x;
            note.y = drag.origin_y;
        }
        true
    }

    // =========================================================================
    // PEER MARKS
    // =========================================================================

    #[must_use]
    pub fn is_peer_changed(&self, note_id: Uuid, now: Instant) -> bool {
        self.marks.get(&note_id).is_some_and(|deadline| *deadline > now)
    }

    /// Earliest pending mark deadline, for a driver to sleep until.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.marks.values().min().copied()
    }

    /// Clear every mark due at or before `now`. Returns the cleared ids.
    pub fn expire_marks(&mut self, now: Instant) -> Vec<Uuid> {
        let due = self
            .marks
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in &due {
            self.marks.remove(id);
        }
        due
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn mark(&mut self, note_id: Uuid, now: Instant) {
        self.marks.insert(note_id, now + PEER_MARK_TTL);
    }

    fn raise(&mut self, note_id: Uuid) {
        self.next_stack += 1;
        self.stack.insert(note_id, self.next_stack);
    }

    fn forget(&mut self, note_id: Uuid) -> Option<Note> {
        self.marks.remove(&note_id);
        self.drags.remove(&note_id);
        self.stack.remove(&note_id);
        self.notes.remove(&note_id)
    }
}

#[cfg(test)]
#[path = "replica_test.rs"]
mod tests;
