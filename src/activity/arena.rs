use std::rc::Weak;

use super::{ActivityId, ActivityKind, ActivityRecord};

struct Slot {
    generation: u32,
    record: Option<ActivityRecord>,
}

/// Storage of activity records addressed by generation-checked ids.
///
/// Slots of reclaimed records are reused with a new generation, so a stale id never resolves to another activity.
#[derive(Default)]
pub(crate) struct ActivityArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_seq: u64,
}

impl ActivityArena {
    pub fn insert(&mut self, name: String, kind: ActivityKind, handles: Weak<()>) -> ActivityId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = ActivityId {
            index,
            generation: slot.generation,
        };
        slot.record = Some(ActivityRecord::new(id, self.next_seq, name, kind, handles));
        self.next_seq += 1;
        id
    }

    pub fn get(&self, id: ActivityId) -> Option<&ActivityRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation == id.generation {
            slot.record.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: ActivityId) -> Option<&mut ActivityRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation == id.generation {
            slot.record.as_mut()
        } else {
            None
        }
    }

    pub fn remove(&mut self, id: ActivityId) -> Option<ActivityRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::SleepSpec;
    use crate::resource::{HostId, ResourceId};

    fn sleep() -> ActivityKind {
        ActivityKind::Sleep(SleepSpec {
            host: HostId(ResourceId(0)),
            duration: 1.,
        })
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let mut arena = ActivityArena::default();
        let first = arena.insert("a".to_string(), sleep(), Weak::new());
        assert!(arena.remove(first).is_some());
        assert!(arena.remove(first).is_none());

        let second = arena.insert("b".to_string(), sleep(), Weak::new());
        assert_eq!(second.index, first.index);
        assert_ne!(second, first);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).map(|r| r.name.as_str()), Some("b"));
        assert_eq!(arena.free.len(), 0);
    }

    #[test]
    fn sequence_numbers_follow_creation_order() {
        let mut arena = ActivityArena::default();
        let a = arena.insert("a".to_string(), sleep(), Weak::new());
        arena.remove(a);
        let b = arena.insert("b".to_string(), sleep(), Weak::new());
        let c = arena.insert("c".to_string(), sleep(), Weak::new());
        assert!(arena.get(b).unwrap().seq < arena.get(c).unwrap().seq);
        assert_eq!(arena.get(b).unwrap().seq, 1);
    }
}
