//! User payloads and engine timers.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::task::Waker;

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::{clone_trait_object, DynClone};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::actor::ActorId;
use crate::profile::ProfileCursor;
use crate::resource::{ResourceChange, ResourceId};

/// Trait that should be implemented by data attached to activities.
///
/// It is implemented automatically for every `Clone + Serialize` type, so a payload is simply a plain struct:
///
/// ```rust
/// use serde::Serialize;
///
/// #[derive(Clone, Serialize)]
/// struct Task {
///     id: u64,
///     flops: f64,
/// }
/// ```
pub trait EventData: Downcast + DynClone + erased_serde::Serialize {}

impl_downcast!(EventData);

clone_trait_object!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + Clone + 'static> EventData for T {}

/// Returns the type name of a payload for logging.
pub(crate) fn payload_type_name(data: &dyn EventData) -> &'static str {
    serde_type_name::type_name(&data).unwrap_or("?")
}

pub(crate) type TimerId = u64;

pub(crate) enum TimerAction {
    /// Wakes a bounded wait. The flag tells the waiting future that its deadline has passed.
    Wake { fired: Rc<Cell<bool>>, waker: Waker },
    /// One-shot change of a resource.
    Resource { resource: ResourceId, change: ResourceChange },
    /// Next point of a resource profile.
    Profile(ProfileCursor),
    /// Kills the actor.
    KillActor(ActorId),
}

pub(crate) struct Timer {
    pub id: TimerId,
    pub time: f64,
    pub action: TimerAction,
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timer {}

/// Pending timers ordered by time, then by creation order.
///
/// Background timers (points of periodic profiles) are fired like the others but do not keep the simulation alive
/// on their own.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Timer>,
    canceled: FxHashSet<TimerId>,
    foreground: FxHashSet<TimerId>,
    next_id: TimerId,
}

impl TimerQueue {
    pub fn push(&mut self, time: f64, action: TimerAction) -> TimerId {
        let id = self.push_background(time, action);
        self.foreground.insert(id);
        id
    }

    pub fn push_background(&mut self, time: f64, action: TimerAction) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Timer { id, time, action });
        id
    }

    /// Cancels a pending timer. Must not be called for timers that were already popped.
    pub fn cancel(&mut self, id: TimerId) {
        self.foreground.remove(&id);
        self.canceled.insert(id);
    }

    fn skip_canceled(&mut self) {
        while let Some(timer) = self.heap.peek() {
            if self.canceled.remove(&timer.id) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }

    /// Returns the time of the earliest pending timer.
    pub fn next_time(&mut self) -> Option<f64> {
        self.skip_canceled();
        self.heap.peek().map(|timer| timer.time)
    }

    /// Removes and returns the earliest timer if it is due at `time`.
    pub fn pop_due(&mut self, time: f64) -> Option<Timer> {
        self.skip_canceled();
        if self.heap.peek()?.time <= time {
            let timer = self.heap.pop()?;
            self.foreground.remove(&timer.id);
            Some(timer)
        } else {
            None
        }
    }

    /// Returns whether a pending timer other than a background one remains.
    pub fn has_foreground(&self) -> bool {
        !self.foreground.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kill(pid: u32) -> TimerAction {
        TimerAction::KillActor(ActorId(pid))
    }

    fn popped_pid(timer: Option<Timer>) -> Option<u32> {
        match timer.map(|t| t.action) {
            Some(TimerAction::KillActor(pid)) => Some(pid.0),
            _ => None,
        }
    }

    #[test]
    fn timers_pop_in_time_then_insertion_order() {
        let mut queue = TimerQueue::default();
        queue.push(2., kill(1));
        queue.push(1., kill(2));
        queue.push(2., kill(3));
        assert_eq!(queue.next_time(), Some(1.));
        assert_eq!(popped_pid(queue.pop_due(2.)), Some(2));
        assert_eq!(popped_pid(queue.pop_due(2.)), Some(1));
        assert_eq!(popped_pid(queue.pop_due(2.)), Some(3));
        assert!(queue.pop_due(2.).is_none());
    }

    #[test]
    fn canceled_timers_are_skipped() {
        let mut queue = TimerQueue::default();
        let first = queue.push(1., kill(1));
        queue.push(3., kill(2));
        queue.cancel(first);
        assert!(queue.has_foreground());
        assert_eq!(queue.next_time(), Some(3.));
        assert!(queue.pop_due(2.).is_none());
        assert_eq!(popped_pid(queue.pop_due(3.)), Some(2));
        assert!(!queue.has_foreground());
    }

    #[test]
    fn background_timers_fire_without_keeping_the_queue_busy() {
        let mut queue = TimerQueue::default();
        queue.push_background(1., kill(1));
        assert!(!queue.has_foreground());
        let second = queue.push(2., kill(2));
        assert!(queue.has_foreground());
        queue.cancel(second);
        assert!(!queue.has_foreground());
        assert_eq!(queue.next_time(), Some(1.));
        assert_eq!(popped_pid(queue.pop_due(1.)), Some(1));
        assert!(queue.pop_due(3.).is_none());
    }

    #[test]
    fn payloads_downcast_and_clone() {
        #[derive(Clone, Serialize, PartialEq, Debug)]
        struct Message {
            value: u32,
        }
        let data: Box<dyn EventData> = Box::new(Message { value: 7 });
        let copy = dyn_clone::clone_box(&*data);
        assert_eq!(payload_type_name(&*copy), "Message");
        assert_eq!(copy.downcast::<Message>().ok().map(|m| *m), Some(Message { value: 7 }));
    }
}
