//! `EventBus` (A3): a typed, id-only outbound event channel fanned out to
//! subscribers, using `std::sync::mpsc::Sender` clones as the broadcast
//! mechanism since every subscriber here lives in-process.

use loci_types::{ItemId, ModelId, MovingState, RecordingState, SampleId};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Every event the engine can emit. Carries only ids -- never a live
/// `Arc<Item>`/`Arc<Sample>` -- so a subscriber must always go back through
/// the store to look up current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LocomotionSampleUpdated { sample_id: SampleId },
    RecordingStateChanged { state: RecordingState },
    MovingStateChanged { state: MovingState },
    WillStartRecording,
    WillStopRecording,
    WillStartSleep,
    WillStopSleep,
    NewTimelineItem { item_id: ItemId },
    UpdatedTimelineItem { item_id: ItemId },
    FinalisedTimelineItem { item_id: ItemId },
    MergedTimelineItems { keeper_id: ItemId, consumed_ids: Vec<ItemId> },
    ModelUpdated { model_id: ModelId },
}

/// Fan-out broadcaster: every `subscribe()` call hands back a fresh receiver;
/// `emit` clones the event to each live sender, dropping any whose receiver
/// has gone away.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(Event::RecordingStateChanged {
            state: RecordingState::Recording,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::RecordingStateChanged {
                state: RecordingState::Recording
            }
        );
    }

    #[test]
    fn dropped_receivers_are_pruned_on_next_emit() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit(Event::WillStartRecording);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
