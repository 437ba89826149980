use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the presentation consumer has gone away")]
    Closed,
}

/// One attention signal on its way to the presentation thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttentionUpdate {
    /// Post order, starting at 1.
    pub sequence: u64,
    pub attentive: bool,
    pub captured_at: Instant,
    /// Later posts folded into this one on overflow.
    pub merged: u32,
}

impl AttentionUpdate {
    /// Folds `newer` into `self`, keeping `self`'s signal.
    fn absorb(&mut self, newer: &AttentionUpdate) {
        self.sequence = newer.sequence;
        self.captured_at = newer.captured_at;
        self.merged += newer.merged + 1;
    }
}

/// Everything the consumer picked up in one drain.
#[derive(Default)]
pub struct Delivery {
    /// Updates in post order.
    pub updates: Vec<AttentionUpdate>,
    /// Most recent frame posted since the previous drain.
    pub frame: Option<Frame>,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.frame.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Work may be pending; call [`DispatchReceiver::drain`].
    Ready,
    TimedOut,
    /// The dispatcher is gone and nothing is left to drain.
    Closed,
}

struct Mailbox {
    updates: VecDeque<AttentionUpdate>,
    latest_frame: Option<Frame>,
    capacity: usize,
    overflow_events: u64,
    dropped_transitions: u64,
    receiver_alive: bool,
    next_sequence: u64,
}

/// Creates the capture → presentation hand-off.
///
/// Frames travel in a single slot where the newest frame replaces any
/// unread one. Signals travel in a FIFO of `capacity` entries; see
/// [`Dispatcher::post`] for what happens when it is full.
pub fn channel(capacity: usize) -> (Dispatcher, DispatchReceiver) {
    let shared = Arc::new(Mutex::new(Mailbox {
        updates: VecDeque::with_capacity(capacity.max(1)),
        latest_frame: None,
        capacity: capacity.max(1),
        overflow_events: 0,
        dropped_transitions: 0,
        receiver_alive: true,
        next_sequence: 1,
    }));
    let (doorbell_tx, doorbell_rx) = crossbeam_channel::bounded(1);
    (
        Dispatcher {
            shared: Arc::clone(&shared),
            doorbell: doorbell_tx,
        },
        DispatchReceiver {
            shared,
            doorbell: doorbell_rx,
        },
    )
}

/// Producer half, owned by the capture thread.
pub struct Dispatcher {
    shared: Arc<Mutex<Mailbox>>,
    doorbell: Sender<()>,
}

/// Consumer half, owned by the presentation thread.
pub struct DispatchReceiver {
    shared: Arc<Mutex<Mailbox>>,
    doorbell: Receiver<()>,
}

impl Dispatcher {
    /// Queues `attentive` and replaces the display frame. Never blocks on the
    /// consumer.
    ///
    /// When the signal queue is full, the update is folded in rather than
    /// blocking or dropping the newest state:
    /// 1. a repeat of the newest queued signal is merged into it;
    /// 2. otherwise runs of equal adjacent entries are merged to make room;
    /// 3. otherwise the newest queued entry is dropped and it and the new
    ///    update are merged into the entry before it.
    ///
    /// Order is always preserved and the consumer still ends in the state of
    /// the last post.
    pub fn post(&self, attentive: bool, frame: Frame) -> Result<u64, DispatchError> {
        let sequence = {
            let mut mailbox = lock(&self.shared);
            if !mailbox.receiver_alive {
                return Err(DispatchError::Closed);
            }
            let sequence = mailbox.next_sequence;
            mailbox.next_sequence += 1;
            mailbox.enqueue(AttentionUpdate {
                sequence,
                attentive,
                captured_at: frame.captured_at(),
                merged: 0,
            });
            mailbox.latest_frame = Some(frame);
            sequence
        };

        match self.doorbell.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(sequence),
            Err(TrySendError::Disconnected(())) => Err(DispatchError::Closed),
        }
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared).updates.len()
    }

    pub fn overflow_events(&self) -> u64 {
        lock(&self.shared).overflow_events
    }

    /// Queued transitions discarded because the queue held nothing but
    /// transitions. Each one is a show/hide pair the consumer never saw.
    pub fn dropped_transitions(&self) -> u64 {
        lock(&self.shared).dropped_transitions
    }
}

impl DispatchReceiver {
    /// Waits up to `timeout` for the capture side to post something.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        if self.has_pending() {
            return WaitOutcome::Ready;
        }
        match self.doorbell.recv_timeout(timeout) {
            Ok(()) => WaitOutcome::Ready,
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                if self.has_pending() {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::Closed
                }
            }
        }
    }

    /// Takes every queued update and the latest frame.
    pub fn drain(&self) -> Delivery {
        let mut mailbox = lock(&self.shared);
        Delivery {
            updates: mailbox.updates.drain(..).collect(),
            frame: mailbox.latest_frame.take(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared).updates.len()
    }

    fn has_pending(&self) -> bool {
        let mailbox = lock(&self.shared);
        !mailbox.updates.is_empty() || mailbox.latest_frame.is_some()
    }
}

impl Drop for DispatchReceiver {
    fn drop(&mut self) {
        lock(&self.shared).receiver_alive = false;
    }
}

impl Mailbox {
    fn enqueue(&mut self, update: AttentionUpdate) {
        if self.updates.len() < self.capacity {
            self.updates.push_back(update);
            return;
        }

        self.overflow_events += 1;
        if self.overflow_events == 1 {
            log::warn!(
                "Attention queue full ({} entries); folding updates until the consumer catches up",
                self.capacity
            );
        } else {
            log::debug!("Attention queue overflow #{}", self.overflow_events);
        }

        if let Some(newest) = self.updates.back_mut() {
            if newest.attentive == update.attentive {
                newest.absorb(&update);
                return;
            }
        }

        if self.compact() {
            self.updates.push_back(update);
            return;
        }

        // Every entry is a transition: drop the newest one, which differs
        // from `update`, and fold both into the entry before it.
        match self.updates.pop_back() {
            Some(dropped) => {
                self.dropped_transitions += 1;
                log::warn!(
                    "Attention queue full of transitions; dropped update #{} (attentive={}) \
                     and folded #{} into its predecessor ({} dropped so far)",
                    dropped.sequence,
                    dropped.attentive,
                    update.sequence,
                    self.dropped_transitions
                );
                match self.updates.back_mut() {
                    Some(previous) => {
                        previous.absorb(&dropped);
                        previous.absorb(&update);
                    }
                    None => {
                        let mut update = update;
                        update.merged += dropped.merged + 1;
                        self.updates.push_back(update);
                    }
                }
            }
            None => self.updates.push_back(update),
        }
    }

    /// Merges runs of equal adjacent updates. Returns true if that freed room.
    fn compact(&mut self) -> bool {
        let before = self.updates.len();
        let mut compacted: VecDeque<AttentionUpdate> = VecDeque::with_capacity(self.capacity);
        for update in self.updates.drain(..) {
            match compacted.back_mut() {
                Some(last) if last.attentive == update.attentive => last.absorb(&update),
                _ => compacted.push_back(update),
            }
        }
        self.updates = compacted;
        self.updates.len() < before
    }
}

fn lock(shared: &Mutex<Mailbox>) -> MutexGuard<'_, Mailbox> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(index: usize) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, 3, index)
    }

    fn post_all(dispatcher: &Dispatcher, signals: &[bool]) {
        for (i, &s) in signals.iter().enumerate() {
            dispatcher.post(s, frame(i)).unwrap();
        }
    }

    fn signals(delivery: &Delivery) -> Vec<bool> {
        delivery.updates.iter().map(|u| u.attentive).collect()
    }

    #[test]
    fn test_sequences_start_at_one() {
        let (tx, rx) = channel(8);
        assert_eq!(tx.post(true, frame(0)).unwrap(), 1);
        assert_eq!(tx.post(false, frame(1)).unwrap(), 2);
        let delivery = rx.drain();
        let seqs: Vec<u64> = delivery.updates.iter().map(|u| u.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_no_dedup_while_there_is_room() {
        let (tx, rx) = channel(8);
        post_all(&tx, &[false, false, false]);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![false, false, false]);
        assert!(delivery.updates.iter().all(|u| u.merged == 0));
        assert_eq!(tx.overflow_events(), 0);
    }

    #[test]
    fn test_latest_frame_wins() {
        let (tx, rx) = channel(8);
        post_all(&tx, &[true, true, true]);
        assert_eq!(rx.drain().frame.unwrap().index(), 2);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_ordering_under_delay() {
        let (tx, rx) = channel(64);
        let producer = thread::spawn(move || {
            for i in 1..=20u64 {
                tx.post(i % 3 == 0, frame(i as usize)).unwrap();
                thread::sleep(Duration::from_millis(1 + i % 4));
            }
        });

        let mut seen = Vec::new();
        loop {
            match rx.wait(Duration::from_secs(5)) {
                WaitOutcome::Ready => seen.extend(rx.drain().updates),
                WaitOutcome::TimedOut => panic!("producer stalled"),
                WaitOutcome::Closed => break,
            }
        }
        producer.join().unwrap();

        let seqs: Vec<u64> = seen.iter().map(|u| u.sequence).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
        assert!(seen.iter().all(|u| u.attentive == (u.sequence % 3 == 0)));
    }

    #[test]
    fn test_overflow_folds_repeat_into_newest() {
        let (tx, rx) = channel(2);
        post_all(&tx, &[true, false, false, false]);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![true, false]);
        assert_eq!(delivery.updates[1].merged, 2);
        assert_eq!(delivery.updates[1].sequence, 4);
        assert_eq!(tx.overflow_events(), 2);
    }

    #[test]
    fn test_overflow_compacts_equal_neighbours() {
        let (tx, rx) = channel(3);
        post_all(&tx, &[true, true, false, true]);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![true, false, true]);
        assert_eq!(delivery.updates[0].merged, 1);
        assert_eq!(delivery.updates[0].sequence, 2);
        assert_eq!(delivery.updates[2].sequence, 4);
    }

    #[test]
    fn test_overflow_of_transitions_keeps_final_state() {
        let (tx, rx) = channel(3);
        post_all(&tx, &[true, false, true, false]);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![true, false]);
        assert_eq!(delivery.updates[1].sequence, 4);
        assert_eq!(delivery.updates[1].merged, 2);
    }

    #[test]
    fn test_dropped_transitions_are_counted_every_time() {
        let (tx, rx) = channel(3);
        post_all(&tx, &[true, false, true, false, true, false]);
        assert_eq!(tx.dropped_transitions(), 2);
        assert_eq!(tx.overflow_events(), 2);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![true, false]);
        assert_eq!(delivery.updates[1].sequence, 6);
        assert_eq!(delivery.updates[1].merged, 4);
    }

    #[test]
    fn test_repeat_folding_drops_no_transitions() {
        let (tx, _rx) = channel(2);
        post_all(&tx, &[true, false, false, false]);
        assert_eq!(tx.dropped_transitions(), 0);
    }

    #[test]
    fn test_single_slot_queue_keeps_newest() {
        let (tx, rx) = channel(1);
        post_all(&tx, &[true, false]);
        let delivery = rx.drain();
        assert_eq!(signals(&delivery), vec![false]);
        assert_eq!(delivery.updates[0].merged, 1);
    }

    #[test]
    fn test_long_overflow_preserves_order_and_last_signal() {
        let (tx, rx) = channel(4);
        let input: Vec<bool> = (0..50).map(|i| (i * 7) % 5 < 2).collect();
        post_all(&tx, &input);
        let delivery = rx.drain();

        assert!(delivery.updates.len() <= 4);
        assert!(delivery.updates.windows(2).all(|w| w[0].sequence < w[1].sequence));
        let last = delivery.updates.last().unwrap();
        assert_eq!(last.sequence, 50);
        assert_eq!(last.attentive, *input.last().unwrap());
        let total: u32 = delivery.updates.iter().map(|u| u.merged + 1).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_post_fails_once_receiver_dropped() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert_eq!(tx.post(true, frame(0)), Err(DispatchError::Closed));
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let (_tx, rx) = channel(4);
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_pending_work_is_drained_before_closed() {
        let (tx, rx) = channel(4);
        post_all(&tx, &[false]);
        drop(tx);
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitOutcome::Ready);
        assert_eq!(signals(&rx.drain()), vec![false]);
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitOutcome::Closed);
    }
}
