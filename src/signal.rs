//! Threadsafe multi subscriber signals.
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalState<T> {
    slots: HashMap<usize, Slot<T>>,
    next_id: usize,
}

/// An observer channel: any number of subscribers, each holding a
/// [`Connection`] it can disconnect with.
///
/// Emission snapshots the subscriber list first, so no subscriber ever runs
/// with the list lock held. Cloning shares the subscriber list.
pub struct Signal<T> {
    state: Arc<Mutex<SignalState<T>>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SignalState {
                slots: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Connects `slot` to the signal. Dropping the returned connection does
    /// not disconnect; call [`Connection::disconnect`] for that.
    pub fn connect<F>(&self, slot: F) -> Connection<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(id, Arc::new(slot));

        Connection {
            owner: Arc::downgrade(&self.state),
            id,
        }
    }

    /// Calls every connected slot with `value`.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self.state.lock().slots.values().cloned().collect();
        for slot in slots {
            slot(value);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// One subscription to a [`Signal`].
///
/// Holds only a weak reference to the signal, so neither side keeps the
/// other alive; disconnecting after the signal has been dropped is a silent
/// no-op.
pub struct Connection<T> {
    owner: Weak<Mutex<SignalState<T>>>,
    id: usize,
}

impl<T> Connection<T> {
    /// Removes the slot from the signal.
    pub fn disconnect(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.lock().slots.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_all_subscribers() {
        let signal = Signal::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let _c1 = signal.connect({
            let first = Arc::clone(&first);
            move |v: &usize| {
                first.fetch_add(*v, Ordering::SeqCst);
            }
        });
        let _c2 = signal.connect({
            let second = Arc::clone(&second);
            move |v: &usize| {
                second.fetch_add(*v * 2, Ordering::SeqCst);
            }
        });

        signal.emit(&21);
        assert_eq!(first.load(Ordering::SeqCst), 21);
        assert_eq!(second.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));

        let connection = signal.connect({
            let count = Arc::clone(&count);
            move |_: &()| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        signal.emit(&());
        connection.disconnect();
        signal.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_after_signal_drop_is_noop() {
        let signal = Signal::new();
        let connection = signal.connect(|_: &()| {});
        drop(signal);
        connection.disconnect();
    }

    #[test]
    fn clone_shares_subscribers() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _c = signal.connect({
            let count = Arc::clone(&count);
            move |_: &()| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        signal.clone().emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emits_across_threads() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _c = signal.connect({
            let count = Arc::clone(&count);
            move |v: &usize| {
                count.fetch_add(*v, Ordering::SeqCst);
            }
        });

        let cloned = signal.clone();
        let handle = std::thread::spawn(move || cloned.emit(&5));
        handle.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
