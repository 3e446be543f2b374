// This file is part of Xenon.
//
// Xenon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Xenon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Xenon.  If not, see <http://www.gnu.org/licenses/>.
use fxhash::FxHashMap;
use log::debug;

pub type Callback = Box<dyn FnMut() + Send + Sync>;

/// Subscription receipt; pass back to `off` to unsubscribe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SignalHandle {
    channel: &'static str,
    id: u64,
}

struct Slot {
    id: u64,
    callback: Callback,
}

/// In-process publisher/subscriber with named channels, embedded in each
/// emitting object. Channels are declared up front; dispatch is synchronous,
/// on the emitting thread, in registration order. Unknown channel names are
/// ignored rather than treated as faults so that optional listeners can be
/// wired without the emitter caring.
pub struct Signals {
    channels: FxHashMap<&'static str, Vec<Slot>>,
    next_id: u64,
}

impl Signals {
    pub fn new(channels: &[&'static str]) -> Self {
        let mut map = FxHashMap::default();
        for &name in channels {
            map.insert(name, Vec::new());
        }
        Self {
            channels: map,
            next_id: 0,
        }
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Subscribe to `name`. Returns None if the channel is not declared.
    pub fn on<F>(&mut self, name: &'static str, callback: F) -> Option<SignalHandle>
    where
        F: FnMut() + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        match self.channels.get_mut(name) {
            Some(slots) => {
                slots.push(Slot {
                    id,
                    callback: Box::new(callback),
                });
                Some(SignalHandle { channel: name, id })
            }
            None => {
                debug!("subscription to undeclared signal channel {}", name);
                None
            }
        }
    }

    pub fn off(&mut self, handle: SignalHandle) {
        if let Some(slots) = self.channels.get_mut(handle.channel) {
            slots.retain(|slot| slot.id != handle.id);
        }
    }

    /// Invoke every subscriber of `name`, in registration order.
    pub fn emit(&mut self, name: &str) {
        match self.channels.get_mut(name) {
            Some(slots) => {
                for slot in slots.iter_mut() {
                    (slot.callback)();
                }
            }
            None => debug!("emit on undeclared signal channel {}", name),
        }
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut counts = self
            .channels
            .iter()
            .map(|(name, slots)| (*name, slots.len()))
            .collect::<Vec<_>>();
        counts.sort_unstable();
        f.debug_struct("Signals").field("channels", &counts).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_emit_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut signals = Signals::new(&["update"]);
        for i in 0..4 {
            let order = order.clone();
            signals.on("update", move || order.lock().push(i));
        }
        signals.emit("update");
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_channel_is_ignored() {
        let mut signals = Signals::new(&["ready"]);
        assert!(signals.on("bogus", || {}).is_none());
        signals.emit("bogus");
    }

    #[test]
    fn test_unsubscribe() {
        let count = Arc::new(Mutex::new(0));
        let mut signals = Signals::new(&["update"]);
        let handle = {
            let count = count.clone();
            signals.on("update", move || *count.lock() += 1).unwrap()
        };
        signals.emit("update");
        signals.off(handle);
        signals.emit("update");
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let mut signals = Signals::new(&["ready", "update"]);
        signals.emit("ready");
        assert!(signals.has_channel("update"));
    }
}
