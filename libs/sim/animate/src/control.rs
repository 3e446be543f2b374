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
use crate::{easing::Easing, value::AnimatedValue};
use fxhash::FxHashMap;
use log::warn;
use smallvec::SmallVec;

/// Controls are short vectors: a light direction is two or three components,
/// an exposure is one.
pub type ControlValue = SmallVec<[f64; 4]>;

/// The named, animated uniform values owned by a layer. The shader reads the
/// current keyframes each frame after `interpolate_all` has advanced them.
#[derive(Debug, Default)]
pub struct ControlSet {
    controls: FxHashMap<String, AnimatedValue<ControlValue>>,
    order: Vec<String>,
}

impl ControlSet {
    pub fn add<S: Into<String>>(&mut self, name: S, value: ControlValue) {
        let name = name.into();
        if self.controls.contains_key(&name) {
            warn!("control {} redeclared; keeping existing animation", name);
            return;
        }
        self.order.push(name.clone());
        self.controls.insert(name, AnimatedValue::new(value));
    }

    /// Retarget `name`. Returns false when no such control exists.
    pub fn set(
        &mut self,
        name: &str,
        value: ControlValue,
        duration_ms: f64,
        easing: Easing,
        now: f64,
    ) -> bool {
        match self.controls.get_mut(name) {
            Some(control) => {
                control.set(value, duration_ms, easing, now);
                true
            }
            None => {
                warn!("set on unknown control {}", name);
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AnimatedValue<ControlValue>> {
        self.controls.get(name)
    }

    /// Advance every control to `now`; true when no animation remains active.
    pub fn interpolate_all(&mut self, now: f64) -> bool {
        let mut all_done = true;
        for control in self.controls.values_mut() {
            all_done &= control.advance(now);
        }
        all_done
    }

    /// Names in declaration order, current values. Declaration order keeps
    /// saved states and uniform pushes deterministic.
    pub fn iter_current(&self) -> impl Iterator<Item = (&str, &ControlValue)> {
        self.order.iter().filter_map(|name| {
            self.controls
                .get(name)
                .map(|control| (name.as_str(), &control.current().value))
        })
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_set_and_finish() {
        let mut controls = ControlSet::default();
        controls.add("light", smallvec![0., 0.]);
        assert!(controls.set("light", smallvec![0.5, 0.5], 200., Easing::EaseOut, 0.));
        assert!(!controls.interpolate_all(100.));
        assert!(controls.interpolate_all(250.));
        assert_eq!(
            controls.get("light").unwrap().current().value.as_slice(),
            &[0.5, 0.5]
        );
    }

    #[test]
    fn test_unknown_control() {
        let mut controls = ControlSet::default();
        assert!(!controls.set("nope", smallvec![1.], 0., Easing::Linear, 0.));
    }

    #[test]
    fn test_iteration_order_is_declaration_order() {
        let mut controls = ControlSet::default();
        controls.add("b", smallvec![1.]);
        controls.add("a", smallvec![2.]);
        let names = controls.iter_current().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(names, vec!["b", "a"]);
    }
}
