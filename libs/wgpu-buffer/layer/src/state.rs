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

/// A bookmarkable snapshot of a layer's animated state: control values and
/// the active shader mode. Round-trips through annotation-linked bookmarks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerState {
    pub controls: Vec<(String, Vec<f64>)>,
    pub mode: Option<String>,
}

impl LayerState {
    pub fn control(&self, name: &str) -> Option<&[f64]> {
        self.controls
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}
