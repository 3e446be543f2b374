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
use geometry::BoundingBox;
use nalgebra::Point2;

/// Render target rectangle in device pixels, `glViewport` style: (x, y) is
/// the lower-left corner.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub dx: u32,
    pub dy: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, dx: u32, dy: u32) -> Self {
        Self { x, y, dx, dy }
    }

    pub fn with_extent(dx: u32, dy: u32) -> Self {
        Self { x: 0, y: 0, dx, dy }
    }

    pub fn width(&self) -> f64 {
        self.dx as f64
    }

    pub fn height(&self) -> f64 {
        self.dy as f64
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            self.x as f64 + self.width() / 2.,
            self.y as f64 + self.height() / 2.,
        )
    }

    /// Viewport rectangle recentered on its own midpoint, the space camera
    /// translations live in.
    pub fn centered_box(&self) -> BoundingBox {
        BoundingBox::new(
            -self.width() / 2.,
            -self.height() / 2.,
            self.width() / 2.,
            self.height() / 2.,
        )
    }

    pub fn is_degenerate(&self) -> bool {
        self.dx == 0 || self.dy == 0
    }
}
