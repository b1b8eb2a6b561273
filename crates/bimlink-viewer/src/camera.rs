//! Bounding volumes and camera framing

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in model space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].min(other.min[axis]);
            max[axis] = max[axis].max(other.max[axis]);
        }
        BoundingBox { min, max }
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Radius of the bounding sphere
    pub fn radius(&self) -> f32 {
        let [x, y, z] = self.size();
        (x * x + y * y + z * z).sqrt() * 0.5
    }

    /// Union of all boxes, `None` for an empty input
    pub fn merge<I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = BoundingBox>,
    {
        boxes.into_iter().reduce(|acc, b| acc.union(&b))
    }
}

/// Where the camera should look and from how far away
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraFocus {
    pub target: [f32; 3],
    pub distance: f32,
}

/// Closest the camera is allowed to get when framing a tiny element
pub const MIN_FOCUS_DISTANCE: f32 = 1.0;

impl CameraFocus {
    /// Frame a bounding box for a perspective camera with the given vertical fov
    /// (radians). `padding` scales the distance (1.0 = sphere touches the frustum).
    pub fn frame(bounds: &BoundingBox, fov: f32, padding: f32) -> Self {
        let half_fov = (fov * 0.5).clamp(0.05, 1.5);
        let distance = (bounds.radius() / half_fov.sin()) * padding.max(1.0);
        Self {
            target: bounds.center(),
            distance: distance.max(MIN_FOCUS_DISTANCE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_boxes() {
        let a = BoundingBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = BoundingBox::new([-1.0, 2.0, 0.5], [0.5, 3.0, 4.0]);
        let merged = BoundingBox::merge([a, b]).unwrap();
        assert_eq!(merged.min, [-1.0, 0.0, 0.0]);
        assert_eq!(merged.max, [1.0, 3.0, 4.0]);
        assert!(BoundingBox::merge(Vec::new()).is_none());
    }

    #[test]
    fn test_frame_centers_on_box() {
        let bounds = BoundingBox::new([0.0, 0.0, 0.0], [10.0, 4.0, 2.0]);
        let focus = CameraFocus::frame(&bounds, std::f32::consts::FRAC_PI_4, 1.2);
        assert_eq!(focus.target, [5.0, 2.0, 1.0]);
        assert!(focus.distance > bounds.radius());
    }

    #[test]
    fn test_frame_minimum_distance() {
        let point = BoundingBox::new([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]);
        let focus = CameraFocus::frame(&point, 1.0, 1.0);
        assert_eq!(focus.distance, MIN_FOCUS_DISTANCE);
    }
}
