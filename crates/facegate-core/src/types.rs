use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
pub type Point = (f32, f32);

/// Width and height of an image or coordinate space, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Per-axis scale factors mapping this space onto `target`.
    ///
    /// An empty source axis maps with factor 1.0.
    pub fn scale_to(&self, target: Size) -> (f32, f32) {
        let sx = if self.width == 0 {
            1.0
        } else {
            target.width as f32 / self.width as f32
        };
        let sy = if self.height == 0 {
            1.0
        } else {
            target.height as f32 / self.height as f32
        };
        (sx, sy)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rescale from the `from` coordinate space into `to`.
    pub fn resize(&self, from: Size, to: Size) -> Rect {
        let (sx, sy) = from.scale_to(to);
        Rect {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another rectangle.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model that produced this descriptor (e.g., "w600k_mbf").
    pub model_version: Option<String>,
}

/// A detected face: bounding rectangle plus optional landmark and descriptor data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub bounds: Rect,
    pub confidence: f32,
    /// Five-point keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[Point; 5]>,
    /// Dense landmark set from the landmark estimator (106 points).
    pub landmarks: Option<Vec<Point>>,
    pub descriptor: Option<Descriptor>,
}

impl FaceRegion {
    pub fn new(bounds: Rect, confidence: f32) -> Self {
        Self {
            bounds,
            confidence,
            keypoints: None,
            landmarks: None,
            descriptor: None,
        }
    }

    /// Rescale the region and its point metadata from `from` into `to`.
    /// The descriptor is coordinate-free and carried over unchanged.
    pub fn resize(&self, from: Size, to: Size) -> FaceRegion {
        let (sx, sy) = from.scale_to(to);
        let scale = |(x, y): Point| (x * sx, y * sy);
        FaceRegion {
            bounds: self.bounds.resize(from, to),
            confidence: self.confidence,
            keypoints: self.keypoints.map(|kps| kps.map(scale)),
            landmarks: self
                .landmarks
                .as_ref()
                .map(|pts| pts.iter().copied().map(scale).collect()),
            descriptor: self.descriptor.clone(),
        }
    }
}

/// One detector call's output: regions in detector output order, expressed
/// in the detector's own coordinate space.
#[derive(Debug, Clone)]
pub struct Detections {
    space: Size,
    regions: Vec<FaceRegion>,
}

impl Detections {
    pub fn new(space: Size, regions: Vec<FaceRegion>) -> Self {
        Self { space, regions }
    }

    /// Coordinate space the regions are expressed in.
    pub fn space(&self) -> Size {
        self.space
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Normalize every region into `display` coordinates, preserving order.
    pub fn resize_to(self, display: Size) -> Vec<FaceRegion> {
        let space = self.space;
        self.regions
            .into_iter()
            .map(|r| r.resize(space, display))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rect(r: &Rect, x: f32, y: f32, w: f32, h: f32) {
        assert!((r.x - x).abs() < 1e-4, "x: {} vs {x}", r.x);
        assert!((r.y - y).abs() < 1e-4, "y: {} vs {y}", r.y);
        assert!((r.width - w).abs() < 1e-4, "w: {} vs {w}", r.width);
        assert!((r.height - h).abs() < 1e-4, "h: {} vs {h}", r.height);
    }

    #[test]
    fn test_resize_detector_space_to_display() {
        let detections = Detections::new(
            Size::new(320, 240),
            vec![FaceRegion::new(Rect::new(10.0, 10.0, 50.0, 50.0), 0.9)],
        );
        let regions = detections.resize_to(Size::new(640, 480));
        assert_eq!(regions.len(), 1);
        assert_rect(&regions[0].bounds, 20.0, 20.0, 100.0, 100.0);
    }

    #[test]
    fn test_resize_anisotropic() {
        let r = Rect::new(10.0, 20.0, 30.0, 40.0);
        let out = r.resize(Size::new(100, 100), Size::new(200, 50));
        assert_rect(&out, 20.0, 10.0, 60.0, 20.0);
    }

    #[test]
    fn test_resize_same_space_is_identity() {
        let r = Rect::new(1.5, 2.5, 3.5, 4.5);
        let out = r.resize(Size::new(640, 480), Size::new(640, 480));
        assert_rect(&out, 1.5, 2.5, 3.5, 4.5);
    }

    #[test]
    fn test_resize_from_empty_space_keeps_coordinates() {
        let r = Rect::new(5.0, 5.0, 10.0, 10.0);
        let out = r.resize(Size::new(0, 0), Size::new(640, 480));
        assert_rect(&out, 5.0, 5.0, 10.0, 10.0);
    }

    #[test]
    fn test_resize_scales_points_and_keeps_descriptor() {
        let mut region = FaceRegion::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0.8);
        region.keypoints = Some([(1.0, 1.0); 5]);
        region.landmarks = Some(vec![(2.0, 3.0), (4.0, 5.0)]);
        region.descriptor = Some(Descriptor {
            values: vec![0.6, 0.8],
            model_version: None,
        });

        let out = region.resize(Size::new(100, 100), Size::new(200, 300));
        assert_eq!(out.keypoints.unwrap()[0], (2.0, 3.0));
        assert_eq!(out.landmarks.unwrap(), vec![(4.0, 9.0), (8.0, 15.0)]);
        assert_eq!(out.descriptor.unwrap().values, vec![0.6, 0.8]);
        assert!((out.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_resize_preserves_detector_order() {
        let detections = Detections::new(
            Size::new(100, 100),
            vec![
                FaceRegion::new(Rect::new(0.0, 0.0, 1.0, 1.0), 0.5),
                FaceRegion::new(Rect::new(50.0, 50.0, 1.0, 1.0), 0.9),
            ],
        );
        let regions = detections.resize_to(Size::new(100, 100));
        assert!((regions[0].confidence - 0.5).abs() < 1e-6);
        assert!((regions[1].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_iou_identical() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size::new(640, 480).to_string(), "640x480");
        assert!(Size::new(0, 480).is_empty());
    }
}
