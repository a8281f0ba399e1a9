//! Coordinate transformation between source, canonical and tool geometry
//!
//! Canonical space is [`NormBox`]: normalized `[0, 1]`, top-left origin,
//! axis-aligned. The tool works in percent of image size with a clockwise
//! rotation about the rectangle's top-left corner.

use crate::error::{BridgeError, Result};
use bridge_types::{NormBox, PercentRect, PixelBox};

/// Convert canonical geometry to the tool's percent rectangle (rotation 0)
pub fn to_percent(b: &NormBox) -> PercentRect {
    PercentRect {
        x: b.left * 100.0,
        y: b.top * 100.0,
        width: b.width * 100.0,
        height: b.height * 100.0,
        rotation: 0.0,
    }
}

/// Convert an axis-aligned percent rectangle back to canonical geometry.
/// Rotation is ignored; see [`normalize_rotation`].
pub fn from_percent(r: &PercentRect) -> NormBox {
    NormBox {
        left: r.x / 100.0,
        top: r.y / 100.0,
        width: r.width / 100.0,
        height: r.height / 100.0,
    }
}

/// Convert absolute pixel geometry to canonical geometry
pub fn pixels_to_norm(b: &PixelBox, page_width: u32, page_height: u32) -> Result<NormBox> {
    if page_width == 0 || page_height == 0 {
        return Err(BridgeError::mismatch(format!(
            "page dimensions {page_width}x{page_height} cannot normalize pixel coordinates"
        )));
    }
    let w = f64::from(page_width);
    let h = f64::from(page_height);
    Ok(NormBox {
        left: b.x / w,
        top: b.y / h,
        width: b.width / w,
        height: b.height / h,
    })
}

/// Replace a rotated rectangle by its axis-aligned bounding box.
///
/// The tool rotates in image pixel space, so percent extents are scaled by
/// the original image size before rotating. Without a known size the image
/// is assumed square. Returns the rectangle unchanged for rotations that are
/// multiples of 360 degrees.
pub fn normalize_rotation(
    r: &PercentRect,
    original_width: Option<u32>,
    original_height: Option<u32>,
) -> PercentRect {
    let rotation = r.rotation.rem_euclid(360.0);
    if rotation.abs() < 1e-9 || (360.0 - rotation).abs() < 1e-9 {
        return PercentRect { rotation: 0.0, ..*r };
    }

    let iw = f64::from(original_width.unwrap_or(100).max(1));
    let ih = f64::from(original_height.unwrap_or(100).max(1));

    let x0 = r.x / 100.0 * iw;
    let y0 = r.y / 100.0 * ih;
    let w = r.width / 100.0 * iw;
    let h = r.height / 100.0 * ih;

    let (sin, cos) = rotation.to_radians().sin_cos();
    let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)].map(|(dx, dy)| {
        (x0 + dx * cos - dy * sin, y0 + dx * sin + dy * cos)
    });

    let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    PercentRect {
        x: min_x / iw * 100.0,
        y: min_y / ih * 100.0,
        width: (max_x - min_x) / iw * 100.0,
        height: (max_y - min_y) / ih * 100.0,
        rotation: 0.0,
    }
}

/// Why a region cannot be used as-is
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryProblem {
    Degenerate(String),
    OutOfBounds(String),
}

/// Check a canonical box against the page. Overhang within `tolerance` is
/// clamped away; anything beyond is out of bounds.
pub fn check_region(b: &NormBox, tolerance: f64) -> std::result::Result<NormBox, GeometryProblem> {
    if !b.is_finite() {
        return Err(GeometryProblem::Degenerate(format!(
            "non-finite geometry {b:?}"
        )));
    }
    if b.width <= 0.0 || b.height <= 0.0 {
        return Err(GeometryProblem::Degenerate(format!(
            "non-positive extent {}x{}",
            b.width, b.height
        )));
    }
    if b.left < -tolerance
        || b.top < -tolerance
        || b.right() > 1.0 + tolerance
        || b.bottom() > 1.0 + tolerance
    {
        return Err(GeometryProblem::OutOfBounds(format!(
            "box [{:.4}, {:.4}, {:.4}, {:.4}] exceeds the page",
            b.left, b.top, b.width, b.height
        )));
    }

    let left = b.left.clamp(0.0, 1.0);
    let top = b.top.clamp(0.0, 1.0);
    let clamped = NormBox {
        left,
        top,
        width: b.right().min(1.0) - left,
        height: b.bottom().min(1.0) - top,
    };
    if clamped.width <= 0.0 || clamped.height <= 0.0 {
        return Err(GeometryProblem::Degenerate(
            "extent vanishes once clamped to the page".to_string(),
        ));
    }
    Ok(clamped)
}

/// Intersection over union
pub fn iou(a: &NormBox, b: &NormBox) -> f64 {
    let inter_w = (a.right().min(b.right()) - a.left.max(b.left)).max(0.0);
    let inter_h = (a.bottom().min(b.bottom()) - a.top.max(b.top)).max(0.0);
    let inter = inter_w * inter_h;
    if inter == 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Whether the center of `child` lies inside `parent`
pub fn center_inside(child: &NormBox, parent: &NormBox) -> bool {
    let (cx, cy) = child.center();
    parent.left <= cx && cx <= parent.right() && parent.top <= cy && cy <= parent.bottom()
}

/// Smallest box covering all `boxes`
pub fn union_box(boxes: &[NormBox]) -> Option<NormBox> {
    let first = boxes.first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.left, first.top, first.right(), first.bottom());
    for b in &boxes[1..] {
        x1 = x1.min(b.left);
        y1 = y1.min(b.top);
        x2 = x2.max(b.right());
        y2 = y2.max(b.bottom());
    }
    Some(NormBox::new(x1, y1, x2 - x1, y2 - y1))
}

/// Order indices of `boxes` top-to-bottom, then left-to-right.
///
/// Boxes are first sorted by top edge, then adjacent boxes on the same line
/// (tops closer than half the smaller height) are swapped into x order.
pub fn reading_order(boxes: &[NormBox]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&boxes[a], &boxes[b]);
        a.top
            .total_cmp(&b.top)
            .then_with(|| a.left.total_cmp(&b.left))
    });

    for i in 0..order.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let curr = &boxes[order[j]];
            let next = &boxes[order[j + 1]];
            let line_tolerance = curr.height.min(next.height) / 2.0;
            if (next.top - curr.top).abs() < line_tolerance && next.left < curr.left {
                order.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
    order
}

/// Component-wise comparison within `tolerance`
pub fn approx_eq(a: &NormBox, b: &NormBox, tolerance: f64) -> bool {
    (a.left - b.left).abs() <= tolerance
        && (a.top - b.top).abs() <= tolerance
        && (a.width - b.width).abs() <= tolerance
        && (a.height - b.height).abs() <= tolerance
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn fraction() -> impl Strategy<Value = f64> {
        0.0f64..0.9
    }

    fn extent() -> impl Strategy<Value = f64> {
        0.001f64..0.1
    }

    proptest! {
        /// Canonical -> percent -> canonical returns the original box
        #[test]
        fn roundtrip_norm_to_percent(
            left in fraction(),
            top in fraction(),
            width in extent(),
            height in extent(),
        ) {
            let original = NormBox::new(left, top, width, height);
            let back = from_percent(&to_percent(&original));
            prop_assert!(
                approx_eq(&original, &back, 1e-9),
                "roundtrip failed: {:?} -> {:?}", original, back
            );
        }

        /// Pixels -> canonical -> percent keeps proportions of the page
        #[test]
        fn pixels_normalize_into_unit_square(
            w in 1u32..5000,
            h in 1u32..5000,
            fx in 0.0f64..1.0,
            fy in 0.0f64..1.0,
        ) {
            let px = PixelBox {
                x: fx * f64::from(w),
                y: fy * f64::from(h),
                width: 0.0,
                height: 0.0,
            };
            let n = pixels_to_norm(&px, w, h).unwrap();
            prop_assert!((n.left - fx).abs() < 1e-9);
            prop_assert!((n.top - fy).abs() < 1e-9);
        }

        /// The AABB of a rotated box always contains its anchor corner
        #[test]
        fn rotated_bounds_contain_anchor(
            x in 10.0f64..80.0,
            y in 10.0f64..80.0,
            w in 1.0f64..10.0,
            h in 1.0f64..10.0,
            rotation in 0.0f64..360.0,
        ) {
            let r = PercentRect { x, y, width: w, height: h, rotation };
            let n = normalize_rotation(&r, Some(1000), Some(1400));
            prop_assert!(n.x <= x + 1e-9 && x <= n.x + n.width + 1e-9);
            prop_assert!(n.y <= y + 1e-9 && y <= n.y + n.height + 1e-9);
            prop_assert!(n.width > 0.0 && n.height > 0.0);
        }

        /// Reading order is a permutation
        #[test]
        fn reading_order_is_permutation(
            tops in proptest::collection::vec(0.0f64..1.0, 0..30),
        ) {
            let boxes: Vec<NormBox> = tops
                .iter()
                .enumerate()
                .map(|(i, t)| NormBox::new((i as f64 * 0.37) % 0.9, *t, 0.05, 0.02))
                .collect();
            let mut order = reading_order(&boxes);
            order.sort_unstable();
            prop_assert_eq!(order, (0..boxes.len()).collect::<Vec<_>>());
        }
    }
}
