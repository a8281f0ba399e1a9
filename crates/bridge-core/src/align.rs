//! Alignment of forms-model predictions onto OCR regions
//!
//! A prediction covers every region whose center lies inside the union of
//! the prediction's boxes, or whose IoU with that union reaches the
//! threshold. When several predictions cover one region the best IoU wins,
//! ties going to the earlier prediction.

use crate::geometry::{center_inside, iou, union_box};
use bridge_types::{NormBox, Prediction};

/// For every region of `page`, the index of the prediction labeling it
pub fn align_page(
    page: u32,
    regions: &[NormBox],
    predictions: &[Prediction],
    iou_threshold: f64,
) -> Vec<Option<usize>> {
    let mut best: Vec<Option<(f64, usize)>> = vec![None; regions.len()];

    for (pi, pred) in predictions.iter().enumerate() {
        if pred.page.unwrap_or(1) != page {
            continue;
        }
        let boxes: Vec<NormBox> = pred
            .value_coordinates
            .iter()
            .map(|c| NormBox::new(c.left, c.top, c.width, c.height))
            .collect();
        let Some(target) = union_box(&boxes) else {
            continue;
        };

        for (wi, region) in regions.iter().enumerate() {
            let score = iou(region, &target);
            if !(center_inside(region, &target) || score >= iou_threshold) {
                continue;
            }
            match best[wi] {
                Some((current, _)) if current >= score => {}
                _ => best[wi] = Some((score, pi)),
            }
        }
    }

    best.into_iter().map(|b| b.map(|(_, pi)| pi)).collect()
}
