//! Binarization and scoring: Otsu threshold selection, IoU between a
//! prediction and a reference mask, and the loss helper used by the periodic
//! test pass.

use ndarray::{Array, Array2, Array4, ArrayView2, Dimension};

/// Element-wise logistic activation.
pub fn sigmoid<D: Dimension>(logits: &Array<f32, D>) -> Array<f32, D> {
    logits.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Otsu threshold of a probability map in `[0, 1]`.
///
/// The map is quantized to a 256-bin histogram and the cut maximizing the
/// between-class variance is chosen, then normalized back to `[0, 1]`. The
/// variance is constant across the empty valley of a bimodal histogram, so
/// ties resolve to the midpoint of the maximal plateau. A uniform map has no
/// two-class split at all and yields 0.0.
pub fn otsu_threshold(map: ArrayView2<f32>) -> f32 {
    let mut histogram = [0u64; 256];
    for &value in map.iter() {
        let bin = (value.clamp(0.0, 1.0) * 255.0).round() as usize;
        histogram[bin] += 1;
    }

    let total = map.len() as f64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(bin, &count)| bin as f64 * count as f64)
        .sum();

    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    let mut best_variance = f64::NEG_INFINITY;
    let mut plateau = (0usize, 0usize);
    let mut found = false;

    for (bin, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        sum_bg += bin as f64 * count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }

        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_total - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);

        if variance > best_variance {
            best_variance = variance;
            plateau = (bin, bin);
            found = true;
        } else if variance == best_variance {
            plateau.1 = bin;
        }
    }

    if !found {
        return 0.0;
    }
    (plateau.0 + plateau.1) as f32 / 2.0 / 255.0
}

/// Binarize a probability map: `value > threshold` per pixel.
pub fn binarize(map: ArrayView2<f32>, threshold: f32) -> Array2<u8> {
    map.mapv(|v| u8::from(v > threshold))
}

/// Intersection-over-union of a prediction binarized at `threshold` against a
/// reference mask (binarized at 0.5; reference masks are already binary).
///
/// An empty union counts as a perfect match (IoU 1.0): two empty masks agree
/// everywhere.
pub fn iou(prediction: ArrayView2<f32>, reference: ArrayView2<f32>, threshold: f32) -> f32 {
    masked_iou(prediction, reference, |p| p > threshold)
}

/// The higher of the IoU on the prediction as-is and on its complement,
/// compensating for undefined foreground/background polarity.
pub fn symmetric_iou(
    prediction: ArrayView2<f32>,
    reference: ArrayView2<f32>,
    threshold: f32,
) -> f32 {
    let direct = iou(prediction, reference, threshold);
    // (1 - p) > threshold is p < 1 - threshold.
    let complement = masked_iou(prediction, reference, |p| p < 1.0 - threshold);
    direct.max(complement)
}

fn masked_iou(
    prediction: ArrayView2<f32>,
    reference: ArrayView2<f32>,
    foreground: impl Fn(f32) -> bool,
) -> f32 {
    debug_assert_eq!(prediction.dim(), reference.dim());
    let mut intersection = 0u64;
    let mut union = 0u64;
    for (&p, &r) in prediction.iter().zip(reference.iter()) {
        let p = foreground(p);
        let r = r > 0.5;
        if p && r {
            intersection += 1;
        }
        if p || r {
            union += 1;
        }
    }
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Mean binary cross-entropy of a logit batch against targets in `[0, 1]`,
/// in the numerically stable formulation.
pub fn bce_with_logits(logits: &Array4<f32>, targets: &Array4<f32>) -> f32 {
    debug_assert_eq!(logits.dim(), targets.dim());
    let mut total = 0.0f64;
    for (&x, &z) in logits.iter().zip(targets.iter()) {
        total += (x.max(0.0) - x * z + (-x.abs()).exp().ln_1p()) as f64;
    }
    (total / logits.len() as f64) as f32
}
