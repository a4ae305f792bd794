//! Per-epoch training history and its PNG rendering.

use image::{Rgb, RgbImage};
use std::path::Path;

/// Ordered-by-epoch scalar series collected during fine-tuning.
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub acc: Vec<f32>,
    pub val_acc: Vec<f32>,
}

impl TrainingHistory {
    pub fn push_epoch(&mut self, loss: f32, val_loss: f32, acc: f32, val_acc: f32) {
        self.loss.push(loss);
        self.val_loss.push(val_loss);
        self.acc.push(acc);
        self.val_acc.push(val_acc);
    }

    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    /// Curves in legend order: loss (blue), val_loss (orange), acc (green),
    /// val_acc (red).
    fn series(&self) -> [(&[f32], Rgb<u8>); 4] {
        [
            (&self.loss, Rgb([31, 119, 180])),
            (&self.val_loss, Rgb([255, 127, 14])),
            (&self.acc, Rgb([44, 160, 44])),
            (&self.val_acc, Rgb([214, 39, 40])),
        ]
    }
}

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const MARGIN: u32 = 50;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);

/// Render the four curves against 1-based epoch index and save as PNG.
/// Failure leaves previously written training artifacts untouched.
pub fn plot_history(history: &TrainingHistory, path: &Path) -> anyhow::Result<()> {
    if history.is_empty() {
        anyhow::bail!("training history is empty, nothing to plot");
    }

    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    let (mut y_min, mut y_max) = (f32::INFINITY, f32::NEG_INFINITY);
    for (values, _) in history.series() {
        for &v in values {
            y_min = y_min.min(v);
            y_max = y_max.max(v);
        }
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        anyhow::bail!("training history contains non-finite values");
    }
    if (y_max - y_min).abs() < 1e-6 {
        y_min -= 0.5;
        y_max += 0.5;
    }
    let pad = (y_max - y_min) * 0.05;
    let y_min = y_min - pad;
    let y_max = y_max + pad;

    let plot_w = (WIDTH - 2 * MARGIN) as f32;
    let plot_h = (HEIGHT - 2 * MARGIN) as f32;
    let epochs = history.epochs();

    let to_px = |epoch_idx: usize, value: f32| -> (i64, i64) {
        let x_frac = if epochs > 1 {
            epoch_idx as f32 / (epochs - 1) as f32
        } else {
            0.5
        };
        let y_frac = (value - y_min) / (y_max - y_min);
        let x = MARGIN as f32 + x_frac * plot_w;
        let y = (HEIGHT - MARGIN) as f32 - y_frac * plot_h;
        (x as i64, y as i64)
    };

    // Axes.
    draw_line(
        &mut img,
        (MARGIN as i64, MARGIN as i64),
        (MARGIN as i64, (HEIGHT - MARGIN) as i64),
        AXIS,
    );
    draw_line(
        &mut img,
        (MARGIN as i64, (HEIGHT - MARGIN) as i64),
        ((WIDTH - MARGIN) as i64, (HEIGHT - MARGIN) as i64),
        AXIS,
    );
    // Epoch tick marks along the x axis (1-based epochs).
    for e in 0..epochs {
        let (x, _) = to_px(e, y_min);
        let y = (HEIGHT - MARGIN) as i64;
        draw_line(&mut img, (x, y), (x, y + 4), AXIS);
    }

    for (i, (values, color)) in history.series().iter().enumerate() {
        for e in 1..values.len() {
            let a = to_px(e - 1, values[e - 1]);
            let b = to_px(e, values[e]);
            draw_line(&mut img, a, b, *color);
        }
        if values.len() == 1 {
            let (x, y) = to_px(0, values[0]);
            draw_line(&mut img, (x - 2, y), (x + 2, y), *color);
        }
        // Legend swatch, top-right.
        let sx = (WIDTH - MARGIN - 80) as i64;
        let sy = (MARGIN + 10 + 14 * i as u32) as i64;
        for dy in 0..6 {
            draw_line(&mut img, (sx, sy + dy), (sx + 24, sy + dy), *color);
        }
    }

    img.save(path)
        .map_err(|e| anyhow::anyhow!("failed to save history plot {}: {e}", path.display()))?;
    Ok(())
}

fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as u32) < w && (y0 as u32) < h {
            img.put_pixel(x0 as u32, y0 as u32, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_epoch_keeps_series_aligned() {
        let mut history = TrainingHistory::default();
        history.push_epoch(1.0, 1.2, 0.5, 0.4);
        history.push_epoch(0.8, 1.0, 0.6, 0.5);
        assert_eq!(history.epochs(), 2);
        assert_eq!(history.val_acc, vec![0.4, 0.5]);
    }

    #[test]
    fn empty_history_refuses_to_plot() {
        let history = TrainingHistory::default();
        let dir = tempfile::tempdir().unwrap();
        assert!(plot_history(&history, &dir.path().join("plot.png")).is_err());
    }

    #[test]
    fn plot_writes_a_png() {
        let mut history = TrainingHistory::default();
        history.push_epoch(1.0, 1.1, 0.5, 0.45);
        history.push_epoch(0.7, 0.9, 0.7, 0.6);
        history.push_epoch(0.5, 0.8, 0.8, 0.7);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.png");
        plot_history(&history, &path).unwrap();
        assert!(path.exists());
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
    }

    #[test]
    fn single_epoch_history_plots() {
        let mut history = TrainingHistory::default();
        history.push_epoch(0.9, 1.0, 0.5, 0.5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        plot_history(&history, &path).unwrap();
        assert!(path.exists());
    }
}
