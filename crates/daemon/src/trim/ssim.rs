//! Structural similarity between two greyscale images.
//!
//! Mean SSIM over 7x7 uniform windows with sample covariance, K1 = 0.01,
//! K2 = 0.03 and a data range of 255. Windows touching the border are left
//! out of the mean. Images smaller than one window are compared as a single
//! window.

use image::GrayImage;

const WIN: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Mean structural similarity of two equally sized images, in [-1, 1].
///
/// Returns None when the sizes differ.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.width() != b.width() || a.height() != b.height() {
        return None;
    }
    let w = a.width() as usize;
    let h = a.height() as usize;
    if w < WIN || h < WIN {
        return Some(single_window(a.as_raw(), b.as_raw()));
    }

    let tables = SumTables::new(a.as_raw(), b.as_raw(), w, h);
    let n = (WIN * WIN) as f64;
    let half = WIN / 2;

    let mut total = 0.0;
    let mut count = 0usize;
    for cy in half..h - half {
        for cx in half..w - half {
            let s = tables.window(cx - half, cy - half, WIN);
            total += ssim_from_sums(&s, n);
            count += 1;
        }
    }
    Some(total / count as f64)
}

fn single_window(a: &[u8], b: &[u8]) -> f64 {
    let mut s = WindowSums::default();
    for (&x, &y) in a.iter().zip(b) {
        s.add(x as f64, y as f64);
    }
    ssim_from_sums(&s, a.len() as f64)
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowSums {
    x: f64,
    y: f64,
    xx: f64,
    yy: f64,
    xy: f64,
}

impl WindowSums {
    fn add(&mut self, x: f64, y: f64) {
        self.x += x;
        self.y += y;
        self.xx += x * x;
        self.yy += y * y;
        self.xy += x * y;
    }
}

fn ssim_from_sums(s: &WindowSums, n: f64) -> f64 {
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };

    let ux = s.x / n;
    let uy = s.y / n;
    let vx = cov_norm * (s.xx / n - ux * ux);
    let vy = cov_norm * (s.yy / n - uy * uy);
    let vxy = cov_norm * (s.xy / n - ux * uy);

    let a1 = 2.0 * ux * uy + c1;
    let a2 = 2.0 * vxy + c2;
    let b1 = ux * ux + uy * uy + c1;
    let b2 = vx + vy + c2;
    (a1 * a2) / (b1 * b2)
}

/// Summed-area tables for x, y, x^2, y^2 and xy.
struct SumTables {
    stride: usize,
    tables: [Vec<f64>; 5],
}

impl SumTables {
    fn new(a: &[u8], b: &[u8], w: usize, h: usize) -> Self {
        let stride = w + 1;
        let size = stride * (h + 1);
        let mut tables: [Vec<f64>; 5] = std::array::from_fn(|_| vec![0.0; size]);
        for row in 0..h {
            let mut acc = [0.0f64; 5];
            for col in 0..w {
                let x = a[row * w + col] as f64;
                let y = b[row * w + col] as f64;
                let vals = [x, y, x * x, y * y, x * y];
                for (k, table) in tables.iter_mut().enumerate() {
                    acc[k] += vals[k];
                    table[(row + 1) * stride + col + 1] = table[row * stride + col + 1] + acc[k];
                }
            }
        }
        Self { stride, tables }
    }

    fn rect(&self, k: usize, x0: usize, y0: usize, size: usize) -> f64 {
        let t = &self.tables[k];
        let (x1, y1) = (x0 + size, y0 + size);
        t[y1 * self.stride + x1] - t[y0 * self.stride + x1] - t[y1 * self.stride + x0]
            + t[y0 * self.stride + x0]
    }

    fn window(&self, x0: usize, y0: usize, size: usize) -> WindowSums {
        WindowSums {
            x: self.rect(0, x0, y0, size),
            y: self.rect(1, x0, y0, size),
            xx: self.rect(2, x0, y0, size),
            yy: self.rect(3, x0, y0, size),
            xy: self.rect(4, x0, y0, size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    fn invert(f: &GrayImage) -> GrayImage {
        let mut out = f.clone();
        image::imageops::invert(&mut out);
        out
    }

    fn filled(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([value]))
    }

    #[test]
    fn test_identical_images_score_one() {
        let f = gradient(64, 32);
        let score = ssim(&f, &f).unwrap();
        assert!((score - 1.0).abs() < 1e-9, "score {}", score);
    }

    #[test]
    fn test_flat_identical_images_score_one() {
        let f = filled(20, 20, 40);
        assert!((ssim(&f, &f).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_image_scores_low() {
        let f = gradient(64, 32);
        let score = ssim(&f, &invert(&f)).unwrap();
        assert!(score < 0.6, "score {}", score);
    }

    #[test]
    fn test_black_vs_white_scores_near_zero() {
        let black = filled(32, 32, 0);
        let white = filled(32, 32, 255);
        let score = ssim(&black, &white).unwrap();
        assert!(score.abs() < 0.01, "score {}", score);
    }

    #[test]
    fn test_tiny_region_uses_single_window() {
        let a = gradient(3, 2);
        let score = ssim(&a, &a).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
        let one = filled(1, 1, 9);
        assert!(ssim(&one, &one).unwrap().is_finite());
    }

    #[test]
    fn test_size_mismatch() {
        assert!(ssim(&gradient(8, 8), &gradient(9, 8)).is_none());
    }

    #[test]
    fn test_matches_direct_window_computation() {
        let a = gradient(9, 9);
        let b = GrayImage::from_fn(9, 9, |x, y| Luma([a.get_pixel(x, y)[0].wrapping_add(3) / 2]));

        // 9x9 with a 7x7 window leaves 3x3 interior centres
        let mut expected = 0.0;
        for oy in 0..3 {
            for ox in 0..3 {
                let mut s = WindowSums::default();
                for y in oy..oy + 7 {
                    for x in ox..ox + 7 {
                        s.add(a.get_pixel(x, y)[0] as f64, b.get_pixel(x, y)[0] as f64);
                    }
                }
                expected += ssim_from_sums(&s, 49.0);
            }
        }
        expected /= 9.0;

        let got = ssim(&a, &b).unwrap();
        assert!((got - expected).abs() < 1e-9, "{} vs {}", got, expected);
    }
}
