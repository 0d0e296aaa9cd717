//! SLIC-style superpixel segmentation.
//!
//! Grid-seeded k-means over (r, g, b, x, y) with a bounded search window, a
//! fixed iteration count and compacted labels. Superpixels are the unit the
//! perturbation explainer toggles on and off.

use image::RgbImage;
use ndarray::Array2;

use cxr_inference::XrayError;

/// Relative weight of spatial distance against color distance.
const COMPACTNESS: f32 = 10.0;

/// A dense label map over the image. Labels are compact: every value is
/// `< n_segments` and every segment is non-empty.
#[derive(Debug, Clone)]
pub struct SegmentationMap {
    labels: Array2<usize>,
    n_segments: usize,
}

impl SegmentationMap {
    pub fn labels(&self) -> &Array2<usize> {
        &self.labels
    }

    pub fn n_segments(&self) -> usize {
        self.n_segments
    }

    /// Label of the superpixel containing (x, y).
    pub fn label_at(&self, x: u32, y: u32) -> usize {
        self.labels[(y as usize, x as usize)]
    }
}

#[derive(Debug, Clone, Copy)]
struct Cluster {
    r: f32,
    g: f32,
    b: f32,
    x: f32,
    y: f32,
}

/// Segment `img` into superpixels with a target cell size of `cell_size`
/// pixels. Fails with [`XrayError::Explanation`] when no region can be
/// produced.
pub fn slic(img: &RgbImage, cell_size: u32, n_iters: usize) -> Result<SegmentationMap, XrayError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(XrayError::Explanation(
            "segmentation produced zero regions: empty image".into(),
        ));
    }

    let step = cell_size.max(1) as usize;
    let w = width as usize;
    let h = height as usize;

    // Seed cluster centers on a regular grid, offset to cell centers.
    let mut clusters = Vec::new();
    let mut cy = step / 2;
    while cy < h {
        let mut cx = step / 2;
        while cx < w {
            let p = img.get_pixel(cx as u32, cy as u32).0;
            clusters.push(Cluster {
                r: p[0] as f32,
                g: p[1] as f32,
                b: p[2] as f32,
                x: cx as f32,
                y: cy as f32,
            });
            cx += step;
        }
        cy += step;
    }
    if clusters.is_empty() {
        // Image smaller than one cell: a single superpixel.
        let p = img.get_pixel(0, 0).0;
        clusters.push(Cluster {
            r: p[0] as f32,
            g: p[1] as f32,
            b: p[2] as f32,
            x: (w / 2) as f32,
            y: (h / 2) as f32,
        });
    }

    let spatial_weight = COMPACTNESS / step as f32;
    let mut labels = Array2::<usize>::zeros((h, w));
    let mut distances = Array2::<f32>::from_elem((h, w), f32::INFINITY);

    for _ in 0..n_iters.max(1) {
        distances.fill(f32::INFINITY);

        // Assignment: each cluster scans a 2S x 2S window around its center.
        for (k, cluster) in clusters.iter().enumerate() {
            let x0 = (cluster.x as isize - step as isize).max(0) as usize;
            let x1 = ((cluster.x as isize + step as isize) as usize).min(w - 1);
            let y0 = (cluster.y as isize - step as isize).max(0) as usize;
            let y1 = ((cluster.y as isize + step as isize) as usize).min(h - 1);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let p = img.get_pixel(x as u32, y as u32).0;
                    let dr = p[0] as f32 - cluster.r;
                    let dg = p[1] as f32 - cluster.g;
                    let db = p[2] as f32 - cluster.b;
                    let dx = (x as f32 - cluster.x) * spatial_weight;
                    let dy = (y as f32 - cluster.y) * spatial_weight;
                    let d = dr * dr + dg * dg + db * db + dx * dx + dy * dy;

                    if d < distances[(y, x)] {
                        distances[(y, x)] = d;
                        labels[(y, x)] = k;
                    }
                }
            }
        }

        // Pixels outside every window fall back to the nearest grid seed.
        for y in 0..h {
            for x in 0..w {
                if distances[(y, x)].is_infinite() {
                    let (mut best, mut best_d) = (0usize, f32::INFINITY);
                    for (k, cluster) in clusters.iter().enumerate() {
                        let dx = x as f32 - cluster.x;
                        let dy = y as f32 - cluster.y;
                        let d = dx * dx + dy * dy;
                        if d < best_d {
                            best_d = d;
                            best = k;
                        }
                    }
                    labels[(y, x)] = best;
                }
            }
        }

        // Update: move each center to the mean of its members.
        let mut sums = vec![(0f32, 0f32, 0f32, 0f32, 0f32, 0usize); clusters.len()];
        for y in 0..h {
            for x in 0..w {
                let k = labels[(y, x)];
                let p = img.get_pixel(x as u32, y as u32).0;
                let s = &mut sums[k];
                s.0 += p[0] as f32;
                s.1 += p[1] as f32;
                s.2 += p[2] as f32;
                s.3 += x as f32;
                s.4 += y as f32;
                s.5 += 1;
            }
        }
        for (cluster, s) in clusters.iter_mut().zip(sums.iter()) {
            if s.5 > 0 {
                let n = s.5 as f32;
                *cluster = Cluster {
                    r: s.0 / n,
                    g: s.1 / n,
                    b: s.2 / n,
                    x: s.3 / n,
                    y: s.4 / n,
                };
            }
        }
    }

    // Compact labels so every segment index is used.
    let mut remap = vec![usize::MAX; clusters.len()];
    let mut next = 0usize;
    for label in labels.iter_mut() {
        if remap[*label] == usize::MAX {
            remap[*label] = next;
            next += 1;
        }
        *label = remap[*label];
    }

    if next == 0 {
        return Err(XrayError::Explanation(
            "segmentation produced zero regions".into(),
        ));
    }

    Ok(SegmentationMap {
        labels,
        n_segments: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient_image(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            Rgb([(x * 255 / size) as u8, (y * 255 / size) as u8, 64])
        })
    }

    #[test]
    fn test_label_map_shape() {
        let img = gradient_image(64);
        let seg = slic(&img, 16, 5).unwrap();
        assert_eq!(seg.labels().dim(), (64, 64));
    }

    #[test]
    fn test_labels_are_compact() {
        let img = gradient_image(64);
        let seg = slic(&img, 16, 5).unwrap();
        assert!(seg.n_segments() > 0);

        let mut seen = vec![false; seg.n_segments()];
        for &label in seg.labels().iter() {
            assert!(label < seg.n_segments());
            seen[label] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_uniform_image_close_to_grid() {
        let img = RgbImage::from_pixel(64, 64, Rgb([100, 100, 100]));
        let seg = slic(&img, 16, 5).unwrap();
        // A 64x64 image with 16px cells seeds a 4x4 grid; with no color
        // signal the segmentation should stay close to that.
        assert!(seg.n_segments() <= 16);
        assert!(seg.n_segments() >= 4);
    }

    #[test]
    fn test_tiny_image_single_segment() {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let seg = slic(&img, 16, 5).unwrap();
        assert_eq!(seg.n_segments(), 1);
    }
}
