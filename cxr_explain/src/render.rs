//! Artifact rendering: heat-map colorization and blending, superpixel
//! boundary drawing, and artifact file handling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::Array2;

use cxr_inference::XrayError;

use crate::segmentation::SegmentationMap;

/// Boundary color for the perturbation overlay.
const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Map a normalized intensity through the jet palette.
///
/// Blue for low values through green to red for high values.
pub fn jet(value: u8) -> Rgb<u8> {
    let x = value as f32 / 255.0;
    let r = (1.5 - (4.0 * x - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * x - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * x - 1.0).abs()).clamp(0.0, 1.0);
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

/// Quantize a normalized heat map to 256 levels and colorize it.
pub fn colorize_heat_map(heat: &Array2<f32>) -> RgbImage {
    let (h, w) = heat.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let v = heat[(y as usize, x as usize)].clamp(0.0, 1.0);
        jet((v * 255.0) as u8)
    })
}

/// Rescale a colorized heat map to the base image's resolution and blend it
/// on top at the given opacity.
pub fn blend_heat_map(base: &RgbImage, heat: &RgbImage, alpha: f32) -> RgbImage {
    let (w, h) = base.dimensions();
    let heat = image::imageops::resize(heat, w, h, FilterType::CatmullRom);

    RgbImage::from_fn(w, h, |x, y| {
        let o = base.get_pixel(x, y).0;
        let m = heat.get_pixel(x, y).0;
        Rgb([
            (m[0] as f32 * alpha + o[0] as f32).min(255.0) as u8,
            (m[1] as f32 * alpha + o[1] as f32).min(255.0) as u8,
            (m[2] as f32 * alpha + o[2] as f32).min(255.0) as u8,
        ])
    })
}

/// Draw the boundaries of the selected superpixels on a copy of `base`.
///
/// A pixel is on a boundary when its membership in the selected set differs
/// from a 4-neighbor's, so markings derive only from the selected regions.
pub fn draw_boundaries(
    base: &RgbImage,
    segments: &SegmentationMap,
    selected: &HashSet<usize>,
) -> RgbImage {
    let (w, h) = base.dimensions();
    let mut out = base.clone();

    for y in 0..h {
        for x in 0..w {
            let inside = selected.contains(&segments.label_at(x, y));
            let mut boundary = false;
            if x + 1 < w && selected.contains(&segments.label_at(x + 1, y)) != inside {
                boundary = true;
            }
            if y + 1 < h && selected.contains(&segments.label_at(x, y + 1)) != inside {
                boundary = true;
            }
            if boundary {
                out.put_pixel(x, y, BOUNDARY_COLOR);
            }
        }
    }

    out
}

/// Path of an explanation artifact: `<output_dir>/<input stem>_<suffix>.png`.
pub fn artifact_path(output_dir: &Path, input_path: &Path, suffix: &str) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{}_{}.png", stem, suffix))
}

/// Write an artifact image, creating the output directory if needed.
pub fn save_artifact(img: &RgbImage, path: &Path) -> Result<(), XrayError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    img.save(path)
        .map_err(|e| XrayError::Io(std::io::Error::other(e)))?;

    tracing::debug!(path = %path.display(), "saved explanation artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::slic;
    use ndarray::array;

    #[test]
    fn test_jet_endpoints() {
        // Low values are blue-dominant, high values red-dominant.
        let low = jet(0);
        assert!(low.0[2] > low.0[0]);
        let high = jet(255);
        assert!(high.0[0] > high.0[2]);
        // Mid values are green-dominant.
        let mid = jet(128);
        assert!(mid.0[1] >= mid.0[0] && mid.0[1] >= mid.0[2]);
    }

    #[test]
    fn test_colorize_dimensions() {
        let heat = array![[0.0f32, 0.5], [1.0, 0.25]];
        let img = colorize_heat_map(&heat);
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn test_blend_keeps_base_resolution() {
        let base = RgbImage::from_pixel(20, 10, Rgb([50, 50, 50]));
        let heat = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let out = blend_heat_map(&base, &heat, 0.4);
        assert_eq!(out.dimensions(), (20, 10));

        // The red channel gained heat, the others kept the base level.
        let p = out.get_pixel(5, 5).0;
        assert!(p[0] > 50);
    }

    #[test]
    fn test_boundaries_only_near_selected_regions() {
        let mut img = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        for y in 0..64 {
            for x in 32..64 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let seg = slic(&img, 16, 5).unwrap();

        // Nothing selected: the overlay equals the base image.
        let untouched = draw_boundaries(&img, &seg, &HashSet::new());
        assert_eq!(untouched.as_raw(), img.as_raw());

        // Select the segment at the far left; markings must stay away from
        // the far right half.
        let selected: HashSet<usize> = [seg.label_at(0, 0)].into_iter().collect();
        let marked = draw_boundaries(&img, &seg, &selected);
        assert_ne!(marked.as_raw(), img.as_raw());
        for y in 0..64 {
            for x in 48..64 {
                assert_ne!(marked.get_pixel(x, y), &BOUNDARY_COLOR);
            }
        }
    }

    #[test]
    fn test_artifact_path_substitutes_extension() {
        let path = artifact_path(Path::new("lime_outputs"), Path::new("uploads/scan.jpeg"), "lime");
        assert_eq!(path, PathBuf::from("lime_outputs/scan_lime.png"));
    }

    #[test]
    fn test_save_artifact_roundtrip() {
        let dir = std::env::temp_dir().join(format!("cxr_render_{}", std::process::id()));
        let path = dir.join("artifact.png");
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));

        save_artifact(&img, &path).unwrap();
        let read_back = image::open(&path).unwrap();
        assert_eq!(read_back.width(), 8);
        assert_eq!(read_back.height(), 8);

        std::fs::remove_dir_all(dir).ok();
    }
}
