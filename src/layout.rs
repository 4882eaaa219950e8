use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

use crate::document::{DocumentBuilder, Placement};
use crate::normalize::encode_jpeg;
use crate::page_store::remove_file_if_exists;

pub const PX_PER_INCH: f64 = 96.0;
pub const MM_PER_INCH: f64 = 25.4;
pub const PT_PER_INCH: f64 = 72.0;

/// Images whose aspect ratio differs from the canvas by more than this
/// fraction are sliced rather than fitted.
pub const RATIO_THRESHOLD: f64 = 0.15;

pub fn px_to_mm(px: f64) -> f64 {
    px * MM_PER_INCH / PX_PER_INCH
}

pub fn mm_to_px(mm: f64) -> f64 {
    mm * PX_PER_INCH / MM_PER_INCH
}

pub fn mm_to_pt(mm: f64) -> f64 {
    mm * PT_PER_INCH / MM_PER_INCH
}

/// Physical page size and its device-pixel equivalent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width_mm: f64,
    pub height_mm: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl Canvas {
    pub fn from_mm(width_mm: f64, height_mm: f64) -> Self {
        Self {
            width_mm,
            height_mm,
            width_px: mm_to_px(width_mm) as u32,
            height_px: mm_to_px(height_mm) as u32,
        }
    }

    pub fn a4() -> Self {
        Self::from_mm(210.0, 297.0)
    }

    pub fn aspect(&self) -> f64 {
        f64::from(self.width_px) / f64::from(self.height_px)
    }

    /// `|imgAspect - pageAspect| / pageAspect`.
    pub fn ratio_difference(&self, width: u32, height: u32) -> f64 {
        let page = self.aspect();
        let img = f64::from(width) / f64::from(height);
        (img - page).abs() / page
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::a4()
    }
}

/// Rectangle on the canvas in millimetres, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectMm {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Vertical band of a source image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub top: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PagePlan {
    /// One canvas page, image scaled to fit and centered.
    Whole { rect: RectMm },
    /// One canvas page per band, each drawn at natural size at the top-left.
    Sliced { bands: Vec<Band> },
}

impl PagePlan {
    pub fn canvas_pages(&self) -> usize {
        match self {
            Self::Whole { .. } => 1,
            Self::Sliced { bands } => bands.len(),
        }
    }
}

/// Size after shrinking to the canvas width; never upscales.
pub fn fit_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scale = f64::from(max_width) / f64::from(width);
    let new_width = (f64::from(width) * scale) as u32;
    let new_height = (f64::from(height) * scale) as u32;
    (new_width.max(1), new_height.max(1))
}

pub fn exceeds_ratio_threshold(ratio_difference: f64) -> bool {
    ratio_difference > RATIO_THRESHOLD
}

/// Successive bands of at most `band_height` rows covering `0..height`
/// exactly once.
pub fn slice_bands(height: u32, band_height: u32) -> Vec<Band> {
    let band_height = band_height.max(1);
    let mut bands = Vec::new();
    let mut top = 0;
    while top < height {
        let bottom = top.saturating_add(band_height).min(height);
        bands.push(Band {
            top,
            height: bottom - top,
        });
        top = bottom;
    }
    bands
}

/// Decides placement for an image that has already been fitted to the canvas
/// width.
pub fn plan_page(canvas: &Canvas, width: u32, height: u32) -> PagePlan {
    if exceeds_ratio_threshold(canvas.ratio_difference(width, height)) {
        return PagePlan::Sliced {
            bands: slice_bands(height, canvas.height_px),
        };
    }

    let img_width_mm = px_to_mm(f64::from(width));
    let img_height_mm = px_to_mm(f64::from(height));
    let scale = (canvas.width_mm / img_width_mm).min(canvas.height_mm / img_height_mm);
    let new_width = img_width_mm * scale;
    let new_height = img_height_mm * scale;
    PagePlan::Whole {
        rect: RectMm {
            x: (canvas.width_mm - new_width) / 2.0,
            y: (canvas.height_mm - new_height) / 2.0,
            width: new_width,
            height: new_height,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutSummary {
    pub placed_images: usize,
    pub canvas_pages: usize,
    pub skipped: Vec<PathBuf>,
}

/// Lays out page images in the given order onto `doc`: each one whole and
/// centered on a canvas page, or sliced into top-aligned bands when its
/// proportions are too far from the canvas. Missing or undecodable files are
/// skipped with a warning. Every consumed source file is deleted once placed.
pub fn layout_pages(
    doc: &mut DocumentBuilder,
    canvas: &Canvas,
    paths: &[PathBuf],
) -> LayoutSummary {
    let mut summary = LayoutSummary::default();

    for path in paths {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "page file not found; skipping");
            summary.skipped.push(path.clone());
            continue;
        }

        match place_image(doc, canvas, path) {
            Ok(pages) => {
                summary.placed_images += 1;
                summary.canvas_pages += pages;
                remove_file_if_exists(path);
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "page image unusable; skipping"
                );
                summary.skipped.push(path.clone());
            }
        }
    }

    summary
}

fn place_image(doc: &mut DocumentBuilder, canvas: &Canvas, path: &Path) -> anyhow::Result<usize> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read page image: {}", path.display()))?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("decode page image: {}", path.display()))?;
    let stored_as_rgb_jpeg = image::guess_format(&bytes).ok() == Some(ImageFormat::Jpeg)
        && decoded.color() == image::ColorType::Rgb8;

    let (width, height) = fit_width(decoded.width(), decoded.height(), canvas.width_px);
    let resized = (width, height) != (decoded.width(), decoded.height());
    let image: RgbImage = if resized {
        decoded
            .resize_exact(width, height, FilterType::Lanczos3)
            .into_rgb8()
    } else {
        decoded.into_rgb8()
    };

    let plan = plan_page(canvas, width, height);
    match &plan {
        PagePlan::Whole { rect } => {
            let jpeg = if stored_as_rgb_jpeg && !resized {
                bytes
            } else {
                encode_jpeg(&image).context("encode page image")?
            };
            doc.add_page(Placement {
                jpeg,
                width_px: width,
                height_px: height,
                rect: *rect,
            });
        }
        PagePlan::Sliced { bands } => {
            for band in bands {
                let part =
                    image::imageops::crop_imm(&image, 0, band.top, width, band.height).to_image();
                let jpeg = encode_jpeg(&part).context("encode page band")?;
                doc.add_page(Placement {
                    jpeg,
                    width_px: width,
                    height_px: band.height,
                    rect: RectMm {
                        x: 0.0,
                        y: 0.0,
                        width: px_to_mm(f64::from(width)),
                        height: px_to_mm(f64::from(band.height)),
                    },
                });
            }
        }
    }

    Ok(plan.canvas_pages())
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn a4_canvas_in_device_pixels() {
        let canvas = Canvas::a4();
        assert_eq!((canvas.width_px, canvas.height_px), (793, 1122));
        assert!((px_to_mm(mm_to_px(210.0)) - 210.0).abs() < 1e-9);
        assert!((mm_to_pt(210.0) - 595.275_590_551).abs() < 1e-6);
    }

    #[test]
    fn fit_width_only_shrinks() {
        assert_eq!(fit_width(500, 900, 793), (500, 900));
        assert_eq!(fit_width(793, 100, 793), (793, 100));
        assert_eq!(fit_width(1586, 2000, 793), (793, 1000));
    }

    #[test]
    fn ratio_threshold_is_strict() {
        assert!(!exceeds_ratio_threshold(RATIO_THRESHOLD));
        assert!(exceeds_ratio_threshold(RATIO_THRESHOLD + f64::EPSILON));
        assert!(!exceeds_ratio_threshold(RATIO_THRESHOLD - f64::EPSILON));
    }

    #[test]
    fn plan_switches_on_either_side_of_threshold() {
        let canvas = Canvas {
            width_mm: 100.0,
            height_mm: 100.0,
            width_px: 100,
            height_px: 100,
        };
        assert!(matches!(plan_page(&canvas, 114, 100), PagePlan::Whole { .. }));
        assert!(matches!(plan_page(&canvas, 86, 100), PagePlan::Whole { .. }));
        assert!(matches!(plan_page(&canvas, 116, 100), PagePlan::Sliced { .. }));
        assert!(matches!(plan_page(&canvas, 84, 100), PagePlan::Sliced { .. }));
    }

    #[test]
    fn whole_page_is_centered_and_fitted() {
        let canvas = Canvas::a4();
        let PagePlan::Whole { rect } = plan_page(&canvas, 700, 1000) else {
            panic!("expected a whole-page plan");
        };
        assert!((rect.height - 297.0).abs() < 1e-9);
        assert!(rect.width <= 210.0);
        assert!((rect.x * 2.0 + rect.width - 210.0).abs() < 1e-9);
        assert!(rect.y.abs() < 1e-9);
    }

    #[test]
    fn bands_cover_height_exactly() {
        for (height, band) in [(3000, 1122), (1122, 1122), (1123, 1122), (1, 1122), (2244, 1122)] {
            let bands = slice_bands(height, band);
            assert_eq!(bands.len() as u32, height.div_ceil(band));
            assert_eq!(bands.iter().map(|b| b.height).sum::<u32>(), height);
            let mut expected_top = 0;
            for b in &bands {
                assert_eq!(b.top, expected_top);
                assert!(b.height <= band && b.height > 0);
                expected_top += b.height;
            }
        }
        assert!(slice_bands(0, 1122).is_empty());
    }

    #[test]
    fn tall_strip_is_sliced_into_canvas_bands() {
        let canvas = Canvas::a4();
        let plan = plan_page(&canvas, 700, 3000);
        assert_eq!(
            plan,
            PagePlan::Sliced {
                bands: vec![
                    Band { top: 0, height: 1122 },
                    Band { top: 1122, height: 1122 },
                    Band { top: 2244, height: 756 },
                ]
            }
        );
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
            .save_with_format(path, ImageFormat::Png)
            .expect("write png");
    }

    #[test]
    fn layout_skips_missing_and_corrupt_files_and_consumes_sources() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let whole = temp.path().join("1.jpg");
        let missing = temp.path().join("2.jpg");
        let corrupt = temp.path().join("3.jpg");
        let strip = temp.path().join("4.jpg");
        write_png(&whole, 400, 566);
        std::fs::write(&corrupt, b"not an image")?;
        write_png(&strip, 1586, 5000);

        let canvas = Canvas::a4();
        let mut doc = DocumentBuilder::new(&canvas);
        let summary = layout_pages(
            &mut doc,
            &canvas,
            &[whole.clone(), missing.clone(), corrupt.clone(), strip.clone()],
        );

        // The strip is halved to 793x2500, so three bands.
        assert_eq!(summary.placed_images, 2);
        assert_eq!(summary.canvas_pages, 4);
        assert_eq!(summary.skipped, vec![missing, corrupt.clone()]);
        assert_eq!(doc.page_count(), 4);
        assert!(!whole.exists());
        assert!(!strip.exists());
        assert!(corrupt.exists());
        Ok(())
    }

    #[test]
    fn layout_is_repeatable() -> anyhow::Result<()> {
        let canvas = Canvas::a4();
        let mut plans = Vec::new();
        for _ in 0..2 {
            let temp = tempfile::TempDir::new()?;
            let paths = [(300, 5000), (793, 1122), (2000, 1000)]
                .iter()
                .enumerate()
                .map(|(i, (w, h))| {
                    let path = temp.path().join(format!("{}.jpg", i + 1));
                    write_png(&path, *w, *h);
                    path
                })
                .collect::<Vec<_>>();
            let mut doc = DocumentBuilder::new(&canvas);
            let summary = layout_pages(&mut doc, &canvas, &paths);
            plans.push((summary.canvas_pages, doc.placements()));
        }
        assert_eq!(plans[0], plans[1]);
        Ok(())
    }
}
