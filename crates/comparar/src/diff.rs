//! Image diff port and the default pure-Rust pixel differ.
//!
//! The comparison engine only talks to [`ImageDiffer`]; [`DiffOptions`] are
//! handed through untouched from the session configuration.

use crate::result::{CompararError, CompararResult};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageEncoder, Rgba};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Highlight color used for differing pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorColor {
    /// Red channel
    pub red: u8,
    /// Green channel
    pub green: u8,
    /// Blue channel
    pub blue: u8,
}

impl Default for ErrorColor {
    fn default() -> Self {
        Self {
            red: 0,
            green: 0,
            blue: 255,
        }
    }
}

/// Options forwarded to the image differ
///
/// Deserializes from the flat layout written by [`Serialize`] and from the
/// nested `{"output": {"errorColor", "transparency"}}` layout of older
/// settings files. Flat keys win when both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DiffOptionsDocument", rename_all = "camelCase")]
pub struct DiffOptions {
    /// Per-pixel color difference tolerance (sum of RGB channel deltas)
    pub color_threshold: u8,
    /// Color painted over differing pixels in the diff image
    pub error_color: ErrorColor,
    /// Opacity (0.0-1.0) of unchanged pixels in the diff image
    pub transparency: f32,
    /// Rescale the compared image to the baseline's size before diffing
    pub scale_to_same_size: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            color_threshold: 10,
            error_color: ErrorColor::default(),
            transparency: 0.6,
            scale_to_same_size: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DiffOutputDocument {
    error_color: Option<ErrorColor>,
    transparency: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DiffOptionsDocument {
    color_threshold: Option<u8>,
    error_color: Option<ErrorColor>,
    transparency: Option<f32>,
    scale_to_same_size: Option<bool>,
    output: DiffOutputDocument,
}

impl From<DiffOptionsDocument> for DiffOptions {
    fn from(doc: DiffOptionsDocument) -> Self {
        let defaults = Self::default();
        Self {
            color_threshold: doc.color_threshold.unwrap_or(defaults.color_threshold),
            error_color: doc
                .error_color
                .or(doc.output.error_color)
                .unwrap_or(defaults.error_color),
            transparency: doc
                .transparency
                .or(doc.output.transparency)
                .unwrap_or(defaults.transparency),
            scale_to_same_size: doc
                .scale_to_same_size
                .unwrap_or(defaults.scale_to_same_size),
        }
    }
}

impl DiffOptions {
    /// Set the per-pixel color threshold
    #[must_use]
    pub const fn with_color_threshold(mut self, threshold: u8) -> Self {
        self.color_threshold = threshold;
        self
    }

    /// Set the highlight color
    #[must_use]
    pub const fn with_error_color(mut self, red: u8, green: u8, blue: u8) -> Self {
        self.error_color = ErrorColor { red, green, blue };
        self
    }

    /// Set the opacity of unchanged pixels
    #[must_use]
    pub const fn with_transparency(mut self, transparency: f32) -> Self {
        self.transparency = transparency;
        self
    }

    /// Enable or disable rescaling of differently sized images
    #[must_use]
    pub const fn with_scale_to_same_size(mut self, scale: bool) -> Self {
        self.scale_to_same_size = scale;
        self
    }
}

/// Width/height delta between the two inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDifference {
    /// Compared width minus baseline width
    pub width: i64,
    /// Compared height minus baseline height
    pub height: i64,
}

/// Bounding box of all differing pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBounds {
    /// Leftmost differing column
    pub left: u32,
    /// Topmost differing row
    pub top: u32,
    /// Rightmost differing column
    pub right: u32,
    /// Bottom differing row
    pub bottom: u32,
}

/// Raw metadata produced by [`PixelDiffer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    /// Percentage of pixels that differ (0.0-100.0)
    pub mismatch_percentage: f64,
    /// Number of pixels that differ
    pub diff_pixel_count: usize,
    /// Total number of pixels compared
    pub total_pixels: usize,
    /// Maximum color difference found
    pub max_color_diff: u32,
    /// Average color difference for differing pixels
    pub avg_color_diff: f64,
    /// Whether both inputs had the same dimensions before any scaling
    pub is_same_dimensions: bool,
    /// Dimension delta of the inputs
    pub dimension_difference: DimensionDifference,
    /// Box around the differing pixels, `None` when identical
    pub diff_bounds: Option<DiffBounds>,
    /// Wall time spent in the analysis
    pub analysis_time_ms: u64,
}

/// What an [`ImageDiffer`] returns for one pair
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Similarity score; for [`PixelDiffer`] the mismatch percentage
    pub score: f64,
    /// Rendered diff image (PNG encoded)
    pub diff_image: Vec<u8>,
    /// Differ-specific metadata persisted alongside the score
    pub raw: serde_json::Value,
}

/// Pixel-diff port used by the comparison engine
pub trait ImageDiffer: Send + Sync {
    /// Compare `compared` against `baseline` (both encoded images)
    ///
    /// # Errors
    ///
    /// Returns an error if either image cannot be decoded or the diff
    /// image cannot be rendered.
    fn diff(
        &self,
        baseline: &[u8],
        compared: &[u8],
        options: &DiffOptions,
    ) -> CompararResult<DiffOutcome>;
}

/// Default differ: per-pixel RGB distance with a tolerance
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelDiffer;

impl PixelDiffer {
    /// Create a new pixel differ
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compare two decoded images, returning the report and the diff image
    ///
    /// # Errors
    ///
    /// Returns error if dimensions differ and scaling is disabled, or the
    /// diff image cannot be encoded.
    pub fn compare_dynamic_images(
        &self,
        baseline: &DynamicImage,
        compared: &DynamicImage,
        options: &DiffOptions,
    ) -> CompararResult<(DiffReport, Vec<u8>)> {
        let started = Instant::now();
        let (width, height) = baseline.dimensions();
        let (cmp_width, cmp_height) = compared.dimensions();
        let is_same_dimensions = width == cmp_width && height == cmp_height;

        let compared_rgba = if is_same_dimensions {
            compared.to_rgba8()
        } else if options.scale_to_same_size {
            compared
                .resize_exact(width, height, FilterType::Triangle)
                .to_rgba8()
        } else {
            return Err(CompararError::image(format!(
                "Image dimensions differ: baseline {width}x{height}, compared {cmp_width}x{cmp_height}"
            )));
        };
        let baseline_rgba = baseline.to_rgba8();

        let total_pixels = (width as usize) * (height as usize);
        let mut diff_pixel_count = 0usize;
        let mut max_color_diff: u32 = 0;
        let mut total_color_diff: u64 = 0;
        let mut bounds: Option<DiffBounds> = None;

        let ErrorColor { red, green, blue } = options.error_color;
        let alpha = (options.transparency.clamp(0.0, 1.0) * 255.0).round() as u8;
        let mut diff_img = image::RgbaImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let base_pixel = *baseline_rgba.get_pixel(x, y);
                let color_diff = pixel_diff(base_pixel, *compared_rgba.get_pixel(x, y));

                if color_diff > u32::from(options.color_threshold) {
                    diff_pixel_count += 1;
                    total_color_diff += u64::from(color_diff);
                    max_color_diff = max_color_diff.max(color_diff);
                    bounds = Some(extend_bounds(bounds, x, y));
                    diff_img.put_pixel(x, y, Rgba([red, green, blue, 255]));
                } else {
                    let Rgba([r, g, b, _]) = base_pixel;
                    diff_img.put_pixel(x, y, Rgba([r, g, b, alpha]));
                }
            }
        }

        let mismatch_percentage = if total_pixels > 0 {
            (diff_pixel_count as f64 / total_pixels as f64) * 100.0
        } else {
            0.0
        };
        let avg_color_diff = if diff_pixel_count > 0 {
            total_color_diff as f64 / diff_pixel_count as f64
        } else {
            0.0
        };

        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(
                diff_img.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| CompararError::image(format!("Failed to encode diff image: {e}")))?;

        let report = DiffReport {
            mismatch_percentage,
            diff_pixel_count,
            total_pixels,
            max_color_diff,
            avg_color_diff,
            is_same_dimensions,
            dimension_difference: DimensionDifference {
                width: i64::from(cmp_width) - i64::from(width),
                height: i64::from(cmp_height) - i64::from(height),
            },
            diff_bounds: bounds,
            analysis_time_ms: started.elapsed().as_millis() as u64,
        };
        Ok((report, buffer))
    }
}

impl ImageDiffer for PixelDiffer {
    fn diff(
        &self,
        baseline: &[u8],
        compared: &[u8],
        options: &DiffOptions,
    ) -> CompararResult<DiffOutcome> {
        let baseline_img = image::load_from_memory(baseline)
            .map_err(|e| CompararError::image(format!("Failed to decode baseline image: {e}")))?;
        let compared_img = image::load_from_memory(compared)
            .map_err(|e| CompararError::image(format!("Failed to decode compared image: {e}")))?;

        let (report, diff_image) =
            self.compare_dynamic_images(&baseline_img, &compared_img, options)?;
        Ok(DiffOutcome {
            score: report.mismatch_percentage,
            diff_image,
            raw: serde_json::to_value(&report)?,
        })
    }
}

/// Calculate pixel difference (sum of RGB channel differences)
fn pixel_diff(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    let Rgba([r1, g1, b1, _]) = a;
    let Rgba([r2, g2, b2, _]) = b;

    let dr = i32::from(r1) - i32::from(r2);
    let dg = i32::from(g1) - i32::from(g2);
    let db = i32::from(b1) - i32::from(b2);

    dr.unsigned_abs() + dg.unsigned_abs() + db.unsigned_abs()
}

fn extend_bounds(bounds: Option<DiffBounds>, x: u32, y: u32) -> DiffBounds {
    match bounds {
        None => DiffBounds {
            left: x,
            top: y,
            right: x,
            bottom: y,
        },
        Some(b) => DiffBounds {
            left: b.left.min(x),
            top: b.top.min(y),
            right: b.right.max(x),
            bottom: b.bottom.max(y),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    /// Encode a solid-color PNG
    pub(crate) fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let mut img = image::RgbaImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Rgba(color);
        }
        encode(&img)
    }

    fn encode(img: &image::RgbaImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                image::ExtendedColorType::Rgba8,
            )
            .unwrap();
        buffer
    }

    #[test]
    fn test_identical_images() {
        let png = solid_png(4, 4, [10, 20, 30, 255]);
        let outcome = PixelDiffer::new()
            .diff(&png, &png, &DiffOptions::default())
            .unwrap();

        assert_eq!(outcome.score, 0.0);
        assert!(!outcome.diff_image.is_empty());
        let report: DiffReport = serde_json::from_value(outcome.raw).unwrap();
        assert_eq!(report.diff_pixel_count, 0);
        assert_eq!(report.total_pixels, 16);
        assert!(report.is_same_dimensions);
        assert!(report.diff_bounds.is_none());
    }

    #[test]
    fn test_completely_different_images() {
        let red = solid_png(2, 2, [255, 0, 0, 255]);
        let green = solid_png(2, 2, [0, 255, 0, 255]);
        let outcome = PixelDiffer::new()
            .diff(&red, &green, &DiffOptions::default())
            .unwrap();

        assert_eq!(outcome.score, 100.0);
        let report: DiffReport = serde_json::from_value(outcome.raw).unwrap();
        assert_eq!(report.diff_pixel_count, 4);
        assert_eq!(report.max_color_diff, 510);
        assert_eq!(
            report.diff_bounds,
            Some(DiffBounds {
                left: 0,
                top: 0,
                right: 1,
                bottom: 1
            })
        );
    }

    #[test]
    fn test_partial_difference_and_bounds() {
        let mut base = image::RgbaImage::new(4, 4);
        for pixel in base.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 255]);
        }
        let mut changed = base.clone();
        changed.put_pixel(1, 2, Rgba([255, 255, 255, 255]));
        changed.put_pixel(3, 3, Rgba([255, 255, 255, 255]));

        let outcome = PixelDiffer::new()
            .diff(&encode(&base), &encode(&changed), &DiffOptions::default())
            .unwrap();
        assert!((outcome.score - 12.5).abs() < f64::EPSILON);

        let report: DiffReport = serde_json::from_value(outcome.raw).unwrap();
        assert_eq!(
            report.diff_bounds,
            Some(DiffBounds {
                left: 1,
                top: 2,
                right: 3,
                bottom: 3
            })
        );
    }

    #[test]
    fn test_color_threshold_tolerates_small_changes() {
        let a = solid_png(2, 2, [100, 100, 100, 255]);
        let b = solid_png(2, 2, [102, 102, 102, 255]);

        let lenient = PixelDiffer::new()
            .diff(&a, &b, &DiffOptions::default())
            .unwrap();
        assert_eq!(lenient.score, 0.0);

        let strict = PixelDiffer::new()
            .diff(&a, &b, &DiffOptions::default().with_color_threshold(0))
            .unwrap();
        assert_eq!(strict.score, 100.0);
    }

    #[test]
    fn test_diff_image_uses_error_color() {
        let a = solid_png(1, 1, [0, 0, 0, 255]);
        let b = solid_png(1, 1, [255, 255, 255, 255]);
        let options = DiffOptions::default().with_error_color(255, 0, 255);

        let outcome = PixelDiffer::new().diff(&a, &b, &options).unwrap();
        let diff = image::load_from_memory(&outcome.diff_image)
            .unwrap()
            .to_rgba8();
        assert_eq!(*diff.get_pixel(0, 0), Rgba([255, 0, 255, 255]));
    }

    #[test]
    fn test_unchanged_pixels_use_transparency() {
        let a = solid_png(1, 1, [40, 50, 60, 255]);
        let options = DiffOptions::default().with_transparency(0.5);

        let outcome = PixelDiffer::new().diff(&a, &a, &options).unwrap();
        let diff = image::load_from_memory(&outcome.diff_image)
            .unwrap()
            .to_rgba8();
        assert_eq!(*diff.get_pixel(0, 0), Rgba([40, 50, 60, 128]));
    }

    #[test]
    fn test_different_sizes_are_scaled() {
        let a = solid_png(4, 4, [10, 10, 10, 255]);
        let b = solid_png(8, 8, [10, 10, 10, 255]);

        let outcome = PixelDiffer::new()
            .diff(&a, &b, &DiffOptions::default())
            .unwrap();
        let report: DiffReport = serde_json::from_value(outcome.raw).unwrap();
        assert!(!report.is_same_dimensions);
        assert_eq!(report.total_pixels, 16);
        assert_eq!(
            report.dimension_difference,
            DimensionDifference {
                width: 4,
                height: 4
            }
        );
        assert_eq!(report.diff_pixel_count, 0);
    }

    #[test]
    fn test_different_sizes_without_scaling_fail() {
        let a = solid_png(4, 4, [10, 10, 10, 255]);
        let b = solid_png(2, 2, [10, 10, 10, 255]);
        let options = DiffOptions::default().with_scale_to_same_size(false);

        let err = PixelDiffer::new().diff(&a, &b, &options).unwrap_err();
        assert!(err.to_string().contains("dimensions differ"));
    }

    #[test]
    fn test_invalid_image_data() {
        let png = solid_png(1, 1, [0, 0, 0, 255]);
        let err = PixelDiffer::new()
            .diff(b"not an image", &png, &DiffOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("baseline"));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: DiffOptions =
            serde_json::from_str(r#"{"errorColor":{"red":255,"green":0,"blue":0}}"#).unwrap();
        assert_eq!(options.error_color.red, 255);
        assert_eq!(options.color_threshold, 10);
        assert!(options.scale_to_same_size);
    }

    #[test]
    fn test_options_deserialize_nested_output() {
        let options: DiffOptions = serde_json::from_str(
            r#"{
                "output": {
                    "errorColor": {"red": 255, "green": 0, "blue": 255},
                    "errorType": "movement",
                    "transparency": 0.3,
                    "outputDiff": true
                },
                "scaleToSameSize": false,
                "ignore": "antialiasing"
            }"#,
        )
        .unwrap();
        assert_eq!(options.error_color, ErrorColor { red: 255, green: 0, blue: 255 });
        assert!((options.transparency - 0.3).abs() < f32::EPSILON);
        assert!(!options.scale_to_same_size);
        assert_eq!(options.color_threshold, 10);

        let flat_wins: DiffOptions =
            serde_json::from_str(r#"{"transparency": 0.9, "output": {"transparency": 0.1}}"#)
                .unwrap();
        assert!((flat_wins.transparency - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_pixel_diff_calculation() {
        assert_eq!(
            pixel_diff(Rgba([10, 20, 30, 255]), Rgba([10, 20, 30, 0])),
            0
        );
        assert_eq!(
            pixel_diff(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255])),
            765
        );
    }
}
