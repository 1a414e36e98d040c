/// Preprocessing of letter images into classifier feature vectors,
/// and recovery of the ground-truth letter from the image filename.
///
/// Features are produced by an area-averaging downscale to 32x32, a
/// fixed-point grayscale conversion and a /255 scale, flattened row-major.
/// Swapping the resize kernel changes every feature value, so models trained
/// on features from a different kernel must not be mixed with these.

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{Error, Result};

pub const IMAGE_INPUT_SIZE: usize = 32;
pub const FEATURE_VECTOR_LENGTH: usize = IMAGE_INPUT_SIZE * IMAGE_INPUT_SIZE;

/// The 28 letters a sample can be labeled with. Filename label indices point into this table.
pub const ALPHABET: [&str; 28] = [
    "ا", "ب", "ت", "ث", "ج", "ح", "خ", "د", "ذ", "ر", "ز", "س", "ش", "ص", "ض",
    "ط", "ظ", "ع", "غ", "ف", "ق", "ك", "ل", "م", "ن", "ه", "و", "ي",
];

// BT.601 luma weights in Q14, as used by OpenCV's BGR2GRAY.
const GRAY_R: u32 = 4899;
const GRAY_G: u32 = 9617;
const GRAY_B: u32 = 1868;
const GRAY_SHIFT: u32 = 14;

pub fn is_known_label(label: &str) -> bool
{
    ALPHABET.contains(&label)
}

/// Loads the image at `path` and turns it into a feature vector of
/// `FEATURE_VECTOR_LENGTH` values in [0, 1].
pub fn preprocess_image(path: &Path) -> Result<Vec<f32>>
{
    let img = image::open(path).map_err(|e| Error::Preprocessing {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(image_to_features(&img))
}

/// Same as `preprocess_image`, for an encoded image already in memory.
pub fn preprocess_bytes(name: &str, bytes: &[u8]) -> Result<Vec<f32>>
{
    let img = image::load_from_memory(bytes).map_err(|e| Error::Preprocessing {
        path: PathBuf::from(name),
        reason: e.to_string(),
    })?;
    Ok(image_to_features(&img))
}

/// Preprocesses a batch of image files in parallel.
/// Failures are returned per file so that one unreadable image does not affect the others.
pub fn preprocess_batch(paths: &[PathBuf]) -> Vec<(PathBuf, Result<Vec<f32>>)>
{
    paths.par_iter()
        .map(|path| (path.clone(), preprocess_image(path)))
        .collect()
}

pub fn image_to_features(img: &DynamicImage) -> Vec<f32>
{
    let rgb = img.to_rgb8();
    let resized = resize_area(&rgb, IMAGE_INPUT_SIZE as u32, IMAGE_INPUT_SIZE as u32);

    resized.pixels()
        .map(|pixel| {
            let [r, g, b] = pixel.0;
            let gray = (r as u32 * GRAY_R + g as u32 * GRAY_G + b as u32 * GRAY_B + (1 << (GRAY_SHIFT - 1))) >> GRAY_SHIFT;
            gray as f32 / 255.
        })
        .collect()
}

/// Resizes with pixel-area averaging: every destination pixel is the mean of
/// the source area it covers, with partially covered source pixels weighted
/// by their overlap. Channel values are rounded half to even like `cvRound`.
/// For downscaling this matches OpenCV's INTER_AREA. Sources smaller than the
/// destination get a box/nearest blend here, where OpenCV switches to bilinear,
/// so upscaled inputs can differ by a few gray levels.
pub fn resize_area(src: &RgbImage, dst_width: u32, dst_height: u32) -> RgbImage
{
    let x_weights = area_weights(src.width(), dst_width);
    let y_weights = area_weights(src.height(), dst_height);

    let mut dst = RgbImage::new(dst_width, dst_height);
    for (dy, row_weights) in y_weights.iter().enumerate()
    {
        for (dx, col_weights) in x_weights.iter().enumerate()
        {
            let mut acc = [0f64; 3];
            for &(sy, wy) in row_weights
            {
                for &(sx, wx) in col_weights
                {
                    let p = src.get_pixel(sx as u32, sy as u32).0;
                    let w = wy * wx;
                    acc[0] += p[0] as f64 * w;
                    acc[1] += p[1] as f64 * w;
                    acc[2] += p[2] as f64 * w;
                }
            }
            let out = acc.map(|v| v.round_ties_even().clamp(0., 255.) as u8);
            dst.put_pixel(dx as u32, dy as u32, image::Rgb(out));
        }
    }
    dst
}

/// For each destination index, the source indices it covers and their
/// normalized overlap weights. Weights of one destination index sum to 1.
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f64)>>
{
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = (d + 1) as f64 * scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len as usize);
            (first..last)
                .filter_map(|s| {
                    let overlap = end.min((s + 1) as f64) - start.max(s as f64);
                    (overlap > 1e-9).then(|| (s, overlap / scale))
                })
                .collect()
        })
        .collect()
}

/// Infers the ground-truth letter from a sample filename.
///
/// Two conventions exist, with different index bases:
/// - `tutorial_letter_<N>.<ext>`: N is a 0-based index into `ALPHABET`.
/// - `<anything>_label_<N>.<ext>`: N is a 1-based index into `ALPHABET`.
pub fn extract_label(filename: &str) -> Result<&'static str>
{
    let unknown = || Error::UnknownLabelPattern(filename.to_string());

    if filename.contains("tutorial_letter")
    {
        let index: usize = filename.strip_prefix("tutorial_letter_")
            .and_then(leading_index)
            .ok_or_else(unknown)?;
        return ALPHABET.get(index).copied().ok_or_else(unknown);
    }

    if let Some((_, rest)) = filename.split_once("_label_")
    {
        let index = leading_index(rest).ok_or_else(unknown)?;
        // 1-based; there is no letter 0.
        return index.checked_sub(1)
            .and_then(|i| ALPHABET.get(i).copied())
            .ok_or_else(unknown);
    }

    Err(unknown())
}

/// Parses the `<N>` of `<N>.<ext>`.
fn leading_index(s: &str) -> Option<usize>
{
    let (number, _ext) = s.split_once('.')?;
    number.parse().ok()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn tutorial_letter_is_zero_based()
    {
        assert_eq!(extract_label("tutorial_letter_0.png").unwrap(), ALPHABET[0]);
        assert_eq!(extract_label("tutorial_letter_27.png").unwrap(), ALPHABET[27]);
        assert!(extract_label("tutorial_letter_28.png").is_err());
    }

    #[test]
    fn label_suffix_is_one_based()
    {
        assert_eq!(extract_label("x_label_1.png").unwrap(), ALPHABET[0]);
        assert_eq!(extract_label("x_label_28.png").unwrap(), ALPHABET[27]);
        assert_eq!(extract_label("user3_sample_label_2.jpg").unwrap(), ALPHABET[1]);
        assert!(extract_label("x_label_0.png").is_err());
        assert!(extract_label("x_label_29.png").is_err());
    }

    #[test]
    fn unknown_patterns_are_errors()
    {
        for name in ["cat.png", "label_3.png", "x_label_three.png", "tutorial_letter_x.png", "x_label_4"]
        {
            match extract_label(name)
            {
                Err(Error::UnknownLabelPattern(n)) => assert_eq!(n, name),
                other => panic!("expected UnknownLabelPattern for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn features_have_fixed_length_and_range()
    {
        let img = RgbImage::from_fn(97, 53, |x, y| Rgb([(x * 2) as u8, (y * 4) as u8, ((x + y) % 256) as u8]));
        let features = image_to_features(&DynamicImage::ImageRgb8(img));
        assert_eq!(features.len(), FEATURE_VECTOR_LENGTH);
        assert!(features.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn area_resize_averages_blocks()
    {
        // 64x64 -> 32x32 averages 2x2 blocks exactly.
        let img = RgbImage::from_fn(64, 64, |x, _| if x % 2 == 0 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let resized = resize_area(&img, 32, 32);
        assert!(resized.pixels().all(|p| p.0 == [100, 100, 100]));
    }

    #[test]
    fn area_resize_rounds_ties_to_even()
    {
        // Each 2x2 block averages to x.5.
        let img = RgbImage::from_fn(4, 2, |x, _| match x {
            0 => Rgb([0, 0, 0]),
            1 => Rgb([1, 1, 1]),
            2 => Rgb([2, 2, 2]),
            _ => Rgb([3, 3, 3]),
        });
        let resized = resize_area(&img, 2, 1);
        assert_eq!(resized.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(resized.get_pixel(1, 0).0, [2, 2, 2]);
    }

    #[test]
    fn area_weights_sum_to_one()
    {
        for (src, dst) in [(100, 32), (32, 32), (45, 32), (20, 32)]
        {
            for weights in area_weights(src, dst)
            {
                let sum: f64 = weights.iter().map(|(_, w)| w).sum();
                approx::assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn grayscale_uses_luma_weights()
    {
        let white = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
        let features = image_to_features(&DynamicImage::ImageRgb8(white));
        assert!(features.iter().all(|&v| v == 1.0));

        let red = RgbImage::from_pixel(32, 32, Rgb([255, 0, 0]));
        let features = image_to_features(&DynamicImage::ImageRgb8(red));
        // round(255 * 0.299) = 76
        approx::assert_abs_diff_eq!(features[0], 76. / 255., epsilon = 1e-6);
    }

    #[test]
    fn preprocess_reads_files_and_rejects_garbage()
    {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("tutorial_letter_3.png");
        GrayImage::from_pixel(40, 40, Luma([128])).save(&good).unwrap();
        let bad = dir.path().join("x_label_2.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let features = preprocess_image(&good).unwrap();
        assert_eq!(features.len(), FEATURE_VECTOR_LENGTH);
        approx::assert_abs_diff_eq!(features[0], 128. / 255., epsilon = 1e-6);

        assert!(matches!(preprocess_image(&bad), Err(Error::Preprocessing { .. })));
        assert!(matches!(preprocess_image(&dir.path().join("missing.png")), Err(Error::Preprocessing { .. })));

        let bytes = std::fs::read(&good).unwrap();
        assert_eq!(preprocess_bytes("upload.png", &bytes).unwrap(), features);
        assert!(preprocess_bytes("upload.png", b"junk").is_err());

        let batch = preprocess_batch(&[good.clone(), bad.clone()]);
        assert_eq!(batch[0].0, good);
        assert!(batch[0].1.is_ok());
        assert!(batch[1].1.is_err());
    }
}
