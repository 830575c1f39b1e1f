use crate::remove_bg::BackgroundRemover;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Geometric mirroring applied after background removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMode {
    /// Mirror left-right
    Horizontal,
    /// Mirror top-bottom
    Vertical,
    /// Mirror both axes
    Both,
    /// Pass the image through unchanged
    None,
}

/// Unrecognized flip direction in a request
#[derive(Debug, Error)]
#[error("unsupported flip direction: {0}")]
pub struct InvalidFlipMode(String);

impl FromStr for FlipMode {
    type Err = InvalidFlipMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "horizontal" => Ok(Self::Horizontal),
            "vertical" => Ok(Self::Vertical),
            "both" => Ok(Self::Both),
            "none" => Ok(Self::None),
            other => Err(InvalidFlipMode(other.to_string())),
        }
    }
}

/// Errors from the transform pipeline (background removal + flip)
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("input image is empty")]
    EmptyInput,

    #[error("background removal rejected the image: {0}")]
    UpstreamRejected(String),

    #[error("background removal request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to re-encode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Flip encoded image bytes, preserving the input format and dimensions.
///
/// `FlipMode::None` returns the bytes untouched without decoding.
pub fn flip_image(bytes: &[u8], mode: FlipMode) -> Result<Vec<u8>, TransformError> {
    if mode == FlipMode::None {
        return Ok(bytes.to_vec());
    }

    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory(bytes)?;

    let flipped = match mode {
        FlipMode::Horizontal => decoded.fliph(),
        FlipMode::Vertical => decoded.flipv(),
        FlipMode::Both => decoded.fliph().flipv(),
        FlipMode::None => unreachable!("handled above"),
    };

    let mut out = Cursor::new(Vec::new());
    flipped.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

/// Transform engine: background removal followed by a geometric flip.
///
/// A removal failure short-circuits the flip; nothing is retried.
pub struct Transformer {
    remover: Arc<dyn BackgroundRemover>,
}

impl Transformer {
    pub fn new(remover: Arc<dyn BackgroundRemover>) -> Self {
        Self { remover }
    }

    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len(), mode = ?mode))]
    pub async fn transform(&self, bytes: &[u8], mode: FlipMode) -> Result<Vec<u8>, TransformError> {
        if bytes.is_empty() {
            return Err(TransformError::EmptyInput);
        }

        let cut_out = self.remover.remove_background(bytes).await?;

        debug!(removed_bytes = cut_out.len(), "Background removed");

        flip_image(&cut_out, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoRemover {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundRemover for EchoRemover {
        async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(image.to_vec())
        }
    }

    fn gradient_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn decode(bytes: &[u8]) -> RgbaImage {
        image::load_from_memory(bytes).unwrap().to_rgba8()
    }

    #[test]
    fn test_flip_mode_parsing() {
        assert_eq!("horizontal".parse::<FlipMode>().unwrap(), FlipMode::Horizontal);
        assert_eq!("vertical".parse::<FlipMode>().unwrap(), FlipMode::Vertical);
        assert_eq!("both".parse::<FlipMode>().unwrap(), FlipMode::Both);
        assert_eq!("none".parse::<FlipMode>().unwrap(), FlipMode::None);
    }

    #[test]
    fn test_unknown_flip_mode_is_an_error() {
        assert!("diagonal".parse::<FlipMode>().is_err());
        assert!("HORIZONTAL".parse::<FlipMode>().is_err());
        assert!("".parse::<FlipMode>().is_err());
    }

    #[test]
    fn test_none_is_identity_on_bytes() {
        let bytes = encode_png(&gradient_image(8, 8));
        let out = flip_image(&bytes, FlipMode::None).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_horizontal_flip_is_self_inverse() {
        let original = gradient_image(16, 9);
        let bytes = encode_png(&original);

        let once = flip_image(&bytes, FlipMode::Horizontal).unwrap();
        let twice = flip_image(&once, FlipMode::Horizontal).unwrap();

        assert_eq!(decode(&twice), original);
    }

    #[test]
    fn test_both_flip_is_self_inverse() {
        let original = gradient_image(7, 5);
        let bytes = encode_png(&original);

        let once = flip_image(&bytes, FlipMode::Both).unwrap();
        let twice = flip_image(&once, FlipMode::Both).unwrap();

        assert_eq!(decode(&twice), original);
    }

    #[test]
    fn test_flip_preserves_dimensions() {
        let bytes = encode_png(&gradient_image(100, 50));

        for mode in [
            FlipMode::Horizontal,
            FlipMode::Vertical,
            FlipMode::Both,
            FlipMode::None,
        ] {
            let out = flip_image(&bytes, mode).unwrap();
            let img = decode(&out);
            assert_eq!((img.width(), img.height()), (100, 50), "mode {mode:?}");
        }
    }

    #[test]
    fn test_vertical_flip_reverses_row_order() {
        let original = gradient_image(100, 50);
        let bytes = encode_png(&original);

        let flipped = decode(&flip_image(&bytes, FlipMode::Vertical).unwrap());

        for x in [0, 42, 99] {
            assert_eq!(flipped.get_pixel(x, 0), original.get_pixel(x, 49));
            assert_eq!(flipped.get_pixel(x, 49), original.get_pixel(x, 0));
        }
    }

    #[test]
    fn test_horizontal_flip_mirrors_columns() {
        let original = gradient_image(10, 4);
        let bytes = encode_png(&original);

        let flipped = decode(&flip_image(&bytes, FlipMode::Horizontal).unwrap());

        assert_eq!(flipped.get_pixel(0, 2), original.get_pixel(9, 2));
        assert_eq!(flipped.get_pixel(9, 2), original.get_pixel(0, 2));
    }

    #[tokio::test]
    async fn test_empty_input_fails_before_removal() {
        let remover = Arc::new(EchoRemover {
            calls: AtomicUsize::new(0),
        });
        let transformer = Transformer::new(remover.clone());

        let result = transformer.transform(&[], FlipMode::Horizontal).await;

        assert!(matches!(result, Err(TransformError::EmptyInput)));
        assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transform_removes_then_flips() {
        let remover = Arc::new(EchoRemover {
            calls: AtomicUsize::new(0),
        });
        let transformer = Transformer::new(remover.clone());

        let original = gradient_image(6, 3);
        let bytes = encode_png(&original);

        let out = transformer
            .transform(&bytes, FlipMode::Vertical)
            .await
            .unwrap();

        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
        let img = decode(&out);
        assert_eq!(img.get_pixel(0, 0), original.get_pixel(0, 2));
    }
}
