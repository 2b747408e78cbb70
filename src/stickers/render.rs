//! Sticker rendering with `image`/`imageproc`.
//!
//! Layout on a 700x700 transparent canvas:
//! - alert emoji (140x140) at (350, 200), optionally upside down
//! - place emoji (300x300) at the bottom-left
//! - label text in white on red, tilted 30 degrees, centred on (500, 400)
//! - countdown banner centred near the top

use super::{RenderError, StickerRenderer, StickerRequest};
use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::debug;

const CANVAS: u32 = 700;
const ALERT_EMOJI: (i64, i64, u32) = (350, 200, 140);
const PLACE_EMOJI: (i64, i64, u32) = (0, 300, 300);
const LABEL_CENTRE: (i64, i64) = (500, 400);
const LABEL_SCALE: f32 = 80.0;
const LABEL_PADDING: u32 = 10;
const LABEL_TILT_DEG: f32 = -30.0;
const BANNER_BASELINE: i32 = 80;
const BANNER_SCALE: f32 = 60.0;

/// Number of variants per emoji family: `{family}-{0..=n}.png`.
const ALERT_VARIANTS: u32 = 2;
const PLACE_VARIANTS: u32 = 4;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const SOFT_RED: Rgba<u8> = Rgba([255, 0, 0, 128]);

pub struct ImageStickerRenderer {
    assets_dir: PathBuf,
    output_dir: PathBuf,
    font: FontVec,
}

impl ImageStickerRenderer {
    pub fn new(assets_dir: PathBuf, output_dir: PathBuf, font_path: &Path) -> Result<Self, RenderError> {
        let bytes = std::fs::read(font_path).map_err(|source| RenderError::Font {
            path: font_path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| RenderError::InvalidFont(font_path.to_path_buf()))?;
        std::fs::create_dir_all(&output_dir).map_err(|source| RenderError::Io {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            assets_dir,
            output_dir,
            font,
        })
    }

    fn load_emoji(&self, family: &str, max_variant: u32, size: u32) -> Result<RgbaImage, RenderError> {
        let variant = rand::thread_rng().gen_range(0..=max_variant);
        let path = asset_path(&self.assets_dir, family, variant);
        let img = image::open(&path)
            .map_err(|source| RenderError::Image { path, source })?
            .to_rgba8();
        Ok(imageops::resize(&img, size, size, FilterType::Lanczos3))
    }

    /// Text on a red box, drawn on a square layer large enough to rotate freely.
    fn label_layer(&self, text: &str) -> RgbaImage {
        let scale = PxScale::from(LABEL_SCALE);
        let (w, h) = text_size(scale, &self.font, text);
        let bg_w = w + 2 * LABEL_PADDING;
        let bg_h = h + 2 * LABEL_PADDING;
        let side = ((bg_w as f32).hypot(bg_h as f32).ceil() as u32).max(1);

        let mut layer = RgbaImage::from_pixel(side, side, TRANSPARENT);
        let bg_x = (side - bg_w) / 2;
        let bg_y = (side - bg_h) / 2;
        draw_filled_rect_mut(&mut layer, Rect::at(bg_x as i32, bg_y as i32).of_size(bg_w, bg_h), RED);
        draw_text_mut(
            &mut layer,
            WHITE,
            (bg_x + LABEL_PADDING) as i32,
            (bg_y + LABEL_PADDING) as i32,
            scale,
            &self.font,
            text,
        );
        rotate_about_center(&layer, LABEL_TILT_DEG.to_radians(), Interpolation::Bilinear, TRANSPARENT)
    }

    fn draw_banner(&self, canvas: &mut RgbaImage, label: &str) {
        let scale = PxScale::from(BANNER_SCALE);
        let (w, h) = text_size(scale, &self.font, label);
        let bg_w = w + 40;
        let bg_h = h + 20;
        let centre = (CANVAS / 2) as i32;
        let bg_x = centre - (bg_w / 2) as i32;
        let bg_y = BANNER_BASELINE - h as i32 - 10;
        draw_filled_rect_mut(canvas, Rect::at(bg_x, bg_y).of_size(bg_w, bg_h), SOFT_RED);
        draw_text_mut(
            canvas,
            WHITE,
            centre - (w / 2) as i32,
            BANNER_BASELINE - h as i32,
            scale,
            &self.font,
            label,
        );
    }
}

impl StickerRenderer for ImageStickerRenderer {
    fn render(&self, request: &StickerRequest) -> Result<PathBuf, RenderError> {
        let mut canvas = RgbaImage::from_pixel(CANVAS, CANVAS, TRANSPARENT);

        let (x, y, size) = ALERT_EMOJI;
        let mut alert = self.load_emoji(request.kind.asset_prefix(), ALERT_VARIANTS, size)?;
        if request.rotate {
            alert = imageops::rotate180(&alert);
        }
        imageops::overlay(&mut canvas, &alert, x, y);

        let (x, y, size) = PLACE_EMOJI;
        let place = self.load_emoji(&request.theme, PLACE_VARIANTS, size)?;
        imageops::overlay(&mut canvas, &place, x, y);

        if !request.text.is_empty() {
            let layer = self.label_layer(&request.text);
            let half = (layer.width() / 2) as i64;
            imageops::overlay(&mut canvas, &layer, LABEL_CENTRE.0 - half, LABEL_CENTRE.1 - half);
        }

        if !request.runtime_label.is_empty() {
            self.draw_banner(&mut canvas, &request.runtime_label);
        }

        let path = self.output_dir.join(format!("{}.png", random_name(10)));
        canvas
            .save(&path)
            .map_err(|source| RenderError::Image {
                path: path.clone(),
                source,
            })?;
        debug!("Stickers: rendered {:?}", path);
        Ok(path)
    }
}

fn asset_path(assets_dir: &Path, family: &str, variant: u32) -> PathBuf {
    assets_dir.join(format!("{family}-{variant}.png"))
}

fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_names_follow_family_and_variant() {
        assert_eq!(
            asset_path(Path::new("/assets"), "plane", 2),
            PathBuf::from("/assets/plane-2.png")
        );
    }

    #[test]
    fn random_names_are_alphanumeric() {
        let name = random_name(10);
        assert_eq!(name.len(), 10);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn missing_font_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageStickerRenderer::new(
            dir.path().join("emojis"),
            dir.path().join("out"),
            &dir.path().join("missing.ttf"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderError::Font { .. }));
    }

    #[test]
    fn garbage_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("font.ttf");
        std::fs::write(&font, b"not a font").unwrap();
        let err = ImageStickerRenderer::new(dir.path().join("emojis"), dir.path().join("out"), &font)
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::InvalidFont(_)));
    }
}
