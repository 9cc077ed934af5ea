//! Plugins shipped with the library.
//!
//! Built-in plugins can be enabled by name from configuration, which is the only way plugins
//! reach worker processes.

use crate::core::config::PipelineConfig;
use crate::ocr::sidecar::{SIDECAR_ENGINE, sidecar_path};
use crate::plugins::hooks::{HookImpl, OptionSpec, PageHookContext};
use crate::plugins::traits::{PipelinePlugin, Plugin};
use crate::{PalimpsestError, Result};
use std::path::PathBuf;

/// Converts the OCR input to grayscale, optionally binarizing it.
///
/// Only the image handed to the engine changes; the visible page is untouched.
pub struct GrayscaleOcrImage;

impl GrayscaleOcrImage {
    pub const NAME: &'static str = "grayscale-ocr-image";
    pub const THRESHOLD_OPTION: &'static str = "grayscale-ocr-image.threshold";

    fn threshold(config: &PipelineConfig) -> Result<Option<u8>> {
        match config.plugin_options.get(Self::THRESHOLD_OPTION) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u8>().map(Some).map_err(|_| {
                PalimpsestError::plugin(
                    Self::NAME,
                    format!("{} must be an integer between 0 and 255, got '{}'", Self::THRESHOLD_OPTION, raw),
                )
            }),
        }
    }

    fn filter(ctx: &PageHookContext<'_>) -> Result<Option<PathBuf>> {
        let threshold = Self::threshold(ctx.config)?;
        let mut gray = image::open(ctx.image)?.to_luma8();

        if let Some(threshold) = threshold {
            for pixel in gray.pixels_mut() {
                pixel.0[0] = if pixel.0[0] >= threshold { 255 } else { 0 };
            }
        }

        let output = ctx.work_dir.join(format!("page-{:04}.ocr-gray.png", ctx.unit.page_number()));
        gray.save(&output)?;
        tracing::debug!(page = ctx.unit.page_number(), path = %output.display(), "Wrote grayscale OCR image");
        Ok(Some(output))
    }
}

impl Plugin for GrayscaleOcrImage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        "Convert the OCR input image to grayscale"
    }
}

impl PipelinePlugin for GrayscaleOcrImage {
    fn hooks(&self) -> Vec<HookImpl> {
        vec![
            HookImpl::add_options(|| {
                Ok(vec![OptionSpec::new(
                    GrayscaleOcrImage::THRESHOLD_OPTION,
                    "Binarize the OCR image at this luma threshold (0-255)",
                )])
            }),
            HookImpl::check_options(|config| GrayscaleOcrImage::threshold(config).map(|_| ())),
            HookImpl::filter_ocr_image(GrayscaleOcrImage::filter),
        ]
    }
}

/// Selects the sidecar engine for pages that already have an hOCR file.
pub struct ReuseSidecarHocr;

impl ReuseSidecarHocr {
    pub const NAME: &'static str = "reuse-sidecar-hocr";

    fn choose(ctx: &PageHookContext<'_>) -> Result<Option<String>> {
        let Some(dir) = ctx.config.ocr.hocr_dir.as_deref() else {
            return Ok(None);
        };

        if !ctx.engines.iter().any(|e| e == SIDECAR_ENGINE) {
            return Ok(None);
        }

        if sidecar_path(dir, ctx.unit.page_number()).is_file() {
            Ok(Some(SIDECAR_ENGINE.to_string()))
        } else {
            Ok(None)
        }
    }
}

impl Plugin for ReuseSidecarHocr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        "Reuse existing hOCR files instead of running recognition"
    }
}

impl PipelinePlugin for ReuseSidecarHocr {
    fn hooks(&self) -> Vec<HookImpl> {
        vec![HookImpl::choose_ocr_engine(ReuseSidecarHocr::choose)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::HookRegistry;
    use crate::types::{PageGeometry, PageSource, PageUnit, Rotation};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn unit(index: usize) -> PageUnit {
        PageUnit {
            index,
            source: PageSource::Image {
                path: PathBuf::from("page.png"),
                dpi: 300.0,
            },
            geometry: PageGeometry::new(72.0, 72.0, Rotation::Deg0),
            has_existing_text: false,
            has_existing_ocr_text: false,
            policy: None,
        }
    }

    #[test]
    fn test_grayscale_threshold_option_is_checked() {
        let mut registry = HookRegistry::new();
        registry.register_plugin(Arc::new(GrayscaleOcrImage)).unwrap();

        let mut config = PipelineConfig::default();
        config
            .plugin_options
            .insert(GrayscaleOcrImage::THRESHOLD_OPTION.to_string(), "300".to_string());

        let checked = registry.check_options(&config);
        assert_eq!(checked.failures.len(), 1);
        assert_eq!(checked.failures[0].plugin_id, GrayscaleOcrImage::NAME);

        config
            .plugin_options
            .insert(GrayscaleOcrImage::THRESHOLD_OPTION.to_string(), "128".to_string());
        assert!(registry.check_options(&config).is_clean());
    }

    #[test]
    fn test_grayscale_filter_writes_binarized_image() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("page.png");
        let mut rgb = image::RgbImage::new(4, 1);
        rgb.put_pixel(0, 0, image::Rgb([10, 10, 10]));
        rgb.put_pixel(1, 0, image::Rgb([250, 250, 250]));
        rgb.save(&source).unwrap();

        let mut config = PipelineConfig::default();
        config
            .plugin_options
            .insert(GrayscaleOcrImage::THRESHOLD_OPTION.to_string(), "128".to_string());
        let unit = unit(0);
        let engines: Vec<String> = Vec::new();
        let ctx = PageHookContext {
            unit: &unit,
            image: &source,
            work_dir: dir.path(),
            engines: &engines,
            config: &config,
        };

        let output = GrayscaleOcrImage::filter(&ctx).unwrap().expect("filter should produce an image");
        let gray = image::open(&output).unwrap().to_luma8();
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_reuse_sidecar_only_when_file_exists() {
        let dir = tempdir().unwrap();
        std::fs::write(sidecar_path(dir.path(), 2), "<html/>").unwrap();

        let mut config = PipelineConfig::default();
        config.ocr.hocr_dir = Some(dir.path().to_path_buf());
        let engines = vec!["tesseract".to_string(), SIDECAR_ENGINE.to_string()];

        let with_file = unit(1);
        let ctx = PageHookContext {
            unit: &with_file,
            image: dir.path(),
            work_dir: dir.path(),
            engines: &engines,
            config: &config,
        };
        assert_eq!(ReuseSidecarHocr::choose(&ctx).unwrap().as_deref(), Some(SIDECAR_ENGINE));

        let without_file = unit(0);
        let ctx = PageHookContext {
            unit: &without_file,
            ..ctx
        };
        assert_eq!(ReuseSidecarHocr::choose(&ctx).unwrap(), None);
    }
}
