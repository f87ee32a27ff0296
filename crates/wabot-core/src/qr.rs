//! Login QR rendering.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::svg;
use qrcode::QrCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to render QR code: {0}")]
pub struct RenderError(pub String);

/// Turns a raw QR payload into an image data URI.
pub trait QrRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<String, RenderError>;
}

/// Renders black-on-white SVG and embeds it as `data:image/svg+xml;base64,...`.
#[derive(Debug, Clone)]
pub struct SvgQrRenderer {
    min_size: u32,
}

impl SvgQrRenderer {
    pub fn new() -> Self {
        Self { min_size: 256 }
    }

    pub fn with_min_size(min_size: u32) -> Self {
        Self { min_size }
    }
}

impl Default for SvgQrRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl QrRenderer for SvgQrRenderer {
    fn render(&self, payload: &str) -> Result<String, RenderError> {
        let code = QrCode::new(payload.as_bytes()).map_err(|e| RenderError(e.to_string()))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(self.min_size, self.min_size)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build();
        Ok(format!(
            "data:image/svg+xml;base64,{}",
            STANDARD.encode(image.as_bytes())
        ))
    }
}
