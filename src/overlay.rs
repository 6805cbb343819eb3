//! Detection overlay for captured images.
//!
//! The service reports boxes in the image's native pixel space. Before they
//! are drawn, each axis is multiplied by `displayed / natural`. The overlay
//! is advisory only: nothing here touches the capture session.
//!
//! The annotated PNG carries box outlines only, no class text. Labels
//! ([`Detection::label`]) are printed by the console next to each box's
//! coordinates.

use std::path::Path;

use image::imageops::FilterType;
use image::{GenericImageView, Rgb, RgbImage};
use serde::Deserialize;

use crate::config::DisplaySettings;
use crate::error::CaptureError;
use crate::transport::payload::decode;
use crate::transport::{Endpoint, Form, ImageUpload, Request, Transport};

const BOX_COLOR: Rgb<u8> = Rgb([0xFF, 0x3B, 0x3B]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned box `[x1, y1, x2, y2]` with its class label.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub class: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn label(&self) -> String {
        match self.confidence {
            Some(confidence) => format!("{} ({:.2})", self.class, confidence),
            None => self.class.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectionsWire {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Boxes already scaled into displayed coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub natural: Size,
    pub displayed: Size,
    pub boxes: Vec<Detection>,
}

pub fn scale_box(bbox: [f32; 4], natural: Size, displayed: Size) -> [f32; 4] {
    let scale_x = displayed.width as f32 / natural.width as f32;
    let scale_y = displayed.height as f32 / natural.height as f32;
    [
        bbox[0] * scale_x,
        bbox[1] * scale_y,
        bbox[2] * scale_x,
        bbox[3] * scale_y,
    ]
}

/// Fits `natural` inside the display bounds, keeping aspect ratio. Never upscales.
pub fn displayed_size(natural: Size, display: DisplaySettings) -> Size {
    if natural.width <= display.max_width && natural.height <= display.max_height {
        return natural;
    }
    let ratio = f64::min(
        display.max_width as f64 / natural.width as f64,
        display.max_height as f64 / natural.height as f64,
    );
    Size {
        width: ((natural.width as f64 * ratio).round() as u32).max(1),
        height: ((natural.height as f64 * ratio).round() as u32).max(1),
    }
}

pub fn parse_detections(body: &[u8]) -> Result<Vec<Detection>, CaptureError> {
    let wire: DetectionsWire = decode(Endpoint::Detect, body)?;
    Ok(wire.detections)
}

/// Queries the detection endpoint for `image` and scales the boxes for display.
pub fn fetch_overlay(
    transport: &dyn Transport,
    image: &ImageUpload,
    display: DisplaySettings,
) -> Result<Overlay, CaptureError> {
    let natural = natural_size(image)?;
    let body = transport.send(Request::form(
        Endpoint::Detect,
        Form::new().file("file", image),
    ))?;
    let detections = parse_detections(&body)?;
    let displayed = displayed_size(natural, display);
    let boxes = detections
        .into_iter()
        .map(|detection| Detection {
            bbox: scale_box(detection.bbox, natural, displayed),
            ..detection
        })
        .collect();
    Ok(Overlay {
        natural,
        displayed,
        boxes,
    })
}

pub fn natural_size(image: &ImageUpload) -> Result<Size, CaptureError> {
    let decoded = image::load_from_memory(&image.bytes).map_err(|e| CaptureError::InvalidImage {
        path: image.file_name.clone(),
        reason: e.to_string(),
    })?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(CaptureError::InvalidImage {
            path: image.file_name.clone(),
            reason: "image has no pixels".to_string(),
        });
    }
    Ok(Size { width, height })
}

/// Draws the overlay onto a display-sized copy of `image`.
pub fn render_overlay(image: &ImageUpload, overlay: &Overlay) -> Result<RgbImage, CaptureError> {
    let decoded = image::load_from_memory(&image.bytes).map_err(|e| CaptureError::InvalidImage {
        path: image.file_name.clone(),
        reason: e.to_string(),
    })?;
    let mut canvas = image::imageops::resize(
        &decoded.to_rgb8(),
        overlay.displayed.width,
        overlay.displayed.height,
        FilterType::Triangle,
    );
    for detection in &overlay.boxes {
        draw_rect(&mut canvas, detection.bbox);
    }
    Ok(canvas)
}

pub fn write_overlay(image: &ImageUpload, overlay: &Overlay, out: &Path) -> anyhow::Result<()> {
    let canvas = render_overlay(image, overlay)?;
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(out)?;
    Ok(())
}

fn draw_rect(canvas: &mut RgbImage, bbox: [f32; 4]) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(width - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(height - 1);
    let (x1, x2) = (clamp_x(bbox[0].min(bbox[2])), clamp_x(bbox[0].max(bbox[2])));
    let (y1, y2) = (clamp_y(bbox[1].min(bbox[3])), clamp_y(bbox[1].max(bbox[3])));
    for x in x1..=x2 {
        canvas.put_pixel(x, y1, BOX_COLOR);
        canvas.put_pixel(x, y2, BOX_COLOR);
    }
    for y in y1..=y2 {
        canvas.put_pixel(x1, y, BOX_COLOR);
        canvas.put_pixel(x2, y, BOX_COLOR);
    }
}
