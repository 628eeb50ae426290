//! Frame helpers: cropping, resizing, encoding and overlay drawing
//!
//! Overlay text is not rendered (font rendering is an external concern);
//! only geometric markers are drawn.

use crate::error::Result;
use crate::models::{BBox, Frame, Point};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgb};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

/// Per-line colours, cycled by line index
pub const LINE_COLORS: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 0, 255]),
    Rgb([255, 255, 0]),
];

const JPEG_QUALITY: u8 = 80;

/// Encode a frame as JPEG for streaming
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(frame)?;
    Ok(buf)
}

/// Encode a frame as PNG (lossless, used for gallery samples and alarms)
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Resize by a uniform factor (e.g. 0.5 halves both dimensions)
pub fn resize(frame: &Frame, factor: f32) -> Frame {
    let width = ((frame.width() as f32 * factor) as u32).max(1);
    let height = ((frame.height() as f32 * factor) as u32).max(1);
    imageops::resize(frame, width, height, FilterType::Triangle)
}

/// Crop a region, clamped to the frame. Returns `None` for an empty region.
pub fn crop(frame: &Frame, bbox: &BBox) -> Option<Frame> {
    let b = bbox.clamp(frame.width(), frame.height());
    if b.is_empty() {
        return None;
    }
    Some(
        imageops::crop_imm(
            frame,
            b.x1 as u32,
            b.y1 as u32,
            b.width() as u32,
            b.height() as u32,
        )
        .to_image(),
    )
}

/// Rectangle outline, `thickness` pixels wide (drawn inwards)
pub fn draw_box(frame: &mut Frame, bbox: &BBox, color: Rgb<u8>, thickness: i32) {
    for t in 0..thickness {
        let w = bbox.width() - 2 * t;
        let h = bbox.height() - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + t, bbox.y1 + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Corner brackets, each arm a third of the box side
pub fn draw_corner_brackets(frame: &mut Frame, bbox: &BBox, color: Rgb<u8>) {
    let (l, t, r, b) = (
        bbox.x1 as f32,
        bbox.y1 as f32,
        bbox.x2 as f32,
        bbox.y2 as f32,
    );
    let lw = (bbox.width() / 3) as f32;
    let lh = (bbox.height() / 3) as f32;

    let segments = [
        ((l, t), (l + lw, t)),
        ((l, b), (l + lw, b)),
        ((r, t), (r - lw, t)),
        ((r, b), (r - lw, b)),
        ((l, t), (l, t + lh)),
        ((r, t), (r, t + lh)),
        ((l, b), (l, b - lh)),
        ((r, b), (r, b - lh)),
    ];
    for (start, end) in segments {
        draw_line_segment_mut(frame, start, end, color);
        draw_line_segment_mut(frame, (start.0 + 1.0, start.1 + 1.0), (end.0 + 1.0, end.1 + 1.0), color);
    }
}

pub fn draw_dot(frame: &mut Frame, center: Point, radius: i32, color: Rgb<u8>) {
    draw_filled_circle_mut(frame, (center.x, center.y), radius, color);
}

pub fn draw_segment(frame: &mut Frame, a: Point, b: Point, color: Rgb<u8>) {
    draw_line_segment_mut(frame, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
    draw_line_segment_mut(
        frame,
        (a.x as f32, a.y as f32 + 1.0),
        (b.x as f32, b.y as f32 + 1.0),
        color,
    );
}

/// Row of small status squares (filled = flag set), top-left corner
pub fn draw_flags(frame: &mut Frame, flags: &[bool]) {
    for (i, flag) in flags.iter().enumerate() {
        let x = 10 + i as i32 * 20;
        let rect = Rect::at(x, 10).of_size(12, 12);
        if *flag {
            imageproc::drawing::draw_filled_rect_mut(frame, rect, RED);
        } else {
            draw_hollow_rect_mut(frame, rect, RED);
        }
    }
}
