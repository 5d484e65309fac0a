//! Live preview window via `minifb`.

use crate::frame::Frame;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use thiserror::Error;

const BOX_COLOR: u32 = 0x00_00_FF_00;
const TEXT_COLOR: u32 = 0x00_00_00_00;
const BOX_THICKNESS: i32 = 2;
/// Height of the filled name strip along the bottom edge of a box.
const LABEL_STRIP: i32 = 12;
const GLYPH_SIZE: i32 = 8;
const LABEL_PADDING: i32 = 2;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("cannot create window: {0}")]
    Create(String),
    #[error("cannot update window: {0}")]
    Update(String),
}

/// A labelled box drawn on top of a frame, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub label: String,
}

/// Where annotated frames go, and where the user asks to stop.
pub trait Surface {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), DisplayError>;

    /// Polled once per frame after `present`.
    fn quit_requested(&self) -> bool;
}

/// Desktop window showing the annotated feed. Closed on drop.
pub struct PreviewWindow {
    window: Window,
    title: String,
    buffer: Vec<u32>,
}

impl PreviewWindow {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        let window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions::default(),
        )
        .map_err(|e| DisplayError::Create(e.to_string()))?;

        tracing::info!(title, width, height, "preview window opened");
        Ok(Self {
            window,
            title: title.to_string(),
            buffer: Vec::new(),
        })
    }
}

impl Surface for PreviewWindow {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), DisplayError> {
        render_into(&mut self.buffer, frame, overlays);

        // Labels clip in narrow boxes; the title carries every name.
        let title = if overlays.is_empty() {
            self.title.clone()
        } else {
            let names: Vec<&str> = overlays.iter().map(|o| o.label.as_str()).collect();
            format!("{}: {}", self.title, names.join(", "))
        };
        self.window.set_title(&title);

        self.window
            .update_with_buffer(&self.buffer, frame.width as usize, frame.height as usize)
            .map_err(|e| DisplayError::Update(e.to_string()))
    }

    fn quit_requested(&self) -> bool {
        !self.window.is_open() || self.window.is_key_pressed(Key::Q, KeyRepeat::No)
    }
}

/// Expand grayscale to 0RGB and draw the overlays: a box per face with
/// its label written in a strip along the bottom edge.
pub fn render_into(buffer: &mut Vec<u32>, frame: &Frame, overlays: &[Overlay]) {
    buffer.clear();
    buffer.extend(frame.data.iter().map(|&p| {
        let p = p as u32;
        (p << 16) | (p << 8) | p
    }));

    let (w, h) = (frame.width as i32, frame.height as i32);
    let mut put = |x: i32, y: i32, color: u32| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            if let Some(px) = buffer.get_mut((y * w + x) as usize) {
                *px = color;
            }
        }
    };

    for o in overlays {
        let (right, bottom) = (o.x + o.width, o.y + o.height);
        let mut fill = |x0: i32, y0: i32, x1: i32, y1: i32| {
            for y in y0.max(0)..y1.min(h) {
                for x in x0.max(0)..x1.min(w) {
                    put(x, y, BOX_COLOR);
                }
            }
        };
        fill(o.x, o.y, right, o.y + BOX_THICKNESS);
        fill(o.x, bottom - BOX_THICKNESS, right, bottom);
        fill(o.x, o.y, o.x + BOX_THICKNESS, bottom);
        fill(right - BOX_THICKNESS, o.y, right, bottom);
        fill(o.x, bottom - LABEL_STRIP, right, bottom);

        // Glyphs stop at the box's right edge.
        let text_top = bottom - LABEL_STRIP + LABEL_PADDING;
        let text_right = right - BOX_THICKNESS;
        for (i, c) in o.label.chars().enumerate() {
            let left = o.x + LABEL_PADDING + i as i32 * GLYPH_SIZE;
            if left >= text_right {
                break;
            }
            let glyph = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')).unwrap_or([0; 8]);
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_SIZE {
                    let x = left + col;
                    if bits & (1 << col) != 0 && x < text_right {
                        put(x, text_top + row as i32, TEXT_COLOR);
                    }
                }
            }
        }
    }
}
