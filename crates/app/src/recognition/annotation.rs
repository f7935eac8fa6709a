use image::{Rgb, RgbImage};
use ml_core::{FrameLabel, LandmarkSet, landmarks::HAND_CONNECTIONS};

use crate::recognition::stabilizer::StableLabel;

pub(crate) const DETECT_COLOR: Rgb<u8> = Rgb([255, 120, 0]);
pub(crate) const SIGN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub(crate) const ERROR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub(crate) const IDLE_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const JOINT_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const PANEL_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// Colour of the `Stable:` line for a given stable label.
pub(crate) fn stable_color(label: &StableLabel) -> Rgb<u8> {
    if label.is_sign() {
        SIGN_COLOR
    } else if label.is_error() {
        ERROR_COLOR
    } else {
        IDLE_COLOR
    }
}

/// Draw the hand skeleton from normalised image coordinates. Points are
/// clamped to one frame-width beyond each edge before projection.
pub(crate) fn draw_hand(image: &mut RgbImage, hand: &LandmarkSet) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let project = |v: f32, extent: f32| {
        let v = if v.is_finite() { v } else { 0.0 };
        (v.clamp(-1.0, 2.0) * extent).round() as i32
    };
    let pixel = |index: usize| {
        hand.points()
            .get(index)
            .map(|p| (project(p.x, width), project(p.y, height)))
    };
    for (from, to) in HAND_CONNECTIONS {
        if let (Some(a), Some(b)) = (pixel(from), pixel(to)) {
            draw_line(image, a, b, BONE_COLOR);
        }
    }
    for index in 0..hand.len() {
        if let Some((x, y)) = pixel(index) {
            fill_rect(image, x - 2, y - 2, x + 2, y + 2, JOINT_COLOR);
        }
    }
}

/// Two text lines in the top-left corner: the frame's detection and the
/// stable label.
pub(crate) fn draw_overlay(
    image: &mut RgbImage,
    detect: &FrameLabel,
    detect_score: f32,
    stable: &StableLabel,
) {
    let scale = text_scale(image.width());
    let line_height = (GLYPH_HEIGHT + 4) * scale;
    let detect_line = detect_text(detect, detect_score);
    let stable_line = format!("Stable: {stable}");

    let widest = detect_line.chars().count().max(stable_line.chars().count()) as i32;
    fill_rect(
        image,
        0,
        0,
        widest * GLYPH_ADVANCE * scale + 12,
        line_height * 2 + 6,
        PANEL_COLOR,
    );
    draw_label(image, 6, 6, &detect_line, DETECT_COLOR, scale);
    draw_label(
        image,
        6,
        6 + line_height,
        &stable_line,
        stable_color(stable),
        scale,
    );
}

/// Only classified and low-confidence frames carry a score worth showing.
fn detect_text(label: &FrameLabel, score: f32) -> String {
    match label {
        FrameLabel::Sign(_) | FrameLabel::LowConfidence => {
            format!("Detect: {label} ({:.2}%)", score * 100.0)
        }
        _ => format!("Detect: {label}"),
    }
}

/// Solid black frame with a centred message, used when no camera frame exists.
pub(crate) fn placeholder_frame(size: (u32, u32), message: &str, color: Rgb<u8>) -> RgbImage {
    let (width, height) = (size.0.max(1), size.1.max(1));
    let mut image = RgbImage::from_pixel(width, height, PANEL_COLOR);
    let scale = text_scale(width);
    let text_width = message.chars().count() as i32 * GLYPH_ADVANCE * scale;
    let x = ((width as i32 - text_width) / 2).max(0);
    let y = ((height as i32 - GLYPH_HEIGHT * scale) / 2).max(0);
    draw_label(&mut image, x, y, message, color, scale);
    image
}

fn text_scale(width: u32) -> i32 {
    if width >= 480 { 2 } else { 1 }
}

pub(crate) fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_pixel(image, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

pub(crate) fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Render text with the built-in 5x7 font. Lowercase is drawn as uppercase;
/// characters without a glyph render as `?`.
pub(crate) fn draw_label(
    image: &mut RgbImage,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
    scale: i32,
) {
    let scale = scale.max(1);
    for ch in text.chars().flat_map(char::to_uppercase) {
        let glyph = glyph_bits(ch).or_else(|| glyph_bits('?')).unwrap_or([0; 7]);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..5 {
                if (pattern >> (4 - col)) & 1 == 1 {
                    let px = x + col * scale;
                    let py = y + row as i32 * scale;
                    for oy in 0..scale {
                        for ox in 0..scale {
                            put_pixel(image, px + ox, py + oy, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
