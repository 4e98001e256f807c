//! Frame overlays.
//!
//! Everything here draws onto a copy; the input frame is never touched.

mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::FaceBox;
use crate::frame::Frame;

use font::{draw_text, text_size};

pub const FACE_LABEL: &str = "FACE DETECTED";
pub const UNAVAILABLE_TITLE: &str = "CAMERA NOT AVAILABLE";
pub const UNAVAILABLE_HINT: &str = "CHECK CONNECTION AND PERMISSIONS";

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const LIGHT_GREY: Rgb<u8> = Rgb([200, 200, 200]);

const BOX_THICKNESS: u32 = 2;
const TAB_PADDING: u32 = 2;
const STATUS_SCALE: u32 = 2;
const STATUS_MARGIN: i32 = 8;

/// Copy `frame` and draw a rectangle plus label tab per box and, when given,
/// a status line in the top-left corner.
pub fn annotate(frame: &Frame, boxes: &[FaceBox], status: Option<&str>) -> Frame {
    let mut img = frame.to_image();
    for face in boxes {
        draw_face(&mut img, face);
    }
    if let Some(text) = status {
        draw_status(&mut img, text);
    }
    Frame::from_image(img)
}

/// Placeholder shown while no camera is available.
pub fn unavailable_frame(width: u32, height: u32) -> Frame {
    let mut img = RgbImage::new(width, height);
    let center_y = height as i32 / 2;

    let (title_w, title_h) = text_size(UNAVAILABLE_TITLE, 2);
    draw_text(
        &mut img,
        UNAVAILABLE_TITLE,
        centered(width, title_w),
        center_y - title_h as i32 - 6,
        2,
        WHITE,
    );
    let (hint_w, _) = text_size(UNAVAILABLE_HINT, 1);
    draw_text(
        &mut img,
        UNAVAILABLE_HINT,
        centered(width, hint_w),
        center_y + 6,
        1,
        LIGHT_GREY,
    );
    Frame::from_image(img)
}

/// Overlay text for the stream: detections and approximate frame rate.
pub fn status_line(face_count: usize, fps: f64) -> String {
    format!("Faces: {} | FPS: ~{:.0}", face_count, fps)
}

fn centered(total: u32, used: u32) -> i32 {
    (total as i32 - used as i32) / 2
}

fn draw_face(img: &mut RgbImage, face: &FaceBox) {
    if face.width == 0 || face.height == 0 {
        return;
    }
    for inset in 0..BOX_THICKNESS {
        let (w, h) = (face.width.saturating_sub(2 * inset), face.height.saturating_sub(2 * inset));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((face.x + inset) as i32, (face.y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(img, rect, GREEN);
    }

    let (text_w, text_h) = text_size(FACE_LABEL, 1);
    let tab_w = text_w + 2 * TAB_PADDING;
    let tab_h = text_h + 2 * TAB_PADDING;
    // Above the box, or just inside its top edge when there is no room.
    let tab_y = if face.y >= tab_h {
        (face.y - tab_h) as i32
    } else {
        face.y as i32
    };
    let tab = Rect::at(face.x as i32, tab_y).of_size(tab_w, tab_h);
    draw_filled_rect_mut(img, tab, GREEN);
    draw_text(
        img,
        FACE_LABEL,
        face.x as i32 + TAB_PADDING as i32,
        tab_y + TAB_PADDING as i32,
        1,
        BLACK,
    );
}

fn draw_status(img: &mut RgbImage, text: &str) {
    if text.is_empty() {
        return;
    }
    let (text_w, text_h) = text_size(text, STATUS_SCALE);
    let backdrop = Rect::at(STATUS_MARGIN - 4, STATUS_MARGIN - 4).of_size(text_w + 8, text_h + 8);
    draw_filled_rect_mut(img, backdrop, BLACK);
    draw_text(img, text, STATUS_MARGIN, STATUS_MARGIN, STATUS_SCALE, WHITE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![90u8; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn annotate_leaves_input_untouched() {
        let frame = grey_frame(160, 120);
        let before = frame.clone();
        let boxes = [FaceBox::new(40, 40, 50, 50)];

        let out = annotate(&frame, &boxes, Some(&status_line(1, 29.7)));

        assert_eq!(frame, before);
        assert_ne!(out, frame);
        assert_eq!((out.width(), out.height()), (160, 120));
        assert_eq!(out.pixel(40, 60), [0, 255, 0]);
        assert_eq!(out.pixel(41, 60), [0, 255, 0]);
        assert_eq!(out.pixel(65, 65), [90, 90, 90]);
    }

    #[test]
    fn label_moves_inside_box_at_top_edge() {
        let frame = grey_frame(120, 80);
        let out = annotate(&frame, &[FaceBox::new(10, 0, 90, 60)], None);
        // Tab background fills the top-left of the box.
        assert_eq!(out.pixel(11, 1), [0, 255, 0]);
    }

    #[test]
    fn boxes_at_frame_edge_are_clipped() {
        let frame = grey_frame(64, 48);
        let out = annotate(&frame, &[FaceBox::new(50, 40, 40, 40)], None);
        assert_eq!(out.pixel(50, 47), [0, 255, 0]);
    }

    #[test]
    fn no_boxes_no_status_is_identity() {
        let frame = grey_frame(32, 32);
        assert_eq!(annotate(&frame, &[], None), frame);
    }

    #[test]
    fn unavailable_frame_has_text() {
        let frame = unavailable_frame(640, 480);
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert!(frame.data().iter().any(|&b| b == 255));
        assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn status_line_rounds_rate() {
        assert_eq!(status_line(2, 14.6), "Faces: 2 | FPS: ~15");
        assert_eq!(status_line(0, 0.0), "Faces: 0 | FPS: ~0");
    }
}
