//! egui adapter: feeds pointer, wheel and key input into an [`Editor`] and
//! paints the rendered surface plus selection overlays.

use std::time::{Duration, Instant};

use egui::{Color32, Pos2, Rect, Sense, Stroke, Vec2};

use crate::compositor::surface::Surface;
use crate::editor::Editor;
use crate::interaction::{EditorKey, Modifiers, PointerButton, Tool};
use crate::ops::geometry::{HandleMetrics, handles_for, output_handles};
use crate::viewport::ScreenMetrics;

/// egui points per wheel notch.
const POINTS_PER_NOTCH: f32 = 50.0;
const NUDGE_STEP: f32 = 1.0;
/// Longest wait between repaints while processed images are still being created.
const PENDING_REPAINT: Duration = Duration::from_millis(50);

const OUTPUT_AREA_STROKE: Color32 = Color32::from_rgb(255, 200, 0);
const SELECTION_STROKE: Color32 = Color32::from_rgb(0, 160, 255);

pub fn surface_to_color_image(surface: &Surface) -> egui::ColorImage {
    let size = [surface.width() as usize, surface.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, surface.image.as_raw())
}

/// Canvas widget hosting one editor.
#[derive(Default)]
pub struct EditorPanel {
    texture: Option<egui::TextureHandle>,
    fitted: bool,
    pointer_down: bool,
}

impl EditorPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, ui: &mut egui::Ui, editor: &mut Editor) -> egui::Response {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        let ctx = ui.ctx().clone();
        let ppp = ctx.pixels_per_point();
        editor.set_screen_metrics(ScreenMetrics::matched(rect.size(), ppp));

        if !self.fitted && rect.width() > 1.0 && rect.height() > 1.0 {
            editor.fit_output_area(rect.size(), 24.0);
            self.fitted = true;
        }

        let now = Instant::now();
        self.handle_input(&ctx, &response, rect, editor, now);
        editor.poll(now);

        painter.rect_filled(rect, 0.0, Color32::from_gray(40));
        match editor.render(rect.size(), now) {
            Ok(surface) => {
                let image = surface_to_color_image(&surface);
                let options = egui::TextureOptions::LINEAR;
                match &mut self.texture {
                    Some(tex) => tex.set(image, options),
                    None => self.texture = Some(ctx.load_texture("layerfe_canvas", image, options)),
                }
                if let Some(tex) = &self.texture {
                    let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
                    painter.image(tex.id(), rect, uv, Color32::WHITE);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Canvas render failed"),
        }

        self.paint_overlays(&painter, rect, editor);
        ctx.set_cursor_icon(editor.interaction().cursor());

        let pending = editor
            .store()
            .iter()
            .any(|l| editor.compositor().is_pending(l.id))
            || editor.pending_decodes() > 0;
        if let Some(at) = editor.next_poll_at() {
            ctx.request_repaint_after(at.saturating_duration_since(now).min(PENDING_REPAINT));
        } else if pending {
            ctx.request_repaint_after(PENDING_REPAINT);
        }
        response
    }

    fn handle_input(&mut self, ctx: &egui::Context, response: &egui::Response, rect: Rect, editor: &mut Editor, now: Instant) {
        let (mods, pointer, pressed, released, scroll, keys) = ctx.input(|i| {
            let mods = Modifiers {
                shift: i.modifiers.shift,
                ctrl: i.modifiers.command,
                alt: i.modifiers.alt,
                pan: i.key_down(egui::Key::Space),
            };
            let pressed = if i.pointer.primary_pressed() {
                Some(PointerButton::Primary)
            } else if i.pointer.button_pressed(egui::PointerButton::Middle) {
                Some(PointerButton::Middle)
            } else if i.pointer.secondary_pressed() {
                Some(PointerButton::Secondary)
            } else {
                None
            };
            let released = i.pointer.any_released();
            let mut keys = Vec::new();
            if i.key_pressed(egui::Key::Delete) {
                keys.push(EditorKey::Delete);
            }
            if i.key_pressed(egui::Key::Escape) {
                keys.push(EditorKey::Escape);
            }
            if i.key_pressed(egui::Key::C) && !i.modifiers.command {
                keys.push(EditorKey::ToggleCrop);
            }
            for (key, dir) in [
                (egui::Key::ArrowLeft, Vec2::new(-1.0, 0.0)),
                (egui::Key::ArrowRight, Vec2::new(1.0, 0.0)),
                (egui::Key::ArrowUp, Vec2::new(0.0, -1.0)),
                (egui::Key::ArrowDown, Vec2::new(0.0, 1.0)),
            ] {
                if i.key_pressed(key) {
                    keys.push(EditorKey::Nudge(dir * NUDGE_STEP));
                }
            }
            (mods, i.pointer.hover_pos(), pressed, released, i.scroll_delta.y, keys)
        });

        let undo = ctx.input(|i| i.modifiers.command && !i.modifiers.shift && i.key_pressed(egui::Key::Z));
        let redo = ctx.input(|i| {
            i.modifiers.command && (i.key_pressed(egui::Key::Y) || (i.modifiers.shift && i.key_pressed(egui::Key::Z)))
        });
        if undo {
            editor.undo();
        } else if redo {
            editor.redo();
        }

        let local = pointer.map(|p| (p - rect.min).to_pos2());
        if let (Some(button), Some(p)) = (pressed, local)
            && response.hovered()
        {
            editor.pointer_down(p, button, mods);
            self.pointer_down = true;
        }
        if let Some(p) = local {
            editor.pointer_move(p, mods);
        }
        if released && self.pointer_down {
            editor.pointer_up(now);
            self.pointer_down = false;
        }
        if scroll.abs() > 0.1
            && response.hovered()
            && let Some(p) = local
        {
            editor.wheel(p, scroll / POINTS_PER_NOTCH, mods, now);
        }
        if response.has_focus() || response.hovered() {
            for key in keys {
                editor.key(key, mods);
            }
        }
    }

    fn paint_overlays(&self, painter: &egui::Painter, rect: Rect, editor: &Editor) {
        let vp = editor.viewport();
        let to_screen = |p: Pos2| rect.min + vp.world_to_screen(p).to_vec2();

        let area = editor.output_area();
        let area_rect = Rect::from_two_pos(to_screen(area.rect().min), to_screen(area.rect().max));
        painter.rect_stroke(area_rect, 0.0, Stroke::new(1.5, OUTPUT_AREA_STROKE));
        if editor.tool() == Tool::OutputArea {
            for (_, p) in output_handles(&area) {
                painter.circle_filled(to_screen(p), 4.0, OUTPUT_AREA_STROKE);
            }
        }

        let store = editor.store();
        for id in store.selection() {
            let Some(layer) = store.get(*id) else { continue };
            let corners = layer.world_corners().map(to_screen);
            painter.add(egui::Shape::closed_line(corners.to_vec(), Stroke::new(1.0, SELECTION_STROKE)));
        }

        if editor.tool() != Tool::Transform {
            return;
        }
        let Some(layer) = store.primary().and_then(|id| store.get(id)) else { return };
        let metrics = HandleMetrics {
            radius_px: editor.settings().handle_radius_px,
            rotate_offset_px: editor.settings().rotate_handle_offset_px,
            zoom: vp.zoom,
        };
        for (_, p) in handles_for(layer, &metrics) {
            let p = to_screen(p);
            painter.circle_filled(p, metrics.radius_px * 0.6, Color32::WHITE);
            painter.circle_stroke(p, metrics.radius_px * 0.6, Stroke::new(1.0, SELECTION_STROKE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_converts_to_color_image() {
        let mut surface = Surface::new(3, 2, Pos2::ZERO, 1.0, 64).unwrap();
        surface.image.put_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
        let color = surface_to_color_image(&surface);
        assert_eq!(color.size, [3, 2]);
        assert_eq!(color.pixels[4], Color32::from_rgb(10, 20, 30));
    }
}
