use iced::mouse;
use iced::widget::canvas::{self, Action, Event, Frame, Geometry, Path, Stroke};
use iced::{Color, Point, Rectangle, Renderer, Size, Theme};

use crate::viewport::{NavigationMode, ViewportWindow};

/// Overlay drawn on top of the visible slice of the spectrogram.
pub struct SpectrogramOverlay {
    pub window: ViewportWindow,
    pub playhead: f64,
}

/// Interactions on the spectrogram strip.
#[derive(Debug, Clone)]
pub enum SpectrogramMessage {
    Seek(f64), // time in seconds
}

impl SpectrogramOverlay {
    /// Horizontal position of `time` as a fraction of the strip, if visible.
    fn fraction(&self, time: f64) -> Option<f32> {
        let width = self.window.width();
        if width <= 0.0 || time < self.window.start || time > self.window.end {
            return None;
        }
        Some(((time - self.window.start) / width) as f32)
    }

    fn time_at(&self, fraction: f64) -> f64 {
        self.window.start + fraction.clamp(0.0, 1.0) * self.window.width()
    }
}

impl canvas::Program<SpectrogramMessage> for SpectrogramOverlay {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = Frame::new(renderer, bounds.size());
        let height = bounds.height;

        if self.window.mode == NavigationMode::Loop {
            for x in [0.0, bounds.width] {
                let edge = Path::line(Point::new(x, 0.0), Point::new(x, height));
                frame.stroke(
                    &edge,
                    Stroke::default()
                        .with_color(Color::from_rgba(1.0, 0.8, 0.0, 0.7))
                        .with_width(3.0),
                );
            }
            frame.fill_rectangle(
                Point::ORIGIN,
                Size::new(bounds.width, height),
                Color::from_rgba(1.0, 0.8, 0.0, 0.06),
            );
        }

        if let Some(frac) = self.fraction(self.playhead) {
            let x = frac * bounds.width;
            let playhead = Path::line(Point::new(x, 0.0), Point::new(x, height));
            frame.stroke(
                &playhead,
                Stroke::default()
                    .with_color(Color::from_rgb(1.0, 1.0, 1.0))
                    .with_width(2.0),
            );
        }

        vec![frame.into_geometry()]
    }

    fn update(
        &self,
        _state: &mut Self::State,
        event: &Event,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> Option<Action<SpectrogramMessage>> {
        let cursor_pos = cursor.position_in(bounds)?;

        match event {
            Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                let time = self.time_at((cursor_pos.x / bounds.width) as f64);
                Some(Action::publish(SpectrogramMessage::Seek(time)).and_capture())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(start: f64, end: f64, playhead: f64) -> SpectrogramOverlay {
        SpectrogramOverlay {
            window: ViewportWindow {
                start,
                end,
                mode: NavigationMode::Page,
            },
            playhead,
        }
    }

    #[test]
    fn playhead_maps_into_window() {
        let o = overlay(10.0, 20.0, 12.5);
        assert_eq!(o.fraction(12.5), Some(0.25));
        assert_eq!(o.fraction(25.0), None);
    }

    #[test]
    fn click_maps_to_time_inside_window() {
        let o = overlay(10.0, 20.0, 0.0);
        assert_eq!(o.time_at(0.5), 15.0);
        assert_eq!(o.time_at(1.4), 20.0);
    }
}
