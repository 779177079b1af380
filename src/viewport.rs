//! Visible time window and the navigation policies that move it as the
//! playhead advances.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest boundary tolerance for page and stop modes.
pub const PAGE_EPSILON: f64 = 0.1;
/// Narrowest window zooming can reach.
pub const MIN_WINDOW_SECONDS: f64 = 0.05;

const ZOOM_IN_FACTOR: f64 = 0.8;
const ZOOM_OUT_FACTOR: f64 = 1.0 / 0.75;
const SCROLL_BUFFER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    #[default]
    Page,
    Stop,
    Loop,
    Continue,
    Scroll,
    Scrub,
}

impl NavigationMode {
    pub const ALL: [NavigationMode; 6] = [
        NavigationMode::Page,
        NavigationMode::Stop,
        NavigationMode::Loop,
        NavigationMode::Continue,
        NavigationMode::Scroll,
        NavigationMode::Scrub,
    ];
}

impl fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NavigationMode::Page => "Page",
            NavigationMode::Stop => "Stop",
            NavigationMode::Loop => "Loop",
            NavigationMode::Continue => "Continue",
            NavigationMode::Scroll => "Scroll",
            NavigationMode::Scrub => "Scrub",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportWindow {
    pub start: f64,
    pub end: f64,
    pub mode: NavigationMode,
}

impl ViewportWindow {
    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

/// What the transport must do after the window reacted to a time update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportAction {
    None,
    Seek(f64),
    PauseAndSeek(f64),
}

#[derive(Debug, Clone)]
pub struct Viewport {
    window: ViewportWindow,
    duration: f64,
    previous_mode: NavigationMode,
}

impl Viewport {
    pub fn new(duration: f64, width: f64, mode: NavigationMode) -> Self {
        let mut viewport = Self {
            window: ViewportWindow {
                start: 0.0,
                end: 0.0,
                mode,
            },
            duration: duration.max(0.0),
            previous_mode: mode,
        };
        viewport.fit(0.0, width);
        viewport
    }

    pub fn window(&self) -> ViewportWindow {
        self.window
    }

    pub fn mode(&self) -> NavigationMode {
        self.window.mode
    }

    pub fn previous_mode(&self) -> NavigationMode {
        self.previous_mode
    }

    /// Adopt a new source length, keeping the window's start and width
    /// where they still fit.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.fit(self.window.start, self.window.width());
    }

    /// Place a window of `width` at `start`, keeping its width by shifting
    /// it back inside `[0, duration]`.
    fn fit(&mut self, start: f64, width: f64) {
        let (min, max) = self.width_bounds();
        let width = width.clamp(min, max);
        let start = start.clamp(0.0, (self.duration - width).max(0.0));
        self.window.start = start;
        self.window.end = start + width;
    }

    /// Narrowest and widest allowed window. A source shorter than the zoom
    /// floor is shown whole.
    fn width_bounds(&self) -> (f64, f64) {
        if self.duration > 0.0 {
            let min = MIN_WINDOW_SECONDS.min(self.duration);
            (min, self.duration)
        } else {
            (MIN_WINDOW_SECONDS, MIN_WINDOW_SECONDS)
        }
    }

    fn tolerance(&self) -> f64 {
        PAGE_EPSILON.min(self.window.width() * 0.05)
    }

    /// Page forward or back until `t` is inside the window. Returns whether
    /// a forward page happened.
    fn page_to(&mut self, t: f64) -> Option<bool> {
        let w = self.window.width();
        let tol = self.tolerance();
        let last_page = self.window.end >= self.duration - 1e-9;

        if t >= self.window.end - tol && !last_page {
            let pages = ((t + tol - self.window.start) / w).floor().max(1.0);
            self.fit(self.window.start + pages * w, w);
            return Some(true);
        }
        if t < self.window.start - tol && self.window.start > 0.0 {
            let pages = ((self.window.start - t) / w).ceil().max(1.0);
            self.fit(self.window.start - pages * w, w);
            return Some(false);
        }
        None
    }

    /// Keep `t` in view for the scrolling modes.
    fn follow(&mut self, t: f64) {
        let w = self.window.width();
        match self.window.mode {
            NavigationMode::Scroll => {
                let buffer = w * SCROLL_BUFFER_FRACTION;
                if t > self.window.end - buffer {
                    self.fit(t + buffer - w, w);
                } else if t < self.window.start + buffer {
                    self.fit(t - buffer, w);
                }
            }
            NavigationMode::Scrub => self.fit(t - w / 2.0, w),
            _ => {}
        }
    }

    /// React to playback reaching `t`.
    pub fn on_time_update(&mut self, t: f64) -> ViewportAction {
        match self.window.mode {
            NavigationMode::Continue => ViewportAction::None,
            NavigationMode::Page => {
                self.page_to(t);
                ViewportAction::None
            }
            NavigationMode::Stop => {
                let crossed = self.window.end;
                match self.page_to(t) {
                    Some(true) => {
                        let at = self.window.start.max(crossed).min(self.duration);
                        ViewportAction::PauseAndSeek(at)
                    }
                    _ => ViewportAction::None,
                }
            }
            NavigationMode::Loop => {
                if t >= self.window.end || t < self.window.start {
                    ViewportAction::Seek(self.window.start)
                } else {
                    ViewportAction::None
                }
            }
            NavigationMode::Scroll | NavigationMode::Scrub => {
                self.follow(t);
                ViewportAction::None
            }
        }
    }

    /// Bring a user-chosen position into view. Never asks playback to move;
    /// the loop window stays where it is.
    pub fn reposition(&mut self, t: f64) {
        match self.window.mode {
            NavigationMode::Continue | NavigationMode::Loop => {}
            NavigationMode::Page | NavigationMode::Stop => {
                self.page_to(t);
            }
            NavigationMode::Scroll | NavigationMode::Scrub => self.follow(t),
        }
    }

    fn zoom(&mut self, playhead: f64, factor: f64) {
        let w = self.window.width();
        let relative = if w > 0.0 {
            ((playhead - self.window.start) / w).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let (min, max) = self.width_bounds();
        let new_width = (w * factor).clamp(min, max);
        self.fit(playhead - relative * new_width, new_width);
    }

    pub fn zoom_in(&mut self, playhead: f64) {
        self.zoom(playhead, ZOOM_IN_FACTOR);
    }

    pub fn zoom_out(&mut self, playhead: f64) {
        self.zoom(playhead, ZOOM_OUT_FACTOR);
    }

    pub fn pan(&mut self, delta: f64) {
        self.fit(self.window.start + delta, self.window.width());
    }

    pub fn set_window(&mut self, start: f64, end: f64) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.fit(start, end - start);
    }

    pub fn set_mode(&mut self, mode: NavigationMode) {
        if mode == self.window.mode {
            return;
        }
        self.previous_mode = self.window.mode;
        self.window.mode = mode;
        log::debug!("viewport: {} -> {}", self.previous_mode, mode);
    }

    /// Enter loop mode, or leave it for the mode used before it.
    pub fn toggle_loop(&mut self) {
        if self.window.mode != NavigationMode::Loop {
            self.set_mode(NavigationMode::Loop);
            return;
        }
        let back = if self.previous_mode == NavigationMode::Loop {
            NavigationMode::Continue
        } else {
            self.previous_mode
        };
        self.set_mode(back);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn bounds(v: &Viewport) -> (f64, f64) {
        (v.window().start, v.window().end)
    }

    #[test]
    fn scrub_centers_and_clamps_at_edges() {
        let mut v = Viewport::new(10.0, 2.0, NavigationMode::Scrub);
        v.on_time_update(5.0);
        assert_eq!(bounds(&v), (4.0, 6.0));
        v.on_time_update(9.5);
        assert_eq!(bounds(&v), (8.0, 10.0));
        v.on_time_update(0.2);
        assert_eq!(bounds(&v), (0.0, 2.0));
    }

    #[test]
    fn page_advances_one_width_at_boundary() {
        let mut v = Viewport::new(30.0, 10.0, NavigationMode::Page);
        assert_eq!(v.on_time_update(5.0), ViewportAction::None);
        assert_eq!(bounds(&v), (0.0, 10.0));

        v.on_time_update(9.95);
        assert_eq!(bounds(&v), (10.0, 20.0));

        // Jitter just before the new start must not page back.
        v.on_time_update(9.96);
        assert_eq!(bounds(&v), (10.0, 20.0));

        v.on_time_update(3.0);
        assert_eq!(bounds(&v), (0.0, 10.0));
    }

    #[test]
    fn page_jumps_to_the_page_holding_a_far_seek() {
        let mut v = Viewport::new(60.0, 10.0, NavigationMode::Page);
        v.on_time_update(35.0);
        assert_eq!(bounds(&v), (30.0, 40.0));
    }

    #[test]
    fn last_page_keeps_width() {
        let mut v = Viewport::new(25.0, 10.0, NavigationMode::Page);
        v.on_time_update(10.0);
        v.on_time_update(20.0);
        assert_eq!(bounds(&v), (15.0, 25.0));
        v.on_time_update(24.99);
        assert_eq!(bounds(&v), (15.0, 25.0));
    }

    #[test]
    fn tolerance_shrinks_with_window() {
        let mut v = Viewport::new(10.0, 0.5, NavigationMode::Page);
        v.on_time_update(0.45);
        assert_eq!(bounds(&v), (0.0, 0.5));
        v.on_time_update(0.48);
        assert_eq!(bounds(&v), (0.5, 1.0));
    }

    #[test]
    fn stop_pauses_at_new_window_start() {
        let mut v = Viewport::new(30.0, 10.0, NavigationMode::Stop);
        assert_eq!(v.on_time_update(4.0), ViewportAction::None);
        assert_eq!(v.on_time_update(10.02), ViewportAction::PauseAndSeek(10.0));
        assert_eq!(bounds(&v), (10.0, 20.0));
    }

    #[test]
    fn stop_on_last_page_holds_at_crossed_boundary() {
        let mut v = Viewport::new(25.0, 10.0, NavigationMode::Stop);
        assert_eq!(v.on_time_update(10.0), ViewportAction::PauseAndSeek(10.0));
        assert_eq!(v.on_time_update(20.0), ViewportAction::PauseAndSeek(20.0));
        assert_eq!(bounds(&v), (15.0, 25.0));
    }

    #[test]
    fn reposition_pages_without_pausing() {
        let mut v = Viewport::new(60.0, 10.0, NavigationMode::Stop);
        v.reposition(42.0);
        assert_eq!(bounds(&v), (40.0, 50.0));

        let mut looped = Viewport::new(60.0, 10.0, NavigationMode::Loop);
        looped.set_window(2.0, 5.0);
        looped.reposition(42.0);
        assert_eq!(bounds(&looped), (2.0, 5.0));
    }

    #[test]
    fn source_shorter_than_zoom_floor_is_shown_whole() {
        let mut v = Viewport::new(0.02, 10.0, NavigationMode::Page);
        assert_eq!(bounds(&v), (0.0, 0.02));
        v.zoom_in(0.01);
        assert_eq!(bounds(&v), (0.0, 0.02));
        v.pan(1.0);
        assert_eq!(bounds(&v), (0.0, 0.02));
    }

    #[test]
    fn loop_reenters_at_window_start() {
        let mut v = Viewport::new(30.0, 10.0, NavigationMode::Loop);
        v.set_window(2.0, 5.0);
        assert_eq!(v.on_time_update(3.0), ViewportAction::None);
        assert_eq!(v.on_time_update(5.02), ViewportAction::Seek(2.0));
        assert_eq!(v.on_time_update(1.0), ViewportAction::Seek(2.0));
        assert_eq!(bounds(&v), (2.0, 5.0));
    }

    #[test]
    fn continue_never_moves() {
        let mut v = Viewport::new(30.0, 10.0, NavigationMode::Continue);
        v.on_time_update(25.0);
        assert_eq!(bounds(&v), (0.0, 10.0));
    }

    #[test]
    fn scroll_follows_at_buffer_edge() {
        let mut v = Viewport::new(60.0, 8.0, NavigationMode::Scroll);
        v.on_time_update(5.0);
        assert_eq!(bounds(&v), (0.0, 8.0));

        v.on_time_update(7.0);
        assert!(approx(v.window().start, 1.0));
        assert!(approx(v.window().end - 2.0, 7.0));

        v.on_time_update(7.5);
        assert!(approx(v.window().start, 1.5));
    }

    #[test]
    fn zoom_keeps_playhead_relative_position() {
        let mut v = Viewport::new(100.0, 10.0, NavigationMode::Continue);
        v.set_window(20.0, 30.0);
        v.zoom_in(22.5);
        let w = v.window();
        assert!(approx(w.width(), 8.0));
        assert!(approx((22.5 - w.start) / w.width(), 0.25));

        v.zoom_out(22.5);
        let w = v.window();
        assert!(approx(w.width(), 8.0 / 0.75));
        assert!(approx((22.5 - w.start) / w.width(), 0.25));
    }

    #[test]
    fn zoom_in_stops_at_floor() {
        let mut v = Viewport::new(10.0, 0.06, NavigationMode::Continue);
        v.zoom_in(0.0);
        v.zoom_in(0.0);
        assert!(approx(v.window().width(), MIN_WINDOW_SECONDS));
    }

    #[test]
    fn zoom_out_is_bounded_by_duration() {
        let mut v = Viewport::new(10.0, 9.0, NavigationMode::Continue);
        v.zoom_out(5.0);
        assert_eq!(bounds(&v), (0.0, 10.0));
    }

    #[test]
    fn pan_stays_inside_source() {
        let mut v = Viewport::new(20.0, 5.0, NavigationMode::Continue);
        v.pan(-3.0);
        assert_eq!(bounds(&v), (0.0, 5.0));
        v.pan(100.0);
        assert_eq!(bounds(&v), (15.0, 20.0));
    }

    #[test]
    fn loop_toggle_restores_previous_mode() {
        let mut v = Viewport::new(20.0, 5.0, NavigationMode::Scroll);
        v.toggle_loop();
        assert_eq!(v.mode(), NavigationMode::Loop);
        assert_eq!(v.previous_mode(), NavigationMode::Scroll);
        v.toggle_loop();
        assert_eq!(v.mode(), NavigationMode::Scroll);
    }

    #[test]
    fn loop_toggle_without_other_memory_falls_back_to_continue() {
        let mut v = Viewport::new(20.0, 5.0, NavigationMode::Loop);
        v.toggle_loop();
        assert_eq!(v.mode(), NavigationMode::Continue);
    }
}
