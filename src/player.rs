//! Composition root for one playback session: an engine, its viewport, and
//! the state snapshot presentation code watches.

use tokio::sync::watch;

use crate::audio::engine::{Engine, PlaybackEngine};
use crate::audio::types::{EngineEvent, PlaybackState};
use crate::events::Subscription;
use crate::viewport::{NavigationMode, Viewport, ViewportAction, ViewportWindow};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub playback: PlaybackState,
    pub window: ViewportWindow,
    pub previous_mode: NavigationMode,
}

pub struct Player {
    engine: Engine,
    viewport: Viewport,
    events: Subscription<EngineEvent>,
    state_tx: watch::Sender<PlayerState>,
}

impl Player {
    /// Wrap an initialized engine. The viewport covers the engine's current
    /// duration; call [`Player::source_changed`] after loading new audio.
    pub fn new(mut engine: Engine, window_seconds: f64, mode: NavigationMode) -> Self {
        let events = engine.subscribe();
        let viewport = Viewport::new(engine.duration(), window_seconds, mode);
        let initial = PlayerState {
            playback: engine.status(),
            window: viewport.window(),
            previous_mode: viewport.previous_mode(),
        };
        let (state_tx, _) = watch::channel(initial);
        let mut player = Self {
            engine,
            viewport,
            events,
            state_tx,
        };
        player.sync_loop_range();
        player
    }

    pub fn watch(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> PlayerState {
        PlayerState {
            playback: self.engine.status(),
            window: self.viewport.window(),
            previous_mode: self.viewport.previous_mode(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn source_changed(&mut self) {
        self.viewport.set_duration(self.engine.duration());
        self.sync_loop_range();
        self.publish();
    }

    pub fn toggle_play(&mut self) -> bool {
        let ok = if self.engine.is_audio_playing() {
            self.engine.pause();
            true
        } else {
            self.engine.play(None)
        };
        self.publish();
        ok
    }

    pub fn seek(&mut self, time: f64) {
        self.engine.seek(time);
        self.tick();
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.engine.set_playback_rate(rate);
        self.publish();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
        self.publish();
    }

    pub fn set_mode(&mut self, mode: NavigationMode) {
        self.viewport.set_mode(mode);
        self.sync_loop_range();
        self.publish();
    }

    pub fn toggle_loop(&mut self) {
        self.viewport.toggle_loop();
        self.sync_loop_range();
        self.publish();
    }

    pub fn zoom_in(&mut self) {
        let t = self.engine.current_time();
        self.viewport.zoom_in(t);
        self.window_moved();
    }

    pub fn zoom_out(&mut self) {
        let t = self.engine.current_time();
        self.viewport.zoom_out(t);
        self.window_moved();
    }

    pub fn pan(&mut self, delta: f64) {
        self.viewport.pan(delta);
        self.window_moved();
    }

    fn window_moved(&mut self) {
        if self.viewport.mode() == NavigationMode::Loop {
            self.sync_loop_range();
        }
        self.publish();
    }

    /// In loop mode the engine's loop range follows the visible window.
    fn sync_loop_range(&mut self) {
        let duration = self.engine.duration();
        if self.viewport.mode() == NavigationMode::Loop {
            let w = self.viewport.window();
            self.engine.set_loop_mode(true, w.start, w.end);
        } else if self.engine.status().loop_mode {
            self.engine.set_loop_mode(false, 0.0, duration);
        }
    }

    /// Drive one polling interval: let the engine report, then apply loop
    /// re-entry and the navigation policy to what it reported.
    pub fn tick(&mut self) {
        self.engine.poll();
        for event in self.events.drain() {
            match event {
                EngineEvent::TimeUpdate(t) => self.on_time_update(t),
                EngineEvent::Seeked(t) => self.viewport.reposition(t),
                EngineEvent::Ended => self.on_ended(),
                _ => {}
            }
        }
        self.publish();
    }

    fn on_time_update(&mut self, t: f64) {
        let status = self.engine.status();
        if status.loop_mode && status.loop_end > status.loop_start && t >= status.loop_end {
            self.engine.seek(status.loop_start);
            return;
        }
        match self.viewport.on_time_update(t) {
            ViewportAction::None => {}
            ViewportAction::Seek(to) => self.engine.seek(to),
            ViewportAction::PauseAndSeek(to) => {
                self.engine.pause();
                self.engine.seek(to);
            }
        }
    }

    fn on_ended(&mut self) {
        let status = self.engine.status();
        if status.loop_mode {
            log::debug!("player: restarting loop at {:.3}", status.loop_start);
            self.engine.play(Some(status.loop_start));
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.state_tx.send_if_modified(|state| {
            if *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    pub fn destroy(&mut self) {
        self.engine.destroy();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.engine.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::audio::output::testing::DetachedOutput;
    use crate::audio::render::RenderEvent;
    use crate::audio::types::BackendKind;

    fn player(seconds: f64, mode: NavigationMode) -> (Player, DetachedOutput) {
        let output = DetachedOutput::new();
        let mut engine = Engine::create(
            BackendKind::BufferGraph,
            PathBuf::new(),
            1_000,
            Box::new(output.clone()),
        );
        engine.initialize().unwrap();
        engine
            .load_audio_data(vec![0.0; (seconds * 1_000.0) as usize], 1_000, 1)
            .unwrap();
        (Player::new(engine, 10.0, mode), output)
    }

    #[test]
    fn loop_range_reenters_at_start() {
        let (mut p, output) = player(30.0, NavigationMode::Continue);
        p.viewport.set_window(2.0, 5.0);
        p.set_mode(NavigationMode::Loop);
        let status = p.engine().status();
        assert!(status.loop_mode);
        assert_eq!((status.loop_start, status.loop_end), (2.0, 5.0));

        assert!(p.engine_mut().play(Some(2.0)));
        output.clock.advance(3.02);
        p.tick();
        assert!((p.engine().current_time() - 2.0).abs() < 1e-9);
        assert!(p.engine().is_audio_playing());
    }

    #[test]
    fn leaving_loop_mode_clears_the_range() {
        let (mut p, _output) = player(30.0, NavigationMode::Page);
        p.toggle_loop();
        assert!(p.engine().status().loop_mode);
        p.toggle_loop();
        assert_eq!(p.viewport.mode(), NavigationMode::Page);
        assert!(!p.engine().status().loop_mode);
    }

    #[test]
    fn stop_mode_pauses_at_page_boundary() {
        let (mut p, output) = player(30.0, NavigationMode::Stop);
        p.engine_mut().play(None);
        output.clock.advance(10.0);
        p.tick();
        let state = p.snapshot();
        assert!(!state.playback.is_playing);
        assert_eq!(state.playback.current_time, 10.0);
        assert_eq!((state.window.start, state.window.end), (10.0, 20.0));
    }

    #[test]
    fn page_mode_follows_playback() {
        let (mut p, output) = player(30.0, NavigationMode::Page);
        p.engine_mut().play(None);
        output.clock.advance(12.0);
        p.tick();
        assert_eq!(p.snapshot().window.start, 10.0);
        assert!(p.snapshot().playback.is_playing);
    }

    #[test]
    fn seek_moves_the_window() {
        let (mut p, _output) = player(60.0, NavigationMode::Page);
        p.seek(45.0);
        assert_eq!(p.snapshot().window.start, 40.0);
    }

    #[test]
    fn user_seek_in_stop_mode_keeps_playing() {
        let (mut p, _output) = player(60.0, NavigationMode::Stop);
        assert!(p.engine_mut().play(None));
        p.seek(45.0);
        let state = p.snapshot();
        assert!(state.playback.is_playing);
        assert_eq!((state.window.start, state.window.end), (40.0, 50.0));
    }

    #[test]
    fn watchers_see_changes() {
        let (mut p, _output) = player(30.0, NavigationMode::Page);
        let mut rx = p.watch();
        rx.borrow_and_update();
        p.set_volume(0.25);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().playback.volume, 0.25);

        p.set_volume(0.25);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn whole_file_loop_restarts_after_end() {
        let (mut p, output) = player(5.0, NavigationMode::Continue);
        p.viewport.set_window(0.0, 5.0);
        p.set_mode(NavigationMode::Loop);
        p.engine_mut().play(None);
        // A whole-file range loops inside the engine; an end report from the
        // current voice still restarts from the loop start.
        output.take_commands();
        output.inject(RenderEvent::Ended { generation: 1 });
        p.tick();
        assert!(p.engine().is_audio_playing());
    }

    #[test]
    fn zoom_keeps_loop_range_in_step() {
        let (mut p, _output) = player(30.0, NavigationMode::Loop);
        p.zoom_in();
        let w = p.snapshot().window;
        let status = p.engine().status();
        assert_eq!((status.loop_start, status.loop_end), (w.start, w.end));
    }
}
