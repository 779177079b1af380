use std::path::PathBuf;
use std::sync::Arc;

use iced::keyboard;
use iced::widget::{canvas, center, column, container, image, stack, text};
use iced::{ContentFit, Element, Length, Subscription, Task, Theme};
use tokio::sync::watch;

use crate::analysis::pool::default_pool_size;
use crate::analysis::{chunker, CompositeImage, MelSpectrogram, PoolCache, WorkerPool};
use crate::audio::decoder;
use crate::audio::engine::{Engine, PlaybackEngine, TIME_UPDATE_INTERVAL_MS};
use crate::audio::output::CpalOutput;
use crate::audio::types::{AudioData, BackendKind};
use crate::config::AppConfig;
use crate::player::{Player, PlayerState};
use crate::ui::controls::{self, ControlMessage};
use crate::ui::spectrogram::{SpectrogramMessage, SpectrogramOverlay};

const STRIP_HEIGHT: f32 = 260.0;
/// Arrow keys pan by this fraction of the visible window.
const PAN_FRACTION: f64 = 0.1;

/// Columns `[x0, x1)` of the composite currently uploaded for display.
struct VisibleSlice {
    x0: u32,
    x1: u32,
    handle: image::Handle,
}

pub struct App {
    config: AppConfig,
    backend: BackendKind,

    player: Option<Player>,
    state_rx: Option<watch::Receiver<PlayerState>>,
    state: Option<PlayerState>,

    /// Bumped per opened source; renders tagged with an older value are stale.
    session: u64,
    pools: PoolCache,
    pool: Option<Arc<WorkerPool>>,
    composite: Option<Arc<CompositeImage>>,
    visible: Option<VisibleSlice>,
    analyzing: bool,

    filename: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Message {
    FileDialogResult(Option<PathBuf>),
    FileLoaded(Result<(Arc<AudioData>, PathBuf), String>),
    SpectrogramReady(u64, Result<Arc<CompositeImage>, String>),
    Control(ControlMessage),
    Spectrogram(SpectrogramMessage),
    Tick,
    KeyEvent(keyboard::Event),
}

fn boot(config: AppConfig, backend: BackendKind, file: Option<PathBuf>) -> (App, Task<Message>) {
    let pools = PoolCache::default();
    let (pool, error) = match pools.get_or_spawn(
        default_pool_size(config.pool.hard_cap),
        Arc::new(MelSpectrogram),
    ) {
        Ok(pool) => (Some(pool), None),
        Err(e) => {
            log::error!("Failed to start worker pool: {e}");
            (None, Some(format!("Spectrogram workers unavailable: {e}")))
        }
    };

    let app = App {
        config,
        backend,
        player: None,
        state_rx: None,
        state: None,
        session: 0,
        pools,
        pool,
        composite: None,
        visible: None,
        analyzing: false,
        filename: None,
        error,
    };

    let task = match file {
        Some(path) => Task::done(Message::FileDialogResult(Some(path))),
        None => Task::none(),
    };
    (app, task)
}

fn title(app: &App) -> String {
    match &app.filename {
        Some(name) => format!("Sonoscope - {name}"),
        None => "Sonoscope".to_string(),
    }
}

impl App {
    /// Replace the current session with one playing `audio`.
    fn start_session(&mut self, audio: Arc<AudioData>, path: PathBuf) -> Result<Task<Message>, String> {
        if let Some(mut old) = self.player.take() {
            old.destroy();
        }
        self.state_rx = None;
        self.state = None;
        self.composite = None;
        self.visible = None;
        self.analyzing = false;
        self.session += 1;
        let session = self.session;

        let mut engine = Engine::create(
            self.backend,
            path,
            audio.sample_rate,
            Box::new(CpalOutput),
        );
        engine
            .initialize()
            .map_err(|e| format!("Audio engine error: {e}"))?;

        let source = match self.backend {
            BackendKind::BufferGraph => {
                let (sample_rate, channels) = (audio.sample_rate, audio.channels);
                let samples = Arc::try_unwrap(audio)
                    .map(|a| a.samples)
                    .unwrap_or_else(|shared| shared.samples.clone());
                engine
                    .load_audio_data(samples, sample_rate, channels)
                    .map_err(|e| format!("Audio engine error: {e}"))?;
                engine
                    .audio_data()
                    .ok_or_else(|| "Audio engine lost its samples".to_string())?
            }
            BackendKind::Device => audio,
        };

        engine.set_volume(self.config.audio.volume);
        engine.set_playback_rate(self.config.audio.playback_rate);

        let player = Player::new(engine, self.config.view.window_seconds, self.config.view.mode);
        let rx = player.watch();
        self.state = Some(player.snapshot());
        self.state_rx = Some(rx);
        self.player = Some(player);

        let pool = match self.pools.get_or_spawn(
            default_pool_size(self.config.pool.hard_cap),
            Arc::new(MelSpectrogram),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("Failed to start worker pool: {e}");
                return Ok(Task::none());
            }
        };
        self.pool = Some(Arc::clone(&pool));
        self.analyzing = true;
        let params = self.config.spectrogram.clone();
        Ok(Task::perform(
            async move {
                chunker::render_audio(pool, source, params)
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            },
            move |result| Message::SpectrogramReady(session, result),
        ))
    }

    /// Pick up the latest player state and re-crop the strip if the window moved.
    fn sync_state(&mut self) {
        if let Some(rx) = &mut self.state_rx {
            if rx.has_changed().unwrap_or(false) {
                self.state = Some(*rx.borrow_and_update());
            }
        }
        self.refresh_slice();
    }

    fn refresh_slice(&mut self) {
        let (Some(image), Some(state)) = (&self.composite, &self.state) else {
            return;
        };
        let duration = state.playback.duration;
        if duration <= 0.0 || image.width == 0 {
            return;
        }
        let scale = image.width as f64 / duration;
        let x0 = (state.window.start * scale).floor() as u32;
        let x1 = ((state.window.end * scale).ceil() as u32).max(x0 + 1);
        if matches!(&self.visible, Some(v) if v.x0 == x0 && v.x1 == x1) {
            return;
        }
        let (width, pixels) = image.crop_columns(x0, x1);
        if width == 0 {
            return;
        }
        self.visible = Some(VisibleSlice {
            x0,
            x1,
            handle: image::Handle::from_rgba(width, image.height, pixels),
        });
    }

    fn with_player(&mut self, f: impl FnOnce(&mut Player)) -> Task<Message> {
        if let Some(player) = &mut self.player {
            f(player);
        }
        self.sync_state();
        Task::none()
    }
}

fn update(app: &mut App, message: Message) -> Task<Message> {
    match message {
        Message::FileDialogResult(path) => {
            if let Some(path) = path {
                Task::perform(
                    async move {
                        tokio::task::spawn_blocking(move || {
                            decoder::decode_file(&path)
                                .map(|data| (Arc::new(data), path))
                                .map_err(|e| e.to_string())
                        })
                        .await
                        .unwrap_or_else(|e| Err(format!("Decode task failed: {e}")))
                    },
                    Message::FileLoaded,
                )
            } else {
                Task::none()
            }
        }
        Message::FileLoaded(result) => match result {
            Ok((audio, path)) => {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match app.start_session(audio, path) {
                    Ok(task) => {
                        app.filename = Some(filename);
                        app.error = None;
                        task
                    }
                    Err(e) => {
                        log::error!("{e}");
                        app.error = Some(e);
                        Task::none()
                    }
                }
            }
            Err(e) => {
                app.error = Some(e);
                Task::none()
            }
        },
        Message::SpectrogramReady(session, result) => {
            if session != app.session {
                log::debug!("Dropping spectrogram of session {session}, now at {}", app.session);
                return Task::none();
            }
            app.analyzing = false;
            match result {
                Ok(image) => {
                    log::info!("Spectrogram ready: {}x{}", image.width, image.height);
                    app.composite = Some(image);
                    app.visible = None;
                    app.refresh_slice();
                }
                Err(e) => app.error = Some(format!("Spectrogram failed: {e}")),
            }
            Task::none()
        }
        Message::Control(ctrl) => match ctrl {
            ControlMessage::OpenFile => Task::perform(
                async {
                    let handle = rfd::AsyncFileDialog::new()
                        .add_filter("Audio", &["mp3", "wav", "flac", "aac", "m4a"])
                        .pick_file()
                        .await;
                    handle.map(|h| h.path().to_path_buf())
                },
                Message::FileDialogResult,
            ),
            ControlMessage::PlayPause => {
                let mut rejected = false;
                let task = app.with_player(|p| rejected = !p.toggle_play());
                if rejected {
                    app.error = Some("Playback was rejected by the audio device".to_string());
                }
                task
            }
            ControlMessage::ModeSelected(mode) => app.with_player(|p| p.set_mode(mode)),
            ControlMessage::ToggleLoop => app.with_player(Player::toggle_loop),
            ControlMessage::ZoomIn => app.with_player(Player::zoom_in),
            ControlMessage::ZoomOut => app.with_player(Player::zoom_out),
            ControlMessage::RateChanged(rate) => app.with_player(|p| p.set_rate(rate)),
            ControlMessage::VolumeChanged(volume) => app.with_player(|p| p.set_volume(volume)),
        },
        Message::Spectrogram(SpectrogramMessage::Seek(time)) => {
            app.with_player(|p| p.seek(time))
        }
        Message::Tick => app.with_player(Player::tick),
        Message::KeyEvent(key_event) => match key_event {
            keyboard::Event::KeyPressed { key, .. } => {
                let step = app
                    .state
                    .map(|s| s.window.width() * PAN_FRACTION)
                    .unwrap_or(0.0);
                match key.as_ref() {
                    keyboard::Key::Named(keyboard::key::Named::Space) => {
                        update(app, Message::Control(ControlMessage::PlayPause))
                    }
                    keyboard::Key::Named(keyboard::key::Named::ArrowLeft) => {
                        app.with_player(|p| p.pan(-step))
                    }
                    keyboard::Key::Named(keyboard::key::Named::ArrowRight) => {
                        app.with_player(|p| p.pan(step))
                    }
                    keyboard::Key::Character("+" | "=") => app.with_player(Player::zoom_in),
                    keyboard::Key::Character("-") => app.with_player(Player::zoom_out),
                    keyboard::Key::Character("l" | "L") => app.with_player(Player::toggle_loop),
                    _ => Task::none(),
                }
            }
            _ => Task::none(),
        },
    }
}

fn view(app: &App) -> Element<'_, Message> {
    let backend = app
        .player
        .as_ref()
        .map(|p| p.engine().kind())
        .unwrap_or(app.backend);
    let controls = controls::view_controls(app.state.as_ref(), backend).map(Message::Control);

    let strip: Element<Message> = match (&app.state, &app.visible) {
        (Some(state), Some(slice)) => {
            let overlay: Element<SpectrogramMessage> = canvas::Canvas::new(SpectrogramOverlay {
                window: state.window,
                playhead: state.playback.current_time,
            })
            .width(Length::Fill)
            .height(Length::Fixed(STRIP_HEIGHT))
            .into();

            stack![
                image(slice.handle.clone())
                    .width(Length::Fill)
                    .height(Length::Fixed(STRIP_HEIGHT))
                    .content_fit(ContentFit::Fill),
                overlay.map(Message::Spectrogram),
            ]
            .into()
        }
        (Some(_), None) => {
            let label = if app.analyzing {
                "Computing spectrogram..."
            } else {
                "No spectrogram"
            };
            center(text(label).size(18))
                .width(Length::Fill)
                .height(Length::Fixed(STRIP_HEIGHT))
                .into()
        }
        _ => center(text("Open an audio file to begin").size(18))
            .width(Length::Fill)
            .height(Length::Fixed(STRIP_HEIGHT))
            .into(),
    };

    let mut content = column![controls, strip].spacing(5);

    if let Some(err) = &app.error {
        content = content.push(
            container(text(format!("Error: {err}")).color(iced::Color::from_rgb(1.0, 0.3, 0.3)))
                .padding(10),
        );
    }

    container(content)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

fn subscription(_app: &App) -> Subscription<Message> {
    let tick = iced::time::every(std::time::Duration::from_millis(TIME_UPDATE_INTERVAL_MS))
        .map(|_| Message::Tick);

    let keys = keyboard::listen().map(Message::KeyEvent);

    Subscription::batch([tick, keys])
}

fn theme(_app: &App) -> Theme {
    Theme::Dark
}

pub fn run(config: AppConfig, backend: BackendKind, file: Option<PathBuf>) -> iced::Result {
    iced::application(
        move || boot(config.clone(), backend, file.clone()),
        update,
        view,
    )
    .title(title)
    .subscription(subscription)
    .theme(theme)
    .window_size((1100.0, 420.0))
    .run()
}
