mod analysis;
mod app;
mod audio;
mod config;
mod error;
mod events;
mod player;
mod ui;
mod viewport;

use std::path::PathBuf;

use audio::types::BackendKind;
use clap::Parser;

/// Spectrogram audio player
#[derive(Parser, Debug, Default, PartialEq)]
#[command(name = "sonoscope")]
#[command(version)]
struct Args {
    /// Playback backend: device or buffer. Overrides the config file.
    #[arg(short, long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Audio file to open at startup
    file: Option<PathBuf>,
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value)
        .ok_or_else(|| format!("unknown backend '{value}' (expected device or buffer)"))
}

fn main() -> iced::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    let config = config::load_config(&config::default_config_path());
    let backend = args.backend.unwrap_or(config.audio.backend);
    log::info!("Starting with {} backend", backend.label());

    app::run(config, backend, args.file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("sonoscope").chain(list.iter().copied()))
    }

    #[test]
    fn backend_and_file() {
        let parsed = args(&["--backend", "device", "song.flac"]).unwrap();
        assert_eq!(parsed.backend, Some(BackendKind::Device));
        assert_eq!(parsed.file, Some(PathBuf::from("song.flac")));
    }

    #[test]
    fn no_arguments_defers_to_config() {
        assert_eq!(args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(args(&["--backend"]).is_err());
        assert!(args(&["--backend", "alsa"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["a.wav", "b.wav"]).is_err());
    }

    #[test]
    fn short_flag_and_alias() {
        let parsed = args(&["-b", "buffer-graph"]).unwrap();
        assert_eq!(parsed.backend, Some(BackendKind::BufferGraph));
        assert_eq!(parsed.file, None);
    }
}
