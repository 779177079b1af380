use iced::widget::{button, container, pick_list, row, slider, text, Column, Row};
use iced::{Alignment, Element, Length};

use crate::audio::types::BackendKind;
use crate::player::PlayerState;
use crate::viewport::NavigationMode;

#[derive(Debug, Clone)]
pub enum ControlMessage {
    OpenFile,
    PlayPause,
    ModeSelected(NavigationMode),
    ToggleLoop,
    ZoomIn,
    ZoomOut,
    RateChanged(f32),
    VolumeChanged(f32),
}

/// Format seconds as M:SS.
fn format_time(seconds: f64) -> String {
    let total_secs = seconds.max(0.0) as u64;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{mins}:{secs:02}")
}

/// Build the transport controls view.
pub fn view_controls<'a>(
    state: Option<&PlayerState>,
    backend: BackendKind,
) -> Element<'a, ControlMessage> {
    let loaded = state.is_some();
    let playing = state.is_some_and(|s| s.playback.is_playing);
    let (position, duration) = state
        .map(|s| (s.playback.current_time, s.playback.duration))
        .unwrap_or((0.0, 0.0));
    let rate = state.map(|s| s.playback.playback_rate).unwrap_or(1.0);
    let volume = state.map(|s| s.playback.volume).unwrap_or(1.0);
    let mode = state.map(|s| s.window.mode);

    let open_btn = button(text("Open File")).on_press(ControlMessage::OpenFile);
    let play_btn = button(text(if playing { "Pause" } else { "Play" }))
        .on_press_maybe(loaded.then_some(ControlMessage::PlayPause));
    let loop_btn = button(text(if mode == Some(NavigationMode::Loop) {
        "Unloop"
    } else {
        "Loop"
    }))
    .on_press_maybe(loaded.then_some(ControlMessage::ToggleLoop));
    let zoom_in = button(text("+")).on_press_maybe(loaded.then_some(ControlMessage::ZoomIn));
    let zoom_out = button(text("-")).on_press_maybe(loaded.then_some(ControlMessage::ZoomOut));

    let time_display = text(format!(
        "{} / {}",
        format_time(position),
        format_time(duration)
    ))
    .size(16);

    let modes = pick_list(NavigationMode::ALL, mode, ControlMessage::ModeSelected)
        .placeholder("Mode");

    let backend_label = text(format!("Backend: {}", backend.label())).size(14);

    let transport_row = Row::new()
        .spacing(10)
        .align_y(Alignment::Center)
        .push(open_btn)
        .push(play_btn)
        .push(time_display)
        .push(modes)
        .push(loop_btn)
        .push(zoom_out)
        .push(zoom_in)
        .push(backend_label);

    let rate_row = row![
        text(format!("Rate: {:.0}%", rate * 100.0)).size(14),
        slider(0.25..=2.0, rate, ControlMessage::RateChanged).step(0.05),
    ]
    .spacing(10)
    .align_y(Alignment::Center)
    .width(Length::Fixed(260.0));

    let volume_row = row![
        text(format!("Volume: {:.0}%", volume * 100.0)).size(14),
        slider(0.0..=1.0, volume, ControlMessage::VolumeChanged).step(0.01),
    ]
    .spacing(10)
    .align_y(Alignment::Center)
    .width(Length::Fixed(260.0));

    let sliders = Row::new()
        .spacing(20)
        .align_y(Alignment::Center)
        .push(rate_row)
        .push(volume_row);

    container(Column::new().spacing(8).push(transport_row).push(sliders))
        .padding(10)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_minutes_and_padded_seconds() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(65.9), "1:05");
        assert_eq!(format_time(-3.0), "0:00");
    }
}
