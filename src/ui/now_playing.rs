//! Text for the "Now playing" message and the queue listings.
//!
//! Everything here is pure string building so the session and the command
//! handlers render exactly the same way.

use std::{fmt::Write, time::Duration};

use super::status::{Controls, StatusMessage};
use crate::audio::queue::Track;

/// `mm:ss`, con minutos sin tope (una pista de 2 h es `120:00`)
pub fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => {
            let total = d.as_secs();
            format!("{:02}:{:02}", total / 60, total % 60)
        }
        None => "--:--".to_string(),
    }
}

/// First message for a track, posted before any audio is sent.
pub fn render_start(track: &Track, can_skip: bool) -> StatusMessage {
    let mut content = format!("Now playing: {}", track.url);
    if track.duration.is_some() {
        let _ = write!(
            content,
            "\n`{} / {}`",
            format_duration(Some(Duration::ZERO)),
            format_duration(track.duration)
        );
    }

    StatusMessage::with_controls(
        content,
        Controls {
            paused: false,
            can_skip,
        },
    )
}

/// Periodic refresh: title link, elapsed/total and a bounded queue preview.
pub fn render_progress(
    track: &Track,
    elapsed: Duration,
    upcoming: &[Track],
    preview_len: usize,
    paused: bool,
) -> StatusMessage {
    let mut content = format!(
        "Now playing: [{}]({})\n`{} / {}`",
        track.title,
        track.url,
        format_duration(Some(elapsed)),
        format_duration(track.duration)
    );

    if !upcoming.is_empty() {
        content.push_str("\n\n**Queue:**\n");
        content.push_str(&render_list(upcoming, preview_len));
    }

    StatusMessage::with_controls(
        content,
        Controls {
            paused,
            can_skip: !upcoming.is_empty(),
        },
    )
}

pub fn render_finished(track: &Track) -> StatusMessage {
    StatusMessage::plain(format!("Playback Finished: {}", track.url))
}

pub fn render_stopped() -> StatusMessage {
    StatusMessage::plain("Playback stopped.")
}

/// Lista numerada de hasta `limit` pistas, con "…and N more" si se corta
pub fn render_list(tracks: &[Track], limit: usize) -> String {
    let mut out = String::new();
    for (i, track) in tracks.iter().take(limit).enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, track.title);
    }
    if tracks.len() > limit {
        let _ = writeln!(out, "…and {} more", tracks.len() - limit);
    }
    out
}

/// `<@user>, <t:unix:R>`: quién la pidió y hace cuánto, con los formatos
/// que Discord renderiza por su cuenta
fn requested(track: &Track) -> String {
    format!("<@{}>, <t:{}:R>", track.requested_by, track.added_at.timestamp())
}

/// Texto del comando `/queue`
pub fn render_queue(current: Option<&Track>, upcoming: &[Track], limit: usize) -> String {
    let mut out = match current {
        Some(track) => format!(
            "**Now playing:** [{}]({}) ({})\n",
            track.title,
            track.url,
            requested(track)
        ),
        None => "Nothing is playing.\n".to_string(),
    };

    if upcoming.is_empty() {
        out.push_str("The queue is empty.");
        return out;
    }

    let total: Duration = upcoming.iter().filter_map(|t| t.duration).sum();
    let _ = writeln!(
        out,
        "\n**Queue** ({} tracks, {}):",
        upcoming.len(),
        format_duration(Some(total))
    );
    for (i, track) in upcoming.iter().take(limit).enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, track.title, requested(track));
    }
    if upcoming.len() > limit {
        let _ = writeln!(out, "…and {} more", upcoming.len() - limit);
    }
    out
}
