use std::io::Write;
use std::sync::Mutex;

use tracing::debug;

use crate::sync::events::{ColorHint, ProgressSink};
use crate::sync::group::DownloadGroup;
use crate::sync::library::LibrarySong;

const PROGRESS_STEP: u32 = 10;

/// Prints engine events to stdout for the command line host.
#[derive(Default)]
pub struct TerminalSink {
    last_percent: Mutex<Option<u32>>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for TerminalSink {
    fn status(&self, title: &str, subtitle: &str, color: ColorHint) {
        let marker = match color {
            ColorHint::Accent => "::",
            ColorHint::Success => "ok",
            ColorHint::Error => "!!",
        };
        if subtitle.is_empty() {
            println!("[{marker}] {title}");
        } else {
            println!("[{marker}] {title}: {subtitle}");
        }
    }

    fn progress(&self, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
        let mut last = self
            .last_percent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let due = match *last {
            Some(previous) if percent < previous => true,
            Some(previous) => percent >= previous + PROGRESS_STEP || (percent == 100 && previous < 100),
            None => true,
        };
        if due {
            *last = Some(percent);
            println!("     {percent:>3}%");
        }
    }

    fn log(&self, line: &str) {
        println!("     {line}");
    }

    fn enable_control(&self, enabled: bool) {
        debug!(enabled, "control toggled");
    }

    fn show_selection(&self, groups: &[DownloadGroup]) {
        let mut out = std::io::stdout().lock();
        let _ = write_groups(&mut out, groups);
    }
}

/// One line per group: status, file count, size and folder.
pub fn write_groups(out: &mut impl Write, groups: &[DownloadGroup]) -> std::io::Result<()> {
    for group in groups {
        writeln!(
            out,
            "  {:<6} {:>4} files {:>10}  {}",
            group.status.label(),
            group.files.len(),
            format_bytes(group.total_bytes()),
            if group.group_key.is_empty() {
                group.display_name.as_str()
            } else {
                group.group_key.as_str()
            }
        )?;
    }
    Ok(())
}

pub fn write_library(out: &mut impl Write, songs: &[LibrarySong]) -> std::io::Result<()> {
    for song in songs {
        if song.artist.is_empty() {
            writeln!(out, "  {}  [{}]", song.name, song.folder)?;
        } else {
            writeln!(out, "  {} - {}  [{}]", song.artist, song.name, song.folder)?;
        }
    }
    writeln!(out, "{} songs", songs.len())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
