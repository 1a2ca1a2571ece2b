use tokio::sync::mpsc;

use super::group::DownloadGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorHint {
    Accent,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status {
        title: String,
        subtitle: String,
        color: ColorHint,
    },
    Progress(f64),
    Log(String),
    EnableControl(bool),
    ShowSelection(Vec<DownloadGroup>),
}

pub trait ProgressSink: Send + Sync {
    fn status(&self, title: &str, subtitle: &str, color: ColorHint);
    fn progress(&self, fraction: f64);
    fn log(&self, line: &str);
    fn enable_control(&self, enabled: bool);
    fn show_selection(&self, groups: &[DownloadGroup]);
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<SyncEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn send(&self, event: SyncEvent) {
        // The host may have gone away; events are best effort.
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for EventSender {
    fn status(&self, title: &str, subtitle: &str, color: ColorHint) {
        self.send(SyncEvent::Status {
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            color,
        });
    }

    fn progress(&self, fraction: f64) {
        self.send(SyncEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    fn log(&self, line: &str) {
        self.send(SyncEvent::Log(line.to_string()));
    }

    fn enable_control(&self, enabled: bool) {
        self.send(SyncEvent::EnableControl(enabled));
    }

    fn show_selection(&self, groups: &[DownloadGroup]) {
        self.send(SyncEvent::ShowSelection(groups.to_vec()));
    }
}

pub fn deliver(event: SyncEvent, sink: &dyn ProgressSink) {
    match event {
        SyncEvent::Status {
            title,
            subtitle,
            color,
        } => sink.status(&title, &subtitle, color),
        SyncEvent::Progress(fraction) => sink.progress(fraction),
        SyncEvent::Log(line) => sink.log(&line),
        SyncEvent::EnableControl(enabled) => sink.enable_control(enabled),
        SyncEvent::ShowSelection(groups) => sink.show_selection(&groups),
    }
}

pub async fn pump_events(mut rx: mpsc::UnboundedReceiver<SyncEvent>, sink: &dyn ProgressSink) {
    while let Some(event) = rx.recv().await {
        deliver(event, sink);
    }
}
