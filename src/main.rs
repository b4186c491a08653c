use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use iced::widget::image::Handle;
use iced::widget::{button, checkbox, column, container, row, scrollable, text, text_input, Column};
use iced::{time, Alignment, Element, Length, Subscription, Task, Theme};
use tracing::{info, warn};

use video_catalog::desktop::{DirectoryPicker, ExportTarget, NativeDialogs, SystemLauncher};
use video_catalog::preview::{self, PreviewState};
use video_catalog::{logging, CatalogError, MetadataStore, RelKey, ScannedDataset, Session, Settings};

/// How often the preview bridge is drained while a pass is running
const PREVIEW_POLL: Duration = Duration::from_millis(150);

/// Which inline editor a draft belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Tags,
    Notes,
}

/// Main application state
struct VideoCatalog {
    settings: Settings,
    session: Session,
    /// Uncommitted text of the inline editors
    drafts: HashMap<(RelKey, Field), String>,
    /// Row shown in the preview panel
    selected: Option<RelKey>,
    preview: Option<Handle>,
    history_count: usize,
    scanning: bool,
    /// Bumped on every scan; only the latest result is installed
    scan_seq: u64,
    /// Status message to display to the user
    status: String,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    SelectDirectory,
    Refresh,
    /// Background scan finished
    DatasetScanned(u64, Result<ScannedDataset, CatalogError>),
    Select(RelKey),
    Edit(RelKey, Field, String),
    Commit(RelKey, Field),
    ToggleExport(RelKey),
    Open(RelKey),
    Save,
    Export,
    PruneMissing,
    PreviewTick,
}

impl VideoCatalog {
    fn new() -> (Self, Task<Message>) {
        let settings = Settings::load();
        logging::init(settings.log_filter.as_deref());

        let extractor = preview::detect(&settings.preview);
        // The app cannot function without its preview worker thread
        let session = Session::new(extractor).expect("Failed to start the preview worker thread");

        let mut app = VideoCatalog {
            settings,
            session,
            drafts: HashMap::new(),
            selected: None,
            preview: None,
            history_count: 0,
            scanning: false,
            scan_seq: 0,
            status: "Select a directory with videos.".into(),
        };

        let task = match app.settings.last_dataset.clone() {
            Some(root) if root.is_dir() => {
                info!("🎬 Reopening {}", root.display());
                app.start_scan(root, true)
            }
            _ => Task::none(),
        };
        (app, task)
    }

    fn start_scan(&mut self, root: PathBuf, reload: bool) -> Task<Message> {
        self.session.cancel_previews();
        self.scan_seq += 1;
        self.scanning = true;
        self.status = format!("Scanning {}...", root.display());

        let seq = self.scan_seq;
        Task::perform(scan_dataset(root, reload), move |result| {
            Message::DatasetScanned(seq, result)
        })
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::SelectDirectory => {
                if let Some(root) = NativeDialogs.pick_directory() {
                    if self.session.store().is_some_and(|s| s.is_dirty()) {
                        warn!("⚠️  Switching datasets with unsaved changes");
                    }
                    return self.start_scan(root, true);
                }
                Task::none()
            }
            Message::Refresh => match self.session.root() {
                Some(root) => {
                    let root = root.to_path_buf();
                    self.start_scan(root, false)
                }
                None => {
                    self.status = CatalogError::NoDataset.to_string();
                    Task::none()
                }
            },
            Message::DatasetScanned(seq, _) if seq != self.scan_seq => {
                info!("Ignoring superseded scan #{seq}");
                Task::none()
            }
            Message::DatasetScanned(_, result) => {
                self.scanning = false;
                let reopened = result.as_ref().is_ok_and(|s| s.loaded.is_some());
                let root = result.as_ref().ok().map(|s| s.layout.root().to_path_buf());

                match result.and_then(|scanned| self.session.install(scanned)) {
                    Ok(summary) => {
                        self.status = format!(
                            "✅ {} videos, {} new, {} missing but kept, {} skipped",
                            summary.videos, summary.added, summary.retained_missing, summary.skipped
                        );
                        if let Some(e) = summary.malformed {
                            self.status = format!("⚠️  {e}; started with an empty catalog");
                        }
                        if reopened {
                            self.drafts.clear();
                            self.selected = None;
                            self.preview = None;
                            self.remember_dataset(root);
                        }
                        self.refresh_history_count();
                    }
                    Err(e) => {
                        warn!("⚠️  {}", e);
                        self.status = format!("❌ {e}");
                    }
                }
                Task::none()
            }
            Message::Select(key) => {
                self.selected = Some(key);
                self.load_preview();
                Task::none()
            }
            Message::Edit(key, field, value) => {
                self.drafts.insert((key, field), value);
                Task::none()
            }
            Message::Commit(key, field) => {
                let Some(value) = self.drafts.remove(&(key.clone(), field)) else {
                    return Task::none();
                };
                let result = match field {
                    Field::Tags => self.session.set_tags(&key, &value),
                    Field::Notes => self.session.set_notes(&key, &value),
                };
                if let Err(e) = result {
                    self.status = format!("❌ {e}");
                }
                Task::none()
            }
            Message::ToggleExport(key) => {
                self.session.toggle_selected(&key);
                Task::none()
            }
            Message::Open(key) => {
                if let Err(e) = self.session.open_video(&key, &SystemLauncher) {
                    warn!("⚠️  {}", e);
                    self.status = format!("⚠️  {e}");
                }
                Task::none()
            }
            Message::Save => {
                self.commit_all_drafts();
                match self.session.save() {
                    Ok(report) => {
                        self.status = match report.history {
                            Ok(_) => format!("💾 Saved to {}", report.metadata_path.display()),
                            Err(e) => format!("💾 Saved, but history snapshot failed: {e}"),
                        };
                        self.refresh_history_count();
                    }
                    Err(e) => self.status = format!("❌ Save failed: {e}"),
                }
                Task::none()
            }
            Message::Export => {
                if self.session.selection_len() == 0 {
                    self.status = "No videos selected for export.".into();
                    return Task::none();
                }
                if let Some(dest) = NativeDialogs.pick_export_file("selected_videos.txt") {
                    self.status = match self.session.export_selection(&dest) {
                        Ok(count) => format!("📤 Exported {} paths to {}", count, dest.display()),
                        Err(e) => format!("❌ Export failed: {e}"),
                    };
                }
                Task::none()
            }
            Message::PruneMissing => {
                match self.session.prune_missing() {
                    Ok(removed) => self.status = format!("🧹 Removed {removed} entries for missing videos"),
                    Err(e) => self.status = format!("❌ {e}"),
                }
                Task::none()
            }
            Message::PreviewTick => {
                let ready = self.session.poll_previews();
                if ready.iter().any(|r| Some(&r.key) == self.selected.as_ref()) {
                    self.load_preview();
                }
                Task::none()
            }
        }
    }

    fn commit_all_drafts(&mut self) {
        for ((key, field), value) in std::mem::take(&mut self.drafts) {
            let result = match field {
                Field::Tags => self.session.set_tags(&key, &value),
                Field::Notes => self.session.set_notes(&key, &value),
            };
            if let Err(e) = result {
                warn!("⚠️  Dropped edit for {}: {}", key, e);
            }
        }
    }

    fn remember_dataset(&mut self, root: Option<PathBuf>) {
        if root.is_none() || self.settings.last_dataset == root {
            return;
        }
        self.settings.last_dataset = root;
        if let Err(e) = self.settings.save() {
            warn!("⚠️  Could not save settings: {}", e);
        }
    }

    fn refresh_history_count(&mut self) {
        self.history_count = match self.session.history() {
            Ok(records) => records.len(),
            Err(e) => {
                warn!("⚠️  {}", e);
                0
            }
        };
    }

    fn load_preview(&mut self) {
        self.preview = None;
        let Some(key) = &self.selected else {
            return;
        };
        if let PreviewState::Ready(path) = self.session.preview_state(key) {
            let max = &self.settings.preview;
            match preview::load_thumbnail(&path, max.max_width, max.max_height) {
                Ok(img) => {
                    let (width, height) = img.dimensions();
                    self.preview = Some(Handle::from_rgba(width, height, img.into_raw()));
                }
                Err(e) => warn!("⚠️  Cannot display preview for {}: {}", key, e),
            }
        }
    }

    fn view(&self) -> Element<Message> {
        let toolbar = row![
            button("Select Directory").on_press(Message::SelectDirectory).padding(10),
            button("Refresh").on_press_maybe(self.can_act().then_some(Message::Refresh)).padding(10),
            button("Save").on_press_maybe(self.can_act().then_some(Message::Save)).padding(10),
            button("Export Selected").on_press_maybe(self.can_act().then_some(Message::Export)).padding(10),
            button("Prune Missing").on_press_maybe(self.can_act().then_some(Message::PruneMissing)).padding(10),
        ]
        .spacing(10);

        let content = column![toolbar, self.view_status(), row![self.view_table(), self.view_preview()].spacing(20)]
            .spacing(16)
            .padding(20);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn can_act(&self) -> bool {
        !self.scanning && self.session.root().is_some()
    }

    fn view_status(&self) -> Element<Message> {
        let videos = self.session.store().map_or(0, MetadataStore::len);
        let dirty = self.session.store().is_some_and(|s| s.is_dirty());

        let tags = self
            .session
            .tag_counts_ranked()
            .iter()
            .map(|(tag, count)| format!("{tag} ({count})"))
            .collect::<Vec<_>>()
            .join(", ");
        let failures = self.session.preview_failures().len();

        let mut summary = format!(
            "Videos: {} | Selected: {} | History snapshots: {}",
            videos,
            self.session.selection_len(),
            self.history_count
        );
        if dirty {
            summary.push_str(" | unsaved changes");
        }
        if failures > 0 {
            summary.push_str(&format!(" | {failures} previews unavailable"));
        }

        column![
            text(&self.status).size(16),
            text(summary).size(14),
            text(format!("Tags: {}", if tags.is_empty() { "none".into() } else { tags })).size(14),
            text(format!("Files without tags: {}", self.session.untagged_count())).size(14),
        ]
        .spacing(4)
        .into()
    }

    fn view_table(&self) -> Element<Message> {
        let mut table = Column::new().spacing(6);
        for entry in self.session.rows() {
            let key = entry.key.clone();
            let tags = self.draft_or(&key, Field::Tags, &entry.tags);
            let notes = self.draft_or(&key, Field::Notes, &entry.notes);
            let name = if entry.present {
                entry.file_name.clone()
            } else {
                format!("{} (missing)", entry.file_name)
            };

            let (k_toggle, k_select, k_tags, k_tags_commit, k_notes, k_notes_commit, k_open) = (
                key.clone(),
                key.clone(),
                key.clone(),
                key.clone(),
                key.clone(),
                key.clone(),
                key,
            );
            table = table.push(
                row![
                    checkbox("", entry.selected).on_toggle(move |_| Message::ToggleExport(k_toggle.clone())),
                    button(text(name))
                        .style(button::text)
                        .on_press_maybe((!self.scanning).then_some(Message::Select(k_select)))
                        .width(Length::FillPortion(2)),
                    text(entry.key.to_string()).size(12).width(Length::FillPortion(2)),
                    text_input("tags", &tags)
                        .on_input(move |v| Message::Edit(k_tags.clone(), Field::Tags, v))
                        .on_submit(Message::Commit(k_tags_commit, Field::Tags))
                        .width(Length::FillPortion(3)),
                    text_input("notes", &notes)
                        .on_input(move |v| Message::Edit(k_notes.clone(), Field::Notes, v))
                        .on_submit(Message::Commit(k_notes_commit, Field::Notes))
                        .width(Length::FillPortion(3)),
                    button("Open").on_press(Message::Open(k_open)),
                ]
                .spacing(8)
                .align_y(Alignment::Center),
            );
        }

        scrollable(table).width(Length::FillPortion(4)).height(Length::Fill).into()
    }

    fn view_preview(&self) -> Element<Message> {
        let body: Element<Message> = match (&self.selected, &self.preview) {
            (None, _) => text("Select a video").into(),
            (Some(_), Some(handle)) => iced::widget::image(handle.clone()).into(),
            (Some(key), None) => match self.session.preview_state(key) {
                PreviewState::Failed(reason) => text(format!("No preview: {reason}")).into(),
                PreviewState::Ready(_) => text("Preview could not be displayed").into(),
                _ => text("Generating preview...").into(),
            },
        };

        container(body)
            .width(Length::Fixed(self.settings.preview.max_width as f32))
            .center_x(Length::Fixed(self.settings.preview.max_width as f32))
            .into()
    }

    fn draft_or(&self, key: &RelKey, field: Field, saved: &str) -> String {
        self.drafts
            .get(&(key.clone(), field))
            .cloned()
            .unwrap_or_else(|| saved.to_string())
    }

    fn subscription(&self) -> Subscription<Message> {
        if self.session.previews_running() {
            time::every(PREVIEW_POLL).map(|_| Message::PreviewTick)
        } else {
            Subscription::none()
        }
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn main() -> iced::Result {
    iced::application("Video Catalog", VideoCatalog::update, VideoCatalog::view)
        .subscription(VideoCatalog::subscription)
        .theme(VideoCatalog::theme)
        .centered()
        .run_with(VideoCatalog::new)
}

/// Scan (and optionally load) a dataset off the UI thread
async fn scan_dataset(root: PathBuf, reload: bool) -> Result<ScannedDataset, CatalogError> {
    let shown = root.clone();
    tokio::task::spawn_blocking(move || ScannedDataset::scan(root, reload))
        .await
        .map_err(|e| CatalogError::DatasetUnreadable {
            root: shown,
            source: Arc::new(io::Error::other(format!("scan task failed: {e}"))),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn catalog(last_dataset: PathBuf) -> VideoCatalog {
        VideoCatalog {
            settings: Settings {
                last_dataset: Some(last_dataset),
                ..Settings::default()
            },
            session: Session::new(Arc::new(preview::UnavailableExtractor)).unwrap(),
            drafts: HashMap::new(),
            selected: None,
            preview: None,
            history_count: 0,
            scanning: false,
            scan_seq: 0,
            status: String::new(),
        }
    }

    #[test]
    fn test_superseded_scan_is_ignored() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("old.mp4"), b"video").unwrap();
        fs::write(second.path().join("new.mp4"), b"video").unwrap();

        let mut app = catalog(second.path().to_path_buf());
        let _ = app.start_scan(first.path().to_path_buf(), true);
        let _ = app.start_scan(second.path().to_path_buf(), true);
        assert_eq!(app.scan_seq, 2);

        let latest = ScannedDataset::scan(second.path(), true);
        let _ = app.update(Message::DatasetScanned(2, latest));
        assert_eq!(app.session.root(), Some(second.path()));
        assert!(!app.scanning);

        // The first scan finishes last and must not replace the dataset
        let stale = ScannedDataset::scan(first.path(), true);
        let _ = app.update(Message::DatasetScanned(1, stale));
        assert_eq!(app.session.root(), Some(second.path()));
        assert_eq!(app.session.rows()[0].key.to_string(), "new.mp4");
    }
}
