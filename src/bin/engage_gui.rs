#![forbid(unsafe_code)]

//! Desktop variant: lists discovered videos with their thumbnails and lets the
//! operator trigger the subscribe / like / comment sequence per video.
//!
//! The window never talks to the network itself. A single worker thread owns
//! the processor and runs jobs strictly in the order they were queued: first a
//! hydration job per row (thumbnail plus state check), then whatever
//! "Process" clicks arrive. Each finished job reports back over a channel and
//! only touches its own row, so a failure stays local to that row.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use eframe::egui;
use tube_engage::config::{
    CommentPolicy, EngagementConfig, RuntimeOverrides, resolve_runtime_paths,
};
use tube_engage::discovery::Discovery;
use tube_engage::engagement::{EngagementProcessor, ProcessReport};
use tube_engage::metadata::{EngagementState, VideoRecord};
use tube_engage::session::{init_logging, open_client};
use tube_engage::youtube::{YouTubeApi, fetch_bytes};

const THUMB_SIZE: egui::Vec2 = egui::vec2(160.0, 90.0);

#[derive(Debug, Parser)]
#[command(name = "engage_gui", version, about = "Review and process discovered videos in a window")]
struct GuiArgs {
    /// OAuth client-secret descriptor (overrides ENGAGE_CLIENT_SECRETS).
    #[arg(long, value_name = "PATH")]
    client_secrets: Option<PathBuf>,

    /// Directory holding persisted tokens (overrides ENGAGE_TOKENS_DIR).
    #[arg(long, value_name = "DIR")]
    tokens_dir: Option<PathBuf>,

    /// Alternate dotenv file to read settings from.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Post the comment even when this account already commented.
    #[arg(long)]
    always_comment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Hydrate(usize),
    Process(usize),
}

/// Completion of one job for one row. `I` is the decoded thumbnail type.
#[derive(Debug)]
enum RowEvent<I> {
    Thumbnail(usize, I),
    State(usize, Result<EngagementState, String>),
    Processed(usize, Result<ProcessReport, String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RowStatus {
    Checking,
    Ready,
    Working,
    Done,
    Failed(String),
}

impl RowStatus {
    /// Button label and whether it can be clicked.
    fn button(&self) -> (&'static str, bool) {
        match self {
            RowStatus::Checking => ("Checking...", false),
            RowStatus::Ready | RowStatus::Failed(_) => ("Process", true),
            RowStatus::Working => ("Working...", false),
            RowStatus::Done => ("Done", false),
        }
    }

    fn after_check(result: Result<EngagementState, String>) -> Self {
        match result {
            Ok(state) if state.is_complete() => RowStatus::Done,
            Ok(_) => RowStatus::Ready,
            Err(err) => RowStatus::Failed(err),
        }
    }

    fn after_process(result: Result<ProcessReport, String>) -> Self {
        match result {
            Ok(_) => RowStatus::Done,
            Err(err) => RowStatus::Failed(err),
        }
    }
}

/// Executes jobs until the window drops its sender. `load_thumbnail` and
/// `notify` are injected so the loop runs without a display.
fn run_worker<A, I>(
    processor: EngagementProcessor<A>,
    videos: Vec<VideoRecord>,
    load_thumbnail: impl Fn(&VideoRecord) -> Option<I>,
    jobs: Receiver<Job>,
    events: Sender<RowEvent<I>>,
    notify: impl Fn(),
) where
    A: YouTubeApi,
{
    while let Ok(job) = jobs.recv() {
        let outcome = match job {
            Job::Hydrate(index) => {
                let Some(video) = videos.get(index) else {
                    continue;
                };
                if let Some(image) = load_thumbnail(video)
                    && events.send(RowEvent::Thumbnail(index, image)).is_err()
                {
                    break;
                }
                let state = processor
                    .check_state(video)
                    .map_err(|err| format!("{err:#}"));
                if let Err(err) = &state {
                    log::warn!("checking {} failed: {err}", video.video_id);
                }
                events.send(RowEvent::State(index, state))
            }
            Job::Process(index) => {
                let Some(video) = videos.get(index) else {
                    continue;
                };
                log::info!("Processing video: {}", video.title);
                let report = processor
                    .process(video)
                    .map_err(|err| format!("{err:#}"));
                if let Err(err) = &report {
                    log::warn!("processing {} failed: {err}", video.video_id);
                }
                events.send(RowEvent::Processed(index, report))
            }
        };
        if outcome.is_err() {
            break;
        }
        notify();
    }
}

fn decode_thumbnail(bytes: &[u8]) -> Result<egui::ColorImage> {
    let image = image::load_from_memory(bytes)
        .context("decoding thumbnail")?
        .to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    Ok(egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw()))
}

fn load_thumbnail(agent: &ureq::Agent, video: &VideoRecord) -> Option<egui::ColorImage> {
    if video.thumbnail_url.is_empty() {
        return None;
    }
    let loaded = fetch_bytes(agent, &video.thumbnail_url)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| decode_thumbnail(&bytes));
    match loaded {
        Ok(image) => Some(image),
        Err(err) => {
            log::warn!("thumbnail for {} unavailable: {err:#}", video.video_id);
            None
        }
    }
}

struct Row {
    video: VideoRecord,
    thumbnail: Option<egui::TextureHandle>,
    status: RowStatus,
}

struct EngageApp {
    rows: Vec<Row>,
    jobs: Sender<Job>,
    events: Receiver<RowEvent<egui::ColorImage>>,
}

impl EngageApp {
    /// Queues a hydration job for every row, in listing order.
    fn new(
        videos: Vec<VideoRecord>,
        jobs: Sender<Job>,
        events: Receiver<RowEvent<egui::ColorImage>>,
    ) -> Self {
        for index in 0..videos.len() {
            let _ = jobs.send(Job::Hydrate(index));
        }
        let rows = videos
            .into_iter()
            .map(|video| Row {
                video,
                thumbnail: None,
                status: RowStatus::Checking,
            })
            .collect();
        Self { rows, jobs, events }
    }

    fn handle_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                RowEvent::Thumbnail(index, image) => {
                    if let Some(row) = self.rows.get_mut(index) {
                        let name = format!("thumb-{}", row.video.video_id);
                        row.thumbnail =
                            Some(ctx.load_texture(name, image, egui::TextureOptions::LINEAR));
                    }
                }
                RowEvent::State(index, result) => {
                    if let Some(row) = self.rows.get_mut(index) {
                        row.status = RowStatus::after_check(result);
                    }
                }
                RowEvent::Processed(index, result) => {
                    if let Some(row) = self.rows.get_mut(index) {
                        row.status = RowStatus::after_process(result);
                    }
                }
            }
        }
    }

    fn render_row(&mut self, ui: &mut egui::Ui, index: usize) {
        let row = &mut self.rows[index];
        ui.horizontal(|ui| {
            let thumbnail_clicked = match &row.thumbnail {
                Some(texture) => ui
                    .add(
                        egui::Image::from_texture(texture)
                            .fit_to_exact_size(THUMB_SIZE)
                            .sense(egui::Sense::click()),
                    )
                    .clicked(),
                None => ui
                    .add_sized(THUMB_SIZE, egui::Button::new("No thumbnail"))
                    .clicked(),
            };
            if thumbnail_clicked {
                println!("{}", row.video.watch_url());
            }

            ui.vertical(|ui| {
                ui.label(egui::RichText::new(&row.video.title).strong());
                ui.label(&row.video.channel_title);
                if let RowStatus::Failed(err) = &row.status {
                    ui.colored_label(egui::Color32::LIGHT_RED, err);
                }
            });

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let (label, enabled) = row.status.button();
                if ui.add_enabled(enabled, egui::Button::new(label)).clicked()
                    && self.jobs.send(Job::Process(index)).is_ok()
                {
                    row.status = RowStatus::Working;
                }
            });
        });
        ui.separator();
    }
}

impl eframe::App for EngageApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events(ctx);

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.heading("Discovered videos");
            let done = self
                .rows
                .iter()
                .filter(|row| row.status == RowStatus::Done)
                .count();
            ui.label(format!("{} video(s), {done} done", self.rows.len()));
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                for index in 0..self.rows.len() {
                    self.render_row(ui, index);
                }
            });
        });
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = GuiArgs::parse();
    let paths = resolve_runtime_paths(RuntimeOverrides {
        client_secrets: args.client_secrets.clone(),
        tokens_dir: args.tokens_dir.clone(),
        env_path: args.env_file.clone(),
    })?;
    let config = EngagementConfig {
        comment_policy: if args.always_comment {
            CommentPolicy::Always
        } else {
            CommentPolicy::SkipIfPresent
        },
        ..EngagementConfig::default()
    };

    let client = Arc::new(open_client(&paths, &config.scope)?);
    let videos = Discovery::new(client.as_ref(), &config)
        .discover_all()
        .context("discovering videos")?;
    println!("Found {} unique videos", videos.len());

    let agent = client.agent().clone();
    let processor = EngagementProcessor::new(client, config)?;
    let (job_tx, job_rx) = channel();
    let (event_tx, event_rx) = channel();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 640.0])
            .with_title("YouTube Engagement"),
        ..Default::default()
    };
    eframe::run_native(
        "YouTube Engagement",
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let worker_videos = videos.clone();
            thread::spawn(move || {
                run_worker(
                    processor,
                    worker_videos,
                    |video| load_thumbnail(&agent, video),
                    job_rx,
                    event_tx,
                    || ctx.request_repaint(),
                )
            });
            Ok(Box::new(EngageApp::new(videos, job_tx, event_rx)))
        }),
    )
    .map_err(|err| anyhow!("running window: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use tube_engage::engagement::Outcome;
    use tube_engage::error::ApiError;
    use tube_engage::metadata::Rating;
    use tube_engage::youtube::CommentPage;

    const ME: &str = "UCme";

    /// Platform stub: videos listed in `complete` are already subscribed,
    /// liked and commented; `broken` videos fail every rating call.
    #[derive(Default)]
    struct StubApi {
        complete: HashSet<String>,
        broken: HashSet<String>,
        processed: Mutex<Vec<String>>,
    }

    impl YouTubeApi for StubApi {
        fn search_videos(
            &self,
            _query: &str,
            _published_after: chrono::DateTime<chrono::Utc>,
            _max_results: usize,
        ) -> Result<Vec<VideoRecord>, ApiError> {
            Ok(Vec::new())
        }

        fn my_channel_id(&self) -> Result<Option<String>, ApiError> {
            Ok(Some(ME.to_string()))
        }

        fn is_subscribed(&self, channel_id: &str) -> Result<bool, ApiError> {
            Ok(self.complete.contains(channel_id))
        }

        fn subscribe(&self, _channel_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        fn rating(&self, video_id: &str) -> Result<Rating, ApiError> {
            if self.broken.contains(video_id) {
                return Err(ApiError::Status {
                    endpoint: "videos/getRating".into(),
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(if self.complete.contains(video_id) {
                Rating::Like
            } else {
                Rating::None
            })
        }

        fn rate(&self, _video_id: &str, _rating: Rating) -> Result<(), ApiError> {
            Ok(())
        }

        fn comment_threads(
            &self,
            video_id: &str,
            _search_terms: Option<&str>,
            _page_token: Option<&str>,
        ) -> Result<CommentPage, ApiError> {
            let authors = if self.complete.contains(video_id) {
                vec![ME.to_string()]
            } else {
                Vec::new()
            };
            Ok(CommentPage {
                author_channel_ids: authors,
                next_page_token: None,
            })
        }

        fn post_comment(&self, video_id: &str, _text: &str) -> Result<(), ApiError> {
            self.processed.lock().push(video_id.to_string());
            Ok(())
        }
    }

    fn video(id: &str) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("Video {id}"),
            // Channel id doubles as the video id so `complete` covers both.
            channel_id: id.to_string(),
            channel_title: "Channel".to_string(),
            thumbnail_url: String::new(),
        }
    }

    fn run_jobs(api: StubApi, videos: Vec<VideoRecord>, jobs: &[Job]) -> (Vec<RowEvent<String>>, Arc<StubApi>) {
        let api = Arc::new(api);
        let processor = EngagementProcessor::new(Arc::clone(&api), EngagementConfig::default()).unwrap();
        let (job_tx, job_rx) = channel();
        let (event_tx, event_rx) = channel();
        for job in jobs {
            job_tx.send(*job).unwrap();
        }
        drop(job_tx);
        run_worker(
            processor,
            videos,
            |video| Some(format!("thumb:{}", video.video_id)),
            job_rx,
            event_tx,
            || {},
        );
        (event_rx.try_iter().collect(), api)
    }

    #[test]
    fn button_reflects_row_status() {
        assert_eq!(RowStatus::Checking.button(), ("Checking...", false));
        assert_eq!(RowStatus::Ready.button(), ("Process", true));
        assert_eq!(RowStatus::Working.button(), ("Working...", false));
        assert_eq!(RowStatus::Done.button(), ("Done", false));
        assert_eq!(RowStatus::Failed("x".into()).button(), ("Process", true));
    }

    #[test]
    fn complete_videos_start_done_and_others_ready() {
        let complete = EngagementState {
            is_subscribed: true,
            is_liked: true,
            has_own_comment: true,
        };
        assert_eq!(RowStatus::after_check(Ok(complete)), RowStatus::Done);
        assert_eq!(
            RowStatus::after_check(Ok(EngagementState::default())),
            RowStatus::Ready
        );
        assert_eq!(
            RowStatus::after_check(Err("nope".into())),
            RowStatus::Failed("nope".into())
        );
        assert_eq!(RowStatus::after_process(Err("x".into())), RowStatus::Failed("x".into()));
    }

    #[test]
    fn processed_rows_are_done_whether_or_not_anything_was_posted() {
        let performed = ProcessReport {
            subscribe: Outcome::Performed,
            like: Outcome::Performed,
            comment: Outcome::Performed,
        };
        let skipped = ProcessReport {
            subscribe: Outcome::Skipped,
            like: Outcome::Skipped,
            comment: Outcome::Skipped,
        };
        assert_eq!(RowStatus::after_process(Ok(performed)), RowStatus::Done);
        assert_eq!(RowStatus::after_process(Ok(skipped)), RowStatus::Done);
        assert_eq!(RowStatus::Done.button(), ("Done", false));
    }

    #[test]
    fn hydration_reports_thumbnail_then_state_per_row_in_order() {
        let api = StubApi {
            complete: ["A".to_string()].into_iter().collect(),
            ..StubApi::default()
        };
        let (events, _) = run_jobs(
            api,
            vec![video("A"), video("B")],
            &[Job::Hydrate(0), Job::Hydrate(1)],
        );

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], RowEvent::Thumbnail(0, thumb) if thumb == "thumb:A"));
        assert!(matches!(&events[1], RowEvent::State(0, Ok(state)) if state.is_complete()));
        assert!(matches!(&events[2], RowEvent::Thumbnail(1, _)));
        assert!(matches!(&events[3], RowEvent::State(1, Ok(state)) if !state.is_complete()));
    }

    #[test]
    fn failure_is_confined_to_its_row() {
        let api = StubApi {
            broken: ["A".to_string()].into_iter().collect(),
            ..StubApi::default()
        };
        let (events, api) = run_jobs(
            api,
            vec![video("A"), video("B")],
            &[Job::Process(0), Job::Process(1)],
        );

        assert!(matches!(&events[0], RowEvent::Processed(0, Err(err)) if err.contains("boom")));
        assert!(matches!(&events[1], RowEvent::Processed(1, Ok(_))));
        assert_eq!(*api.processed.lock(), vec!["B".to_string()]);
    }

    #[test]
    fn out_of_range_jobs_are_ignored() {
        let (events, _) = run_jobs(StubApi::default(), vec![video("A")], &[Job::Process(7)]);
        assert!(events.is_empty());
    }

    #[test]
    fn args_parse_gui_flags() {
        let args = GuiArgs::try_parse_from(["engage_gui", "--always-comment", "--env-file", "x.env"])
            .unwrap();
        assert!(args.always_comment);
        assert_eq!(args.env_file, Some(PathBuf::from("x.env")));
    }
}
