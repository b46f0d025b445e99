//! CLI command implementations

use crate::output::{self, EventPrinter, OutputFormat};
use adsync_core::ads::{AdBreakPlan, BreakOffset, ScriptedAdControl, ScriptedAdService};
use adsync_core::pipeline::{PipelineErrorKind, SimulatedControl, SimulatedPipeline};
use adsync_core::{
    AdMediaHandle, ChannelSink, PipelineError, PlayerConfig, PlayerEvent, PlayerId, PlayerListener,
    PlayerMessage, RawPlayerState, Source, VideoPlayer,
};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const CONTENT_URI: &str = "https://cdn.example.com/content/master.m3u8";
const AD_TAG_URI: &str = "https://ads.example.com/vmap?session=adsync-cli";

/// Options for `simulate`
#[derive(Debug)]
pub struct SimulateOptions {
    pub content_ms: u64,
    pub preroll: usize,
    pub midrolls_ms: Vec<u64>,
    pub postroll: usize,
    pub ad_duration_ms: u64,
    pub plan: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub fail_request: bool,
    pub fail_ad: Option<String>,
    pub step_ms: u64,
}

#[derive(Default)]
struct EndWatcher {
    played_to_end: AtomicUsize,
}

impl PlayerListener for EndWatcher {
    fn on_event(&self, _player_id: PlayerId, event: &PlayerEvent) {
        if matches!(event, PlayerEvent::PlayedToEnd) {
            self.played_to_end.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Run one scripted session against the simulated pipeline
pub fn simulate(options: SimulateOptions, format: &str) -> anyhow::Result<()> {
    if options.step_ms == 0 {
        anyhow::bail!("step must be greater than zero");
    }

    let mut config = match &options.config {
        Some(path) => PlayerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    // ticks are driven by the simulation loop, the clock only has to run
    if config.time_update_interval_ms == 0 {
        config.time_update_interval_ms = options.step_ms;
    }

    let breaks = match &options.plan {
        Some(path) => load_plan(path)?,
        None => default_plan(&options)?,
    };
    info!(breaks = breaks.len(), content_ms = options.content_ms, "Starting simulation");

    let fail_uri = match options.fail_ad.as_deref() {
        Some(id) => Some(
            breaks
                .iter()
                .flat_map(|plan| plan.ads.iter())
                .find(|ad| ad.id == id)
                .map(|ad| ad.uri.clone())
                .with_context(|| format!("no scheduled ad has id {id}"))?,
        ),
        None => None,
    };
    let total_ads: u64 = breaks.iter().map(|plan| plan.ads.len() as u64).sum();
    // every break plays out in full, plus slack for buffering steps
    let budget_ms = options.content_ms * 2 + options.ad_duration_ms * (total_ads + 1) + 60_000;

    let (pipeline, media) = SimulatedPipeline::new();
    let content_uri = Url::parse(CONTENT_URI)?;
    media.register_media(&content_uri, options.content_ms);
    for plan in &breaks {
        for ad in &plan.ads {
            media.register_media(&ad.uri, options.ad_duration_ms);
        }
    }

    let (service, ads) = ScriptedAdService::new(breaks);
    let service = if options.fail_request {
        service.fail_requests("no fill")
    } else {
        service
    };

    let (sink, events) = ChannelSink::new();
    let (mut player, rx) = VideoPlayer::builder(pipeline)
        .config(config)
        .ad_service(service)
        .event_sink(Arc::new(sink))
        .build()?;
    let watcher = Arc::new(EndWatcher::default());
    player.add_listener(watcher.clone());

    let mut session = Session {
        player,
        rx,
        media,
        ads,
        events,
        printer: EventPrinter::new(OutputFormat::from(format)),
        watcher,
        fail_uri,
        elapsed_ms: 0,
    };
    session.run(Source::new(content_uri).with_ad_tag(AD_TAG_URI), options.step_ms, budget_ms)?;
    session.finish();
    Ok(())
}

/// Print the effective configuration
pub fn show_config(path: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => PlayerConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    println!("{}", output::format_output(&config, format));
    Ok(())
}

struct Session {
    player: VideoPlayer,
    rx: mpsc::UnboundedReceiver<PlayerMessage>,
    media: SimulatedControl,
    ads: ScriptedAdControl,
    events: mpsc::UnboundedReceiver<adsync_core::ExternalEvent>,
    printer: EventPrinter,
    watcher: Arc<EndWatcher>,
    /// Ad whose playback is made to fail, cleared once it has
    fail_uri: Option<Url>,
    elapsed_ms: u64,
}

impl Session {
    fn run(&mut self, source: Source, step_ms: u64, budget_ms: u64) -> anyhow::Result<()> {
        self.player.replace(Some(source));
        self.pump();

        let max_steps = budget_ms / step_ms + 1_000;

        for _ in 0..max_steps {
            if self.media.state() == RawPlayerState::Buffering {
                self.media.complete_buffering();
                self.pump();
                continue;
            }

            if self.should_fail_current_ad() {
                self.fail_uri = None;
                warn!("Failing ad playback");
                self.media.fail(PipelineError::new(
                    PipelineErrorKind::Decoder,
                    4001,
                    "simulated decoder failure",
                ));
                self.pump();
                continue;
            }

            if self.is_done() {
                debug!(elapsed_ms = self.elapsed_ms, "Session finished");
                return Ok(());
            }

            self.media.advance(step_ms);
            self.elapsed_ms += step_ms;
            self.pump();
            self.tick();
        }

        anyhow::bail!("session did not finish within {} simulated ms", budget_ms)
    }

    /// Handle everything queued, including messages posted while handling
    fn pump(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            let _ = self.player.dispatch(message);
        }
        while let Ok(event) = self.events.try_recv() {
            self.printer.print(self.elapsed_ms, &event);
        }
    }

    fn tick(&mut self) {
        let message = if self.player.is_playing_ad() {
            PlayerMessage::AdProgressTick
        } else {
            PlayerMessage::TimeUpdateTick
        };
        let _ = self.player.dispatch(message);
        self.ads.poll();
        self.pump();
    }

    fn should_fail_current_ad(&self) -> bool {
        match &self.fail_uri {
            Some(uri) => self.player.is_playing_ad() && self.media.current_uri().as_ref() == Some(uri),
            None => false,
        }
    }

    fn is_done(&self) -> bool {
        self.watcher.played_to_end.load(Ordering::Relaxed) > 0
            && !self.player.is_playing_ad()
            && !self.ads.is_in_break()
            && !self.media.is_playing()
    }

    fn finish(mut self) {
        let log = self.ads.log();
        let snapshot = self.player.snapshot();
        self.player.close();
        self.pump();
        self.printer.summary(self.elapsed_ms, &log, &snapshot);
    }
}

fn ad_uri(id: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("https://ads.example.com/creatives/{id}.mp4"))
}

fn ad_pod(prefix: &str, count: usize) -> anyhow::Result<Vec<AdMediaHandle>> {
    (1..=count)
        .map(|n| {
            let id = format!("{prefix}-{n}");
            let uri = ad_uri(&id)?;
            Ok(AdMediaHandle::new(id, uri))
        })
        .collect()
}

fn default_plan(options: &SimulateOptions) -> anyhow::Result<Vec<AdBreakPlan>> {
    let mut breaks = Vec::new();
    if options.preroll > 0 {
        breaks.push(AdBreakPlan::new(BreakOffset::Preroll, ad_pod("pre", options.preroll)?));
    }
    for offset_ms in &options.midrolls_ms {
        let prefix = format!("mid{}", offset_ms / 1000);
        breaks.push(AdBreakPlan::new(BreakOffset::Midroll(*offset_ms), ad_pod(&prefix, 1)?));
    }
    if options.postroll > 0 {
        breaks.push(AdBreakPlan::new(BreakOffset::Postroll, ad_pod("post", options.postroll)?));
    }
    Ok(breaks)
}

fn load_plan(path: &Path) -> anyhow::Result<Vec<AdBreakPlan>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading ad plan {}", path.display()))?;
    let breaks: Vec<AdBreakPlan> = serde_json::from_str(&json)
        .with_context(|| format!("parsing ad plan {}", path.display()))?;
    Ok(breaks)
}
