//! Test support: a scriptable in-memory audio graph
//!
//! `MockGraph` implements the `AudioGraph` capability over tokio's virtual
//! clock, so tests run under `start_paused = true` and advance audio time
//! deterministically. Behavior (decoded durations, load delays, failures,
//! blocked opens) is scripted per locator, and every structural call is
//! recorded for ordering assertions.

// Each test binary uses a different slice of this module
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use readwave_player::graph::{AudioGraph, GainId, GainPoint, GraphFactory, SharedGraph, SourceId};
use readwave_player::{Error, Result};

/// Scripted behavior, shared between a factory and its graphs so tests can
/// adjust it mid-run.
#[derive(Default)]
pub struct MockBehavior {
    /// Decoded duration per locator; unknown locators get 30s
    pub durations: HashMap<String, Duration>,
    /// Virtual load time per locator
    pub load_delays: HashMap<String, Duration>,
    /// Locators whose load always fails
    pub failing: HashSet<String>,
    /// Number of upcoming `open` calls to refuse as platform-blocked
    pub block_opens: usize,
}

const DEFAULT_TRACK_DURATION: Duration = Duration::from_secs(30);

struct MockSource {
    locator: String,
    duration: Duration,
    /// Position accumulated across pauses
    accumulated: Duration,
    /// Set while playing
    started: Option<Instant>,
}

impl MockSource {
    fn position(&self) -> Duration {
        let running = self
            .started
            .map(|since| since.elapsed())
            .unwrap_or_default();
        (self.accumulated + running).min(self.duration)
    }
}

#[derive(Default)]
struct MockState {
    open: bool,
    opened_at: Option<Instant>,
    sources: HashMap<SourceId, MockSource>,
    gains: HashMap<GainId, f32>,
    connections: HashMap<SourceId, GainId>,
    schedules: Vec<(GainId, Vec<GainPoint>)>,
    master: f32,
}

/// In-memory graph with a virtual clock.
#[derive(Clone)]
pub struct MockGraph {
    label: usize,
    state: Arc<Mutex<MockState>>,
    behavior: Arc<Mutex<MockBehavior>>,
    log: Arc<Mutex<Vec<String>>>,
}

/// Install a test subscriber once so `RUST_LOG` surfaces engine traces.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

impl MockGraph {
    pub fn new() -> Self {
        init_tracing();
        Self::with_shared(
            0,
            Arc::new(Mutex::new(MockBehavior::default())),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    fn with_shared(
        label: usize,
        behavior: Arc<Mutex<MockBehavior>>,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            label,
            state: Arc::new(Mutex::new(MockState {
                master: 1.0,
                ..Default::default()
            })),
            behavior,
            log,
        }
    }

    pub fn behavior(&self) -> &Arc<Mutex<MockBehavior>> {
        &self.behavior
    }

    pub fn shared(self) -> SharedGraph {
        Arc::new(self)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn live_sources(&self) -> usize {
        self.state.lock().unwrap().sources.len()
    }

    pub fn live_gains(&self) -> usize {
        self.state.lock().unwrap().gains.len()
    }

    pub fn playing_sources(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .sources
            .values()
            .filter(|s| s.started.is_some())
            .count()
    }

    /// Positions of all currently playing sources
    pub fn playing_positions(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap()
            .sources
            .values()
            .filter(|s| s.started.is_some())
            .map(MockSource::position)
            .collect()
    }

    /// Number of times a locator's source was started
    pub fn start_count(&self, locator: &str) -> usize {
        let needle = format!("start#{}:{}", self.label, locator);
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| **entry == needle)
            .count()
    }

    /// All gain automation curves scheduled so far
    pub fn schedules(&self) -> Vec<(GainId, Vec<GainPoint>)> {
        self.state.lock().unwrap().schedules.clone()
    }

    pub fn master_gain(&self) -> f32 {
        self.state.lock().unwrap().master
    }
}

impl Default for MockGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioGraph for MockGraph {
    async fn open(&self) -> Result<()> {
        {
            let mut behavior = self.behavior.lock().unwrap();
            if behavior.block_opens > 0 {
                behavior.block_opens -= 1;
                return Err(Error::PlaybackBlocked(
                    "autoplay requires a user gesture".into(),
                ));
            }
        }
        let mut state = self.state.lock().unwrap();
        if !state.open {
            state.open = true;
            state.opened_at = Some(Instant::now());
            drop(state);
            self.record(format!("open#{}", self.label));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    async fn create_source(&self, locator: &str) -> Result<SourceId> {
        if !self.is_open() {
            return Err(Error::Graph("Audio graph is not open".into()));
        }

        let (delay, fails, duration) = {
            let behavior = self.behavior.lock().unwrap();
            (
                behavior.load_delays.get(locator).copied(),
                behavior.failing.contains(locator),
                behavior
                    .durations
                    .get(locator)
                    .copied()
                    .unwrap_or(DEFAULT_TRACK_DURATION),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(Error::Decode(format!("scripted failure for {locator}")));
        }
        // The graph may have been closed while the load was in flight
        if !self.is_open() {
            return Err(Error::Graph("Audio graph is not open".into()));
        }

        let id = SourceId::new();
        self.state.lock().unwrap().sources.insert(
            id,
            MockSource {
                locator: locator.to_string(),
                duration,
                accumulated: Duration::ZERO,
                started: None,
            },
        );
        self.record(format!("load#{}:{}", self.label, locator));
        Ok(id)
    }

    fn create_gain_control(&self) -> Result<GainId> {
        if !self.is_open() {
            return Err(Error::Graph("Audio graph is not open".into()));
        }
        let id = GainId::new();
        self.state.lock().unwrap().gains.insert(id, 1.0);
        Ok(id)
    }

    fn connect(&self, source: SourceId, gain: GainId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.sources.contains_key(&source) || !state.gains.contains_key(&gain) {
            return Err(Error::Graph("Cannot connect unknown source or gain".into()));
        }
        state.connections.insert(source, gain);
        Ok(())
    }

    fn set_gain(&self, gain: GainId, value: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.gains.get_mut(&gain) {
            Some(level) => {
                *level = value;
                Ok(())
            }
            None => Err(Error::Graph("Unknown gain control".into())),
        }
    }

    fn schedule_gain(&self, gain: GainId, points: Vec<GainPoint>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.gains.contains_key(&gain) {
            return Err(Error::Graph("Unknown gain control".into()));
        }
        state.schedules.push((gain, points));
        Ok(())
    }

    fn set_master_gain(&self, value: f32) -> Result<()> {
        self.state.lock().unwrap().master = value;
        Ok(())
    }

    fn start_source(&self, source: SourceId) -> Result<()> {
        let locator = {
            let mut state = self.state.lock().unwrap();
            let node = state
                .sources
                .get_mut(&source)
                .ok_or_else(|| Error::Graph("Unknown source".into()))?;
            if node.started.is_none() {
                node.started = Some(Instant::now());
            }
            node.locator.clone()
        };
        self.record(format!("start#{}:{}", self.label, locator));
        Ok(())
    }

    fn pause_source(&self, source: SourceId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .sources
            .get_mut(&source)
            .ok_or_else(|| Error::Graph("Unknown source".into()))?;
        if let Some(since) = node.started.take() {
            node.accumulated = (node.accumulated + since.elapsed()).min(node.duration);
        }
        Ok(())
    }

    fn seek_source(&self, source: SourceId, position: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .sources
            .get_mut(&source)
            .ok_or_else(|| Error::Graph("Unknown source".into()))?;
        node.accumulated = position.min(node.duration);
        if node.started.is_some() {
            node.started = Some(Instant::now());
        }
        Ok(())
    }

    fn stop_source(&self, source: SourceId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .sources
            .get_mut(&source)
            .ok_or_else(|| Error::Graph("Unknown source".into()))?;
        node.started = None;
        node.accumulated = Duration::ZERO;
        Ok(())
    }

    fn release_source(&self, source: SourceId) {
        let mut state = self.state.lock().unwrap();
        state.sources.remove(&source);
        state.connections.remove(&source);
    }

    fn release_gain(&self, gain: GainId) {
        self.state.lock().unwrap().gains.remove(&gain);
    }

    fn position(&self, source: SourceId) -> Option<Duration> {
        self.state
            .lock()
            .unwrap()
            .sources
            .get(&source)
            .map(MockSource::position)
    }

    fn duration(&self, source: SourceId) -> Option<Duration> {
        self.state
            .lock()
            .unwrap()
            .sources
            .get(&source)
            .map(|node| node.duration)
    }

    fn now(&self) -> Duration {
        self.state
            .lock()
            .unwrap()
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<()> {
        let was_open = {
            let mut state = self.state.lock().unwrap();
            let was_open = state.open;
            state.open = false;
            state.sources.clear();
            state.gains.clear();
            state.connections.clear();
            was_open
        };
        if was_open {
            self.record(format!("close#{}", self.label));
        }
        Ok(())
    }
}

/// Factory handing out labeled mock graphs that share one behavior script
/// and one call log.
#[derive(Clone)]
pub struct MockGraphFactory {
    behavior: Arc<Mutex<MockBehavior>>,
    log: Arc<Mutex<Vec<String>>>,
    created: Arc<Mutex<Vec<MockGraph>>>,
    counter: Arc<AtomicUsize>,
}

impl MockGraphFactory {
    pub fn new() -> Self {
        init_tracing();
        Self {
            behavior: Arc::new(Mutex::new(MockBehavior::default())),
            log: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn behavior(&self) -> &Arc<Mutex<MockBehavior>> {
        &self.behavior
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn graph(&self, index: usize) -> Option<MockGraph> {
        self.created.lock().unwrap().get(index).cloned()
    }
}

impl Default for MockGraphFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphFactory for MockGraphFactory {
    fn create(&self) -> SharedGraph {
        let label = self.counter.fetch_add(1, Ordering::SeqCst);
        let graph =
            MockGraph::with_shared(label, Arc::clone(&self.behavior), Arc::clone(&self.log));
        self.created.lock().unwrap().push(graph.clone());
        Arc::new(graph)
    }
}
