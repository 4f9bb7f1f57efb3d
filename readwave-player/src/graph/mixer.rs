//! Software mixer for the cpal graph backend
//!
//! Sums every playing source through its gain path and the master gain into
//! one stereo output chunk. Gain automation is a staircase of pre-scheduled
//! timed values evaluated against the mixer's frame clock, so a crossfade
//! curve plays out on the audio timeline even if the application stalls.
//!
//! The mixer is driven by the backend's producer thread; the control plane
//! mutates it behind a mutex while the audio callback itself only ever pops
//! the lock-free ring buffer downstream.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

use super::decode::PcmBuffer;
use super::{GainId, GainPoint, SourceId};

/// One gain path: current level plus pending scheduled automation.
struct GainPath {
    level: f32,
    /// Pending automation points, ordered by time
    schedule: VecDeque<GainPoint>,
}

impl GainPath {
    fn new(level: f32) -> Self {
        Self {
            level,
            schedule: VecDeque::new(),
        }
    }

    /// Advance the staircase: consume every point due at or before `now`.
    fn value_at(&mut self, now: Duration) -> f32 {
        while let Some(point) = self.schedule.front() {
            if point.at <= now {
                self.level = point.value;
                self.schedule.pop_front();
            } else {
                break;
            }
        }
        self.level
    }
}

/// One source node: decoded PCM plus playback cursor.
struct SourceNode {
    pcm: PcmBuffer,
    /// Playback position in frames
    cursor: usize,
    playing: bool,
    gain: Option<GainId>,
}

impl SourceNode {
    fn ended(&self) -> bool {
        self.cursor >= self.pcm.frames()
    }
}

/// Mixes all live sources into interleaved stereo output.
pub(crate) struct Mixer {
    sample_rate: u32,
    sources: HashMap<SourceId, SourceNode>,
    gains: HashMap<GainId, GainPath>,
    master: f32,
    /// Total frames mixed since open; the graph clock
    frames_mixed: u64,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            sources: HashMap::new(),
            gains: HashMap::new(),
            master: 1.0,
            frames_mixed: 0,
        }
    }

    /// The graph clock: audio time elapsed since the mixer started.
    pub fn now(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_mixed as f64 / self.sample_rate as f64)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn add_source(&mut self, id: SourceId, pcm: PcmBuffer) {
        self.sources.insert(
            id,
            SourceNode {
                pcm,
                cursor: 0,
                playing: false,
                gain: None,
            },
        );
    }

    pub fn remove_source(&mut self, id: SourceId) {
        self.sources.remove(&id);
    }

    pub fn add_gain(&mut self, id: GainId, level: f32) {
        self.gains.insert(id, GainPath::new(level));
    }

    pub fn remove_gain(&mut self, id: GainId) {
        self.gains.remove(&id);
    }

    pub fn connect(&mut self, source: SourceId, gain: GainId) -> bool {
        if !self.gains.contains_key(&gain) {
            return false;
        }
        match self.sources.get_mut(&source) {
            Some(node) => {
                node.gain = Some(gain);
                true
            }
            None => false,
        }
    }

    /// Set a gain level immediately, discarding pending automation.
    pub fn set_gain(&mut self, id: GainId, value: f32) -> bool {
        match self.gains.get_mut(&id) {
            Some(path) => {
                path.schedule.clear();
                path.level = value.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Replace a gain path's automation with a pre-scheduled curve.
    pub fn schedule_gain(&mut self, id: GainId, mut points: Vec<GainPoint>) -> bool {
        match self.gains.get_mut(&id) {
            Some(path) => {
                points.sort_by(|a, b| a.at.cmp(&b.at));
                path.schedule = points.into();
                true
            }
            None => false,
        }
    }

    pub fn set_master(&mut self, value: f32) {
        self.master = value.clamp(0.0, 1.0);
    }

    pub fn start_source(&mut self, id: SourceId) -> bool {
        match self.sources.get_mut(&id) {
            Some(node) => {
                node.playing = true;
                true
            }
            None => false,
        }
    }

    pub fn pause_source(&mut self, id: SourceId) -> bool {
        match self.sources.get_mut(&id) {
            Some(node) => {
                node.playing = false;
                true
            }
            None => false,
        }
    }

    pub fn stop_source(&mut self, id: SourceId) -> bool {
        match self.sources.get_mut(&id) {
            Some(node) => {
                node.playing = false;
                node.cursor = 0;
                true
            }
            None => false,
        }
    }

    pub fn seek_source(&mut self, id: SourceId, position: Duration) -> bool {
        match self.sources.get_mut(&id) {
            Some(node) => {
                let frame = (position.as_secs_f64() * self.sample_rate as f64) as usize;
                node.cursor = frame.min(node.pcm.frames());
                true
            }
            None => false,
        }
    }

    pub fn position(&self, id: SourceId) -> Option<Duration> {
        self.sources.get(&id).map(|node| {
            Duration::from_secs_f64(node.cursor as f64 / self.sample_rate.max(1) as f64)
        })
    }

    pub fn duration(&self, id: SourceId) -> Option<Duration> {
        self.sources.get(&id).map(|node| node.pcm.duration())
    }

    /// Mix one chunk of interleaved stereo into `out`, advancing the clock.
    ///
    /// Gain staircases are evaluated once per chunk; at the 100-step curves
    /// the engine schedules, each step spans many chunks.
    pub fn mix_into(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / 2;
        let now = self.now();

        // Evaluate every gain path once for this chunk
        let mut levels: HashMap<GainId, f32> = HashMap::with_capacity(self.gains.len());
        for (id, path) in self.gains.iter_mut() {
            levels.insert(*id, path.value_at(now));
        }

        for node in self.sources.values_mut() {
            if !node.playing || node.ended() {
                continue;
            }

            let level = node
                .gain
                .and_then(|gain| levels.get(&gain).copied())
                .unwrap_or(1.0)
                * self.master;

            let available = node.pcm.frames() - node.cursor;
            let take = frames.min(available);
            let start = node.cursor * 2;
            let source_samples = &node.pcm.samples[start..start + take * 2];

            for (dst, &src) in out.iter_mut().zip(source_samples.iter()) {
                *dst += src * level;
            }

            node.cursor += take;
            if node.ended() {
                node.playing = false;
                trace!("Source reached end of buffer");
            }
        }

        self.frames_mixed += frames as u64;
    }
}
