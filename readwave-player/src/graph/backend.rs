//! Default [`AudioGraph`] backend: cpal output, symphonia decode
//!
//! One graph owns one device stream. A producer thread mixes all live
//! sources into a lock-free ring buffer; the cpal callback drains it. The
//! graph clock is the mixer's frame counter, so scheduled gain automation
//! runs on audio time regardless of application scheduling.

use async_trait::async_trait;
use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::decode;
use super::mixer::Mixer;
use super::output;
use super::{AudioGraph, GainId, GainPoint, SourceId};
use crate::error::{Error, Result};

/// Samples mixed per producer iteration (512 frames of stereo)
const CHUNK_SAMPLES: usize = 1_024;

/// Ring buffer capacity in samples (~93ms of stereo at 44.1kHz)
const RING_CAPACITY: usize = 8_192;

/// Cpal-backed audio graph.
///
/// Construction is cheap and device-free; the device is claimed lazily by
/// [`AudioGraph::open`] so a graph can be created ahead of the
/// user-interaction trust signal platforms may require.
pub struct CpalAudioGraph {
    shared: Arc<Shared>,
}

struct Shared {
    mixer: Mutex<Mixer>,
    running: Arc<AtomicBool>,
    open: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CpalAudioGraph {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                mixer: Mutex::new(Mixer::new(output::PREFERRED_SAMPLE_RATE)),
                running: Arc::new(AtomicBool::new(false)),
                open: AtomicBool::new(false),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    fn mixer(&self) -> std::sync::MutexGuard<'_, Mixer> {
        // Mixer lock is only ever held briefly; a poisoned lock means the
        // producer thread panicked and playback is already lost
        self.shared
            .mixer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Graph("Audio graph is not open".into()))
        }
    }
}

impl Default for CpalAudioGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioGraph for CpalAudioGraph {
    async fn open(&self) -> Result<()> {
        if self.shared.open.load(Ordering::Acquire) {
            return Ok(());
        }

        let ring = HeapRb::<f32>::new(RING_CAPACITY);
        let (mut producer, consumer) = ring.split();

        self.shared.running.store(true, Ordering::Release);

        let (sample_rate, output_handle) =
            match output::spawn_output_thread(consumer, Arc::clone(&self.shared.running)) {
                Ok(started) => started,
                Err(e) => {
                    self.shared.running.store(false, Ordering::Release);
                    return Err(e);
                }
            };

        // The mixer runs at whatever rate the device negotiated
        *self.mixer() = Mixer::new(sample_rate);

        let shared = Arc::clone(&self.shared);
        let producer_handle = std::thread::Builder::new()
            .name("readwave-mixer".into())
            .spawn(move || {
                let mut chunk = vec![0.0f32; CHUNK_SAMPLES];
                while shared.running.load(Ordering::Acquire) {
                    if producer.vacant_len() >= CHUNK_SAMPLES {
                        {
                            let mut mixer = shared
                                .mixer
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            mixer.mix_into(&mut chunk);
                        }
                        producer.push_slice(&chunk);
                    } else {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                }
                debug!("Mixer thread exiting");
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::Initialization(format!("Failed to spawn mixer thread: {e}"))
            })?;

        {
            let mut threads = self.shared.threads.lock().unwrap();
            threads.push(output_handle);
            threads.push(producer_handle);
        }

        self.shared.open.store(true, Ordering::Release);
        info!("Audio graph open at {}Hz", sample_rate);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    async fn create_source(&self, locator: &str) -> Result<SourceId> {
        self.ensure_open()?;
        let sample_rate = self.mixer().sample_rate();
        let pcm = decode::load_pcm(locator, sample_rate).await?;

        let id = SourceId::new();
        self.mixer().add_source(id, pcm);
        debug!("Created source {:?} for {}", id, locator);
        Ok(id)
    }

    fn create_gain_control(&self) -> Result<GainId> {
        self.ensure_open()?;
        let id = GainId::new();
        self.mixer().add_gain(id, 1.0);
        Ok(id)
    }

    fn connect(&self, source: SourceId, gain: GainId) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().connect(source, gain) {
            Ok(())
        } else {
            Err(Error::Graph("Cannot connect unknown source or gain".into()))
        }
    }

    fn set_gain(&self, gain: GainId, value: f32) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().set_gain(gain, value) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown gain control".into()))
        }
    }

    fn schedule_gain(&self, gain: GainId, points: Vec<GainPoint>) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().schedule_gain(gain, points) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown gain control".into()))
        }
    }

    fn set_master_gain(&self, value: f32) -> Result<()> {
        self.ensure_open()?;
        self.mixer().set_master(value);
        Ok(())
    }

    fn start_source(&self, source: SourceId) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().start_source(source) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown source".into()))
        }
    }

    fn pause_source(&self, source: SourceId) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().pause_source(source) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown source".into()))
        }
    }

    fn seek_source(&self, source: SourceId, position: Duration) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().seek_source(source, position) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown source".into()))
        }
    }

    fn stop_source(&self, source: SourceId) -> Result<()> {
        self.ensure_open()?;
        if self.mixer().stop_source(source) {
            Ok(())
        } else {
            Err(Error::Graph("Unknown source".into()))
        }
    }

    fn release_source(&self, source: SourceId) {
        self.mixer().remove_source(source);
    }

    fn release_gain(&self, gain: GainId) {
        self.mixer().remove_gain(gain);
    }

    fn position(&self, source: SourceId) -> Option<Duration> {
        self.mixer().position(source)
    }

    fn duration(&self, source: SourceId) -> Option<Duration> {
        self.mixer().duration(source)
    }

    fn now(&self) -> Duration {
        self.mixer().now()
    }

    async fn close(&self) -> Result<()> {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.shared.running.store(false, Ordering::Release);

        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self.shared.threads.lock().unwrap();
            threads.drain(..).collect()
        };

        // Threads exit within one sleep interval; join off the async runtime
        tokio::task::spawn_blocking(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("Audio thread panicked during shutdown");
                }
            }
        })
        .await
        .map_err(|e| Error::Graph(format!("Shutdown join failed: {e}")))?;

        // Drop every node with the device
        *self.mixer() = Mixer::new(output::PREFERRED_SAMPLE_RATE);
        info!("Audio graph closed");
        Ok(())
    }
}

impl Drop for CpalAudioGraph {
    fn drop(&mut self) {
        // Threads watch this flag; detached handles exit on their own
        self.shared.running.store(false, Ordering::Release);
    }
}

/// Hands the arbiter a fresh cpal graph per playback session.
pub struct CpalGraphFactory;

impl super::GraphFactory for CpalGraphFactory {
    fn create(&self) -> super::SharedGraph {
        Arc::new(CpalAudioGraph::new())
    }
}
