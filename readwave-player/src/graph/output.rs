//! Audio device output using cpal
//!
//! The device stream lives on a dedicated thread (cpal streams are not
//! `Send`); the audio callback only pops samples from a lock-free ring
//! buffer and fills silence on underrun, so it never takes a lock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Preferred output rate; the device default is used when unsupported.
pub(crate) const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// Spawn the output thread: open the default device, start the stream, and
/// keep it alive until `running` clears.
///
/// Returns the negotiated sample rate once the stream is confirmed playing,
/// so the caller can decode and mix at the device rate.
pub(crate) fn spawn_output_thread(
    consumer: HeapCons<f32>,
    running: Arc<AtomicBool>,
) -> Result<(u32, JoinHandle<()>)> {
    let (result_tx, result_rx) = std::sync::mpsc::channel::<Result<u32>>();

    let handle = std::thread::Builder::new()
        .name("readwave-audio-output".into())
        .spawn(move || {
            let stream = match build_stream(consumer) {
                Ok((stream, rate)) => {
                    let started = stream
                        .play()
                        .map_err(|e| Error::Initialization(format!("Failed to start stream: {e}")));
                    match started {
                        Ok(()) => {
                            let _ = result_tx.send(Ok(rate));
                            stream
                        }
                        Err(e) => {
                            let _ = result_tx.send(Err(e));
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = result_tx.send(Err(e));
                    return;
                }
            };

            while running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }

            // Dropping the stream on its owning thread closes the device
            drop(stream);
            debug!("Audio output thread exiting");
        })
        .map_err(|e| Error::Initialization(format!("Failed to spawn audio thread: {e}")))?;

    match result_rx.recv() {
        Ok(Ok(rate)) => Ok((rate, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::Initialization(
                "Audio thread exited before reporting stream state".into(),
            ))
        }
    }
}

/// Open the default output device and build an f32 stereo stream fed from
/// the ring buffer.
fn build_stream(mut consumer: HeapCons<f32>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Initialization("No default audio output device found".into()))?;

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio output device: {}", name);

    let (config, sample_format) = best_config(&device)?;
    if sample_format != SampleFormat::F32 {
        return Err(Error::Initialization(format!(
            "Device offers no f32 output (got {sample_format:?})"
        )));
    }

    let sample_rate = config.sample_rate.0;
    debug!(
        "Audio config: sample_rate={}, channels={}",
        sample_rate, config.channels
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                for sample in data.iter_mut() {
                    // Underruns produce silence, never a blocked callback
                    *sample = consumer.try_pop().unwrap_or(0.0);
                }
            },
            |e| error!("Audio stream error: {}", e),
            None,
        )
        .map_err(|e| Error::Initialization(format!("Failed to build output stream: {e}")))?;

    Ok((stream, sample_rate))
}

/// Pick a stereo f32 config, preferring 44.1kHz, falling back to the device
/// default.
fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::Initialization(format!("Failed to get device configs: {e}")))?;

    let preferred = supported.find(|config| {
        config.channels() == 2
            && config.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
            && config.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
            && config.sample_format() == SampleFormat::F32
    });

    if let Some(supported_config) = preferred {
        let sample_format = supported_config.sample_format();
        let config = supported_config
            .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
            .config();
        return Ok((config, sample_format));
    }

    let supported_config = device
        .default_output_config()
        .map_err(|e| Error::Initialization(format!("Failed to get default config: {e}")))?;

    let sample_format = supported_config.sample_format();
    Ok((supported_config.config(), sample_format))
}
