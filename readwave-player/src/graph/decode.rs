//! Track loading and decoding
//!
//! Fetches a locator (HTTP URL or local file), decodes it with symphonia to
//! interleaved stereo f32, and resamples with rubato to the graph's output
//! rate. Decoding runs on the blocking pool so the playback tick is never
//! stalled by a large file.
//!
//! # Sample Format
//!
//! - Output: stereo f32 samples, interleaved `[L, R, L, R, ...]`
//! - Mono files: duplicated to stereo
//! - Multi-channel: downmixed to stereo

use rubato::{FastFixedIn, Resampler as RubatoResampler};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{Error, Result};

/// Fully decoded audio for one source node.
///
/// Samples are interleaved stereo f32 at the rate the mixer runs at, so the
/// audio thread never converts or resamples.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    /// Interleaved stereo samples `[L, R, L, R, ...]`
    pub samples: Arc<Vec<f32>>,

    /// Sample rate the buffer was resampled to
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Fetch and decode a locator into a [`PcmBuffer`] at `target_rate`.
pub async fn load_pcm(locator: &str, target_rate: u32) -> Result<PcmBuffer> {
    let bytes = fetch(locator).await?;
    debug!("Fetched {} bytes from {}", bytes.len(), locator);

    let owned_locator = locator.to_string();
    tokio::task::spawn_blocking(move || decode_bytes(&owned_locator, bytes, target_rate))
        .await
        .map_err(|e| Error::Decode(format!("Decoder task failed: {e}")))?
}

/// Fetch a locator's bytes. Remote locators go through reqwest; anything
/// else is treated as a local file path.
async fn fetch(locator: &str) -> Result<Vec<u8>> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        let response = reqwest::get(locator).await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    } else {
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        Ok(tokio::fs::read(path).await?)
    }
}

/// Decode in-memory bytes to a stereo f32 buffer at `target_rate`.
fn decode_bytes(locator: &str, bytes: Vec<u8>, target_rate: u32) -> Result<PcmBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    // Hint the container format from the locator extension
    let mut hint = Hint::new();
    if let Some(ext) = locator.rsplit('.').next() {
        if !ext.contains('/') && ext.len() <= 4 {
            hint.with_extension(ext);
        }
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("Unrecognized format for {locator}: {e}")))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode(format!("No audio track in {locator}")))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let native_rate = codec_params.sample_rate.unwrap_or(44_100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Unsupported codec in {locator}: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 2usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::Decode(format!("Packet read failed: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Skip over recoverable decode errors mid-stream
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(Error::Decode(format!("Decode failed: {e}"))),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count().max(1);

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if samples.is_empty() {
        return Err(Error::Decode(format!("No decodable audio in {locator}")));
    }

    let stereo = to_stereo(&samples, channels);
    let resampled = if native_rate == target_rate {
        stereo
    } else {
        resample(&stereo, native_rate, target_rate)?
    };

    debug!(
        "Decoded {}: {} frames at {}Hz (native {}Hz, {} ch)",
        locator,
        resampled.len() / 2,
        target_rate,
        native_rate,
        channels
    );

    Ok(PcmBuffer {
        samples: Arc::new(resampled),
        sample_rate: target_rate,
    })
}

/// Fold interleaved samples of any channel count into interleaved stereo.
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        2 => samples.to_vec(),
        1 => {
            let mut stereo = Vec::with_capacity(samples.len() * 2);
            for &sample in samples {
                stereo.push(sample);
                stereo.push(sample);
            }
            stereo
        }
        n => {
            // Downmix: even channels left, odd channels right
            let frames = samples.len() / n;
            let mut stereo = Vec::with_capacity(frames * 2);
            let half = (n as f32 / 2.0).max(1.0);
            for frame in samples.chunks_exact(n) {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for (ch, &sample) in frame.iter().enumerate() {
                    if ch % 2 == 0 {
                        left += sample;
                    } else {
                        right += sample;
                    }
                }
                stereo.push(left / half);
                stereo.push(right / half);
            }
            stereo
        }
    }
}

/// Resample interleaved stereo audio to `output_rate`.
fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    let planar_input = deinterleave(input);
    let input_frames = planar_input[0].len();
    if input_frames == 0 {
        return Ok(Vec::new());
    }

    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        rubato::PolynomialDegree::Septic,
        input_frames,
        2,
    )
    .map_err(|e| Error::Decode(format!("Failed to create resampler: {e}")))?;

    let planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| Error::Decode(format!("Resampling failed: {e}")))?;

    Ok(interleave(&planar_output))
}

/// `[L, R, L, R, ...]` → `[[L, L, ...], [R, R, ...]]`
fn deinterleave(samples: &[f32]) -> Vec<Vec<f32>> {
    let frames = samples.len() / 2;
    let mut planar = vec![Vec::with_capacity(frames); 2];
    for frame in samples.chunks_exact(2) {
        planar[0].push(frame[0]);
        planar[1].push(frame[1]);
    }
    planar
}

/// `[[L, L, ...], [R, R, ...]]` → `[L, R, L, R, ...]`
fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        interleaved.push(planar[0][i]);
        interleaved.push(planar[1][i]);
    }
    interleaved
}
