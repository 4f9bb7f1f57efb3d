//! Decoder tests over generated WAV files
//!
//! Exercises the real fetch/decode/resample path with files produced by
//! hound, the same way the playback pipeline receives generated tracks.

use std::path::Path;
use std::time::Duration;

use readwave_player::graph::decode::load_pcm;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f64) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f64 * seconds) as usize;
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let sample = ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.5 * i16::MAX as f64)
            as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[tokio::test]
async fn decodes_stereo_wav_at_native_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    write_wav(&path, 44_100, 2, 1.0);

    let pcm = load_pcm(path.to_str().unwrap(), 44_100).await.unwrap();

    assert_eq!(pcm.sample_rate, 44_100);
    // One second of audio, within a frame of the written length
    let drift = pcm.duration().as_secs_f64() - 1.0;
    assert!(drift.abs() < 0.01, "duration drifted by {drift}s");
    assert_eq!(pcm.samples.len(), pcm.frames() * 2);
}

#[tokio::test]
async fn mono_wav_is_duplicated_to_stereo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    write_wav(&path, 44_100, 1, 0.25);

    let pcm = load_pcm(path.to_str().unwrap(), 44_100).await.unwrap();

    // Left and right carry the same signal
    for frame in pcm.samples.chunks_exact(2).take(100) {
        assert_eq!(frame[0], frame[1]);
    }
    assert!((pcm.duration().as_secs_f64() - 0.25).abs() < 0.01);
}

#[tokio::test]
async fn resamples_to_requested_output_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hirate.wav");
    write_wav(&path, 48_000, 2, 0.5);

    let pcm = load_pcm(path.to_str().unwrap(), 44_100).await.unwrap();

    assert_eq!(pcm.sample_rate, 44_100);
    let expected = Duration::from_millis(500);
    let drift = pcm.duration().as_secs_f64() - expected.as_secs_f64();
    assert!(drift.abs() < 0.02, "duration drifted by {drift}s");
}

#[tokio::test]
async fn unreadable_locator_is_an_error() {
    let err = load_pcm("/nonexistent/track.wav", 44_100).await.unwrap_err();
    assert!(matches!(err, readwave_player::Error::Io(_)));
}
