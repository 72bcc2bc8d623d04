//! Audio conversion: decode any supported format to mono, resample to the
//! target rate, quantize to 16-bit PCM, and cut clips out of the result.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{PrepareError, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Mono 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Index of the frame nearest to `seconds`
    pub fn frame_at(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * f64::from(self.sample_rate)).round() as usize
    }

    /// Frames `[frame_at(begin), frame_at(end))`.
    ///
    /// A clip ending more than `tolerance` seconds after the audio is an
    /// error; a smaller overrun is clamped to the end of the audio.
    pub fn slice(&self, name: &str, begin: f64, end: f64, tolerance: f64) -> Result<&[i16]> {
        let duration = self.duration();
        if end > duration + tolerance || begin > end {
            return Err(PrepareError::ClipOutOfRange {
                audio: name.to_string(),
                begin,
                end,
                duration,
            });
        }

        let stop = self.frame_at(end).min(self.samples.len());
        let start = self.frame_at(begin).min(stop);
        Ok(&self.samples[start..stop])
    }
}

/// Encoder delay and padding (MP3, AAC) are trimmed so clip times line up
/// with the first audible frame.
fn format_options() -> FormatOptions {
    FormatOptions {
        enable_gapless: true,
        ..Default::default()
    }
}

/// Decode an encoded audio file to mono f32 samples and their sample rate.
///
/// `extension` (e.g. `"mp3"`) is a hint for format probing.
pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<(Vec<f32>, u32)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &format_options(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PrepareError::Audio("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut mono = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let channels = spec.channels.count().max(1);

        let needs_new = sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < decoded.capacity() * channels);
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            mono.extend(
                buf.samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    if sample_rate == 0 {
        return Err(PrepareError::Audio("unknown sample rate".to_string()));
    }

    debug!(
        "Decoded {} frames at {} Hz ({:.2}s)",
        mono.len(),
        sample_rate,
        mono.len() as f64 / f64::from(sample_rate)
    );
    Ok((mono, sample_rate))
}

/// Resample mono audio. The result has `round(len * target / source)` frames.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    debug!("Resampling {} Hz -> {} Hz", source_rate, target_rate);

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(|e| PrepareError::Resample(e.to_string()))?;

    let expected =
        (samples.len() as f64 * f64::from(target_rate) / f64::from(source_rate)).round() as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut pos = 0;
    let mut idle_rounds = 0;
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();
        pos = end;
        // Zero padding flushes the resampler's internal delay
        chunk.resize(needed, 0.0);

        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| PrepareError::Resample(e.to_string()))?;
        let produced = processed.into_iter().next().unwrap_or_default();
        if produced.is_empty() && pos >= samples.len() {
            idle_rounds += 1;
            if idle_rounds > 8 {
                break;
            }
        }
        output.extend(produced);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

/// Convert f32 samples in [-1.0, 1.0] to 16-bit PCM.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Decode, downmix, resample and quantize an encoded audio file.
pub fn convert(bytes: Vec<u8>, extension: Option<&str>, target_rate: u32) -> Result<PcmAudio> {
    let (samples, rate) = decode(bytes, extension)?;
    let resampled = resample(&samples, rate, target_rate)?;
    Ok(PcmAudio::new(quantize(&resampled), target_rate))
}

/// Read a WAV file as mono 16-bit PCM at its own sample rate.
pub fn read_wav(path: &Path) -> Result<PcmAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let raw = reader.samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
            if channels == 1 {
                return Ok(PcmAudio::new(raw, spec.sample_rate));
            }
            raw.into_iter().map(|s| f32::from(s) / 32768.0).collect()
        }
        (SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(PcmAudio::new(quantize(&mono), spec.sample_rate))
}

/// Write mono 16-bit PCM to `path`, creating parent directories.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PrepareError::io_at(parent, e))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: &[Vec<i16>]) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for &s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_slice_rounds_to_nearest_frame() {
        let audio = PcmAudio::new((0..16000).map(|i| (i % 100) as i16).collect(), 16000);

        let clip = audio.slice("a", 0.25, 0.5, 0.05).unwrap();
        assert_eq!(clip.len(), 4000);
        assert_eq!(clip[0], audio.samples()[4000]);

        let clip = audio.slice("a", 0.10003, 0.20003, 0.05).unwrap();
        assert_eq!(clip.len(), 1600);
    }

    #[test]
    fn test_slice_past_end() {
        let audio = PcmAudio::new(vec![0; 16000], 16000);

        let clamped = audio.slice("a", 0.9, 1.03, 0.05).unwrap();
        assert_eq!(clamped.len(), 1600);

        let err = audio.slice("a", 0.9, 1.2, 0.05).unwrap_err();
        assert!(matches!(err, PrepareError::ClipOutOfRange { .. }));
    }

    #[test]
    fn test_resample_length() {
        let tone: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin() * 0.5)
            .collect();

        let up = resample(&tone, 8000, 16000).unwrap();
        assert_eq!(up.len(), 16000);
        assert!(up.iter().all(|s| s.abs() <= 1.0));

        let down = resample(&tone, 8000, 6000).unwrap();
        assert_eq!(down.len(), 6000);

        let same = resample(&tone, 8000, 8000).unwrap();
        assert_eq!(same, tone);
    }

    #[test]
    fn test_decode_wav_downmixes() {
        let frames: Vec<Vec<i16>> = (0..800).map(|_| vec![8000, 4000]).collect();
        let (mono, rate) = decode(wav_bytes(2, 8000, &frames), Some("wav")).unwrap();

        assert_eq!(rate, 8000);
        assert_eq!(mono.len(), 800);
        let expected = 6000.0 / 32768.0;
        assert!(mono.iter().all(|s| (s - expected).abs() < 1e-3));
    }

    #[test]
    fn test_convert_to_target_rate() {
        let frames: Vec<Vec<i16>> = (0..4410).map(|i| vec![((i % 50) * 100) as i16]).collect();
        let audio = convert(wav_bytes(1, 44100, &frames), Some("wav"), 16000).unwrap();

        assert_eq!(audio.sample_rate(), 16000);
        assert_eq!(audio.len(), 1600);
    }

    #[test]
    fn test_write_then_read_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clip.wav");
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 1234];

        write_wav(&path, &samples, 16000).unwrap();
        let read = read_wav(&path).unwrap();

        assert_eq!(read.sample_rate(), 16000);
        assert_eq!(read.samples(), samples.as_slice());
    }

    #[test]
    fn test_gapless_decoding_enabled() {
        assert!(format_options().enable_gapless);
    }

    #[test]
    fn test_decode_wav_keeps_every_frame() {
        let frames: Vec<Vec<i16>> = (0..1234).map(|i| vec![(i % 300) as i16]).collect();
        let (mono, rate) = decode(wav_bytes(1, 16000, &frames), Some("wav")).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(mono.len(), 1234);
        assert!((mono[299] - 299.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(vec![0u8; 64], Some("mp3")).is_err());
    }
}
