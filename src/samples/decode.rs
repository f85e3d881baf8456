// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

/// The reason a sample could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Sample rate not specified")]
    NoSampleRate,

    #[error("No audio frames decoded")]
    NoFrames,
}

/// A fully decoded audio file: interleaved f32 samples plus format info.
pub(crate) struct DecodedAudio {
    pub(crate) data: Vec<f32>,
    pub(crate) channels: u16,
    pub(crate) sample_rate: u32,
}

/// Decodes an entire audio file (WAV, FLAC, MP3, OGG, ...) into interleaved
/// f32 samples.
pub(crate) fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // A hint from the file extension helps the probe pick a format reader.
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::NoSampleRate)?;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut data = Vec::new();
    let mut channels = 0u16;
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            // Some decoders signal end of stream with a decode error.
            Err(SymphoniaError::DecodeError(_)) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                decoder.decode(&packet)?
            }
            // A malformed packet is skipped rather than failing the load.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = ?path, error = e, "Skipping malformed packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if decoded.frames() == 0 {
            continue;
        }
        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        data.extend_from_slice(buffer.samples());
    }

    if data.is_empty() || channels == 0 {
        return Err(DecodeError::NoFrames);
    }

    Ok(DecodedAudio {
        data,
        channels,
        sample_rate,
    })
}

/// Resamples interleaved audio to a new rate using linear interpolation.
/// Sufficient for one-shot drum samples.
pub(crate) fn resample_linear(
    samples: &[f32],
    channels: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channels as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let first = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let second = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(first);
            output.push(first + (second - first) * frac);
        }
    }
    output
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resample_upsamples() {
        let source_rate = 44100;
        let target_rate = 48000;
        let source: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / source_rate as f32).sin())
            .collect();

        let result = resample_linear(&source, 1, source_rate, target_rate);

        let expected_len = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(result.len(), expected_len);
    }

    #[test]
    fn test_resample_preserves_channels() {
        // Stereo with L=1.0, R=-1.0 throughout.
        let source = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];

        let result = resample_linear(&source, 2, 44100, 48000);

        assert!(result.len() >= source.len());
        assert!((result[0] - 1.0).abs() < 0.1);
        assert!((result[1] + 1.0).abs() < 0.1);
    }

    #[test]
    fn test_resample_doubling_is_exact() {
        let source = vec![0.0f32, 1.0, 0.0, -1.0];

        let result = resample_linear(&source, 1, 22050, 44100);

        assert_eq!(result.len(), 8);
        assert_eq!(result[0], 0.0);
        assert_eq!(result[2], 1.0);
        // Odd frames sit halfway between the source frames.
        assert!((result[1] - 0.5).abs() < 1e-6);
    }
}
