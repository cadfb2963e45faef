//! WAV packaging for the cloud transcription path
//!
//! Any recorded blob is decoded, reduced to its first channel, resampled
//! to 16 kHz by nearest-neighbour index mapping and written as 16-bit
//! PCM. Encoding is best-effort: if the blob cannot be decoded it is
//! passed through untouched.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{Error, Result};

/// Sample rate expected by the speech endpoint
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Size of the canonical RIFF/WAVE header
pub const HEADER_LEN: usize = 44;

/// MIME type of encoder output
pub const WAV_MIME: &str = "audio/wav";

/// Encoded audio with its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl AudioBlob {
    #[must_use]
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Convert any decodable blob to 16 kHz mono 16-bit WAV
///
/// Returns the input unchanged when it cannot be decoded.
#[must_use]
pub fn to_wav(blob: AudioBlob) -> AudioBlob {
    let (samples, source_rate) = match decode_first_channel(&blob) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, mime = %blob.mime, "WAV conversion failed, sending original audio");
            return blob;
        }
    };

    let resampled = resample_nearest(&samples, source_rate, TARGET_SAMPLE_RATE);
    match encode_samples(&resampled) {
        Ok(bytes) => {
            tracing::debug!(
                source_rate,
                source_samples = samples.len(),
                samples = resampled.len(),
                bytes = bytes.len(),
                "converted to WAV"
            );
            AudioBlob::new(bytes, WAV_MIME)
        }
        Err(e) => {
            tracing::warn!(error = %e, "WAV encoding failed, sending original audio");
            blob
        }
    }
}

/// Nearest-neighbour resampling
///
/// Output sample `i` is input sample `floor(i * source / target)`; the
/// output holds `floor(len * target / source)` samples.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_nearest(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
        return samples.to_vec();
    }

    let len = samples.len() as u64 * u64::from(target_rate) / u64::from(source_rate);
    let ratio = f64::from(source_rate) / f64::from(target_rate);

    (0..len)
        .map(|i| {
            let index = (i as f64 * ratio).floor() as usize;
            samples.get(index).copied().unwrap_or(0.0)
        })
        .collect()
}

/// Write mono f32 samples as a 16 kHz 16-bit PCM WAV file
///
/// Output is always `HEADER_LEN + 2 * samples.len()` bytes.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_samples(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + samples.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode a blob to 16 kHz mono float samples
///
/// # Errors
///
/// Returns error if the blob cannot be decoded
pub fn to_samples(blob: &AudioBlob) -> Result<Vec<f32>> {
    let (samples, source_rate) = decode_first_channel(blob)?;
    Ok(resample_nearest(&samples, source_rate, TARGET_SAMPLE_RATE))
}

/// Decode a blob and keep channel 0
fn decode_first_channel(blob: &AudioBlob) -> Result<(Vec<f32>, u32)> {
    if blob.is_empty() {
        return Err(Error::Audio("empty audio".to_string()));
    }

    let source = Cursor::new(blob.bytes.clone());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(&blob.mime);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Audio(format!("unsupported audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Audio("no decodable audio track".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::Audio("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Audio(format!("demux error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = %e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(Error::Audio(format!("decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(buf.samples().iter().step_by(channels).copied());
    }

    Ok((samples, source_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_byte_exact() {
        let wav = encode_samples(&[0.0, 0.5, -0.5]).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 6);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 32_000);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
    }

    #[test]
    fn samples_are_clamped_before_scaling() {
        let wav = encode_samples(&[2.0, -3.0, 1.0]).unwrap();
        let pcm: Vec<i16> = wav[HEADER_LEN..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(pcm, vec![32767, -32767, 32767]);
    }

    #[test]
    fn resample_48k_to_16k_keeps_a_third() {
        for len in [0usize, 1, 2, 3, 4, 5, 300, 301, 302] {
            let samples = vec![0.1; len];
            assert_eq!(resample_nearest(&samples, 48_000, 16_000).len(), len / 3);
        }
    }

    #[test]
    fn resample_picks_nearest_lower_index() {
        let samples: Vec<f32> = (0..9).map(|i| i as f32).collect();
        assert_eq!(
            resample_nearest(&samples, 48_000, 16_000),
            vec![0.0, 3.0, 6.0]
        );
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_nearest(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn undecodable_blob_passes_through() {
        let blob = AudioBlob::new(b"definitely not audio".to_vec(), "audio/webm");
        assert_eq!(to_wav(blob.clone()), blob);

        let empty = AudioBlob::new(Vec::new(), "audio/webm");
        assert_eq!(to_wav(empty.clone()), empty);
    }

    #[test]
    fn samples_are_decoded_at_target_rate() {
        let wav = crate::voice::samples_to_wav(&[0.25; 4_800], 48_000, 1).unwrap();
        let samples = to_samples(&AudioBlob::new(wav, WAV_MIME)).unwrap();
        assert_eq!(samples.len(), 1_600);
        assert!(samples.iter().all(|s| (s - 0.25).abs() < 1e-6));

        assert!(to_samples(&AudioBlob::new(Vec::new(), WAV_MIME)).is_err());
    }
}
