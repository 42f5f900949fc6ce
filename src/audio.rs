//! WAV and PCM plumbing
//!
//! The pipeline moves raw PCM16 LE mono 16 kHz between components; WAV only
//! exists at the edges (STT hand-off, TTS output, batch uploads). Upstream
//! TTS engines occasionally emit WAV files with bogus chunk sizes, so the
//! parser here scans chunks manually instead of trusting the header, and
//! `normalize_wav` re-wraps frames with the true frame count.

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;

pub const SAMPLE_RATE: u32 = 16_000;
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decoded PCM payload of a WAV file
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Interleaved sample data, still at the source width
    pub data: Vec<u8>,
}

/// Encode PCM i16 samples as a WAV byte string
pub fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Encode raw PCM16 LE bytes as a WAV byte string
pub fn pcm_bytes_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    pcm_to_wav(&samples, sample_rate)
}

/// Parse a WAV byte string, tolerating 0xFFFFFFFF chunk sizes from
/// streaming encoders that never patch the header.
pub fn parse_wav(wav_bytes: &[u8]) -> Result<PcmAudio> {
    if wav_bytes.len() < 44 {
        bail!("WAV data too short: {} bytes", wav_bytes.len());
    }
    if &wav_bytes[0..4] != b"RIFF" || &wav_bytes[8..12] != b"WAVE" {
        bail!("Not a valid WAV file");
    }

    let mut pos = 12;
    let mut data_start = 0usize;
    let mut data_len = 0usize;
    let mut audio_format = 0u16;
    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut bits_per_sample = 0u16;

    while pos + 8 <= wav_bytes.len() {
        let chunk_id = &wav_bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes([
            wav_bytes[pos + 4],
            wav_bytes[pos + 5],
            wav_bytes[pos + 6],
            wav_bytes[pos + 7],
        ]);

        if chunk_id == b"fmt " {
            if pos + 8 + 16 <= wav_bytes.len() {
                audio_format = u16::from_le_bytes([wav_bytes[pos + 8], wav_bytes[pos + 9]]);
                channels = u16::from_le_bytes([wav_bytes[pos + 10], wav_bytes[pos + 11]]);
                sample_rate = u32::from_le_bytes([
                    wav_bytes[pos + 12],
                    wav_bytes[pos + 13],
                    wav_bytes[pos + 14],
                    wav_bytes[pos + 15],
                ]);
                bits_per_sample = u16::from_le_bytes([wav_bytes[pos + 22], wav_bytes[pos + 23]]);
            }
            let real_size = if chunk_size == 0xFFFF_FFFF {
                16
            } else {
                chunk_size as usize
            };
            pos += 8 + real_size;
        } else if chunk_id == b"data" {
            data_start = pos + 8;
            data_len = if chunk_size == 0xFFFF_FFFF {
                wav_bytes.len().saturating_sub(data_start)
            } else {
                (chunk_size as usize).min(wav_bytes.len().saturating_sub(data_start))
            };
            break;
        } else {
            let real_size = if chunk_size == 0xFFFF_FFFF {
                0
            } else {
                chunk_size as usize
            };
            pos += 8 + real_size;
        }
    }

    if data_start == 0 || data_start >= wav_bytes.len() {
        bail!("Could not find data chunk in WAV");
    }

    Ok(PcmAudio {
        sample_rate,
        channels,
        bits_per_sample,
        data: wav_bytes[data_start..data_start + data_len].to_vec(),
    })
}

/// Extract mono PCM16 LE bytes from a WAV byte string.
///
/// Multi-channel input is downmixed by arithmetic averaging per sample
/// index. Sample widths other than 16-bit are rejected.
pub fn wav_to_pcm16_mono(wav_bytes: &[u8]) -> Result<Vec<u8>> {
    let audio = parse_wav(wav_bytes)?;

    if audio.bits_per_sample != 16 {
        bail!("unsupported sample width: {}", audio.bits_per_sample);
    }

    if audio.channels <= 1 {
        return Ok(audio.data);
    }

    let channels = audio.channels as usize;
    let src: Vec<i16> = audio
        .data
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    let frame_count = src.len() / channels;

    let mut out = Vec::with_capacity(frame_count * 2);
    for frame in 0..frame_count {
        let base = frame * channels;
        let acc: i64 = src[base..base + channels].iter().map(|&s| s as i64).sum();
        let sample = (acc / channels as i64) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(out)
}

/// Re-wrap WAV frames with a correct header. Repairs files whose declared
/// sizes disagree with the actual payload.
pub fn normalize_wav(wav_bytes: &[u8]) -> Result<Vec<u8>> {
    let audio = parse_wav(wav_bytes)?;
    if audio.bits_per_sample != 16 {
        bail!("unsupported sample width: {}", audio.bits_per_sample);
    }

    let spec = hound::WavSpec {
        channels: audio.channels.max(1),
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
    for chunk in audio.data.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Prepend `ms` milliseconds of silence to mono PCM16 bytes
pub fn prepend_silence(pcm: &[u8], ms: u32, sample_rate: u32) -> Vec<u8> {
    let lead_samples = (sample_rate as u64 * ms as u64 / 1000) as usize;
    let mut out = vec![0u8; lead_samples * BYTES_PER_SAMPLE];
    out.extend_from_slice(pcm);
    out
}

/// Transcode an arbitrary compressed audio blob to mono PCM16 16 kHz via
/// ffmpeg. Used for downloaded music tracks; the decoder choice is left
/// entirely to ffmpeg's probing.
pub async fn transcode_to_pcm16(input: &[u8]) -> Result<Vec<u8>> {
    let mut child = tokio::process::Command::new("ffmpeg")
        .args([
            "-i", "pipe:0", "-f", "s16le", "-ar", "16000", "-ac", "1", "-loglevel", "error",
            "pipe:1",
        ])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("Failed to spawn ffmpeg")?;

    let mut stdin = child.stdin.take().context("Failed to get ffmpeg stdin")?;
    let owned = input.to_vec();
    tokio::spawn(async move {
        let _ = stdin.write_all(&owned).await;
        let _ = stdin.shutdown().await;
    });

    let output = child
        .wait_with_output()
        .await
        .context("ffmpeg wait failed")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffmpeg: {}", stderr.trim());
    }

    // keep frames aligned to whole samples
    let mut pcm = output.stdout;
    pcm.truncate(pcm.len() / 2 * 2);
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_to_wav_roundtrip() {
        let samples = vec![100i16, -100, 2000, -2000];
        let wav = pcm_to_wav(&samples, 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");

        let audio = parse_wav(&wav).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.bits_per_sample, 16);
        assert_eq!(audio.data.len(), 8);
    }

    #[test]
    fn test_downmix_stereo() {
        // two stereo frames: (100, 300) -> 200, (-100, -300) -> -200
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [100i16, 300, -100, -300] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mono = wav_to_pcm16_mono(&cursor.into_inner()).unwrap();
        let samples: Vec<i16> = mono
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![200, -200]);
    }

    #[test]
    fn test_rejects_wide_samples() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(7i32).unwrap();
        writer.finalize().unwrap();

        assert!(wav_to_pcm16_mono(&cursor.into_inner()).is_err());
    }

    #[test]
    fn test_prepend_silence() {
        let pcm = vec![1u8, 2, 3, 4];
        let out = prepend_silence(&pcm, 10, 16000);
        // 10 ms at 16 kHz = 160 samples = 320 bytes of lead
        assert_eq!(out.len(), 320 + 4);
        assert!(out[..320].iter().all(|&b| b == 0));
        assert_eq!(&out[320..], &pcm[..]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_wav(b"not a wav").is_err());
        assert!(parse_wav(&[0u8; 64]).is_err());
    }
}
