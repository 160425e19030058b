//! Boundary to the external transcoder subprocess: decode arbitrary input
//! audio to mono 16 kHz float32, and encode persisted recordings to MP3.

use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_sidecar::command::FfmpegCommand;

use crate::config::NormalizationMethod;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decodes `path` to mono float32 PCM at `target_rate` via a single FFmpeg
/// pass. No video, 1 channel, signed 16-bit PCM on the wire, converted to
/// float32 on return.
pub fn load_audio(path: &Path, target_rate: u32) -> Result<(Vec<f32>, u32)> {
    let mut child = FfmpegCommand::new()
        .input(path.to_string_lossy())
        .args(["-vn", "-ac", "1", "-ar", &target_rate.to_string()])
        .args(["-f", "s16le", "-acodec", "pcm_s16le"])
        .args(["-hide_banner", "-loglevel", "error"])
        .output("pipe:1")
        .spawn()
        .context("failed to spawn ffmpeg")?;

    let stdout = child
        .take_stdout()
        .context("ffmpeg produced no stdout pipe")?;

    let mut raw = Vec::new();
    {
        use std::io::Read;
        let mut reader = stdout;
        reader
            .read_to_end(&mut raw)
            .context("failed to read decoded audio from ffmpeg")?;
    }

    child.wait().context("ffmpeg exited with an error")?;

    let samples: Vec<f32> = raw
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32_768.0)
        .collect();

    Ok((samples, target_rate))
}

/// Converts `src` (any format FFmpeg understands) to an MP3 at `dst` using
/// `bitrate` kbps, overwriting any existing file.
pub fn convert_to_mp3(src: &Path, dst: &Path, bitrate_kbps: u32) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).context("failed to create audio directory")?;
    }

    let status = FfmpegCommand::new()
        .input(src.to_string_lossy())
        .args(["-vn", "-acodec", "libmp3lame", "-b:a", &format!("{bitrate_kbps}k")])
        .args(["-y"])
        .output(dst.to_string_lossy())
        .spawn()
        .context("failed to spawn ffmpeg for mp3 encode")?
        .wait()
        .context("ffmpeg mp3 encode failed")?;

    if !status.success() {
        anyhow::bail!("ffmpeg exited with status {status}");
    }

    Ok(())
}

/// Peak-to-target-dBFS normalization, applied in-process on decoded samples.
pub fn normalize_peak(samples: &mut [f32], target_dbfs: f32) {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }

    let target_linear = 10f32.powf(target_dbfs / 20.0);
    let gain = target_linear / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Dynamic-range normalization via the transcoder's `dynaudnorm` filter,
/// applied as a second FFmpeg pass since it cannot be expressed in-process.
pub fn normalize_dynamic_range(src: &Path, dst: &Path) -> Result<()> {
    let status = FfmpegCommand::new()
        .input(src.to_string_lossy())
        .args(["-af", "dynaudnorm"])
        .args(["-y"])
        .output(dst.to_string_lossy())
        .spawn()
        .context("failed to spawn ffmpeg for dynaudnorm")?
        .wait()
        .context("ffmpeg dynaudnorm pass failed")?;

    if !status.success() {
        anyhow::bail!("ffmpeg exited with status {status}");
    }

    Ok(())
}

pub fn apply_normalization(method: NormalizationMethod, samples: &mut [f32], target_dbfs: f32) {
    match method {
        NormalizationMethod::Peak => normalize_peak(samples, target_dbfs),
        // Loudnorm/dynaudnorm need the subprocess path; in-process callers
        // that can't shell out fall back to peak normalization.
        NormalizationMethod::Loudnorm | NormalizationMethod::Dynaudnorm => {
            normalize_peak(samples, target_dbfs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_normalization_scales_to_target() {
        let mut samples = vec![0.1_f32, -0.2, 0.05];
        normalize_peak(&mut samples, -1.0);
        let target_linear = 10f32.powf(-1.0 / 20.0);
        assert!((samples[1].abs() - target_linear).abs() < 1e-4);
    }

    #[test]
    fn peak_normalization_is_a_no_op_on_silence() {
        let mut samples = vec![0.0_f32; 10];
        normalize_peak(&mut samples, -1.0);
        assert!(samples.iter().all(|s| *s == 0.0));
    }
}
