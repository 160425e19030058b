//! Low-latency fallback resampler used on the streaming path, where the
//! FFmpeg single-pass route would add too much latency.

use anyhow::Result;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

pub fn resample(input: &[f32], from_sample_rate: u32, to_sample_rate: u32) -> Result<Vec<f32>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    if from_sample_rate == to_sample_rate {
        return Ok(input.to_vec());
    }

    let ratio = to_sample_rate as f64 / from_sample_rate as f64;

    let (sinc_len, interpolation_type, oversampling) = if ratio >= 2.0 {
        (512, SincInterpolationType::Cubic, 512)
    } else if ratio >= 1.5 {
        (384, SincInterpolationType::Cubic, 384)
    } else if ratio > 1.0 {
        (256, SincInterpolationType::Linear, 256)
    } else if ratio <= 0.5 {
        (512, SincInterpolationType::Cubic, 512)
    } else {
        (384, SincInterpolationType::Linear, 384)
    };

    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation: interpolation_type,
        oversampling_factor: oversampling,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)?;

    let waves_in = vec![input.to_vec()];
    let waves_out = resampler.process(&waves_in, None)?;

    Ok(waves_out.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_resample_is_a_no_op() {
        let input = vec![0.1_f32, 0.2, 0.3];
        let output = resample(&input, 16_000, 16_000).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn upsampling_produces_more_samples() {
        let input = vec![0.0_f32; 1600];
        let output = resample(&input, 16_000, 48_000).unwrap();
        assert!(output.len() > input.len());
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(resample(&[], 16_000, 48_000).unwrap().is_empty());
    }
}
