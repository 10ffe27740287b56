//! Integer-ratio downsampling
//!
//! The converter over-samples the input at an integer multiple of the
//! requested rate by linear interpolation, then averages each group of
//! `divider` values into one output sample. With commensurate rates the
//! cursor lands exactly on input samples and the kernel reduces to plain
//! block averaging.

use crate::error::Result;
use crate::util::Progress;

/// Derived conversion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConversion {
    /// Interpolated values averaged per output sample
    pub divider: u32,
    /// The over-sampling rate, `divider × requested`
    pub raw_rate: u32,
    /// Input-sample fraction the cursor advances per interpolated value
    pub step: f64,
}

/// Compute the conversion parameters for a rate pair
pub fn conversion(source_rate: u32, requested_rate: u32) -> RateConversion {
    let divider = source_rate.div_ceil(requested_rate);
    let raw_rate = divider * requested_rate;

    RateConversion {
        divider,
        raw_rate,
        step: source_rate as f64 / raw_rate as f64,
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Output sample count for a conversion
///
/// Rates are reduced to their kHz ratio before the multiplication so the
/// intermediate product cannot overflow for any recognised rate pair.
pub fn output_samples(input_samples: u64, source_rate: u32, requested_rate: u32) -> u64 {
    let source_khz = source_rate as u64 / 1000;
    let requested_khz = requested_rate as u64 / 1000;
    let g = gcd(source_khz, requested_khz);

    input_samples * (requested_khz / g) / (source_khz / g)
}

fn quantize(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Stream `input_samples` samples through the converter
///
/// `read` yields consecutive input samples; `write` receives each output
/// sample. Progress advances once per input sample consumed. Returns the
/// number of samples written.
pub fn downsample_stream(
    read: &mut dyn FnMut() -> Result<i16>,
    write: &mut dyn FnMut(i16) -> Result<()>,
    input_samples: u64,
    source_rate: u32,
    requested_rate: u32,
    progress: &mut Progress<'_>,
) -> Result<u64> {
    let conv = conversion(source_rate, requested_rate);
    let total_out = output_samples(input_samples, source_rate, requested_rate);

    if total_out == 0 {
        return Ok(0);
    }

    let mut current = read()? as f64;
    progress.advance(1);
    let mut consumed: u64 = 1;

    let mut next = if input_samples > 1 {
        let sample = read()? as f64;
        progress.advance(1);
        consumed += 1;
        sample
    } else {
        current
    };

    let mut position = 0.0f64;

    for _ in 0..total_out {
        let mut sum = 0.0f64;

        for _ in 0..conv.divider {
            sum += current + position * (next - current);
            position += conv.step;

            if position >= 1.0 {
                position -= 1.0;
                current = next;
                if consumed < input_samples {
                    next = read()? as f64;
                    progress.advance(1);
                    consumed += 1;
                }
            }
        }

        write(quantize(sum / conv.divider as f64))?;
    }

    Ok(total_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[i16], source_rate: u32, requested_rate: u32) -> Vec<i16> {
        let mut cursor = 0usize;
        let mut read = || {
            let sample = input[cursor];
            cursor += 1;
            Ok(sample)
        };

        let mut output = Vec::new();
        let mut write = |s: i16| {
            output.push(s);
            Ok(())
        };

        let mut progress = Progress::new(None, input.len() as u64);
        downsample_stream(
            &mut read,
            &mut write,
            input.len() as u64,
            source_rate,
            requested_rate,
            &mut progress,
        )
        .unwrap();

        output
    }

    #[test]
    fn test_conversion_parameters() {
        let conv = conversion(48000, 16000);
        assert_eq!(conv.divider, 3);
        assert_eq!(conv.raw_rate, 48000);
        assert_eq!(conv.step, 1.0);

        let conv = conversion(250000, 48000);
        assert_eq!(conv.divider, 6);
        assert_eq!(conv.raw_rate, 288000);
        assert!(conv.step < 1.0);
    }

    #[test]
    fn test_output_sample_formula() {
        assert_eq!(output_samples(96000, 48000, 16000), 32000);
        assert_eq!(output_samples(48000, 48000, 48000), 48000);
        assert_eq!(output_samples(250, 250000, 48000), 48);
    }

    #[test]
    fn test_identity_conversion() {
        let input: Vec<i16> = (0..1000).map(|i| (i % 313) as i16 - 150).collect();
        assert_eq!(run(&input, 48000, 48000), input);
    }

    #[test]
    fn test_integer_block_average() {
        let input = vec![0i16, 3, 6, 10, 20, 30, -5, -10, -15];
        // divider 3, commensurate rates: plain means of triples
        assert_eq!(run(&input, 48000, 16000), vec![3, 20, -10]);
    }

    #[test]
    fn test_rounding_and_clamp() {
        let input = vec![i16::MAX; 6];
        assert_eq!(run(&input, 96000, 32000), vec![i16::MAX, i16::MAX]);

        let input = vec![1i16, 2, 0, 0, 0, 0];
        // mean 1.0 rounds to 1
        assert_eq!(run(&input, 96000, 32000)[0], 1);
    }
}
