//! Downsample a recording to a lower sample rate

use crate::error::{Error, Result};
use crate::filter::resample;
use crate::format::filename::{self, Operation};
use crate::format::wav::{Guano, WavHeader};
use crate::util::io;
use crate::util::progress::ProgressFn;
use crate::util::{Progress, SampleSink, SampleSource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sample rates the recorders produce, Hz
pub const RECOGNISED_RATES: [u32; 8] = [
    8_000, 16_000, 32_000, 48_000, 96_000, 192_000, 250_000, 384_000,
];

/// Downsample `input` to `requested_rate`
///
/// The requested rate must be one of the recognised rates and no greater
/// than the source rate. Returns the path of the file written.
pub fn downsample(
    input: &Path,
    output: Option<&Path>,
    prefix: &str,
    requested_rate: u32,
    progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf> {
    if !RECOGNISED_RATES.contains(&requested_rate) {
        return Err(Error::invalid_argument(format!(
            "unrecognised sample rate {} Hz",
            requested_rate
        )));
    }

    let file_size = io::file_size(input)?;
    let header = WavHeader::read_from_file(input)?;

    if requested_rate > header.sample_rate() {
        return Err(Error::invalid_argument(format!(
            "requested rate {} Hz exceeds the source rate {} Hz",
            requested_rate,
            header.sample_rate()
        )));
    }

    let input_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::filename("input path has no filename".to_string()))?;

    let parts = filename::validate(input_name, Operation::Downsample, &header)?;

    let guano = Guano::read_from_file(
        input,
        header.size() as u64 + header.data_size() as u64,
        file_size,
    )?;

    let input_samples = header.num_samples();
    let output_samples =
        resample::output_samples(input_samples, header.sample_rate(), requested_rate);

    debug!(input_samples, output_samples, "downsample plan ready");

    let mut out_header = header.clone();
    out_header.update_sample_rate(requested_rate);
    out_header.update_sizes(guano.as_ref(), (output_samples * 2) as u32)?;

    let out_dir = super::split::resolve_output_dir(input, output)?;
    let out_path = out_dir.join(filename::output_filename(
        prefix,
        &parts.prefix,
        parts.timestamp,
        None,
        &parts.postfix,
    ));

    let mut source = SampleSource::open(input)?;
    source.seek_to(header.size() as u64)?;

    let mut sink = SampleSink::create(&out_path)?;
    sink.write_all(out_header.as_bytes())?;

    let mut progress = Progress::new(progress, input_samples.max(1));

    {
        let mut read = || source.read_sample();
        let mut write = |sample: i16| sink.write_sample(sample);

        resample::downsample_stream(
            &mut read,
            &mut write,
            input_samples,
            header.sample_rate(),
            requested_rate,
            &mut progress,
        )?;
    }

    if let Some(g) = guano.as_ref() {
        g.write_to(&mut sink)?;
    }

    sink.flush()?;
    progress.finish();

    Ok(out_path)
}
