//! Split a recording into uniform-duration pieces

use crate::error::{Error, Result};
use crate::format::filename::{self, Operation};
use crate::format::wav::{Guano, WavHeader};
use crate::util::io::{self, copy_range};
use crate::util::progress::ProgressFn;
use crate::util::{Progress, SampleSink, SampleSource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Split `input` into files of at most `maximum_file_duration` seconds
///
/// Outputs land in `output` (the input's directory when `None`). A single
/// chunk that covers the whole payload passes the original comment and
/// timestamp through unchanged; otherwise each piece gets a
/// `"Split from … as file i of N."` comment and a shifted timestamp.
pub fn split(
    input: &Path,
    output: Option<&Path>,
    prefix: &str,
    maximum_file_duration: u32,
    progress: Option<ProgressFn<'_>>,
) -> Result<Vec<PathBuf>> {
    if maximum_file_duration == 0 {
        return Err(Error::invalid_argument(
            "maximum file duration must be a positive number of seconds",
        ));
    }

    let file_size = io::file_size(input)?;
    let header = WavHeader::read_from_file(input)?;

    let input_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::filename("input path has no filename".to_string()))?;

    let parts = filename::validate(input_name, Operation::Split, &header)?;

    let guano = Guano::read_from_file(
        input,
        header.size() as u64 + header.data_size() as u64,
        file_size,
    )?;

    let out_dir = resolve_output_dir(input, output)?;

    let chunk_bytes = maximum_file_duration as u64 * header.sample_rate() as u64 * 2;
    let data_size = header.data_size() as u64;
    let count = data_size.div_ceil(chunk_bytes).max(1);

    debug!(count, chunk_bytes, "split plan ready");

    let mut progress = Progress::new(progress, data_size.max(1));
    let mut source = SampleSource::open(input)?;
    let mut written = Vec::with_capacity(count as usize);

    for i in 0..count {
        let offset = i * chunk_bytes;
        let length = chunk_bytes.min(data_size - offset);
        let timestamp = parts.timestamp + i as i64 * maximum_file_duration as i64 * 1000;

        let mut out_header = header.clone();
        let mut out_guano = guano.clone();

        if count > 1 {
            out_header.update_comment(&format!(
                "Split from {} as file {} of {}.",
                input_name,
                i + 1,
                count
            ))?;

            if let Some(g) = out_guano.as_mut() {
                g.set_timestamp(timestamp);
            }
        }

        out_header.update_sizes(out_guano.as_ref(), length as u32)?;

        let out_path = out_dir.join(filename::output_filename(
            prefix,
            &parts.prefix,
            timestamp,
            None,
            &parts.postfix,
        ));

        let mut sink = SampleSink::create(&out_path)?;
        sink.write_all(out_header.as_bytes())?;
        copy_range(
            &mut source,
            header.size() as u64 + offset,
            length,
            &mut sink,
            &mut progress,
        )?;

        if let Some(g) = out_guano.as_ref() {
            g.write_to(&mut sink)?;
        }

        sink.flush()?;
        written.push(out_path);
    }

    progress.finish();
    Ok(written)
}

pub(crate) fn resolve_output_dir(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    match output {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))),
    }
}
