//! Tabular export of the traces, models and residuals of corrected channels.
use std::io;
use std::path::Path;

use mzoscfix::ChannelCorrection;

fn header(channels: &[ChannelCorrection]) -> Vec<String> {
    let mut header = Vec::with_capacity(1 + channels.len() * 3);
    header.push("rt".to_string());
    for channel in channels {
        header.push(format!("xic_{:.4}", channel.mz));
        header.push(format!("model_{:.4}", channel.mz));
        header.push(format!("residual_{:.4}", channel.mz));
    }
    header
}

/// Write one row per retention time with the trace, model and residual of every
/// channel as columns.
pub fn write_channels<W: io::Write>(
    writer: W,
    times: &[f64],
    channels: &[ChannelCorrection],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(header(channels))?;
    for (i, time) in times.iter().enumerate() {
        let mut row = Vec::with_capacity(1 + channels.len() * 3);
        row.push(time.to_string());
        for channel in channels {
            for series in [&channel.trace, &channel.model, &channel.residual] {
                row.push(series.get(i).map(|v| v.to_string()).unwrap_or_default());
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_channels_to_path(
    path: &Path,
    times: &[f64],
    channels: &[ChannelCorrection],
) -> Result<(), csv::Error> {
    let handle = io::BufWriter::new(std::fs::File::create(path)?);
    write_channels(handle, times, channels)
}
