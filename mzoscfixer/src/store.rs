use std::fs;
use std::io;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use mzdata::io::{
    infer_format, infer_from_path, mzml::MzMLWriterType, MZReaderType, MassSpectrometryFormat,
};
use mzdata::meta::{custom_software_name, DataProcessing, ProcessingMethod, Software};
use mzdata::prelude::*;
use mzdata::spectrum::{MultiLayerSpectrum, RefPeakDataLevel};
use mzpeaks::{CentroidPeak, DeconvolutedPeak, MZPeakSetType};

use tracing::{debug, info};

use mzoscfix::{Run, RunStore, Scan};

use crate::driver::MZOscFixerError;

pub type ReaderType = MZReaderType<fs::File, CentroidPeak, DeconvolutedPeak>;
pub type SpectrumType = MultiLayerSpectrum<CentroidPeak, DeconvolutedPeak>;

const SOFTWARE_ID: &str = "mzoscfixer";

fn make_software() -> Software {
    let mut sw = Software::default();
    sw.add_param(custom_software_name(SOFTWARE_ID));
    sw.id = SOFTWARE_ID.to_string();
    sw.version = option_env!("CARGO_PKG_VERSION")
        .unwrap_or("unknown")
        .to_string();
    sw
}

/// Read the peaks of `spectrum` into a [`Scan`], keeping its description
fn scan_from_spectrum(spectrum: SpectrumType) -> Result<Scan, MZOscFixerError> {
    let (mzs, intensities): (Vec<f64>, Vec<f32>) = match spectrum.peaks() {
        RefPeakDataLevel::Missing => (Vec::new(), Vec::new()),
        RefPeakDataLevel::RawData(arrays) => {
            (arrays.mzs()?.to_vec(), arrays.intensities()?.to_vec())
        }
        RefPeakDataLevel::Centroid(peaks) => peaks
            .iter()
            .map(|p| (p.mz, p.intensity))
            .unzip(),
        RefPeakDataLevel::Deconvoluted(_) => {
            return Err(MZOscFixerError::UnsupportedPeakData(
                spectrum.id().to_string(),
            ))
        }
    };
    Ok(Scan::from_parts(spectrum.description, mzs, intensities))
}

fn spectrum_from_scan(scan: &Scan) -> SpectrumType {
    let peaks: MZPeakSetType<CentroidPeak> = MZPeakSetType::new(
        scan.iter()
            .enumerate()
            .map(|(i, (mz, intensity))| CentroidPeak::new(mz, intensity, i as u32))
            .collect(),
    );
    MultiLayerSpectrum::new(scan.description.clone(), None, Some(peaks), None)
}

fn write_run<W: SpectrumWriter<CentroidPeak, DeconvolutedPeak>>(
    mut writer: W,
    run: &Run,
) -> io::Result<()> {
    for scan in run.iter() {
        writer.write_owned(spectrum_from_scan(scan))?;
    }
    writer.close()?;
    Ok(())
}

/// A [`RunStore`] backed by the formats `mzdata` reads, writing mzML.
///
/// The metadata of the last run loaded is carried over to the next run stored, with
/// a processing method recording this program appended.
#[derive(Default)]
pub struct MzDataRunStore {
    source: Option<ReaderType>,
    processing: ProcessingMethod,
}

impl MzDataRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processing_method(mut self, processing: ProcessingMethod) -> Self {
        self.processing = processing;
        self
    }

    fn update_data_processing<T: MSDataFileMetadata>(&self, source: &mut T) {
        let sw_id = {
            let mut sw = make_software();
            let stem = sw.id.clone();
            let mut i = 0;
            let mut query = stem.clone();
            while source.softwares().iter().any(|s| s.id == query) {
                i += 1;
                query = format!("{stem}_{i}");
            }
            sw.id = query.clone();
            source.softwares_mut().push(sw);
            query
        };
        if source.data_processings().is_empty() {
            let mut method = self.processing.clone();
            method.order = 0;
            method.software_reference = sw_id;
            let mut dp = DataProcessing::default();
            let dp_id = format!("DP1_{SOFTWARE_ID}");
            dp.id = dp_id.clone();
            dp.push(method);
            source.data_processings_mut().push(dp);
            if let Some(descr) = source.run_description_mut() {
                descr.default_data_processing_id = Some(dp_id);
            }
        } else {
            for dp in source.data_processings_mut().iter_mut() {
                let last_step = dp
                    .iter()
                    .map(|m| m.order)
                    .max()
                    .unwrap_or(-1);
                let mut method = self.processing.clone();
                method.order = last_step.saturating_add(1);
                method.software_reference = sw_id.clone();
                dp.push(method)
            }
        }
    }

    fn prepare_writer<W: io::Write>(
        &self,
        handle: W,
        run: &Run,
    ) -> MzMLWriterType<W, CentroidPeak, DeconvolutedPeak> {
        let mut writer = MzMLWriterType::new(handle);
        if let Some(source) = self.source.as_ref() {
            writer.copy_metadata_from(source);
        }
        self.update_data_processing(&mut writer);
        writer.set_spectrum_count(run.len() as u64);
        writer
    }
}

impl RunStore for MzDataRunStore {
    type Error = MZOscFixerError;

    fn load(&mut self, path: &Path) -> Result<Run, Self::Error> {
        let (ms_format, _compressed) = infer_format(path)?;
        match ms_format {
            MassSpectrometryFormat::MzML | MassSpectrometryFormat::MGF => {}
            #[cfg(feature = "mzmlb")]
            MassSpectrometryFormat::MzMLb => {}
            #[cfg(feature = "thermo")]
            MassSpectrometryFormat::ThermoRaw => {}
            _ => {
                return Err(MZOscFixerError::FormatUnknownOrNotSupportedError(
                    path.to_string_lossy().to_string(),
                    ms_format,
                ))
            }
        }
        debug!("Reading {} as {ms_format:?}", path.display());
        let mut reader = ReaderType::open_path(path)?;
        let scans = reader
            .iter()
            .map(scan_from_spectrum)
            .collect::<Result<Vec<_>, _>>()?;
        let run = Run::new(scans)?;
        self.source = Some(reader);
        Ok(run)
    }

    fn store(&mut self, run: &Run, path: &Path) -> Result<(), Self::Error> {
        if path == Path::new("-") {
            let writer = self.prepare_writer(io::stdout(), run);
            write_run(writer, run)?;
            return Ok(());
        }
        let (ms_format, compressed) = infer_from_path(path);
        match ms_format {
            MassSpectrometryFormat::MzML => {
                let handle = io::BufWriter::new(fs::File::create(path)?);
                if compressed {
                    let encoder = GzEncoder::new(handle, Compression::best());
                    write_run(self.prepare_writer(encoder, run), run)?;
                } else {
                    write_run(self.prepare_writer(handle, run), run)?;
                }
            }
            _ => {
                return Err(MZOscFixerError::OutputFormatUnknownOrNotSupportedError(
                    path.to_string_lossy().to_string(),
                    ms_format,
                ))
            }
        }
        info!("Wrote {} scans to {}", run.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_run() -> Run {
        let scans = (0..4)
            .map(|i| {
                let t = i as f64 * 0.25;
                Scan::new(
                    i,
                    t,
                    vec![100.0, 200.5, 922.098],
                    vec![10.0 + i as f32, 0.0, 1000.0 - i as f32],
                )
            })
            .collect();
        Run::new(scans).unwrap()
    }

    #[test_log::test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mzML");
        let run = make_run();

        let mut store = MzDataRunStore::new();
        store.store(&run, &path).unwrap();

        let mut store = MzDataRunStore::new();
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.len(), run.len());
        assert_eq!(loaded.times(), run.times());
        for (a, b) in loaded.iter().zip(run.iter()) {
            assert_eq!(a.id(), b.id());
            assert_eq!(a.mzs, b.mzs);
            assert_eq!(a.intensities, b.intensities);
        }

        let source = store.source.as_ref().unwrap();
        assert!(source.softwares().iter().any(|s| s.id == SOFTWARE_ID));
        assert!(!source.data_processings().is_empty());
    }

    #[test_log::test]
    fn test_processing_appended() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.mzML");
        let second = dir.path().join("second.mzML");
        let run = make_run();

        MzDataRunStore::new().store(&run, &first).unwrap();
        let mut store = MzDataRunStore::new();
        let loaded = store.load(&first).unwrap();
        store.store(&loaded, &second).unwrap();

        let mut store = MzDataRunStore::new();
        let again = store.load(&second).unwrap();
        assert_eq!(again.len(), run.len());
        let source = store.source.as_ref().unwrap();
        let ids: Vec<_> = source.softwares().iter().map(|s| s.id.clone()).collect();
        assert!(ids.contains(&SOFTWARE_ID.to_string()));
        assert!(ids.contains(&format!("{SOFTWARE_ID}_1")));
    }

    #[test]
    fn test_unsupported_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = MzDataRunStore::new()
            .store(&make_run(), &dir.path().join("run.txt"))
            .unwrap_err();
        assert!(matches!(
            err,
            MZOscFixerError::OutputFormatUnknownOrNotSupportedError(..)
        ));
    }
}
