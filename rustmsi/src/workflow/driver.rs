use std::fs;
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use msicore::algorithm::kmeans::KmeansConfig;
use msicore::algorithm::nmf::NmfConfig;
use msicore::algorithm::peaks::PeakPickingConfig;
use msicore::sim::synthetic::{generate_cube, SyntheticConfig};

use crate::analysis::base::run_and_store;
use crate::analysis::findpeaks::FindPeaksGlobal;
use crate::analysis::kmeans::KmeansAnalysis;
use crate::analysis::nmf::NmfAnalysis;
use crate::data::container::MsiContainer;
use crate::data::raw::{write_img_triple, ImgRawFile};

/// Command-line driver for importing and analyzing MSI data.
#[derive(Parser)]
#[command(name = "rustmsi", version, about = "Import raw MSI data into a container and run analyses against it")]
pub struct Cli {
    /// Specify the level of logging to be used.
    #[arg(long, global = true, default_value = "info",
          value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import a raw file triple (.hdr/.t2m/.img) into a container
    Convert {
        /// Stem or any member of the raw file triple
        input: PathBuf,
        /// Output target, e.g. "brain.msi" or "brain.msi:/entry_0"
        #[arg(long)]
        save: String,
        /// zstd compression level for the stored spectra
        #[arg(long, default_value_t = 3)]
        compression_level: i32,
    },
    /// Run global peak finding on a stored dataset
    Findpeaks {
        /// Target container and experiment, e.g. "brain.msi:/entry_0"
        #[arg(long)]
        save: String,
        /// Index of the source dataset within the experiment
        #[arg(long, default_value_t = 0)]
        dataset: usize,
        /// Identifier under which the analysis is stored
        #[arg(long, default_value = "findpeaks_0")]
        identifier: String,
        /// Gaussian smoothing sigma in channels
        #[arg(long, default_value_t = 2.0)]
        smooth_sigma: f64,
        /// Minimum peak prominence in multiples of the noise level
        #[arg(long, default_value_t = 3.0)]
        min_snr: f64,
        /// Minimum apex distance in channels
        #[arg(long, default_value_t = 3)]
        min_distance: usize,
        /// Keep only the n most intense peaks
        #[arg(long)]
        max_peaks: Option<usize>,
    },
    /// Factorize the peak matrix of a prior peak finding analysis
    Nmf {
        #[arg(long)]
        save: String,
        /// Identifier of the peak finding analysis to read from
        #[arg(long, default_value = "findpeaks_0")]
        source: String,
        #[arg(long, default_value = "nmf_0")]
        identifier: String,
        /// Number of components
        #[arg(long, default_value_t = 8)]
        rank: usize,
        #[arg(long, default_value_t = 500)]
        max_iter: usize,
        #[arg(long, default_value_t = 1e-4)]
        tolerance: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Cluster the pixels of a prior peak finding analysis
    Kmeans {
        #[arg(long)]
        save: String,
        /// Identifier of the peak finding analysis to read from
        #[arg(long, default_value = "findpeaks_0")]
        source: String,
        #[arg(long, default_value = "kmeans_0")]
        identifier: String,
        /// Number of clusters
        #[arg(long, default_value_t = 5)]
        k: usize,
        #[arg(long, default_value_t = 300)]
        max_iter: usize,
        #[arg(long, default_value_t = 1e-6)]
        tolerance: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Import a raw file and run peak finding, NMF and k-means in sequence
    Pipeline {
        /// Stem or any member of the raw file triple
        input: PathBuf,
        #[arg(long)]
        save: String,
        #[arg(long, default_value_t = 3)]
        compression_level: i32,
        #[arg(long, default_value_t = 2.0)]
        smooth_sigma: f64,
        #[arg(long, default_value_t = 3.0)]
        min_snr: f64,
        #[arg(long)]
        max_peaks: Option<usize>,
        #[arg(long, default_value_t = 8)]
        rank: usize,
        #[arg(long, default_value_t = 5)]
        k: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Write a synthetic raw file triple for testing and demos
    Simulate {
        /// Output stem for the triple
        output: PathBuf,
        #[arg(long, default_value_t = 16)]
        rows: usize,
        #[arg(long, default_value_t = 16)]
        cols: usize,
        #[arg(long, default_value_t = 512)]
        channels: usize,
        #[arg(long, default_value_t = 8)]
        peaks: usize,
        #[arg(long, default_value_t = 1.0)]
        noise: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// List the contents of a container
    Info {
        container: PathBuf,
        /// Print machine-readable JSON instead of plain text
        #[arg(long)]
        json: bool,
    },
}

/// Initializes the tracing subscriber, honoring `RUST_LOG` over the flag.
pub fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parses an output target of the form `<file>` or `<file>:/entry_<n>`.
///
/// # Example
///
/// ```
/// # use rustmsi::workflow::driver::parse_save_target;
/// let (path, entry) = parse_save_target("brain.msi:/entry_2").unwrap();
/// assert_eq!(path.to_str(), Some("brain.msi"));
/// assert_eq!(entry, Some(2));
///
/// let (path, entry) = parse_save_target("brain.msi").unwrap();
/// assert_eq!(entry, None);
/// ```
pub fn parse_save_target(save: &str) -> Result<(PathBuf, Option<usize>), Box<dyn std::error::Error>> {
    if save.is_empty() {
        return Err("empty save target".into());
    }
    match save.rfind(":/entry_") {
        Some(position) => {
            let path = &save[..position];
            let index = &save[position + ":/entry_".len()..];
            if path.is_empty() {
                return Err(format!("invalid save target: {}", save).into());
            }
            let index: usize = index.parse().map_err(|_| format!("invalid experiment index in save target: {}", save))?;
            Ok((PathBuf::from(path), Some(index)))
        }
        None => Ok((PathBuf::from(save), None)),
    }
}

// An opened (and possibly freshly created) output container plus the resolved
// experiment index. Tracks whether this invocation created the file so it can
// be removed again if the work afterwards fails.
pub struct OutputTarget {
    pub container: MsiContainer,
    pub experiment_index: usize,
    created_file: bool,
}

impl OutputTarget {
    /// Resolves a save target, creating file and experiment on demand.
    pub fn resolve(save: &str) -> Result<OutputTarget, Box<dyn std::error::Error>> {
        let (path, entry) = parse_save_target(save)?;

        if path.exists() && !path.is_file() {
            return Err(format!("save target is not a file: {}", path.display()).into());
        }

        if !path.exists() {
            // a fresh file can only start at entry_0
            if let Some(index) = entry {
                if index != 0 {
                    return Err(format!("cannot create experiment {} in a new container {}", index, path.display()).into());
                }
            }
            let container = MsiContainer::create(&path)?;
            container.create_experiment()?;
            return Ok(OutputTarget { container, experiment_index: 0, created_file: true });
        }

        let container = MsiContainer::open(&path)?;
        let experiment_index = match entry {
            Some(index) => {
                if index >= container.experiment_count()? {
                    return Err(format!("experiment {} not found in {}", index, path.display()).into());
                }
                index
            }
            None => {
                if container.experiment_count()? == 0 {
                    container.create_experiment()?
                } else {
                    0
                }
            }
        };
        Ok(OutputTarget { container, experiment_index, created_file: false })
    }

    // Deletes the container file again if this invocation created it, so a
    // failed run leaves no garbage file behind.
    fn discard(self) {
        if !self.created_file {
            if self.container.path.exists() {
                info!("output target not removed because it was not created by this run");
            }
            return;
        }
        let path = self.container.path.clone();
        drop(self.container);
        match fs::remove_file(&path) {
            Ok(_) => info!("removed output target created by this run: {}", path.display()),
            Err(_) => error!("clean-up of output failed, file may be left on system: {}", path.display()),
        }
    }
}

// Runs work against a resolved output target, discarding a freshly created
// file if the work fails.
fn with_output_target<T>(
    save: &str,
    work: impl FnOnce(&MsiContainer, usize) -> Result<T, Box<dyn std::error::Error>>,
) -> Result<T, Box<dyn std::error::Error>> {
    let target = OutputTarget::resolve(save)?;
    match work(&target.container, target.experiment_index) {
        Ok(value) => Ok(value),
        Err(failure) => {
            target.discard();
            Err(failure)
        }
    }
}

fn convert_into(container: &MsiContainer, experiment_index: usize, input: &PathBuf, compression_level: i32) -> Result<usize, Box<dyn std::error::Error>> {
    let raw = ImgRawFile::open(input)?;
    let (rows, cols, channels) = raw.dims();
    info!("importing {} ({}x{} pixels, {} channels)", input.display(), rows, cols, channels);

    let cube = raw.read_cube()?;
    let experiment = container.experiment(experiment_index)?;
    let dataset = experiment.add_dataset(&cube, compression_level)?;
    info!("saved to: {}:/entry_{}/data_{}", container.path.display(), experiment_index, dataset);
    Ok(dataset)
}

/// Executes a parsed command line.
pub fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Convert { input, save, compression_level } => {
            with_output_target(&save, |container, experiment_index| {
                convert_into(container, experiment_index, &input, compression_level)
            })?;
        }

        Command::Findpeaks { save, dataset, identifier, smooth_sigma, min_snr, min_distance, max_peaks } => {
            let config = PeakPickingConfig { smooth_sigma, min_snr, min_distance, ..Default::default() };
            with_output_target(&save, |container, experiment_index| {
                let experiment = container.experiment(experiment_index)?;
                let analysis = FindPeaksGlobal::new(&identifier, dataset, config, max_peaks);
                run_and_store(&analysis, &experiment)
            })?;
        }

        Command::Nmf { save, source, identifier, rank, max_iter, tolerance, seed } => {
            let config = NmfConfig { rank, max_iter, tolerance, seed };
            with_output_target(&save, |container, experiment_index| {
                let experiment = container.experiment(experiment_index)?;
                let analysis = NmfAnalysis::new(&identifier, &source, config);
                run_and_store(&analysis, &experiment)
            })?;
        }

        Command::Kmeans { save, source, identifier, k, max_iter, tolerance, seed } => {
            let config = KmeansConfig { k, max_iter, tolerance, seed };
            with_output_target(&save, |container, experiment_index| {
                let experiment = container.experiment(experiment_index)?;
                let analysis = KmeansAnalysis::new(&identifier, &source, config);
                run_and_store(&analysis, &experiment)
            })?;
        }

        Command::Pipeline { input, save, compression_level, smooth_sigma, min_snr, max_peaks, rank, k, seed } => {
            with_output_target(&save, |container, experiment_index| {
                let dataset = convert_into(container, experiment_index, &input, compression_level)?;
                let experiment = container.experiment(experiment_index)?;

                let peak_config = PeakPickingConfig { smooth_sigma, min_snr, ..Default::default() };
                let findpeaks = FindPeaksGlobal::new("findpeaks_0", dataset, peak_config, max_peaks);
                run_and_store(&findpeaks, &experiment)?;

                let nmf = NmfAnalysis::new("nmf_0", "findpeaks_0", NmfConfig { rank, seed, ..Default::default() });
                run_and_store(&nmf, &experiment)?;

                let kmeans = KmeansAnalysis::new("kmeans_0", "findpeaks_0", KmeansConfig { k, seed, ..Default::default() });
                run_and_store(&kmeans, &experiment)?;
                Ok(())
            })?;
        }

        Command::Simulate { output, rows, cols, channels, peaks, noise, seed } => {
            let config = SyntheticConfig {
                rows,
                cols,
                num_channels: channels,
                num_peaks: peaks,
                noise_level: noise,
                seed,
                ..Default::default()
            };
            let cube = generate_cube(&config)?;
            write_img_triple(&output, &cube)?;
            info!("wrote synthetic raw triple to {}.{{hdr,t2m,img}}", output.with_extension("").display());
        }

        Command::Info { container, json } => {
            let container = MsiContainer::open_read_only(&container)?;
            let meta = container.global_meta()?;

            if json {
                let mut entries = Vec::new();
                for experiment_meta in container.experiments()? {
                    let experiment = container.experiment(experiment_meta.id as usize)?;
                    entries.push(serde_json::json!({
                        "experiment": experiment_meta,
                        "datasets": experiment.datasets()?,
                        "analyses": experiment.analyses()?,
                    }));
                }
                let listing = serde_json::json!({ "global": meta, "experiments": entries });
                println!("{}", serde_json::to_string_pretty(&listing)?);
                return Ok(());
            }

            println!("{} (format {} v{}, created {})", container.path.display(), meta.format_name, meta.format_version, meta.created);
            for experiment_meta in container.experiments()? {
                println!("entry_{}", experiment_meta.id);
                let experiment = container.experiment(experiment_meta.id as usize)?;
                for dataset in experiment.datasets()? {
                    println!(
                        "  data_{}: {}x{} pixels, {} channels, zstd level {}",
                        dataset.id, dataset.rows, dataset.cols, dataset.num_channels, dataset.compression_level
                    );
                }
                for analysis in experiment.analyses()? {
                    println!(
                        "  analysis_{}: {} ({}), created {}",
                        analysis.id, analysis.identifier, analysis.analysis_type, analysis.created
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_save_target() {
        let (path, entry) = parse_save_target("brain.msi").unwrap();
        assert_eq!(path, PathBuf::from("brain.msi"));
        assert_eq!(entry, None);

        let (path, entry) = parse_save_target("out/brain.msi:/entry_3").unwrap();
        assert_eq!(path, PathBuf::from("out/brain.msi"));
        assert_eq!(entry, Some(3));

        assert!(parse_save_target("").is_err());
        assert!(parse_save_target(":/entry_0").is_err());
        assert!(parse_save_target("brain.msi:/entry_x").is_err());
    }
}
