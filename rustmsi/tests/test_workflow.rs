use tempfile::tempdir;

use msicore::algorithm::peaks::Peak1D;
use msicore::sim::synthetic::{generate_cube, SyntheticConfig};
use rustmsi::data::analysis::DependencyKind;
use rustmsi::data::container::MsiContainer;
use rustmsi::data::raw::write_img_triple;
use rustmsi::workflow::driver::{run, Cli, Command};

// A small but structured dataset: clearly separated peaks, mild noise.
fn write_raw_triple(stem: &std::path::Path) {
    let config = SyntheticConfig {
        rows: 8,
        cols: 8,
        num_channels: 256,
        num_peaks: 6,
        noise_level: 0.2,
        seed: 17,
        ..Default::default()
    };
    let cube = generate_cube(&config).unwrap();
    write_img_triple(stem, &cube).unwrap();
}

fn pipeline_cli(stem: &std::path::Path, save: String) -> Cli {
    Cli {
        log_level: "info".to_string(),
        command: Command::Pipeline {
            input: stem.to_path_buf(),
            save,
            compression_level: 3,
            smooth_sigma: 2.0,
            min_snr: 3.0,
            max_peaks: Some(16),
            rank: 3,
            k: 3,
            seed: 42,
        },
    }
}

#[test]
fn test_pipeline_end_to_end() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("sample");
    write_raw_triple(&stem);

    let save_path = dir.path().join("sample.msi");
    let cli = pipeline_cli(&stem, save_path.to_str().unwrap().to_string());
    run(cli).unwrap();

    let container = MsiContainer::open_read_only(&save_path).unwrap();
    let experiment = container.experiment(0).unwrap();
    assert_eq!(experiment.dataset_count().unwrap(), 1);
    assert_eq!(
        experiment.analysis_identifiers().unwrap(),
        vec!["findpeaks_0", "nmf_0", "kmeans_0"]
    );

    // peak finding found something and its outputs are consistent
    let findpeaks = experiment.analysis_by_identifier("findpeaks_0").unwrap();
    let peak_mz = findpeaks.output("peak_mz").unwrap();
    let peak_cube = findpeaks.output("peak_cube").unwrap();
    let num_peaks = peak_mz.shape[0];
    assert!(num_peaks > 0, "no peaks found on the synthetic dataset");
    assert_eq!(peak_cube.shape, vec![8, 8, num_peaks]);

    // the structured peak list agrees with the numeric outputs
    let blob = findpeaks.blob("peak_list").unwrap();
    let (peaks, _): (Vec<Peak1D>, usize) =
        bincode::decode_from_slice(&blob, bincode::config::standard()).unwrap();
    assert_eq!(peaks.len(), num_peaks);
    for (peak, mz) in peaks.iter().zip(peak_mz.data.iter()) {
        assert!((peak.mz - mz).abs() < 1e-12);
    }

    // NMF factors have the requested rank and are non-negative
    let nmf = experiment.analysis_by_identifier("nmf_0").unwrap();
    let wmatrix = nmf.output("wmatrix").unwrap();
    let hmatrix = nmf.output("hmatrix").unwrap();
    assert_eq!(wmatrix.shape, vec![8, 8, 3]);
    assert_eq!(hmatrix.shape, vec![3, num_peaks]);
    assert!(wmatrix.data.iter().all(|&value| value >= 0.0));
    assert!(hmatrix.data.iter().all(|&value| value >= 0.0));

    // the cluster image covers every pixel with labels in 0..k
    let kmeans = experiment.analysis_by_identifier("kmeans_0").unwrap();
    let cluster_image = kmeans.output("cluster_image").unwrap();
    assert_eq!(cluster_image.shape, vec![8, 8]);
    assert!(cluster_image.data.iter().all(|&label| label >= 0.0 && label < 3.0));

    // dependency links: findpeaks on the dataset, the others on findpeaks
    let dependency = &findpeaks.dependencies().unwrap()[0];
    assert_eq!(dependency.kind, DependencyKind::Dataset);
    assert_eq!(dependency.target, 0);

    for identifier in ["nmf_0", "kmeans_0"] {
        let analysis = experiment.analysis_by_identifier(identifier).unwrap();
        let dependency = &analysis.dependencies().unwrap()[0];
        assert_eq!(dependency.kind, DependencyKind::Analysis);
        assert_eq!(dependency.target, findpeaks.index());
    }

    // run info captured the execution timing
    let run_info = findpeaks.run_info().unwrap();
    assert!(run_info.iter().any(|(key, _)| key == "execution_time"));
    assert!(run_info.iter().any(|(key, _)| key == "start_time"));
}

#[test]
fn test_failed_run_removes_created_container() {
    let dir = tempdir().unwrap();
    let save_path = dir.path().join("fresh.msi");

    // peak finding against a container this run creates, with no dataset in
    // it, fails and must clean the new file up again
    let cli = Cli {
        log_level: "info".to_string(),
        command: Command::Findpeaks {
            save: save_path.to_str().unwrap().to_string(),
            dataset: 0,
            identifier: "findpeaks_0".to_string(),
            smooth_sigma: 2.0,
            min_snr: 3.0,
            min_distance: 3,
            max_peaks: None,
        },
    };

    assert!(run(cli).is_err());
    assert!(!save_path.exists(), "failed run left the created container behind");
}

#[test]
fn test_failed_run_keeps_existing_container() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("sample");
    write_raw_triple(&stem);

    let save_path = dir.path().join("existing.msi");
    run(pipeline_cli(&stem, save_path.to_str().unwrap().to_string())).unwrap();

    // a second findpeaks run with a colliding identifier fails, but the
    // pre-existing container must survive
    let cli = Cli {
        log_level: "info".to_string(),
        command: Command::Findpeaks {
            save: save_path.to_str().unwrap().to_string(),
            dataset: 0,
            identifier: "findpeaks_0".to_string(),
            smooth_sigma: 2.0,
            min_snr: 3.0,
            min_distance: 3,
            max_peaks: None,
        },
    };

    assert!(run(cli).is_err());
    assert!(save_path.exists());

    let container = MsiContainer::open_read_only(&save_path).unwrap();
    let experiment = container.experiment(0).unwrap();
    assert_eq!(experiment.analysis_count().unwrap(), 3);
}
