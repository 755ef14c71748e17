use tempfile::tempdir;

use msicore::sim::synthetic::{generate_cube, SyntheticConfig};
use rustmsi::data::container::MsiContainer;
use rustmsi::data::dataset::MsiData;

fn synthetic() -> msicore::data::cube::MsiCube {
    let config = SyntheticConfig {
        rows: 6,
        cols: 5,
        num_channels: 128,
        num_peaks: 3,
        noise_level: 0.5,
        seed: 11,
        ..Default::default()
    };
    generate_cube(&config).unwrap()
}

#[test]
fn test_dataset_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.msi");
    let cube = synthetic();

    {
        let container = MsiContainer::create(&path).unwrap();
        container.create_experiment().unwrap();
        let experiment = container.experiment(0).unwrap();
        experiment.add_dataset(&cube, 3).unwrap();
    }

    let container = MsiContainer::open_read_only(&path).unwrap();
    assert_eq!(container.experiment_count().unwrap(), 1);
    let experiment = container.experiment(0).unwrap();
    assert_eq!(experiment.dataset_count().unwrap(), 1);

    let dataset = experiment.dataset(0).unwrap();
    assert_eq!(dataset.dims(), (6, 5, 128));
    assert_eq!(dataset.mz_axis(), cube.mz.as_slice());

    // one decoded pixel matches the source cube
    let spectrum = dataset.spectrum(2, 3).unwrap();
    assert_eq!(spectrum.intensity.as_slice(), cube.pixel_slice(2, 3).unwrap());
    assert!(dataset.spectrum(6, 0).is_err());

    // and so does the full cube
    let restored = dataset.cube().unwrap();
    assert_eq!(restored.intensity, cube.intensity);
}

#[test]
fn test_multiple_experiments_are_isolated() {
    let dir = tempdir().unwrap();
    let container = MsiContainer::create(dir.path().join("multi.msi")).unwrap();
    container.create_experiment().unwrap();
    container.create_experiment().unwrap();

    let cube = synthetic();
    let first = container.experiment(0).unwrap();
    first.add_dataset(&cube, 3).unwrap();

    let second = container.experiment(1).unwrap();
    assert_eq!(second.dataset_count().unwrap(), 0);
    assert!(second.dataset(0).is_err());

    // dataset indices restart per experiment
    assert_eq!(second.add_dataset(&cube, 3).unwrap(), 0);
}
