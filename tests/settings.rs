use clipview::config::{Algorithm, ScaleKind, WaveScale, WindowKind};
use clipview::{SpectrogramSettings, ViewSettings};
use std::fs;

#[test]
fn settings_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("view.json");

    let mut settings = ViewSettings::default();
    settings.spectrogram = SpectrogramSettings {
        window_size: 4096,
        window: WindowKind::BlackmanHarris,
        zero_padding_factor: 2,
        algorithm: Algorithm::Reassignment,
        scale: ScaleKind::Mel,
        frequency_gain: 6.0,
        ..SpectrogramSettings::default()
    };
    settings.waveform.scale = WaveScale::Db;
    settings.save(&path).unwrap();

    assert!(!path.with_extension("json.tmp").exists());
    assert_eq!(ViewSettings::load_or_default(&path), settings);
}

#[test]
fn unreadable_files_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert_eq!(ViewSettings::load_or_default(&missing), ViewSettings::default());

    let corrupt = dir.path().join("corrupt.json");
    fs::write(&corrupt, "{ \"spectrogram\": [").unwrap();
    assert_eq!(ViewSettings::load_or_default(&corrupt), ViewSettings::default());
}

#[test]
fn saved_settings_are_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("view.json");
    let mut settings = ViewSettings::default();
    settings.spectrogram.window_size = 100_000;
    settings.waveform.zoom_min = 1.0;
    settings.waveform.zoom_max = -1.0;
    settings.save(&path).unwrap();

    let loaded = ViewSettings::load_or_default(&path);
    assert_eq!(loaded.spectrogram.window_size, 32_768);
    assert_eq!((loaded.waveform.zoom_min, loaded.waveform.zoom_max), (-1.0, 1.0));
}
