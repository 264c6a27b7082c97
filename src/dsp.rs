pub mod scale;
pub mod spectrogram;
pub mod waveform;
pub mod window;

pub use scale::{NumberScale, ScaleKind};
pub use spectrogram::{Algorithm, AnalysisParams, AnalysisPlan, ColumnWorker};
pub use waveform::{WaveColumns, read_wave_display};
pub use window::WindowKind;
