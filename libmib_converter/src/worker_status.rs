#[derive(Debug, Clone, Default, PartialEq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// Progress of one worker through its current acquisition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub progress: f32,
    pub acquisition: String,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, acquisition: &str, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            acquisition: acquisition.to_string(),
            worker_id,
            color,
        }
    }
}
