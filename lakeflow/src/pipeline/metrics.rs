#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub row: i64,
    pub task_count: usize,
    pub duration_ms: u128,
    /// Error returned by the stage, including ones skipped by skip-on-fail.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn stage(&self, row: i64) -> Option<&StageMetrics> {
        self.stages.iter().find(|stage| stage.row == row)
    }

    pub fn failed_stages(&self) -> usize {
        self.stages.iter().filter(|s| s.error.is_some()).count()
    }
}
