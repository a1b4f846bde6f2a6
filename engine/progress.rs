use std::fmt;

/// Stages reported while computing a correlation matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CorrelationStage {
    /// Reading and centering every input row before the first block.
    InputCaching,
    /// Computing and writing blocks of output rows.
    BlockCompute,
}

impl CorrelationStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::InputCaching => "input row caching",
            Self::BlockCompute => "block correlation",
        }
    }
}

impl fmt::Display for CorrelationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for coarse progress. The engine only calls it at block boundaries, never
/// from inside the parallel phase. Counts are in output rows for `BlockCompute` and in
/// input rows for `InputCaching`.
pub trait CorrelationProgressObserver {
    fn on_stage_start(&mut self, stage: CorrelationStage, total_rows: usize) {
        let _ = (stage, total_rows);
    }
    fn on_stage_advance(&mut self, stage: CorrelationStage, processed_rows: usize) {
        let _ = (stage, processed_rows);
    }
    fn on_stage_finish(&mut self, stage: CorrelationStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopCorrelationProgress;

impl CorrelationProgressObserver for NoopCorrelationProgress {}
