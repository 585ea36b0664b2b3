//! Small metric trackers used by the training loop.

/// Running average for scalar metrics within an epoch
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Current average (0.0 when empty)
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Accuracy tracker accumulating prediction/target pairs over batches
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of predictions against ground truth
    pub fn add_batch(&mut self, predictions: &[usize], targets: &[usize]) {
        for (pred, target) in predictions.iter().zip(targets.iter()) {
            self.total += 1;
            if pred == target {
                self.correct += 1;
            }
        }
    }

    /// Current accuracy (0.0 when empty)
    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }

    pub fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}
