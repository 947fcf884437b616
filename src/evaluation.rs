/// Counts of (correct, predicted) label pairs collected during one evaluation cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: usize,
    counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Creates an empty matrix over `labels` labels.
    pub fn new(labels: usize) -> Self {
        Self {
            labels,
            counts: vec![0; labels * labels],
        }
    }

    /// Records one position. Pairs outside the label range are ignored.
    pub fn record(&mut self, correct: u32, predicted: u32) {
        let (c, p) = (correct as usize, predicted as usize);
        if c < self.labels && p < self.labels {
            self.counts[c * self.labels + p] += 1;
        }
    }

    /// Returns the number of times `correct` was predicted as `predicted`.
    pub fn count(&self, correct: u32, predicted: u32) -> u32 {
        let (c, p) = (correct as usize, predicted as usize);
        if c < self.labels && p < self.labels {
            self.counts[c * self.labels + p]
        } else {
            0
        }
    }

    /// Returns the number of recorded positions.
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Fraction of positions predicted correctly, or `None` before any record.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let hits: u32 = (0..self.labels)
            .map(|k| self.counts[k * self.labels + k])
            .sum();
        Some(f64::from(hits) / f64::from(total))
    }

    /// Fraction of positions predicted as `label` that are correct.
    pub fn precision(&self, label: u32) -> Option<f64> {
        let k = label as usize;
        if k >= self.labels {
            return None;
        }
        let predicted: u32 = (0..self.labels)
            .map(|c| self.counts[c * self.labels + k])
            .sum();
        (predicted != 0).then(|| f64::from(self.counts[k * self.labels + k]) / f64::from(predicted))
    }

    /// Fraction of positions labeled `label` that are predicted as such.
    pub fn recall(&self, label: u32) -> Option<f64> {
        let k = label as usize;
        if k >= self.labels {
            return None;
        }
        let row = &self.counts[k * self.labels..(k + 1) * self.labels];
        let correct: u32 = row.iter().sum();
        (correct != 0).then(|| f64::from(row[k]) / f64::from(correct))
    }
}

/// Estimates the size in bytes of a compressed weight vector.
///
/// Implemented by external succinct encoders.
pub trait SizeEstimator {
    /// Returns the estimated size of `weights` in bytes.
    fn estimate(&self, weights: &[f32]) -> usize;
}

impl<F> SizeEstimator for F
where
    F: Fn(&[f32]) -> usize,
{
    fn estimate(&self, weights: &[f32]) -> usize {
        self(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let mut m = ConfusionMatrix::new(3);
        assert_eq!(None, m.accuracy());
        for (c, p) in [(0, 0), (0, 1), (1, 1), (2, 1), (2, 2), (5, 0)] {
            m.record(c, p);
        }
        assert_eq!(5, m.total());
        assert_eq!(1, m.count(0, 1));
        assert_eq!(0, m.count(5, 0));
        assert_eq!(Some(3.0 / 5.0), m.accuracy());
        assert_eq!(Some(1.0 / 3.0), m.precision(1));
        assert_eq!(Some(0.5), m.recall(0));
        assert_eq!(Some(1.0), m.recall(1));
        assert_eq!(None, m.precision(4));
    }

    #[test]
    fn test_no_predictions_for_label() {
        let mut m = ConfusionMatrix::new(2);
        m.record(1, 0);
        assert_eq!(None, m.precision(1));
        assert_eq!(Some(0.0), m.recall(1));
        assert_eq!(None, m.recall(0));
    }

    #[test]
    fn test_closure_estimator() {
        let nonzero = |w: &[f32]| w.iter().filter(|&&x| x != 0.0).count() * 8;
        assert_eq!(16, nonzero.estimate(&[0.0, 1.0, -2.0, 0.0]));
    }
}
