use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::errors::{HashCrfError, Result};
use crate::session::Session;
use crate::store::InstanceKind;

/// Summary of one training epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochReport {
    /// 0-based epoch number.
    pub epoch: u32,
    /// Mean training loss of the epoch.
    pub train_loss: f64,
    /// Mean loss over the supervised dev instances.
    pub dev_loss: f64,
    /// Accuracy over the supervised dev positions, if any.
    pub accuracy: Option<f64>,
}

/// Multi-epoch driver of a [`Session`].
///
/// Every epoch visits all training instances once in a shuffled order and
/// then evaluates all dev instances.
pub struct Trainer {
    max_epochs: u32,
    seed: u64,
}

impl Trainer {
    /// Creates a new trainer
    pub fn new() -> Self {
        Self {
            max_epochs: 10,
            seed: 0,
        }
    }

    /// Sets the number of epochs
    ///
    /// # Errors
    ///
    /// `max_epochs` must not be 0.
    pub fn max_epochs(mut self, max_epochs: u32) -> Result<Self> {
        if max_epochs == 0 {
            return Err(HashCrfError::invalid_argument("max_epochs must not be 0"));
        }
        self.max_epochs = max_epochs;
        Ok(self)
    }

    /// Sets the seed of the shuffling order
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Trains the session and returns one report per epoch.
    ///
    /// # Errors
    ///
    /// The session must hold at least one training instance. Errors of
    /// [`Session::train_online`] and [`Session::predict_dev`] are propagated.
    pub fn train(&self, session: &mut Session) -> Result<Vec<EpochReport>> {
        let mut ids: Vec<usize> = (0..session.num_instances(InstanceKind::Train)).collect();
        if ids.is_empty() {
            return Err(HashCrfError::invalid_argument("no training instances"));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut reports = Vec::with_capacity(self.max_epochs as usize);
        for epoch in 0..self.max_epochs {
            ids.shuffle(&mut rng);
            let mut total = 0.0;
            for &id in &ids {
                total += f64::from(session.train_online(id)?);
            }
            let train_loss = total / ids.len() as f64;

            session.test_dev_start(session.num_instances(InstanceKind::Dev));
            while session.predict_dev()? {}
            let report = EpochReport {
                epoch,
                train_loss,
                dev_loss: session.dev_averaged_loss(),
                accuracy: session.confusion().accuracy(),
            };
            tracing::info!(
                epoch,
                train_loss,
                dev_loss = report.dev_loss,
                accuracy = report.accuracy,
                "epoch finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}
