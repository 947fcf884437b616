//! Training and evaluation session over one arena.

use crate::arena::{Arena, Layout, RegionId, Scratch, WORD};
use crate::errors::{HashCrfError, Result};
use crate::evaluation::{ConfusionMatrix, SizeEstimator};
use crate::forward_backward::{self, ChainShape, WeightLayout, Workspace};
use crate::hashing;
use crate::optimizers::adagrad::{self, LazyAdaGrad};
use crate::optimizers::HyperParams;
use crate::store::{
    InstanceHeader, InstanceKind, InstanceRef, InstanceStore, Item, RegionUsage, HEADER_WORDS,
};
use crate::vector::{self, Entry, SparseBuilder};
use crate::viterbi;

#[cfg(feature = "train")]
use crate::objective::InstanceObjective;

/// Smallest accepted heap size in bytes.
pub const MIN_HEAP_SIZE: usize = 1 << 24;

/// Exclusive upper bound of the label-table capacity.
pub const MAX_NUMBER_OF_STATES: usize = 64;

const BUILDER_WORDS: usize = 1 << 16;
const BUILDER_BUCKETS: usize = 1 << 12;
const TRAIN_HEADER_SLOTS: usize = 1 << 14;
const DEV_HEADER_SLOTS: usize = 1 << 12;
const NZ_CAPACITY: usize = 1 << 18;
const KEY_CAPACITY: usize = 1 << 20;
const PATH_CAPACITY: usize = 1 << 18;
const PREDICTION_CAPACITY: usize = 1 << 12;
const WORK_WORDS: usize = 1 << 20;

fn partition(weights: usize) -> Layout {
    Layout::new(|id| match id {
        RegionId::Scratch => BUILDER_WORDS,
        RegionId::TrainHeaders => TRAIN_HEADER_SLOTS * HEADER_WORDS,
        RegionId::DevHeaders => DEV_HEADER_SLOTS * HEADER_WORDS,
        RegionId::Nz => NZ_CAPACITY,
        RegionId::Keys | RegionId::Values => KEY_CAPACITY,
        RegionId::Paths => PATH_CAPACITY,
        RegionId::Foi | RegionId::Soi | RegionId::Weights => weights,
        RegionId::Loss | RegionId::PredictionScore => 1,
        RegionId::Prediction => PREDICTION_CAPACITY,
        RegionId::Work => WORK_WORDS,
    })
}

/// Builder of a [`Session`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    heap_size: usize,
    number_of_states: usize,
    dimension_bits: u32,
    quantize_after: u32,
    hyper_params: HyperParams,
}

impl SessionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            heap_size: MIN_HEAP_SIZE,
            number_of_states: 16,
            dimension_bits: 16,
            quantize_after: 1 << 20,
            hyper_params: HyperParams::default(),
        }
    }

    /// Sets the arena size in bytes.
    ///
    /// # Errors
    ///
    /// `heap_size` must be a multiple of 4 and at least [`MIN_HEAP_SIZE`].
    pub fn heap_size(mut self, heap_size: usize) -> Result<Self> {
        if heap_size < MIN_HEAP_SIZE {
            return Err(HashCrfError::invalid_argument(
                "heap_size must be at least 2^24 bytes",
            ));
        }
        if heap_size % WORD != 0 {
            return Err(HashCrfError::invalid_argument(
                "heap_size must be a multiple of 4",
            ));
        }
        self.heap_size = heap_size;
        Ok(self)
    }

    /// Sets the capacity of the label table.
    ///
    /// # Errors
    ///
    /// `number_of_states` must be less than [`MAX_NUMBER_OF_STATES`].
    pub fn number_of_states(mut self, number_of_states: usize) -> Result<Self> {
        if number_of_states >= MAX_NUMBER_OF_STATES {
            return Err(HashCrfError::invalid_argument(
                "number_of_states must be less than 64",
            ));
        }
        self.number_of_states = number_of_states;
        Ok(self)
    }

    /// Sets the hashed state dimension to `2^bits`.
    ///
    /// # Errors
    ///
    /// `bits` must be in `[4, 30]`.
    pub fn dimension_bits(mut self, bits: u32) -> Result<Self> {
        if !(4..=30).contains(&bits) {
            return Err(HashCrfError::invalid_argument(
                "dimension_bits must be between 4 and 30",
            ));
        }
        self.dimension_bits = bits;
        Ok(self)
    }

    /// Sets the round after which evaluation rounds weights to multiples of 2^-10.
    pub const fn quantize_after(mut self, round: u32) -> Self {
        self.quantize_after = round;
        self
    }

    /// Sets the initial hyperparameters.
    pub const fn hyper_params(mut self, hyper_params: HyperParams) -> Self {
        self.hyper_params = hyper_params;
        self
    }

    /// Allocates the arena and creates the session.
    ///
    /// # Errors
    ///
    /// The stores and vectors must fit in the heap.
    pub fn build(self) -> Result<Session> {
        let layout = WeightLayout {
            state_dimension: 1 << self.dimension_bits,
            number_of_states: self.number_of_states,
        };
        let partition = partition(layout.len());
        let mut arena = Arena::new(self.heap_size, partition.clone())?;
        let regions = arena.regions();
        adagrad::reset(regions.foi, regions.soi, regions.weights);
        tracing::info!(
            heap_size = self.heap_size,
            used_bytes = partition.total_words() * WORD,
            dimension = layout.len(),
            number_of_states = self.number_of_states,
            "session created"
        );
        Ok(Session {
            arena,
            store: InstanceStore::new(partition, self.number_of_states),
            layout,
            hyper_params: self.hyper_params,
            quantize_after: self.quantize_after,
            round: 0,
            cumulative_loss: 0.0,
            dev_loss: 0.0,
            dev_scored: 0,
            dev_cursor: 0,
            dev_limit: 0,
            prediction_len: 0,
            confusion: ConfusionMatrix::default(),
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Readback of one stored instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InspectedInstance {
    /// Decoded header.
    pub header: InstanceHeader,
    /// Nonzero count of each position.
    pub nz: Vec<u32>,
    /// Hashed keys.
    pub keys: Vec<u32>,
    /// Values.
    pub values: Vec<f32>,
    /// Labels of the supervisory path.
    pub labels: Option<Vec<String>>,
}

/// Online CRF trainer and evaluator owning one arena.
///
/// A session alternates between training rounds ([`Session::train_online`])
/// and evaluation cycles ([`Session::test_dev_start`] followed by
/// [`Session::predict_dev`] until it returns `false`).
pub struct Session {
    arena: Arena,
    store: InstanceStore,
    layout: WeightLayout,

    /// Optimizer hyperparameters, read at every round.
    pub hyper_params: HyperParams,

    quantize_after: u32,
    round: u32,
    cumulative_loss: f64,
    dev_loss: f64,
    dev_scored: usize,
    dev_cursor: usize,
    dev_limit: usize,
    prediction_len: usize,
    confusion: ConfusionMatrix,
}

impl Session {
    /// Creates a session with default settings and the given heap size.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::heap_size`] and [`SessionConfig::build`].
    pub fn new(heap_size: usize) -> Result<Self> {
        SessionConfig::new().heap_size(heap_size)?.build()
    }

    /// Validates and stores an instance. Returns its id within `kind`.
    ///
    /// Training instances extend the label table with unseen labels. Nothing
    /// is written unless the whole instance is accepted.
    ///
    /// # Errors
    ///
    /// - [`HashCrfError::InvalidInstance`]: empty sequence, mismatched keys and
    ///   values, partially labeled sequence, or unlabeled training sequence.
    /// - [`HashCrfError::UnknownLabel`]: an unseen label in a dev instance.
    /// - [`HashCrfError::StoreExhausted`]: a store or the label table is full.
    pub fn append_instance(&mut self, items: &[Item], kind: InstanceKind) -> Result<usize> {
        let mut regions = self.arena.regions();
        self.store.append_instance(&mut regions, items, kind)
    }

    /// Runs one training round on a training instance and returns its loss.
    ///
    /// The weights touched by the instance are materialized first, then the
    /// loss and gradient are computed and the gradient is accumulated.
    ///
    /// # Errors
    ///
    /// - [`HashCrfError::InvalidArgument`]: `id` is out of range.
    /// - [`HashCrfError::NumericalDivergence`]: the loss is NaN. Nothing is accumulated.
    /// - [`HashCrfError::StoreExhausted`]: the instance does not fit in the
    ///   algorithm scratch.
    pub fn train_online(&mut self, id: usize) -> Result<f32> {
        let regions = self.arena.regions();
        let span = self
            .store
            .locate(regions.train_headers, InstanceKind::Train, id)?;
        let inst = span.view(regions.nz, regions.keys, regions.values, regions.paths);
        let path = inst.path.ok_or(HashCrfError::CorruptHeader)?;
        let shape = ChainShape {
            len: inst.len(),
            labels: self.store.labels().len(),
        };
        let mut scratch = Scratch::new(&mut *regions.work, RegionId::Work.name());
        let hashed = hashing::hash_sequence(
            inst.nz,
            inst.values,
            inst.keys,
            shape.labels,
            self.layout.state_dimension as u32,
            &mut scratch,
        )?;

        let mut optimizer = LazyAdaGrad {
            foi: &mut *regions.foi,
            soi: &mut *regions.soi,
            weights: &mut *regions.weights,
            params: self.hyper_params,
            round: self.round,
            quantize: false,
        };
        // deduplicated per builder-sized chunk
        let mut touched = SparseBuilder::new(&mut *regions.scratch, BUILDER_BUCKETS)?;
        let mut features = 0;
        for &i in hashed.indices {
            if touched.is_full() {
                optimizer.update_list(touched.keys());
                features += touched.len();
                touched.clear();
            }
            touched.add(i, 0.0)?;
        }
        optimizer.update_list(touched.keys());
        features += touched.len();
        for cur in 0..shape.labels {
            optimizer.update(self.layout.transition(None, cur));
            for prev in 0..shape.labels {
                optimizer.update(self.layout.transition(Some(prev), cur));
            }
        }
        optimizer.update(self.layout.bias());

        let mut ws = Workspace::take(&mut scratch, shape)?;
        let z = forward_backward::forward_backward(
            shape,
            &self.layout,
            &hashed,
            optimizer.weights,
            &mut ws,
        );
        let loss = forward_backward::suffer_loss(shape, ws.feature, path, z);
        if loss.is_nan() {
            tracing::warn!(round = self.round, id, "loss is NaN");
            return Err(HashCrfError::numerical_divergence(self.round));
        }

        forward_backward::joint_scores(shape, ws.feature, ws.forward, ws.backward, z);
        let entries = scratch.take::<Entry>(shape.gradient_len(inst.keys.len()))?;
        let len = forward_backward::gradient(shape, &self.layout, &hashed, ws.feature, path, entries);
        optimizer.accumulate(vector::merge_duplicates(&mut entries[..len]));

        regions.loss[0] = loss;
        self.round += 1;
        self.cumulative_loss += f64::from(loss);
        tracing::debug!(round = self.round, id, features, loss, "trained");
        Ok(loss)
    }

    /// Starts an evaluation cycle over the first `size` dev instances.
    ///
    /// Resets the evaluation counters and the confusion matrix and
    /// materializes the whole weight vector, rounded once the training round
    /// passes the quantization threshold.
    pub fn test_dev_start(&mut self, size: usize) {
        self.dev_limit = size.min(self.store.len(InstanceKind::Dev));
        self.dev_cursor = 0;
        self.dev_loss = 0.0;
        self.dev_scored = 0;
        self.confusion = ConfusionMatrix::new(self.store.labels().len());

        let quantize = self.round > self.quantize_after;
        let regions = self.arena.regions();
        let mut optimizer = LazyAdaGrad {
            foi: regions.foi,
            soi: regions.soi,
            weights: regions.weights,
            params: self.hyper_params,
            round: self.round,
            quantize,
        };
        optimizer.update_range(0..self.layout.len());
        tracing::info!(
            instances = self.dev_limit,
            round = self.round,
            quantize,
            "evaluation started"
        );
    }

    /// Decodes the next dev instance of the current evaluation cycle.
    ///
    /// Returns `false` once the cycle is exhausted. Supervised instances add
    /// their loss to the evaluation loss and their positions to the confusion
    /// matrix. The cycle only moves past an instance that was decoded, so a
    /// failing instance fails again on the next call.
    ///
    /// # Errors
    ///
    /// - [`HashCrfError::InvalidArgument`]: no label is known yet.
    /// - [`HashCrfError::StoreExhausted`]: the instance is longer than the
    ///   prediction buffer or does not fit in the algorithm scratch.
    pub fn predict_dev(&mut self) -> Result<bool> {
        if self.dev_cursor >= self.dev_limit {
            return Ok(false);
        }
        let id = self.dev_cursor;
        let regions = self.arena.regions();
        let span = self
            .store
            .locate(regions.dev_headers, InstanceKind::Dev, id)?;
        let inst = span.view(regions.nz, regions.keys, regions.values, regions.paths);
        let shape = ChainShape {
            len: inst.len(),
            labels: self.store.labels().len(),
        };
        if shape.labels == 0 {
            return Err(HashCrfError::invalid_argument("label table is empty"));
        }
        if shape.len > regions.prediction.len() {
            tracing::warn!(id, len = shape.len, "instance exceeds the prediction buffer");
            return Err(HashCrfError::store_exhausted(RegionId::Prediction.name()));
        }
        let mut scratch = Scratch::new(regions.work, RegionId::Work.name());
        let hashed = hashing::hash_sequence(
            inst.nz,
            inst.values,
            inst.keys,
            shape.labels,
            self.layout.state_dimension as u32,
            &mut scratch,
        )?;
        let mut ws = Workspace::take(&mut scratch, shape)?;
        let best = scratch.take(shape.states())?;
        let back = scratch.take(shape.states())?;
        self.dev_cursor += 1;

        let z = forward_backward::forward_backward(
            shape,
            &self.layout,
            &hashed,
            regions.weights,
            &mut ws,
        );
        let prediction = &mut regions.prediction[..shape.len];
        let score = viterbi::viterbi(shape, ws.feature, best, back, prediction) - z;
        regions.prediction_score[0] = score;
        self.prediction_len = shape.len;

        if let Some(path) = inst.path {
            let loss = forward_backward::suffer_loss(shape, ws.feature, path, z);
            self.dev_loss += f64::from(loss);
            self.dev_scored += 1;
            for (&correct, &predicted) in path.iter().zip(prediction.iter()) {
                self.confusion.record(correct, predicted);
            }
        }
        if self.dev_cursor == self.dev_limit {
            tracing::info!(
                instances = self.dev_limit,
                loss = self.dev_averaged_loss(),
                accuracy = self.confusion.accuracy(),
                "evaluation finished"
            );
        }
        Ok(true)
    }

    fn instance(&self, kind: InstanceKind, id: usize) -> Result<(InstanceHeader, InstanceRef<'_>)> {
        let headers = self.arena.view(kind.header_region());
        let header = self.store.header(headers, kind, id)?;
        let span = self.store.locate(headers, kind, id)?;
        let inst = span.view(
            self.arena.view(RegionId::Nz),
            self.arena.view(RegionId::Keys),
            self.arena.view(RegionId::Values),
            self.arena.view(RegionId::Paths),
        );
        Ok((header, inst))
    }

    /// Reads a stored instance back.
    ///
    /// # Errors
    ///
    /// `id` must be in range.
    pub fn inspect_instance(&self, id: usize, kind: InstanceKind) -> Result<InspectedInstance> {
        let (header, inst) = self.instance(kind, id)?;
        let labels = inst.path.map(|path| {
            path.iter()
                .map(|&k| self.store.labels().name(k).unwrap_or_default().to_string())
                .collect()
        });
        Ok(InspectedInstance {
            header,
            nz: inst.nz.to_vec(),
            keys: inst.keys.to_vec(),
            values: inst.values.to_vec(),
            labels,
        })
    }

    /// Returns the loss of one training instance as an optimization problem
    /// over the full weight vector, for use with argmin.
    ///
    /// # Errors
    ///
    /// `id` must be in range.
    #[cfg(feature = "train")]
    #[cfg_attr(docsrs, doc(cfg(feature = "train")))]
    pub fn objective(&self, id: usize) -> Result<InstanceObjective> {
        let (_, inst) = self.instance(InstanceKind::Train, id)?;
        let path = inst.path.ok_or(HashCrfError::CorruptHeader)?;
        Ok(InstanceObjective::new(
            self.layout,
            self.store.labels().len(),
            inst.nz.to_vec(),
            inst.keys.to_vec(),
            inst.values.to_vec(),
            path.to_vec(),
        ))
    }

    /// Returns the number of completed training rounds.
    #[inline(always)]
    pub const fn round(&self) -> u32 {
        self.round
    }

    /// Returns the number of stored instances of the kind.
    pub fn num_instances(&self, kind: InstanceKind) -> usize {
        self.store.len(kind)
    }

    /// Returns the labels ordered by id.
    pub fn labels(&self) -> &[String] {
        self.store.labels().names()
    }

    /// Returns the id of a label.
    pub fn label_id(&self, label: &str) -> Option<u32> {
        self.store.labels().get(label)
    }

    /// Mean training loss over all rounds.
    pub fn averaged_loss(&self) -> f64 {
        if self.round == 0 {
            0.0
        } else {
            self.cumulative_loss / f64::from(self.round)
        }
    }

    /// Mean loss over the supervised instances of the current evaluation cycle.
    pub fn dev_averaged_loss(&self) -> f64 {
        if self.dev_scored == 0 {
            0.0
        } else {
            self.dev_loss / self.dev_scored as f64
        }
    }

    /// Returns the confusion matrix of the current evaluation cycle.
    pub const fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    /// Returns the loss of the latest training round.
    pub fn last_loss(&self) -> f32 {
        self.arena.view::<f32>(RegionId::Loss)[0]
    }

    /// Returns the latest decoded path and its log-probability.
    pub fn prediction(&self) -> (&[u32], f32) {
        let path = &self.arena.view::<u32>(RegionId::Prediction)[..self.prediction_len];
        (path, self.arena.view::<f32>(RegionId::PredictionScore)[0])
    }

    /// Counts the nonzero entries of the weight vector as last materialized.
    pub fn l0(&self) -> usize {
        self.arena
            .view::<f32>(RegionId::Weights)
            .iter()
            .filter(|&&w| w != 0.0)
            .count()
    }

    /// Computes every weight at the current round without touching the session.
    pub fn weights_snapshot(&self) -> Vec<f32> {
        let foi = self.arena.view::<f32>(RegionId::Foi);
        let soi = self.arena.view::<f32>(RegionId::Soi);
        foi.iter()
            .zip(soi)
            .map(|(&f, &s)| adagrad::materialize(&self.hyper_params, f, s, self.round))
            .collect()
    }

    /// Hands the weight vector as last materialized to an external estimator.
    pub fn estimate_compressed_size<E>(&self, estimator: &E) -> usize
    where
        E: SizeEstimator + ?Sized,
    {
        estimator.estimate(self.arena.view(RegionId::Weights))
    }

    /// Reports the capacity and usage of every sub-region.
    ///
    /// Growing stores come first; fixed regions are reported as fully used.
    pub fn meminfo(&self) -> Vec<RegionUsage> {
        let layout = self.arena.layout();
        let mut usage = self.store.usage();
        for id in [
            RegionId::Scratch,
            RegionId::Foi,
            RegionId::Soi,
            RegionId::Weights,
            RegionId::Loss,
            RegionId::Prediction,
            RegionId::PredictionScore,
            RegionId::Work,
        ] {
            let bytes = layout.region(id).len * WORD;
            usage.push(RegionUsage {
                name: id.name(),
                capacity_bytes: bytes,
                used_bytes: bytes,
            });
        }
        usage
    }

    /// Returns the arena size in bytes.
    pub fn heap_size(&self) -> usize {
        self.arena.heap_size()
    }
}
