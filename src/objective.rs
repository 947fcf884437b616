use argmin::core::{CostFunction, Gradient};
use argmin_math::{ArgminL2Norm, ArgminSub};

use crate::arena::{Scratch, WORD};
use crate::errors::{HashCrfError, Result};
use crate::forward_backward::{self, ChainShape, WeightLayout, Workspace};
use crate::hashing;
use crate::vector::Entry;

/// Loss of one training instance as a function of the full weight vector.
///
/// Obtained from [`Session::objective`](crate::Session::objective). The
/// instance is copied out of the arena, so the objective stays valid while
/// the session keeps training.
#[derive(Clone, Debug)]
pub struct InstanceObjective {
    layout: WeightLayout,
    labels: usize,
    nz: Vec<u32>,
    keys: Vec<u32>,
    values: Vec<f32>,
    path: Vec<u32>,
}

impl InstanceObjective {
    pub(crate) fn new(
        layout: WeightLayout,
        labels: usize,
        nz: Vec<u32>,
        keys: Vec<u32>,
        values: Vec<f32>,
        path: Vec<u32>,
    ) -> Self {
        Self {
            layout,
            labels,
            nz,
            keys,
            values,
            path,
        }
    }

    /// Returns the size of the weight vector the objective expects.
    pub const fn dimension(&self) -> usize {
        self.layout.len()
    }

    fn shape(&self) -> ChainShape {
        ChainShape {
            len: self.nz.len(),
            labels: self.labels,
        }
    }

    fn scratch_words(&self) -> usize {
        let shape = self.shape();
        let total_nz = self.keys.len();
        let entry_words = core::mem::size_of::<Entry>() / WORD;
        shape.len
            + 1
            + 2 * total_nz * shape.labels
            + 3 * shape.states()
            + shape.cells()
            + entry_words * shape.gradient_len(total_nz)
    }

    fn hashed_indices(&self) -> Result<Vec<u32>> {
        let mut words = vec![0; self.scratch_words()];
        let mut scratch = Scratch::new(&mut words, "objective scratch");
        let hashed = hashing::hash_sequence(
            &self.nz,
            &self.values,
            &self.keys,
            self.labels,
            self.layout.state_dimension as u32,
            &mut scratch,
        )?;
        Ok(hashed.indices.to_vec())
    }

    /// Computes the loss and, if requested, the dense gradient.
    fn evaluate(&self, param: &[f32], gradient: Option<&mut [f32]>) -> Result<f32> {
        if param.len() != self.dimension() {
            return Err(HashCrfError::invalid_argument(
                "parameter has the wrong dimension",
            ));
        }
        let shape = self.shape();
        let mut words = vec![0; self.scratch_words()];
        let mut scratch = Scratch::new(&mut words, "objective scratch");
        let hashed = hashing::hash_sequence(
            &self.nz,
            &self.values,
            &self.keys,
            self.labels,
            self.layout.state_dimension as u32,
            &mut scratch,
        )?;
        let mut ws = Workspace::take(&mut scratch, shape)?;
        let z = forward_backward::forward_backward(shape, &self.layout, &hashed, param, &mut ws);
        let loss = forward_backward::suffer_loss(shape, ws.feature, &self.path, z);

        if let Some(out) = gradient {
            forward_backward::joint_scores(shape, ws.feature, ws.forward, ws.backward, z);
            let entries = scratch.take::<Entry>(shape.gradient_len(self.keys.len()))?;
            let len = forward_backward::gradient(
                shape,
                &self.layout,
                &hashed,
                ws.feature,
                &self.path,
                entries,
            );
            out.fill(0.0);
            for e in &entries[..len] {
                out[e.index as usize] += e.value;
            }
        }
        Ok(loss)
    }

    /// Returns the sorted coordinates the loss depends on.
    ///
    /// # Errors
    ///
    /// Never fails for an objective obtained from a session.
    pub fn active_coordinates(&self) -> Result<Vec<usize>> {
        let mut active: Vec<usize> = self
            .hashed_indices()?
            .into_iter()
            .map(|i| i as usize)
            .collect();
        for cur in 0..self.labels {
            active.push(self.layout.transition(None, cur));
            for prev in 0..self.labels {
                active.push(self.layout.transition(Some(prev), cur));
            }
        }
        active.push(self.layout.bias());
        active.sort_unstable();
        active.dedup();
        Ok(active)
    }

    /// Compares the analytic gradient with central differences of step `h`
    /// over the active coordinates. Returns the relative L2 error.
    ///
    /// # Errors
    ///
    /// `param` must have [`InstanceObjective::dimension`] elements.
    #[allow(clippy::ptr_arg)]
    pub fn check_gradient(&self, param: &Vec<f32>, h: f32) -> Result<f32, argmin::core::Error> {
        let full = self.gradient(param)?;
        let mut w = param.clone();
        let mut analytic = vec![];
        let mut numeric = vec![];
        for i in self.active_coordinates()? {
            let orig = w[i];
            w[i] = orig + h;
            let up = self.cost(&w)?;
            w[i] = orig - h;
            let down = self.cost(&w)?;
            w[i] = orig;
            analytic.push(full[i]);
            numeric.push((up - down) / (2.0 * h));
        }
        let error: f32 = analytic.sub(&numeric).l2_norm();
        let analytic_norm: f32 = analytic.l2_norm();
        let numeric_norm: f32 = numeric.l2_norm();
        let scale = analytic_norm.max(numeric_norm).max(f32::EPSILON);
        Ok(error / scale)
    }
}

impl CostFunction for InstanceObjective {
    type Param = Vec<f32>;
    type Output = f32;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.evaluate(param, None)?)
    }
}

impl Gradient for InstanceObjective {
    type Param = Vec<f32>;
    type Gradient = Vec<f32>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut out = vec![0.0; param.len()];
        self.evaluate(param, Some(out.as_mut_slice()))?;
        Ok(out)
    }
}
