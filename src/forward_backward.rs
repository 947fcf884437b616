//! Scores, forward-backward, loss and gradient of a linear-chain CRF in log domain.
//!
//! Tensors are flat row-major slices:
//!
//! - state scores and forward/backward scores: `[t][k]`, `len * labels`
//! - feature scores and joint scores: `[t][k][prev]`, `len * labels * (labels + 1)`,
//!   where `prev == labels` stands for the start of the chain. Only
//!   `prev == labels` is used at `t == 0` and only `prev < labels` afterwards;
//!   the other cells hold `-inf`.

use crate::arena::Scratch;
use crate::errors::Result;
use crate::hashing::HashedSequence;
use crate::math;
use crate::vector::Entry;

/// Partition of the weight vector.
///
/// `[0, state_dimension)` holds hashed state features shared across classes,
/// followed by `(number_of_states + 1) * number_of_states` transition weights
/// (row `number_of_states` is the transition from the start) and one bias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightLayout {
    /// Size of the hashed state-feature block (a power of two).
    pub state_dimension: usize,
    /// Capacity of the label table.
    pub number_of_states: usize,
}

impl WeightLayout {
    /// Index of the transition weight `prev -> cur`; `None` is the start.
    #[inline(always)]
    pub fn transition(&self, prev: Option<usize>, cur: usize) -> usize {
        self.state_dimension + prev.unwrap_or(self.number_of_states) * self.number_of_states + cur
    }

    /// Index of the bias.
    #[inline(always)]
    pub const fn bias(&self) -> usize {
        self.state_dimension + (self.number_of_states + 1) * self.number_of_states
    }

    /// Size of the weight vector.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.bias() + 1
    }
}

/// Dimensions of one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainShape {
    /// Chain length.
    pub len: usize,
    /// Number of labels taking part in inference.
    pub labels: usize,
}

impl ChainShape {
    /// Column standing for the start of the chain.
    #[inline(always)]
    pub const fn start(&self) -> usize {
        self.labels
    }

    /// Size of a `[t][k]` tensor.
    #[inline(always)]
    pub const fn states(&self) -> usize {
        self.len * self.labels
    }

    /// Size of a `[t][k][prev]` tensor.
    #[inline(always)]
    pub const fn cells(&self) -> usize {
        self.len * self.labels * (self.labels + 1)
    }

    #[inline(always)]
    pub const fn cell(&self, t: usize, k: usize, prev: usize) -> usize {
        (t * self.labels + k) * (self.labels + 1) + prev
    }

    /// Number of gradient entries produced for `total_nz` nonzero features.
    #[inline(always)]
    pub const fn gradient_len(&self, total_nz: usize) -> usize {
        total_nz * self.labels + self.labels + (self.len - 1) * self.labels * self.labels + 1
    }

    /// Iterates over the previous-state columns in use at position `t`.
    #[inline(always)]
    fn prevs(&self, t: usize) -> core::ops::Range<usize> {
        if t == 0 {
            self.start()..self.start() + 1
        } else {
            0..self.labels
        }
    }
}

/// Buffers of one forward-backward pass.
pub struct Workspace<'a> {
    pub state: &'a mut [f32],
    pub feature: &'a mut [f32],
    pub forward: &'a mut [f32],
    pub backward: &'a mut [f32],
}

impl<'a> Workspace<'a> {
    /// Takes the buffers from the scratch space.
    ///
    /// # Errors
    ///
    /// Fails when the scratch space is too small for the chain.
    pub fn take(scratch: &mut Scratch<'a>, shape: ChainShape) -> Result<Self> {
        Ok(Self {
            state: scratch.take(shape.states())?,
            feature: scratch.take(shape.cells())?,
            forward: scratch.take(shape.states())?,
            backward: scratch.take(shape.states())?,
        })
    }
}

/// `state[t][k]` = dot(hashed features of `t` for class `k`, state block).
pub fn state_scores(hashed: &HashedSequence, weights: &[f32], out: &mut [f32]) {
    let labels = hashed.labels;
    for t in 0..hashed.len() {
        for k in 0..labels {
            let (values, indices) = hashed.block(t, k);
            out[t * labels + k] = values
                .iter()
                .zip(indices)
                .map(|(&v, &i)| v * weights[i as usize])
                .sum();
        }
    }
}

/// Combines state scores, transitions and bias into `feature[t][k][prev]`.
pub fn feature_scores(
    shape: ChainShape,
    layout: &WeightLayout,
    state: &[f32],
    weights: &[f32],
    out: &mut [f32],
) {
    let bias = weights[layout.bias()];
    out[..shape.cells()].fill(f32::NEG_INFINITY);
    for t in 0..shape.len {
        for k in 0..shape.labels {
            let s = state[t * shape.labels + k];
            for prev in shape.prevs(t) {
                let from = (t != 0).then_some(prev);
                out[shape.cell(t, k, prev)] = s + weights[layout.transition(from, k)] + bias;
            }
        }
    }
}

/// Forward scores. `forward[t][k]` sums all prefixes ending in `k` at `t`.
pub fn forward_scores(shape: ChainShape, feature: &[f32], out: &mut [f32]) {
    let n = shape.labels;
    for k in 0..n {
        out[k] = feature[shape.cell(0, k, shape.start())];
    }
    for t in 1..shape.len {
        let (done, rest) = out.split_at_mut(t * n);
        let prev = &done[(t - 1) * n..];
        for (k, o) in rest[..n].iter_mut().enumerate() {
            *o = math::logsumexp((0..n).map(|p| feature[shape.cell(t, k, p)] + prev[p]));
        }
    }
}

/// Backward scores. `backward[t][k]` sums all suffixes following `k` at `t`.
pub fn backward_scores(shape: ChainShape, feature: &[f32], out: &mut [f32]) {
    let n = shape.labels;
    let last = (shape.len - 1) * n;
    out[last..last + n].fill(0.0);
    for t in (0..shape.len - 1).rev() {
        let (cur, next) = out.split_at_mut((t + 1) * n);
        let next = &next[..n];
        for (k, o) in cur[t * n..].iter_mut().enumerate() {
            *o = math::logsumexp((0..n).map(|q| feature[shape.cell(t + 1, q, k)] + next[q]));
        }
    }
}

/// Log partition function from the forward scores.
#[inline(always)]
pub fn normalization_factor(shape: ChainShape, forward: &[f32]) -> f32 {
    let last = (shape.len - 1) * shape.labels;
    math::logsumexp(forward[last..last + shape.labels].iter().copied())
}

/// Runs state, feature, forward and backward passes. Returns the log partition function.
pub fn forward_backward(
    shape: ChainShape,
    layout: &WeightLayout,
    hashed: &HashedSequence,
    weights: &[f32],
    ws: &mut Workspace,
) -> f32 {
    state_scores(hashed, weights, ws.state);
    feature_scores(shape, layout, ws.state, weights, ws.feature);
    forward_scores(shape, ws.feature, ws.forward);
    backward_scores(shape, ws.feature, ws.backward);
    normalization_factor(shape, ws.forward)
}

/// Sum of feature scores along a path.
pub fn path_score(shape: ChainShape, feature: &[f32], path: &[u32]) -> f32 {
    let mut score = feature[shape.cell(0, path[0] as usize, shape.start())];
    for t in 1..shape.len {
        score += feature[shape.cell(t, path[t] as usize, path[t - 1] as usize)];
    }
    score
}

/// Negative log-likelihood of the supervisory path.
#[inline(always)]
pub fn suffer_loss(shape: ChainShape, feature: &[f32], path: &[u32], z: f32) -> f32 {
    z - path_score(shape, feature, path)
}

/// Overwrites feature scores with joint log-marginals.
///
/// After this call `feature` no longer holds feature scores, so the loss
/// must have been computed before.
pub fn joint_scores(shape: ChainShape, feature: &mut [f32], forward: &[f32], backward: &[f32], z: f32) {
    let n = shape.labels;
    for t in 0..shape.len {
        for k in 0..n {
            let beta = backward[t * n + k] - z;
            for prev in shape.prevs(t) {
                let alpha = if t == 0 { 0.0 } else { forward[(t - 1) * n + prev] };
                feature[shape.cell(t, k, prev)] += alpha + beta;
            }
        }
    }
}

/// Writes the gradient of the loss w.r.t. the weights into `out`.
///
/// Every cell contributes `marginal - observed` to its transition weight and to
/// the bias; each state contributes its summed coefficient to the hashed
/// features active there. Indices may repeat. Returns the number of entries
/// written, which equals [`ChainShape::gradient_len`].
pub fn gradient(
    shape: ChainShape,
    layout: &WeightLayout,
    hashed: &HashedSequence,
    joint: &[f32],
    path: &[u32],
    out: &mut [Entry],
) -> usize {
    let mut len = 0;
    let mut bias = 0.0;
    for t in 0..shape.len {
        let cur = path[t] as usize;
        for k in 0..shape.labels {
            let mut marginal = 0.0;
            for prev in shape.prevs(t) {
                let prob = joint[shape.cell(t, k, prev)].exp();
                let observed = k == cur && (t == 0 || prev == path[t - 1] as usize);
                let coef = prob - if observed { 1.0 } else { 0.0 };
                let from = (t != 0).then_some(prev);
                out[len] = Entry::new(layout.transition(from, k) as u32, coef);
                len += 1;
                marginal += prob;
                bias += coef;
            }
            let coef = marginal - if k == cur { 1.0 } else { 0.0 };
            let (values, indices) = hashed.block(t, k);
            for (&v, &i) in values.iter().zip(indices) {
                out[len] = Entry::new(i, coef * v);
                len += 1;
            }
        }
    }
    out[len] = Entry::new(layout.bias() as u32, bias);
    len + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::{enumerate_paths, logsumexp, Fixture};

    fn run(fixture: &Fixture) -> (Vec<f32>, Vec<f32>, Vec<f32>, f32) {
        let shape = fixture.shape();
        let mut state = vec![0.0; shape.states()];
        let mut feature = vec![0.0; shape.cells()];
        let mut forward = vec![0.0; shape.states()];
        let mut backward = vec![0.0; shape.states()];
        let mut ws = Workspace {
            state: &mut state,
            feature: &mut feature,
            forward: &mut forward,
            backward: &mut backward,
        };
        let z = forward_backward(shape, &fixture.layout, &fixture.hashed(), &fixture.weights, &mut ws);
        (feature, forward, backward, z)
    }

    #[test]
    fn test_layout_indices() {
        let layout = WeightLayout {
            state_dimension: 16,
            number_of_states: 3,
        };
        assert_eq!(16 + 9, layout.transition(None, 0));
        assert_eq!(16 + 3 + 2, layout.transition(Some(1), 2));
        assert_eq!(16 + 12, layout.bias());
        assert_eq!(29, layout.len());
    }

    #[test]
    fn test_feature_scores_combine_terms() {
        let fixture = Fixture::random(3, 2, 1);
        let shape = fixture.shape();
        let (feature, _, _, _) = run(&fixture);
        let w = &fixture.weights;
        let bias = w[fixture.layout.bias()];

        let mut state = vec![0.0; shape.states()];
        state_scores(&fixture.hashed(), w, &mut state);

        let expected = state[2 + 1] + w[fixture.layout.transition(Some(0), 1)] + bias;
        assert!((expected - feature[shape.cell(1, 1, 0)]).abs() < 1e-6);
        let expected = state[0] + w[fixture.layout.transition(None, 0)] + bias;
        assert!((expected - feature[shape.cell(0, 0, shape.start())]).abs() < 1e-6);
        assert_eq!(f32::NEG_INFINITY, feature[shape.cell(0, 0, 0)]);
        assert_eq!(f32::NEG_INFINITY, feature[shape.cell(1, 0, shape.start())]);
    }

    #[test]
    fn test_forward_scores_are_normalized() {
        for (len, labels) in [(1, 1), (1, 3), (2, 2), (4, 3), (6, 5)] {
            let fixture = Fixture::random(len, labels, len as u64 * 31 + labels as u64);
            let shape = fixture.shape();
            let (_, forward, _, z) = run(&fixture);
            let last = (len - 1) * labels;
            let total: f32 = forward[last..last + labels].iter().map(|a| (a - z).exp()).sum();
            assert!((1.0 - total).abs() < 1e-5, "{len} {labels}: {total}");
            assert_eq!(shape.states(), forward.len());
        }
    }

    #[test]
    fn test_partition_matches_backward() {
        for (len, labels) in [(1, 2), (3, 3), (5, 4)] {
            let fixture = Fixture::random(len, labels, 7 + len as u64);
            let shape = fixture.shape();
            let (feature, _, backward, z) = run(&fixture);
            let z_backward = math::logsumexp(
                (0..labels).map(|k| feature[shape.cell(0, k, shape.start())] + backward[k]),
            );
            assert!((z - z_backward).abs() < 1e-4 * z.abs().max(1.0));
        }
    }

    #[test]
    fn test_partition_matches_brute_force() {
        let fixture = Fixture::random(3, 3, 99);
        let shape = fixture.shape();
        let (feature, _, _, z) = run(&fixture);
        let mut expected = f32::NEG_INFINITY;
        for path in enumerate_paths(3, 3) {
            expected = logsumexp!(expected, path_score(shape, &feature, &path));
        }
        assert!((expected - z).abs() < 1e-4);
    }

    #[test]
    fn test_loss_is_nonnegative() {
        let fixture = Fixture::random(4, 3, 5);
        let shape = fixture.shape();
        let (feature, _, _, z) = run(&fixture);
        let loss = suffer_loss(shape, &feature, &fixture.path, z);
        assert!(loss > 0.0);
        let mut total = 0.0;
        for path in enumerate_paths(4, 3) {
            total += (-suffer_loss(shape, &feature, &path, z)).exp();
        }
        assert!((1.0 - total).abs() < 1e-4);
    }

    #[test]
    fn test_joint_scores_are_marginals() {
        let fixture = Fixture::random(3, 2, 11);
        let shape = fixture.shape();
        let (mut feature, forward, backward, z) = run(&fixture);
        let original = feature.clone();
        joint_scores(shape, &mut feature, &forward, &backward, z);
        for t in 0..shape.len {
            let total: f32 = (0..shape.labels)
                .flat_map(|k| shape.prevs(t).map(move |p| (k, p)))
                .map(|(k, p)| feature[shape.cell(t, k, p)].exp())
                .sum();
            assert!((1.0 - total).abs() < 1e-5);
        }
        // brute-force marginal of the transition 0 -> 1 at t = 1
        let mut expected = 0.0;
        for path in enumerate_paths(3, 2) {
            if path[0] == 0 && path[1] == 1 {
                expected += (path_score(shape, &original, &path) - z).exp();
            }
        }
        assert!((expected - feature[shape.cell(1, 1, 0)].exp()).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_len() {
        let fixture = Fixture::random(4, 3, 3);
        let shape = fixture.shape();
        let (mut feature, forward, backward, z) = run(&fixture);
        joint_scores(shape, &mut feature, &forward, &backward, z);
        let total_nz = fixture.nz.iter().sum::<u32>() as usize;
        let mut out = vec![Entry::default(); shape.gradient_len(total_nz)];
        let len = gradient(
            shape,
            &fixture.layout,
            &fixture.hashed(),
            &feature,
            &fixture.path,
            &mut out,
        );
        assert_eq!(shape.gradient_len(total_nz), len);
        assert_eq!(fixture.layout.bias() as u32, out[len - 1].index);
        // marginals and observations both sum to one per position
        assert!(out[len - 1].value.abs() < 1e-4);
    }
}
