//! AdaGrad with L1 regularization in its lazy (dual-averaging) form.
//!
//! A weight is a pure function of its accumulated first- and second-order
//! information and the round number, so only the weights touched by an
//! instance have to be materialized before it is scored.

use core::ops::Range;

use crate::optimizers::HyperParams;
use crate::vector::Entry;

/// Weights are rounded to multiples of this step after quantization starts.
pub const QUANTUM: f32 = 1.0 / 1024.0;

/// Resets the optimizer state: zero weights and first-order information,
/// second-order information of one.
pub fn reset(foi: &mut [f32], soi: &mut [f32], weights: &mut [f32]) {
    foi.fill(0.0);
    soi.fill(1.0);
    weights.fill(0.0);
}

#[inline(always)]
fn quantize(w: f32) -> f32 {
    (w / QUANTUM).round() * QUANTUM
}

/// Closed-form weight of one coordinate at `round`.
#[inline(always)]
pub fn materialize(params: &HyperParams, foi: f32, soi: f32, round: u32) -> f32 {
    if foi == 0.0 || round == 0 {
        return 0.0;
    }
    let round = round as f32;
    let shrink = (foi.abs() / round - params.lambda).max(0.0);
    if shrink == 0.0 {
        return 0.0;
    }
    -foi.signum() * params.eta * round * shrink / (params.delta + soi.sqrt())
}

/// Mutable view of the optimizer state at one round.
pub struct LazyAdaGrad<'a> {
    pub foi: &'a mut [f32],
    pub soi: &'a mut [f32],
    pub weights: &'a mut [f32],
    pub params: HyperParams,
    pub round: u32,
    /// Rounds materialized weights to multiples of [`QUANTUM`].
    pub quantize: bool,
}

impl<'a> LazyAdaGrad<'a> {
    /// Recomputes the weight at `index`.
    #[inline(always)]
    pub fn update(&mut self, index: usize) {
        let w = materialize(&self.params, self.foi[index], self.soi[index], self.round);
        self.weights[index] = if self.quantize {
            quantize(w)
        } else {
            w
        };
    }

    /// Recomputes the weights of the listed indices.
    pub fn update_list(&mut self, indices: &[u32]) {
        for &i in indices {
            self.update(i as usize);
        }
    }

    /// Recomputes a contiguous range. Coordinates with no first-order
    /// information are zeroed without evaluating the closed form.
    pub fn update_range(&mut self, range: Range<usize>) {
        for i in range {
            if self.foi[i] == 0.0 {
                self.weights[i] = 0.0;
            } else {
                self.update(i);
            }
        }
    }

    /// Adds a merged gradient to the accumulated information.
    pub fn accumulate(&mut self, gradient: &[Entry]) {
        for e in gradient {
            let i = e.index as usize;
            self.foi[i] += e.value;
            self.soi[i] += e.value * e.value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct State {
        foi: Vec<f32>,
        soi: Vec<f32>,
        weights: Vec<f32>,
    }

    impl State {
        fn new(n: usize) -> Self {
            let mut state = Self {
                foi: vec![0.0; n],
                soi: vec![0.0; n],
                weights: vec![0.5; n],
            };
            reset(&mut state.foi, &mut state.soi, &mut state.weights);
            state
        }

        fn view(&mut self, round: u32, quantize: bool) -> LazyAdaGrad<'_> {
            LazyAdaGrad {
                foi: &mut self.foi,
                soi: &mut self.soi,
                weights: &mut self.weights,
                params: HyperParams::default(),
                round,
                quantize,
            }
        }
    }

    #[test]
    fn test_reset() {
        let state = State::new(3);
        assert_eq!(vec![0.0; 3], state.foi);
        assert_eq!(vec![1.0; 3], state.soi);
        assert_eq!(vec![0.0; 3], state.weights);
    }

    #[test]
    fn test_materialize() {
        let params = HyperParams::default();
        assert_eq!(0.0, materialize(&params, 0.0, 5.0, 3));
        assert_eq!(0.0, materialize(&params, 1.0, 5.0, 0));
        // |foi| / round below lambda
        assert_eq!(0.0, materialize(&params, 1e-5, 1.0, 1));

        let w = materialize(&params, 2.0, 4.0, 1);
        assert!((w - -(2.0 - 1e-4) / 3.0).abs() < 1e-6);
        let w = materialize(&params, -2.0, 4.0, 2);
        assert!((w - 2.0 * (1.0 - 1e-4) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut state = State::new(4);
        let mut view = state.view(1, false);
        view.accumulate(&[Entry::new(0, 1.0), Entry::new(2, -0.5)]);
        view.update_list(&[0, 2]);
        let first = view.weights.to_vec();
        view.update_list(&[0, 2]);
        view.update_range(0..4);
        assert_eq!(first, view.weights.to_vec());
        assert!(first[0] < 0.0);
        assert!(first[2] > 0.0);
        assert_eq!(0.0, first[1]);
    }

    #[test]
    fn test_update_range_zeroes_cancelled() {
        let mut state = State::new(3);
        let mut view = state.view(2, false);
        view.accumulate(&[Entry::new(0, 3.0), Entry::new(1, 1.0)]);
        view.update_range(0..3);
        assert!(view.weights[1] < 0.0);
        view.accumulate(&[Entry::new(1, -1.0)]);
        view.update_range(0..3);
        assert_eq!(0.0, view.weights[1]);
        assert!(view.weights[0] < 0.0);
    }

    #[test]
    fn test_accumulate() {
        let mut state = State::new(2);
        let mut view = state.view(1, false);
        view.accumulate(&[Entry::new(1, 2.0)]);
        view.accumulate(&[Entry::new(1, -0.5)]);
        assert_eq!(&[0.0, 1.5], view.foi);
        assert_eq!(&[1.0, 5.25], view.soi);
    }

    #[test]
    fn test_quantization() {
        let mut state = State::new(1);
        let mut view = state.view(3, true);
        view.accumulate(&[Entry::new(0, 1.0)]);
        view.update(0);
        let w = view.weights[0];
        assert_eq!(w, (w * 1024.0).round() / 1024.0);
        let exact = materialize(&view.params, 1.0, 2.0, 3);
        assert!((w - exact).abs() <= QUANTUM / 2.0);
    }
}
