pub mod adagrad;

/// Hyperparameters of the AdaGrad optimizer with L1 regularization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HyperParams {
    /// Added to the root of the second-order information.
    pub delta: f32,
    /// Learning rate.
    pub eta: f32,
    /// L1 regularization coefficient.
    pub lambda: f32,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            delta: 1.0,
            eta: 1.0,
            lambda: 1e-4,
        }
    }
}
