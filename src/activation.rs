//! Activation functions.
//!
//! Each hidden block applies its nonlinearity element-wise after layer
//! normalization. The backward pass recovers the activation gradient from the
//! cached *post-activation* output `y`, which keeps the per-sample hot path
//! allocation-free without a separate pre-activation buffer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Element-wise nonlinearity used inside the hidden blocks.
pub enum Activation {
    /// Rectified linear unit.
    #[default]
    ReLU,
    Tanh,
    Identity,
}

impl Activation {
    #[inline]
    pub(crate) fn forward(self, x: f32) -> f32 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
        }
    }

    /// Derivative with respect to the input, expressed in terms of the cached
    /// post-activation output `y`.
    #[inline]
    pub(crate) fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Identity => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negative_inputs() {
        assert_eq!(Activation::ReLU.forward(-2.0), 0.0);
        assert_eq!(Activation::ReLU.forward(3.0), 3.0);
        assert_eq!(Activation::ReLU.grad_from_output(0.0), 0.0);
        assert_eq!(Activation::ReLU.grad_from_output(3.0), 1.0);
    }

    #[test]
    fn tanh_gradient_from_cached_output() {
        let y = Activation::Tanh.forward(0.3);
        let g = Activation::Tanh.grad_from_output(y);
        assert!((g - (1.0 - y * y)).abs() < 1e-6);
    }
}
