use serde::{Deserialize, Serialize};

/// Weight-based fee curve. Values come from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_fee: u64,
    pub input_weight: u64,
    pub output_weight: u64,
    pub kernel_weight: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: 1_000_000,
            input_weight: 1,
            output_weight: 4,
            kernel_weight: 1,
        }
    }
}

impl FeeSchedule {
    /// `max(outputs*ow + kernels*kw - inputs*iw, 1) * base_fee`
    pub fn fee(&self, inputs: usize, outputs: usize, kernels: usize) -> u64 {
        let positive = (outputs as u64)
            .saturating_mul(self.output_weight)
            .saturating_add((kernels as u64).saturating_mul(self.kernel_weight));
        let negative = (inputs as u64).saturating_mul(self.input_weight);
        positive
            .saturating_sub(negative)
            .max(1)
            .saturating_mul(self.base_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_curve() {
        let f = FeeSchedule::default();
        // 2 outputs, 1 kernel, 1 input: 8 + 1 - 1 = 8
        assert_eq!(f.fee(1, 2, 1), 8_000_000);
        assert_eq!(f.fee(2, 2, 1), 7_000_000);
        assert_eq!(f.fee(1, 1, 1), 4_000_000);
    }

    #[test]
    fn weight_never_drops_below_one() {
        let f = FeeSchedule::default();
        assert_eq!(f.fee(500, 1, 1), 1_000_000);
    }

    #[test]
    fn parameters_are_honoured() {
        let f = FeeSchedule {
            base_fee: 10,
            input_weight: 2,
            output_weight: 3,
            kernel_weight: 5,
        };
        assert_eq!(f.fee(1, 2, 1), (6 + 5 - 2) * 10);
    }
}
