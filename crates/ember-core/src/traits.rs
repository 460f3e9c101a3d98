//! Trait interfaces for the Ember pipeline.
//!
//! - [`ExposureResponse`]: concentration to hazard ratio (ember-model implements)
//!
//! Store seams live in [`crate::store`].

use crate::age::AgeGroup;

/// Exposure-response curve mapping PM2.5 above the counterfactual to risk.
///
/// `z` always denotes the excess concentration `max(0, concentration - counterfactual)`.
pub trait ExposureResponse: Send + Sync {
    /// Counterfactual concentration below which no excess risk is attributed.
    fn counterfactual(&self) -> f64;

    /// Hazard ratio at excess concentration `z` for an age group.
    fn hazard_ratio(&self, z: f64, age: AgeGroup) -> f64;

    /// Hazard ratio evaluated without any cached approximation.
    ///
    /// Models that cache part of the curve override this; the default is
    /// [`hazard_ratio`](Self::hazard_ratio).
    fn hazard_ratio_exact(&self, z: f64, age: AgeGroup) -> f64 {
        self.hazard_ratio(z, age)
    }

    /// Clip a concentration to its excess over the counterfactual.
    fn excess_concentration(&self, concentration: f64) -> f64 {
        (concentration - self.counterfactual()).max(0.0)
    }

    /// Attributable fraction `1 - 1/HR`, or 0 when the hazard ratio is zero or non-finite.
    fn attributable_fraction(&self, z: f64, age: AgeGroup) -> f64 {
        af_from_hazard_ratio(self.hazard_ratio(z, age))
    }

    /// Attributable fraction at a raw (unclipped) concentration.
    fn attributable_fraction_at(&self, concentration: f64, age: AgeGroup) -> f64 {
        self.attributable_fraction(self.excess_concentration(concentration), age)
    }

    /// [`attributable_fraction_at`](Self::attributable_fraction_at) using
    /// [`hazard_ratio_exact`](Self::hazard_ratio_exact).
    fn exact_attributable_fraction_at(&self, concentration: f64, age: AgeGroup) -> f64 {
        let z = self.excess_concentration(concentration);
        af_from_hazard_ratio(self.hazard_ratio_exact(z, age))
    }
}

fn af_from_hazard_ratio(hr: f64) -> f64 {
    if !hr.is_finite() || hr == 0.0 {
        return 0.0;
    }
    1.0 - 1.0 / hr
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl ExposureResponse for Fixed {
        fn counterfactual(&self) -> f64 {
            2.4
        }

        fn hazard_ratio(&self, _z: f64, _age: AgeGroup) -> f64 {
            self.0
        }
    }

    fn age() -> AgeGroup {
        AgeGroup::new(10).unwrap()
    }

    #[test]
    fn degenerate_hazard_ratios_give_zero_fraction() {
        assert_eq!(Fixed(0.0).attributable_fraction(5.0, age()), 0.0);
        assert_eq!(Fixed(f64::INFINITY).attributable_fraction(5.0, age()), 0.0);
        assert_eq!(Fixed(f64::NAN).attributable_fraction(5.0, age()), 0.0);
    }

    #[test]
    fn fraction_from_hazard_ratio() {
        assert!((Fixed(1.25).attributable_fraction(5.0, age()) - 0.2).abs() < 1e-12);
        assert_eq!(Fixed(1.0).attributable_fraction(5.0, age()), 0.0);
    }

    #[test]
    fn concentration_is_clipped_at_counterfactual() {
        let m = Fixed(1.0);
        assert_eq!(m.excess_concentration(1.0), 0.0);
        assert!((m.excess_concentration(12.0) - 9.6).abs() < 1e-12);
        assert_eq!(m.excess_concentration(f64::NAN), 0.0);
    }

    #[test]
    fn exact_path_defaults_to_hazard_ratio() {
        let m = Fixed(1.25);
        assert_eq!(m.hazard_ratio_exact(9.6, age()), 1.25);
        assert_eq!(m.exact_attributable_fraction_at(12.0, age()), m.attributable_fraction_at(12.0, age()));
        assert_eq!(Fixed(f64::NAN).exact_attributable_fraction_at(12.0, age()), 0.0);
    }

    #[test]
    fn trait_is_object_safe() {
        let m = Fixed(1.25);
        let dyn_m: &dyn ExposureResponse = &m;
        assert!(dyn_m.attributable_fraction_at(12.0, age()) > 0.0);
    }
}
