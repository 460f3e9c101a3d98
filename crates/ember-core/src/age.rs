//! Five-year age bands and the coarse classes used by the empirical bin tables.
//!
//! The two bin tables do not share an encoding: bootstrap hazard-ratio bins are
//! labelled `under_65` / `65_and_up`, precomputed attributable-fraction bins are
//! labelled `0 to 64` / `65 above`. Each table gets its own class type and an
//! explicit mapping from [`AgeGroup`], so a label from one table can never be
//! used to look up the other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{AGE_BANDS, GEMM_MIN_EFFECT_BAND, LIFE_EXPECTANCY};
use crate::error::LoadError;

/// Last band (60-64 years) of the under-65 class.
const LAST_UNDER_65_BAND: u8 = 13;

/// A five-year age band, `1` (0-4 years) through `18` (85+ years).
///
/// The synthetic all-ages band `0` is not representable.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct AgeGroup(u8);

impl AgeGroup {
    /// Create an age group from its band number. Returns `None` outside `1..=18`.
    pub fn new(band: u8) -> Option<Self> {
        (1..=AGE_BANDS as u8).contains(&band).then_some(Self(band))
    }

    /// All eighteen bands in ascending order.
    pub fn all() -> impl Iterator<Item = AgeGroup> {
        (1..=AGE_BANDS as u8).map(Self)
    }

    /// Band number in `1..=18`.
    pub fn band(self) -> u8 {
        self.0
    }

    /// Zero-based index into the per-band tables.
    pub fn index(self) -> usize {
        usize::from(self.0.saturating_sub(1))
    }

    /// Youngest age covered by the band.
    pub fn lower_age(self) -> u8 {
        self.0.saturating_sub(1) * 5
    }

    /// Whether the parametric exposure-response curve applies to this band.
    pub fn has_modelled_effect(self) -> bool {
        self.0 >= GEMM_MIN_EFFECT_BAND
    }

    /// Remaining life expectancy used to convert deaths to years of life lost.
    pub fn life_expectancy(self) -> f64 {
        LIFE_EXPECTANCY[self.index()]
    }

    pub fn bootstrap_class(self) -> BootstrapClass {
        if self.0 <= LAST_UNDER_65_BAND {
            BootstrapClass::Under65
        } else {
            BootstrapClass::SixtyFiveAndUp
        }
    }

    pub fn precomputed_class(self) -> PrecomputedClass {
        if self.0 <= LAST_UNDER_65_BAND {
            PrecomputedClass::ZeroTo64
        } else {
            PrecomputedClass::SixtyFiveAbove
        }
    }
}

impl TryFrom<u8> for AgeGroup {
    type Error = LoadError;

    fn try_from(band: u8) -> Result<Self, Self::Error> {
        Self::new(band).ok_or(LoadError::InvalidAgeGroup(band))
    }
}

/// Stored bands are validated on decode, as on deserialize.
impl<Context> bincode::Decode<Context> for AgeGroup {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let band = <u8 as bincode::Decode<Context>>::decode(decoder)?;
        Self::new(band).ok_or_else(|| {
            bincode::error::DecodeError::OtherString(LoadError::InvalidAgeGroup(band).to_string())
        })
    }
}

bincode::impl_borrow_decode!(AgeGroup);

impl From<AgeGroup> for u8 {
    fn from(age: AgeGroup) -> Self {
        age.0
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 as usize == AGE_BANDS {
            write!(f, "{}+", self.lower_age())
        } else {
            write!(f, "{}-{}", self.lower_age(), self.lower_age() + 4)
        }
    }
}

/// Age class keying the bootstrap hazard-ratio bins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BootstrapClass {
    Under65,
    SixtyFiveAndUp,
}

impl BootstrapClass {
    pub fn label(self) -> &'static str {
        match self {
            Self::Under65 => "under_65",
            Self::SixtyFiveAndUp => "65_and_up",
        }
    }
}

impl FromStr for BootstrapClass {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "under_65" => Ok(Self::Under65),
            "65_and_up" => Ok(Self::SixtyFiveAndUp),
            other => Err(LoadError::UnknownAgeClass(other.to_string())),
        }
    }
}

/// Age class keying the precomputed attributable-fraction bins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrecomputedClass {
    ZeroTo64,
    SixtyFiveAbove,
}

impl PrecomputedClass {
    pub fn label(self) -> &'static str {
        match self {
            Self::ZeroTo64 => "0 to 64",
            Self::SixtyFiveAbove => "65 above",
        }
    }
}

impl FromStr for PrecomputedClass {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0 to 64" => Ok(Self::ZeroTo64),
            "65 above" => Ok(Self::SixtyFiveAbove),
            other => Err(LoadError::UnknownAgeClass(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_all_ages_and_out_of_range() {
        assert!(AgeGroup::new(0).is_none());
        assert!(AgeGroup::new(19).is_none());
        assert_eq!(AgeGroup::try_from(0), Err(LoadError::InvalidAgeGroup(0)));
    }

    #[test]
    fn bincode_decode_rejects_invalid_band() {
        let config = bincode::config::standard();
        for band in [0u8, 19] {
            let bytes = bincode::encode_to_vec(band, config).unwrap();
            assert!(bincode::decode_from_slice::<AgeGroup, _>(&bytes, config).is_err());
        }
        let bytes = bincode::encode_to_vec(AgeGroup::new(18).unwrap(), config).unwrap();
        let (age, _) = bincode::decode_from_slice::<AgeGroup, _>(&bytes, config).unwrap();
        assert_eq!(age.band(), 18);
    }

    #[test]
    fn all_yields_eighteen_bands() {
        let bands: Vec<u8> = AgeGroup::all().map(AgeGroup::band).collect();
        assert_eq!(bands, (1..=18).collect::<Vec<_>>());
    }

    #[test]
    fn display_ranges() {
        assert_eq!(AgeGroup::new(1).unwrap().to_string(), "0-4");
        assert_eq!(AgeGroup::new(10).unwrap().to_string(), "45-49");
        assert_eq!(AgeGroup::new(18).unwrap().to_string(), "85+");
    }

    #[test]
    fn modelled_effect_starts_at_25() {
        assert!(!AgeGroup::new(5).unwrap().has_modelled_effect());
        assert!(AgeGroup::new(6).unwrap().has_modelled_effect());
    }

    #[test]
    fn class_boundary_at_65() {
        let b13 = AgeGroup::new(13).unwrap();
        let b14 = AgeGroup::new(14).unwrap();
        assert_eq!(b13.bootstrap_class(), BootstrapClass::Under65);
        assert_eq!(b14.bootstrap_class(), BootstrapClass::SixtyFiveAndUp);
        assert_eq!(b13.precomputed_class(), PrecomputedClass::ZeroTo64);
        assert_eq!(b14.precomputed_class(), PrecomputedClass::SixtyFiveAbove);
    }

    #[test]
    fn labels_parse_back() {
        for class in [BootstrapClass::Under65, BootstrapClass::SixtyFiveAndUp] {
            assert_eq!(class.label().parse::<BootstrapClass>().unwrap(), class);
        }
        for class in [PrecomputedClass::ZeroTo64, PrecomputedClass::SixtyFiveAbove] {
            assert_eq!(class.label().parse::<PrecomputedClass>().unwrap(), class);
        }
    }

    #[test]
    fn labels_are_not_interchangeable() {
        assert!("0 to 64".parse::<BootstrapClass>().is_err());
        assert!("under_65".parse::<PrecomputedClass>().is_err());
        assert!("10".parse::<BootstrapClass>().is_err());
    }

    proptest! {
        #[test]
        fn band_validity_matches_range(band in any::<u8>()) {
            prop_assert_eq!(AgeGroup::new(band).is_some(), (1..=18).contains(&band));
        }

        #[test]
        fn both_class_maps_agree(band in 1u8..=18) {
            let age = AgeGroup::new(band).unwrap();
            let under = age.bootstrap_class() == BootstrapClass::Under65;
            prop_assert_eq!(under, age.precomputed_class() == PrecomputedClass::ZeroTo64);
            prop_assert_eq!(under, age.lower_age() < 65);
        }
    }
}
