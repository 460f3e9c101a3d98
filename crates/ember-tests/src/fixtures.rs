//! Synthetic input datasets.

use ember_core::error::BurdenError;
use ember_core::types::{
    BaselineRateRow, BootstrapBinRow, PollutionSummary, PopulationRow, PrecomputedBinRow,
};
use ember_store::import::import_jsonl;
use ember_store::{Dataset, RocksStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Years every synthetic county has data for.
pub const YEARS: [u16; 3] = [2006, 2015, 2023];

/// Serialize `rows` as JSON lines.
pub fn to_jsonl<T: Serialize>(rows: &[T]) -> serde_json::Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

/// Five-digit FIPS code of the `i`th synthetic county.
pub fn fips(i: usize) -> String {
    format!("{:05}", 1001 + 2 * i)
}

/// One complete set of raw inputs.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub pollution: Vec<PollutionSummary>,
    pub population: Vec<PopulationRow>,
    pub baseline: Vec<BaselineRateRow>,
    pub bootstrap_bins: Vec<BootstrapBinRow>,
    pub precomputed_bins: Vec<PrecomputedBinRow>,
}

impl Inputs {
    /// Complete inputs for `counties` counties over [`YEARS`], all bands.
    ///
    /// Includes the rows the index must drop: all-ages population, baseline
    /// rows from other sources, and precomputed rows for other causes.
    pub fn synthetic(seed: u64, counties: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut inputs = Self::default();

        for i in 0..counties {
            let fips = fips(i);
            for year in YEARS {
                let total: f64 = rng.gen_range(4.0..16.0);
                let fire = rng.gen_range(0.0..total * 0.4);
                inputs.pollution.push(PollutionSummary {
                    fips: fips.clone(),
                    year,
                    avg_total: total,
                    avg_fire: fire,
                    avg_nonfire: total - fire,
                    max_total: total * 3.0,
                    max_fire: fire * 5.0,
                    max_nonfire: (total - fire) * 2.0,
                    days_count: 365,
                });

                let mut all_ages = 0;
                for band in 1..=18u8 {
                    let population = rng.gen_range(500..20_000u64);
                    all_ages += population;
                    inputs.population.push(PopulationRow {
                        fips: fips.clone(),
                        year,
                        age_group: band,
                        population: Some(population),
                    });
                    inputs.baseline.push(baseline(&fips, year, band, "basemor_ALL", rng.gen_range(1e-4..5e-2)));
                }
                inputs.population.push(PopulationRow {
                    fips: fips.clone(),
                    year,
                    age_group: 0,
                    population: Some(all_ages),
                });
                inputs.baseline.push(baseline(&fips, year, 10, "basemor_NCD", 0.5));
            }
        }

        for class in ["under_65", "65_and_up"] {
            for (bin, base) in [("[0,0.5)", 0.002), ("[0.5,2)", 0.008), ("[2,1000)", 0.02)] {
                for bootid in 1..=500u16 {
                    inputs.bootstrap_bins.push(BootstrapBinRow {
                        age_group: class.into(),
                        bin: bin.into(),
                        bootid: Some(bootid),
                        coef: Some(base * rng.gen_range(0.5..1.5)),
                    });
                }
            }
        }

        for class in ["0 to 64", "65 above"] {
            for (bin, af) in [("0-0.5", 0.001), ("0.5-2", 0.004), ("2+", 0.012)] {
                for cause in ["Nonaccidental", "Respiratory"] {
                    inputs.precomputed_bins.push(PrecomputedBinRow {
                        age_group: class.into(),
                        bin: bin.into(),
                        cause: cause.into(),
                        af: Some(af),
                        ci_low: Some(af * 0.5),
                        ci_up: Some(af * 1.5),
                    });
                }
            }
        }

        inputs
    }

    /// Import every dataset into `store` as JSON lines.
    pub fn import(&self, store: &mut RocksStore) -> Result<(), BurdenError> {
        let encode = |r: serde_json::Result<String>| r.map_err(|e| BurdenError::Storage(e.to_string()));
        let bodies = [
            (Dataset::Pollution, encode(to_jsonl(&self.pollution))?),
            (Dataset::Population, encode(to_jsonl(&self.population))?),
            (Dataset::Baseline, encode(to_jsonl(&self.baseline))?),
            (Dataset::BootstrapBins, encode(to_jsonl(&self.bootstrap_bins))?),
            (Dataset::PrecomputedBins, encode(to_jsonl(&self.precomputed_bins))?),
        ];
        for (dataset, body) in bodies {
            import_jsonl(store, dataset, body.as_bytes(), 256)?;
        }
        Ok(())
    }
}

fn baseline(fips: &str, year: u16, band: u8, source: &str, value: f64) -> BaselineRateRow {
    BaselineRateRow {
        fips: fips.into(),
        year,
        age_group: band,
        source: source.into(),
        stat_type: "1".into(),
        allage_flag: false,
        value: Some(value),
    }
}
