//! Synthetic demand fixtures shared by the integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use demandforge::data::DemandObservation;
use demandforge::{DemandSeries, EntityKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use tempfile::NamedTempFile;

pub const STORES: [&str; 4] = ["CA_1", "CA_2", "TX_1", "WI_1"];

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Seeded item-location histories with varied volume, intermittency, trend and seasonality
pub fn synthetic_series(n_entities: usize, n_days: usize, seed: u64) -> Vec<DemandSeries> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n_entities)
        .map(|i| {
            let key = EntityKey::new(format!("ITEM_{:04}", i), STORES[i % STORES.len()]);
            let base = rng.gen_range(1.0..80.0);
            let demand_probability = rng.gen_range(0.2..1.0);
            let trend = rng.gen_range(-0.2..0.2);
            let seasonal = rng.gen_range(0.0..0.8);
            let price = rng.gen_range(1.0..50.0);
            let reliability = rng.gen_range(0.7..1.0);

            let observations = start_date()
                .iter_days()
                .take(n_days)
                .enumerate()
                .map(|(t, date)| {
                    let season = 1.0 + seasonal * ((t as f64) / 30.0).sin();
                    let level = (base + trend * t as f64).max(0.0) * season;
                    let quantity = if rng.gen::<f64>() < demand_probability {
                        (level * rng.gen_range(0.5..1.5)).round()
                    } else {
                        0.0
                    };
                    DemandObservation::new(date, quantity).with_revenue(quantity * price)
                })
                .collect();

            DemandSeries::new(key, observations)
                .unwrap()
                .with_supplier_reliability(Some(reliability))
        })
        .collect()
}

/// Write series to a CSV demand table
pub fn write_csv(series: &[DemandSeries]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,store_id,item_id,sales,revenue,supplier_reliability").unwrap();
    for s in series {
        for obs in s.observations() {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                obs.date,
                s.key().store_id,
                s.key().item_id,
                obs.quantity,
                obs.revenue.unwrap_or(0.0),
                s.supplier_reliability().unwrap_or(1.0)
            )
            .unwrap();
        }
    }
    file.flush().unwrap();
    file
}
