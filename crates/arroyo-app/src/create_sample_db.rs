//! Create a sample conjunction database with reproducible demo data

use std::path::Path;

use anyhow::{bail, Result};
use arroyo_core::DatasetSummary;
use arroyo_data::sources::{create_schema, insert_conjunction, write_summary, ConjunctionRecord};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::info;

/// Length of the detection window
const WINDOW_DAYS: i64 = 7;

/// Distance below which conjunctions are reported, in km
const THRESHOLD_KM: f64 = 5.0;

/// Encounter samples per conjunction, spread over +/- 2 seconds around TCA
const ENCOUNTER_SAMPLES: usize = 50;

const STATUSES: [&str; 6] = ["+", "-", "P", "B", "S", "?"];

const FAMILIES: [&str; 6] = ["STARLINK", "ONEWEB", "COSMOS", "FENGYUN 1C DEB", "IRIDIUM", "NOAA"];

/// Create and populate a sample database; returns the number of conjunctions
pub fn create_sample_database(path: &Path, count: usize, seed: u32) -> Result<usize> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let mut conn = Connection::open(path)?;
    create_schema(&conn)?;

    let window_begin = window_begin();
    let window_end = window_begin + Duration::days(WINDOW_DAYS);

    let tx = conn.transaction()?;
    let mut rng = seed;
    for conj_index in 0..count {
        let record = generate_conjunction(&mut rng, conj_index as i64, window_begin);
        insert_conjunction(&tx, &record)?;
    }

    write_summary(
        &tx,
        &DatasetSummary {
            total_events: None,
            generated_at: Some(format_second(&window_begin)),
            computation_secs: Some(count as f64 * 0.05),
            missed_events: Some((count / 500) as u64),
            window_begin: Some(format_second(&window_begin)),
            window_end: Some(format_second(&window_end)),
            threshold: Some(THRESHOLD_KM),
        },
    )?;
    tx.commit()?;

    info!("Sample database with {} conjunctions written to {}", count, path.display());
    Ok(count)
}

fn window_begin() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

fn generate_conjunction(rng: &mut u32, conj_index: i64, window_begin: DateTime<Utc>) -> ConjunctionRecord {
    let norad_id_i = (random_int(rng) % 60000 + 1) as i64;
    let mut norad_id_j = (random_int(rng) % 60000 + 1) as i64;
    if norad_id_j == norad_id_i {
        norad_id_j = norad_id_i % 60000 + 1;
    }

    let window_ms = WINDOW_DAYS * 86_400_000;
    let offset_ms = (random_float(rng) * window_ms as f64) as i64;
    let tca = window_begin + Duration::milliseconds(offset_ms);

    // Squaring skews the distances towards close approaches
    let closeness = random_float(rng);
    let dca = closeness * closeness * THRESHOLD_KM;
    let relative_speed = 0.1 + random_float(rng) * 15.0;

    // About one in ten conjunctions has no counterpart to compare against
    let compared = random_float(rng) >= 0.1;
    let diff = |rng: &mut u32, scale: f64| compared.then(|| (random_float(rng) - 0.5) * scale);
    let tca_diff = diff(rng, 200.0);
    let dca_diff = diff(rng, 50.0);
    let relative_speed_diff = diff(rng, 10.0);

    let encounter = (0..ENCOUNTER_SAMPLES)
        .map(|step| {
            let t = -2.0 + 4.0 * step as f64 / (ENCOUNTER_SAMPLES - 1) as f64;
            let date = tca + Duration::milliseconds((t * 1000.0).round() as i64);
            let dist = (dca * dca + (relative_speed * t) * (relative_speed * t)).sqrt();
            (format_millis(&date), dist)
        })
        .collect();

    ConjunctionRecord {
        conj_index,
        norad_id_i,
        norad_id_j,
        object_name_i: object_name(rng, norad_id_i),
        object_name_j: object_name(rng, norad_id_j),
        ops_status_i: STATUSES[random_int(rng) as usize % STATUSES.len()].to_string(),
        ops_status_j: STATUSES[random_int(rng) as usize % STATUSES.len()].to_string(),
        tca: format_millis(&tca),
        tca_pj: offset_ms as f64 / 86_400_000.0,
        dca,
        relative_speed,
        tca_diff,
        dca_diff,
        relative_speed_diff,
        encounter,
    }
}

fn object_name(rng: &mut u32, norad_id: i64) -> String {
    let family = FAMILIES[random_int(rng) as usize % FAMILIES.len()];
    format!("{}-{}", family, norad_id % 10000)
}

fn format_millis(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn format_second(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn random_float(seed: &mut u32) -> f64 {
    *seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
    (*seed as f64) / (u32::MAX as f64)
}

fn random_int(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
    *seed
}
