//! Weekly bucketing of transactions per (store, product) pair.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::input::Transaction;

/// Calendar key used to group transactions into weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarKey {
    /// ISO week-year plus ISO week; buckets never merge across years.
    IsoYearWeek,
    /// ISO week only; the same week number of different years merges into one bucket.
    WeekOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBucket {
    pub store_id: String,
    pub product_id: String,
    pub year: Option<i32>,
    pub week: u32,
    /// Monotone in calendar time: absolute week index for `IsoYearWeek`,
    /// the week number itself for `WeekOnly`.
    pub time_ordinal: i64,
    pub quantity: f64,
    pub month: u32,
    /// Monday = 0.
    pub day_of_week: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub transactions: u64,
    pub buckets: u64,
    pub entity_pairs: u64,
    pub distinct_years: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoCalendar {
    pub year: i32,
    pub week: u32,
}

type BucketKey = (String, String, Option<i32>, u32);

struct BucketAccumulator {
    quantity: f64,
    representative_date: NaiveDate,
}

pub fn iso_calendar(date: NaiveDate) -> IsoCalendar {
    let iso = date.iso_week();
    IsoCalendar {
        year: iso.year(),
        week: iso.week(),
    }
}

/// Whole weeks between the Monday of `date`'s ISO week and the Monday of 0001-01-01.
pub fn absolute_week_ordinal(date: NaiveDate) -> i64 {
    let monday = date.num_days_from_ce() as i64 - date.weekday().num_days_from_monday() as i64;
    (monday - 1).div_euclid(7)
}

pub fn aggregate_weekly(
    transactions: &[Transaction],
    calendar_key: CalendarKey,
) -> (Vec<WeeklyBucket>, AggregationReport) {
    let mut groups: BTreeMap<BucketKey, BucketAccumulator> = BTreeMap::new();
    let mut years = BTreeSet::new();

    for tx in transactions {
        let iso = iso_calendar(tx.date);
        years.insert(iso.year);
        let year = match calendar_key {
            CalendarKey::IsoYearWeek => Some(iso.year),
            CalendarKey::WeekOnly => None,
        };
        let key = (tx.store_id.clone(), tx.product_id.clone(), year, iso.week);
        groups
            .entry(key)
            .and_modify(|acc| {
                acc.quantity += tx.quantity;
                if tx.date < acc.representative_date {
                    acc.representative_date = tx.date;
                }
            })
            .or_insert(BucketAccumulator {
                quantity: tx.quantity,
                representative_date: tx.date,
            });
    }

    let mut pairs = BTreeSet::new();
    let mut buckets = Vec::with_capacity(groups.len());
    for ((store_id, product_id, year, week), acc) in groups {
        let rep = acc.representative_date;
        let time_ordinal = match calendar_key {
            CalendarKey::IsoYearWeek => absolute_week_ordinal(rep),
            CalendarKey::WeekOnly => week as i64,
        };
        pairs.insert((store_id.clone(), product_id.clone()));
        buckets.push(WeeklyBucket {
            store_id,
            product_id,
            year,
            week,
            time_ordinal,
            quantity: acc.quantity,
            month: rep.month(),
            day_of_week: rep.weekday().num_days_from_monday(),
        });
    }

    let report = AggregationReport {
        transactions: transactions.len() as u64,
        buckets: buckets.len() as u64,
        entity_pairs: pairs.len() as u64,
        distinct_years: years.len() as u64,
    };

    if calendar_key == CalendarKey::WeekOnly && report.distinct_years > 1 {
        warn!(
            component = "aggregate",
            event = "aggregate.week_only_merges_years",
            distinct_years = report.distinct_years
        );
    }

    info!(
        component = "aggregate",
        event = "aggregate.finish",
        calendar_key = ?calendar_key,
        transactions = report.transactions,
        buckets = report.buckets,
        entity_pairs = report.entity_pairs
    );

    (buckets, report)
}
