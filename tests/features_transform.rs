use chrono::NaiveDate;
use demand_forecast::{
    aggregate_weekly, assemble_dataset, assert_schema_compatible, build_feature_schema,
    synthesize_features, CalendarKey, DatasetError, FeatureConfig, FeatureError, FeatureTable,
    ReferenceTables, Transaction, FEATURE_SCHEMA_VERSION,
};

fn tx(date: (i32, u32, u32), store: &str, product: &str, quantity: f64) -> Transaction {
    Transaction {
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("valid date"),
        store_id: store.to_string(),
        product_id: product.to_string(),
        quantity,
    }
}

fn lag_config(lags: Vec<u32>, rolling_windows: Vec<u32>) -> FeatureConfig {
    FeatureConfig {
        lags,
        rolling_windows,
        cyclical_week: false,
        schema_version: FEATURE_SCHEMA_VERSION,
    }
}

fn features_for(transactions: &[Transaction], cfg: &FeatureConfig) -> FeatureTable {
    let (buckets, _) = aggregate_weekly(transactions, CalendarKey::IsoYearWeek);
    synthesize_features(&buckets, cfg)
        .expect("features should build")
        .0
}

fn references(products: &[&str], stores: &[&str]) -> ReferenceTables {
    ReferenceTables::new(
        products.iter().map(|p| p.to_string()),
        stores.iter().map(|s| s.to_string()),
    )
}

fn column_index(schema: &demand_forecast::FeatureSchema, name: &str) -> usize {
    schema
        .column_index(name)
        .unwrap_or_else(|| panic!("missing column {name}"))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "actual={actual} expected={expected}"
    );
}

/// Mondays of ISO weeks 1..=n of 2023.
fn weekly_series(store: &str, product: &str, quantities: &[f64]) -> Vec<Transaction> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).expect("valid date");
    quantities
        .iter()
        .enumerate()
        .map(|(i, q)| Transaction {
            date: start + chrono::Duration::weeks(i as i64),
            store_id: store.to_string(),
            product_id: product.to_string(),
            quantity: *q,
        })
        .collect()
}

#[test]
fn schema_order_and_fingerprint_are_deterministic() {
    let cfg = FeatureConfig::default();
    let schema_a = build_feature_schema(&cfg);
    let schema_b = build_feature_schema(&cfg);

    let names: Vec<&str> = schema_a.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "week",
            "month",
            "day_of_week",
            "product_mean",
            "product_std",
            "lag_1",
            "lag_2",
            "lag_3",
            "lag_4",
            "lag_12",
            "rolling_mean_3",
            "rolling_mean_4",
            "rolling_mean_12",
            "product_freq",
            "store_freq",
            "week_sin",
            "week_cos",
        ]
    );
    assert_eq!(schema_a, schema_b);
    assert_eq!(schema_a.fingerprint.len(), 64);

    let basic = build_feature_schema(&lag_config(vec![1, 2, 3], vec![3]));
    assert_eq!(basic.width(), 11);
    assert_ne!(basic.fingerprint, schema_a.fingerprint);
    assert!(matches!(
        assert_schema_compatible(schema_a.version, &schema_a.fingerprint, &basic),
        Err(FeatureError::SchemaFingerprintMismatch { .. })
    ));
    assert!(assert_schema_compatible(schema_a.version, &schema_a.fingerprint, &schema_b).is_ok());
}

#[test]
fn lag_one_reads_previous_week_and_first_week_is_dropped() {
    let transactions = vec![
        tx((2023, 1, 2), "A", "X", 10.0),
        tx((2023, 1, 9), "A", "X", 10.0),
        tx((2023, 1, 16), "A", "X", 10.0),
    ];
    let cfg = lag_config(vec![1], vec![]);
    let table = features_for(&transactions, &cfg);
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.rows[0].lags, vec![None]);
    assert_eq!(table.rows[2].bucket.week, 3);
    assert_eq!(table.rows[2].lags, vec![Some(10.0)]);

    let (dataset, report) =
        assemble_dataset(&table, &references(&["X"], &["A"])).expect("dataset should assemble");
    assert_eq!(report.rows_missing_history, 1);
    assert_eq!(dataset.len(), 2);
    let weeks: Vec<u32> = dataset.keys().iter().map(|k| k.week).collect();
    assert_eq!(weeks, vec![2, 3]);

    let lag_1 = column_index(dataset.schema(), "lag_1");
    assert_close(dataset.features()[1][lag_1], 10.0);
    assert_eq!(dataset.targets(), &[10.0, 10.0]);
}

#[test]
fn lags_and_rolling_means_never_see_the_current_row_or_other_groups() {
    let mut transactions = weekly_series("A", "X", &[1.0, 2.0, 4.0, 8.0, 16.0]);
    transactions.extend(weekly_series("B", "X", &[100.0, 200.0, 300.0]));
    let cfg = lag_config(vec![1, 2], vec![2]);
    let table = features_for(&transactions, &cfg);

    // Rows are grouped by (product, store) in time order: A first, then B.
    assert_eq!(table.rows.len(), 8);
    for (i, row) in table.rows.iter().enumerate() {
        let group_start = if row.bucket.store_id == "A" { 0 } else { 5 };
        let pos = i - group_start;
        let quantity_at = |offset: usize| table.rows[group_start + pos - offset].bucket.quantity;

        let expected_lag_1 = (pos >= 1).then(|| quantity_at(1));
        let expected_lag_2 = (pos >= 2).then(|| quantity_at(2));
        assert_eq!(row.lags, vec![expected_lag_1, expected_lag_2], "row {i}");

        let expected_mean = (pos >= 2).then(|| (quantity_at(1) + quantity_at(2)) / 2.0);
        assert_eq!(row.rolling_means, vec![expected_mean], "row {i}");
    }

    // First row of the second group starts with empty history.
    assert_eq!(table.rows[5].bucket.store_id, "B");
    assert_eq!(table.rows[5].lags, vec![None, None]);
    assert_eq!(table.rows[7].rolling_means, vec![Some(150.0)]);
}

#[test]
fn frequency_counts_sum_to_row_count() {
    let mut transactions = weekly_series("A", "X", &[1.0, 2.0, 3.0, 4.0]);
    transactions.extend(weekly_series("B", "X", &[5.0, 6.0]));
    transactions.extend(weekly_series("B", "Y", &[7.0, 8.0, 9.0]));
    let table = features_for(&transactions, &lag_config(vec![1], vec![]));

    let mut product_totals = std::collections::BTreeMap::new();
    let mut store_totals = std::collections::BTreeMap::new();
    for row in &table.rows {
        product_totals.insert(row.bucket.product_id.clone(), row.product_freq);
        store_totals.insert(row.bucket.store_id.clone(), row.store_freq);
    }
    assert_eq!(product_totals.get("X"), Some(&6));
    assert_eq!(product_totals.get("Y"), Some(&3));
    assert_eq!(store_totals.get("A"), Some(&4));
    assert_eq!(store_totals.get("B"), Some(&5));
    assert_eq!(product_totals.values().sum::<u64>(), table.rows.len() as u64);
    assert_eq!(store_totals.values().sum::<u64>(), table.rows.len() as u64);
}

#[test]
fn product_statistics_use_sample_std_and_missing_for_single_observation() {
    let mut transactions = weekly_series("A", "X", &[2.0, 4.0, 6.0]);
    transactions.extend(weekly_series("A", "Y", &[5.0]));
    let table = features_for(&transactions, &lag_config(vec![1], vec![]));

    let x = table
        .rows
        .iter()
        .find(|r| r.bucket.product_id == "X")
        .expect("X row");
    assert_close(x.product_mean, 4.0);
    assert_close(x.product_std.expect("std for X"), 2.0);

    let y = table
        .rows
        .iter()
        .find(|r| r.bucket.product_id == "Y")
        .expect("Y row");
    assert_close(y.product_mean, 5.0);
    assert_eq!(y.product_std, None);
}

#[test]
fn feature_table_is_independent_of_input_order() {
    let mut transactions = weekly_series("A", "X", &[3.0, 1.0, 4.0, 1.0, 5.0]);
    transactions.extend(weekly_series("B", "Y", &[9.0, 2.0, 6.0]));
    transactions.push(tx((2023, 1, 4), "A", "X", 2.0));
    let cfg = FeatureConfig {
        lags: vec![1, 2],
        rolling_windows: vec![2],
        ..FeatureConfig::default()
    };

    let forward = features_for(&transactions, &cfg);
    let mut reversed_input = transactions.clone();
    reversed_input.reverse();
    let reversed = features_for(&reversed_input, &cfg);

    assert_eq!(forward, reversed);
    // Two transactions in ISO week 1 collapse into one bucket.
    assert_close(forward.rows[0].bucket.quantity, 5.0);
}

#[test]
fn lags_longer_than_every_series_are_rejected() {
    let transactions = weekly_series("A", "X", &[1.0, 2.0, 3.0]);
    let table = features_for(&transactions, &lag_config(vec![3], vec![]));
    let err = assemble_dataset(&table, &references(&["X"], &["A"]))
        .expect_err("no row can have a complete history");
    assert_eq!(
        err,
        DatasetError::InsufficientHistory {
            required: 3,
            longest: 3
        }
    );
}

#[test]
fn week_only_key_merges_the_same_week_of_different_years() {
    let transactions = vec![
        tx((2022, 1, 3), "A", "X", 4.0),
        tx((2023, 1, 2), "A", "X", 6.0),
    ];

    let (per_year, report) = aggregate_weekly(&transactions, CalendarKey::IsoYearWeek);
    assert_eq!(per_year.len(), 2);
    assert_eq!(report.distinct_years, 2);
    assert!(per_year[0].time_ordinal < per_year[1].time_ordinal);
    assert_eq!(per_year[1].time_ordinal - per_year[0].time_ordinal, 52);

    let (merged, _) = aggregate_weekly(&transactions, CalendarKey::WeekOnly);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].year, None);
    assert_eq!(merged[0].week, 1);
    assert_close(merged[0].quantity, 10.0);
}

#[test]
fn unmatched_references_are_counted_but_rows_are_kept() {
    let mut transactions = weekly_series("A", "X", &[1.0, 2.0, 3.0]);
    transactions.extend(weekly_series("Z", "X", &[1.0, 2.0, 3.0]));
    let table = features_for(&transactions, &lag_config(vec![1], vec![]));

    let (dataset, report) =
        assemble_dataset(&table, &references(&["X"], &["A"])).expect("dataset should assemble");
    assert_eq!(dataset.len(), 4);
    assert_eq!(report.resolution.rows_with_unmatched_store, 3);
    assert_eq!(report.resolution.unmatched_store_ids, vec!["Z".to_string()]);
    let unmatched = dataset
        .references()
        .iter()
        .filter(|m| m.store.is_none())
        .count();
    assert_eq!(unmatched, 2);
}
