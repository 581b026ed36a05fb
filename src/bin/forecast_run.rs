use demand_forecast::{
    init_logging, log_app_start, log_config_selected, log_run_finish, logging_config_from_env,
    pipeline_config_from_env, run_pipeline, CONFIG_PATH_ENV, VARIANT_ENV,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env()?;
    let source = if std::env::var_os(CONFIG_PATH_ENV).is_some() {
        CONFIG_PATH_ENV
    } else if std::env::var_os(VARIANT_ENV).is_some() {
        VARIANT_ENV
    } else {
        "default"
    };
    log_config_selected(&config, source);

    let report = run_pipeline(&config)?;
    log_run_finish(&report);

    println!(
        "Forecast written | path={} records={} dataset_rows={} folds={} mean_wmape={} degenerate_folds={}",
        report.output_path.display(),
        report.forecast_records,
        report.assembly.rows_kept,
        report.evaluation.folds.len(),
        report
            .evaluation
            .mean_wmape
            .map(|w| format!("{w:.4}"))
            .unwrap_or_else(|| "n/a".to_string()),
        report.evaluation.degenerate_folds
    );
    for fold in &report.evaluation.folds {
        match fold.wmape.score() {
            Some(score) => println!(
                "  fold {} | train={} validation={} wmape={score:.4}",
                fold.index + 1,
                fold.train_rows,
                fold.validation_rows
            ),
            None => println!(
                "  fold {} | train={} validation={} wmape=degenerate (actuals sum to zero)",
                fold.index + 1,
                fold.train_rows,
                fold.validation_rows
            ),
        }
    }

    Ok(())
}
