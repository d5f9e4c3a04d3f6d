use anyhow::Context;
use burn_multitask_cv::{
    backend::{MainBackend, MainDevice},
    cli::AppArgs,
    cross_validation,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = AppArgs::parse().context("invalid command-line arguments")?;
    let config = args.resolve_config()?;
    let device = MainBackend::main_device(config.device)?;
    log::info!(
        "Running {}-fold cross-validation on {:?} ({:?}), models go to {:?}",
        config.num_folds,
        config.data_dir,
        device,
        config.best_model_path
    );

    let report = cross_validation::run::<MainBackend>(&config, &device)?;

    println!("Average accuracy digit: {:.4}", report.mean_accuracy_digit());
    println!("Average accuracy gender: {:.4}", report.mean_accuracy_gender());
    Ok(())
}
