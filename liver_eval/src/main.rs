use clap::Parser;
use liver_detection::config::{load_configuration, Environment};
use liver_eval::{
    cli::{Cli, Command},
    commands,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let environment: Environment = cli.environment.clone().try_into().map_err(anyhow::Error::msg)?;
    let config = load_configuration(&cli.config_dir, &environment)?;
    let log_level = &format!("{},ort=info", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match &cli.command {
        Command::Classifier(args) => {
            let report = commands::evaluate_classifier(&config, args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Detector(args) => {
            let report = commands::run_detector_evaluation(&config, args).await?;
            println!(
                "{}: AP={:.2} AP50={:.2} AP75={:.2} ({} images)",
                report.species, report.ap, report.ap50, report.ap75, report.num_images
            );
            for class in &report.per_class {
                println!(
                    "  {:<28} AP={:.2} AP50={:.2} AP75={:.2} gt={} det={}",
                    class.class_name,
                    class.ap,
                    class.ap50,
                    class.ap75,
                    class.num_ground_truth,
                    class.num_detections
                );
            }
        }
        Command::Predict(args) => {
            let instances = commands::predict(&config, args).await?;
            println!("{} instance(s) detected", instances.len());
            for instance in &instances {
                println!("  {} {:?}", instance.label(), instance.pixel_bbox());
            }
        }
    }

    Ok(())
}
