use clap::Parser;
use log::{error, info};

use masks2coco::{run_pipeline, Args, ContourVectorizer, ImageCrateCodec};

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.to_pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("Starting mask to COCO conversion...");

    match run_pipeline(&config, &ImageCrateCodec, &ContourVectorizer) {
        Ok(summary) => {
            summary.print_summary();
            let failed = summary.failed_documents();
            if !failed.is_empty() {
                error!("Conversion failed: {} document(s) were not written", failed.len());
                std::process::exit(1);
            }
            info!("Conversion process completed successfully.");
        }
        Err(e) => {
            error!("Conversion failed: {}", e);
            std::process::exit(1);
        }
    }
}
