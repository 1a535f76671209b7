use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cogstudio::{
    Config, GenerationDispatcher, GenerationRequest, InferenceContext, LogProgress,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("CogStudio (Rust)")
        .version("0.1.0")
        .about("Generate videos from text, images, or other videos")
        .arg(
            Arg::new("prompt")
                .value_name("PROMPT")
                .help("Description of the video to generate")
                .required(true)
        )
        .arg(
            Arg::new("image")
                .short('i')
                .long("image")
                .value_name("FILE")
                .help("Conditioning image")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("video")
                .short('V')
                .long("video")
                .value_name("FILE")
                .help("Conditioning video (takes priority over --image)")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("strength")
                .long("strength")
                .value_name("0-1")
                .help("How strongly the conditioning video constrains the output")
                .value_parser(value_parser!(f32))
        )
        .arg(
            Arg::new("steps")
                .long("steps")
                .value_name("NUM")
                .help("Number of inference steps")
                .value_parser(value_parser!(u32))
        )
        .arg(
            Arg::new("guidance")
                .long("guidance")
                .value_name("SCALE")
                .help("Guidance scale")
                .value_parser(value_parser!(f32))
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_name("SEED")
                .help("Seed (-1 for random)")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64))
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory for generated videos")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let config_result = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load_from(path).map(Some),
        None => Ok(Config::load().ok()),
    };
    let (mut config, config_error, using_defaults) = match config_result {
        Ok(Some(config)) => (config, None, false),
        Ok(None) => (Config::from_env(), None, true),
        Err(e) => (Config::from_env(), Some(e), false),
    };

    let filter = if matches.get_flag("verbose") {
        EnvFilter::new("cogstudio=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(e) = config_error {
        return Err(e);
    }
    if using_defaults {
        warn!("No configuration file found, using defaults");
    }

    if let Some(dir) = matches.get_one::<PathBuf>("output-dir") {
        config.output.dir = dir.clone();
    }
    config.validate()?;
    info!("🚀 CogStudio starting...");
    info!("{}", config.summary());

    let context = InferenceContext::from_config(&config)?;
    let dispatcher =
        GenerationDispatcher::new(context, &config).with_progress(Arc::new(LogProgress));

    let prompt = matches.get_one::<String>("prompt").cloned().unwrap_or_default();
    let mut request = GenerationRequest::with_defaults(prompt, &config.generation);
    if let Some(image) = matches.get_one::<PathBuf>("image") {
        request = request.with_image(image);
    }
    if let Some(video) = matches.get_one::<PathBuf>("video") {
        request = request.with_video(video);
    }
    if let Some(strength) = matches.get_one::<f32>("strength") {
        request = request.with_strength(*strength);
    }
    if let Some(steps) = matches.get_one::<u32>("steps") {
        request = request.with_steps(*steps);
    }
    if let Some(guidance) = matches.get_one::<f32>("guidance") {
        request = request.with_guidance_scale(*guidance);
    }
    if let Some(seed) = matches.get_one::<i64>("seed") {
        request = request.with_seed(*seed);
    }

    let outcome = dispatcher.generate(&request).await;

    if let Some(output) = outcome.output() {
        println!("{}", output.display());
    }
    println!("{}", outcome.info());

    if !outcome.is_success() {
        warn!("Generation did not produce a video");
        std::process::exit(1);
    }

    Ok(())
}
