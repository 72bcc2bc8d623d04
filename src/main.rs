use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use epub_voice_prep::{Config, LinkMode, Preparer};

fn cli() -> Command {
    Command::new("prepare")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Prepares MaryTTS voice-building data from an EPUB 3 audiobook with media overlays")
        .arg(
            Arg::new("epub")
                .value_name("EPUB")
                .help("Path to ePub 3 audio-ebook")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("output_dir")
                .value_name("OUTPUT_DIR")
                .help("Path to output directory")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("subs")
                .long("subs")
                .value_name("PROFILE")
                .help("Name of regex substitution profile"),
        )
        .arg(
            Arg::new("sample-rate")
                .long("sample-rate")
                .value_name("HZ")
                .help("Sample rate of the emitted WAV files")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("copy")
                .long("copy")
                .help("Copy files into marytts/ instead of symlinking them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-textgrid")
                .long("no-textgrid")
                .help("Do not write TextGrid alignment files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Print DEBUG messages to console")
                .action(ArgAction::SetTrue),
        )
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(subs) = matches.get_one::<String>("subs") {
        config.subs = subs.clone();
    }
    if let Some(&rate) = matches.get_one::<u32>("sample-rate") {
        config.sample_rate = rate;
    }
    if matches.get_flag("copy") {
        config.link_mode = LinkMode::Copy;
    }
    if matches.get_flag("no-textgrid") {
        config.write_textgrid = false;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("prepare={level},epub_voice_prep={level}", level = level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let debug_enabled = matches.get_flag("debug");
    init_logging(debug_enabled);

    let config = load_config(&matches)?;
    debug!("{:?}", config);

    let (Some(epub_path), Some(output_dir)) = (
        matches.get_one::<PathBuf>("epub"),
        matches.get_one::<PathBuf>("output_dir"),
    ) else {
        anyhow::bail!("EPUB and OUTPUT_DIR are required");
    };

    let start_time = Instant::now();
    let preparer = Preparer::new(config)?.with_progress(!debug_enabled);

    info!("Preparing {} into {}", epub_path.display(), output_dir.display());
    let summary = preparer
        .run(epub_path, output_dir)
        .with_context(|| format!("Failed to prepare {}", epub_path.display()))?;

    println!(
        "✅ {} segments from {} audio files ({:.1}s of speech, {} skipped) in {:.2?}",
        summary.segments,
        summary.audio_files.len(),
        summary.total_seconds,
        summary.skipped,
        start_time.elapsed()
    );
    println!("📁 Output saved to: {}", output_dir.display());

    Ok(())
}
