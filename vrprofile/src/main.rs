use std::{fs::File, io::Write};

use anyhow::Context;
use clap::{CommandFactory, Parser, crate_name};
use dialoguer::console::Term;
use vrprofile::{
    Engine,
    cli::{CliContext, print_modules},
    command::{Commands, Options},
    config::{Settings, display_config, load_config},
    embedded,
};

fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    let settings = load_config(&options.common.config)?;
    init_logger(&options, &settings)?;
    log::debug!("parsed options: {options:#?}");

    match options.command {
        Commands::Validate => println!("{}", display_config(&settings)?),
        Commands::ExampleConfig => print_example_config()?,
        Commands::Completion { shell } => {
            let mut command = Options::command();
            clap_complete::generate(shell, &mut command, crate_name!(), &mut std::io::stdout());
        }
        Commands::Modules => print_modules(&Term::stdout())?,
        command => {
            log::debug!("loaded config:\n{}", display_config(&settings)?);
            let engine = Engine::open(settings)?;
            let context = CliContext::new(options.common, engine);
            log::trace!("context = {context:#?}");
            context.run(command)?;
        }
    }
    Ok(())
}

fn print_example_config() -> anyhow::Result<()> {
    let example = embedded::Etc::get("example-config.toml")
        .context("failed to extract embedded example configuration file")?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&example.data)
        .and_then(|()| stdout.flush())
        .context("failed to write example configuration to stdout")
}

fn init_logger(options: &Options, settings: &Settings) -> anyhow::Result<()> {
    let crate_name = crate_name!();

    let mut logger_builder = env_logger::Builder::new();

    // settings file, then RUST_LOG, then command line
    let default_log_level = settings.log_level;
    logger_builder.filter_module(crate_name, default_log_level);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        logger_builder.parse_filters(&filter);
    };
    if options.common.verbose != 0 {
        // each -v is one level above the configured one
        let level = log::LevelFilter::iter()
            .skip_while(|level| *level != default_log_level)
            .nth(options.common.verbose.into())
            .unwrap_or(log::LevelFilter::max());
        logger_builder.filter_module(crate_name, level);
    }
    if let Some(filter) = options.common.log_level {
        logger_builder.filter_module(crate_name, filter);
    }
    if settings.log_to_file {
        let path = settings.log_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {path:?}"))?;
        logger_builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    let builder_debug_info = format!("{logger_builder:?}");
    logger_builder.try_init()?;
    log::debug!("logger initialized with configuration: {builder_debug_info}");
    Ok(())
}
