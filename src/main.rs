use ansi_term::Colour::Red;
use anyhow::{anyhow, Result};
use chrono::Local;
use dbclone::cli::{self, Command};
use dbclone::config::{Config, EngineKind};
use dbclone::gen::gen_pass;
use dbclone::ident::Identifier;
use dbclone::logger::{init_console, init_run_logger};
use dbclone::validate::validate_target;
use dbclone::{engine, run};
use log::{debug, error, info};
use std::path::PathBuf;

fn main() -> Result<()> {
    let args = cli::parse();

    match args.cmd {
        Command::Clone {
            file,
            databases,
            prefix,
            engine,
            dryrun,
        } => {
            let code = clone(file, databases, prefix, engine, dryrun)?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Command::Validate { file } => {
            init_console();
            let invalid = validate_target(&file)?;
            if invalid > 0 {
                return Err(anyhow!("{} invalid config file(s)", invalid));
            }
        }

        Command::GenPass {
            length,
            username,
            password,
        } => gen_pass(length, username, password),
    }

    Ok(())
}

/// Run the clone pipeline, returning the process exit code.
fn clone(
    file: PathBuf,
    databases: Option<Vec<Identifier>>,
    prefix: Option<String>,
    engine_kind: Option<EngineKind>,
    dryrun: bool,
) -> Result<i32> {
    let now = Local::now();
    let config = Config::read(&file)?.with_overrides(engine_kind, databases, prefix)?;

    // logger first, so expansion warnings reach the run log
    let log_file = init_run_logger(config.engine, &config.output, now)?;
    info!("Logging to {}", log_file.display());
    let config = config.expand_env_vars()?;
    debug!("Config:\n{}", config);

    let code = match engine::build(&config, dryrun)
        .and_then(|mut engine| run::run(&config, engine.as_mut(), now))
    {
        Ok(report) => report.exit_code(),
        Err(e) => {
            error!("{}: {:#}", Red.paint("Error"), e);
            1
        }
    };

    log::logger().flush();

    Ok(code)
}
