use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use sp_api::{create_player, CreatePlayerOptions};
use sp_core::{PlayResult, PlayStatus, PlayerError};
use sp_runtime::{PlayerConfig, ScriptPlayer, StatePersistence};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli_args;
mod console;
mod error_map;
mod logging;
mod state_store;

pub(crate) use cli_args::{Cli, CommonArgs, Mode, PlayArgs, ResumeArgs};
pub(crate) use console::ConsoleTextRenderer;
pub(crate) use error_map::{
    emit_error, map_cli_runtime, map_cli_state_read, map_cli_state_write, CliError,
};
pub(crate) use logging::init_logging;
pub(crate) use state_store::{FileStateStore, RESUME_KEY};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => return emit_error(map_cli_runtime(error)),
    };
    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Mode::Play(args) => run_play(args).await,
        Mode::Resume(args) => run_resume(args).await,
    }
}

async fn run_play(args: PlayArgs) -> Result<i32, CliError> {
    init_logging(args.common.verbose);
    let store = args
        .state_file
        .as_deref()
        .map(|path| Arc::new(FileStateStore::new(path)));
    let player = build_player(&args.scripts_dir, &args.common, store.clone())?;

    let result = player
        .play_named(&args.entry, cancel_on_ctrl_c())
        .await?;
    finish(&player, result, store.as_deref()).await
}

async fn run_resume(args: ResumeArgs) -> Result<i32, CliError> {
    init_logging(args.common.verbose);
    let store = Arc::new(FileStateStore::new(&args.state_file));
    if !store.path().exists() {
        return Err(CliError::new(
            "CLI_STATE_NOT_FOUND",
            format!("State file does not exist: {}", store.path().display()),
        ));
    }
    let player = build_player(&args.scripts_dir, &args.common, Some(Arc::clone(&store)))?;

    let saved = player.load_execution_state(RESUME_KEY).await?;
    apply_fast(&player, &args.common);
    info!(
        script = saved.snapshot.script_name.as_deref().unwrap_or_default(),
        line = saved.snapshot.current_line_index,
        saved_at = %saved.saved_at,
        "resuming"
    );

    let result = player
        .play_from_line(player.current_line_index(), cancel_on_ctrl_c())
        .await?;
    finish(&player, result, Some(store.as_ref())).await
}

fn build_player(
    scripts_dir: &str,
    common: &CommonArgs,
    store: Option<Arc<FileStateStore>>,
) -> Result<ScriptPlayer, CliError> {
    let mut config = match &common.config {
        Some(path) => PlayerConfig::from_file(Path::new(path))?,
        None => PlayerConfig::default(),
    };
    if common.fast {
        config.line_delay_ms = 0;
    }

    let mut options = CreatePlayerOptions::new(scripts_dir);
    options.config = config;
    options.renderer = Some(Arc::new(ConsoleTextRenderer));
    options.persistence = store.map(|store| store as Arc<dyn StatePersistence>);
    let player = create_player(options)?;
    apply_fast(&player, common);
    Ok(player)
}

fn apply_fast(player: &ScriptPlayer, common: &CommonArgs) {
    if common.fast {
        player.fast_forward(player.config().max_fast_forward_speed);
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping playback");
            trigger.cancel();
        }
    });
    cancel
}

/// Saves or clears the resume point and prints the outcome.
async fn finish(
    player: &ScriptPlayer,
    result: PlayResult,
    store: Option<&FileStateStore>,
) -> Result<i32, CliError> {
    let state_out = match store {
        Some(store) if result.status != PlayStatus::Success => {
            player
                .save_execution_state(Some(RESUME_KEY.to_string()))
                .await?;
            Some(store.path().display().to_string())
        }
        Some(store) => {
            store.delete(RESUME_KEY).await?;
            None
        }
        None => None,
    };

    if result.status == PlayStatus::Failure {
        let error = result
            .error
            .unwrap_or_else(|| PlayerError::Internal("play failed without an error".to_string()));
        return Err(error.into());
    }

    emit_result(&result, state_out);
    Ok(0)
}

fn status_name(status: PlayStatus) -> &'static str {
    match status {
        PlayStatus::Success => "SUCCESS",
        PlayStatus::Stopped => "STOPPED",
        PlayStatus::Cancelled => "CANCELLED",
        PlayStatus::Failure => "FAILURE",
    }
}

fn emit_result(result: &PlayResult, state_out: Option<String>) {
    println!("RESULT:OK");
    println!("STATUS:{}", status_name(result.status));
    println!("LINES:{}", result.lines_executed);
    println!("COMMANDS:{}", result.commands_executed);
    println!(
        "STATE_OUT:{}",
        state_out.unwrap_or_else(|| "NONE".to_string())
    );
}

#[cfg(test)]
mod cli_test_support;
