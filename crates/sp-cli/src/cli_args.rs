use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "scriptplay")]
#[command(about = "Plays directories of ScriptPlay script documents")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Play(PlayArgs),
    Resume(ResumeArgs),
}

#[derive(Debug, Args)]
pub(crate) struct PlayArgs {
    #[arg(long = "scripts-dir")]
    pub(crate) scripts_dir: String,
    #[arg(long = "entry", default_value = "main")]
    pub(crate) entry: String,
    #[arg(long = "state-file")]
    pub(crate) state_file: Option<String>,
    #[command(flatten)]
    pub(crate) common: CommonArgs,
}

#[derive(Debug, Args)]
pub(crate) struct ResumeArgs {
    #[arg(long = "scripts-dir")]
    pub(crate) scripts_dir: String,
    #[arg(long = "state-file")]
    pub(crate) state_file: String,
    #[command(flatten)]
    pub(crate) common: CommonArgs,
}

#[derive(Debug, Args)]
pub(crate) struct CommonArgs {
    /// TOML player configuration.
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    /// Skip inter-line delays.
    #[arg(long = "fast")]
    pub(crate) fast: bool,
    #[arg(long = "verbose")]
    pub(crate) verbose: bool,
}
