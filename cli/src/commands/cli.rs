use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "toolrun", version, about = "Drive tool scripts on a script engine")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ./toolrun.toml when present).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Engine base URL, overrides config and TOOLRUN_ENGINE_URL.
    #[arg(long, global = true)]
    pub engine_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a script file.
    Run(RunArgs),
    /// Evaluate inline instructions as an anonymous tool.
    Eval(EvalArgs),
    /// List the engine's built-in tools.
    Tools,
    /// List models available to the engine.
    Models,
    /// Print client and engine versions.
    Version,
    /// Parse a script file and print it back in canonical form.
    Fmt(FmtArgs),
}

/// Options shared by `run` and `eval`.
#[derive(ClapArgs, Debug, Clone)]
pub struct ExecArgs {
    #[arg(long)]
    pub input: Option<String>,

    /// Ask before sensitive calls.
    #[arg(long, default_value_t = false)]
    pub confirm: bool,

    #[arg(long, default_value_t = false)]
    pub disable_cache: bool,

    /// Keep the conversation going while the script asks for more input.
    #[arg(long, default_value_t = false)]
    pub chat: bool,

    /// Extra environment variables for the engine (KEY=VALUE).
    /// Can be specified multiple times.
    #[arg(long = "env", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    #[arg(long)]
    pub workspace: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    pub file: String,

    /// Entry tool when the file defines several.
    #[arg(long)]
    pub sub_tool: Option<String>,

    #[command(flatten)]
    pub exec: ExecArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EvalArgs {
    pub instructions: String,

    /// Tool the instructions may call. Can be specified multiple times.
    #[arg(long = "tool", action = clap::ArgAction::Append)]
    pub tools: Vec<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[command(flatten)]
    pub exec: ExecArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FmtArgs {
    pub file: String,
}
