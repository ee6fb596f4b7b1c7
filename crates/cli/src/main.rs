// Chatvoice CLI
//
// Design Decision: Use clap derive with env fallbacks so the same flags work from a .env file.
// Design Decision: A failed line is logged and skipped; the process never aborts mid-batch.
// Design Decision: Logs go to stderr, results to stdout, so output stays pipeable.

mod commands;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chatvoice_speech::{HostCommandConfig, SpeechPoolConfig};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatvoice")]
#[command(about = "Chatvoice CLI - Turn chat lines into speech through a pool of synthesis hosts")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub host: HostArgs,

    /// Maximum number of speech hosts to run at once
    #[arg(long, env = "SPEECH_POOL_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to start a speech host
///
/// Flags override the `SPEECH_HOST_*` environment variables.
#[derive(Args, Default)]
pub struct HostArgs {
    /// Speech host executable
    #[arg(long = "host-command")]
    pub command: Option<String>,

    /// Extra argument for the host (repeatable, replaces SPEECH_HOST_ARGS)
    #[arg(long = "host-arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Flag the host expects before its port number
    #[arg(long = "port-flag")]
    pub port_flag: Option<String>,

    /// Milliseconds a host may take to start accepting connections
    #[arg(long)]
    pub startup_timeout_ms: Option<u64>,

    /// Milliseconds between connection attempts during startup
    #[arg(long)]
    pub connect_interval_ms: Option<u64>,
}

impl HostArgs {
    /// Apply the flags on top of the environment configuration
    fn resolve(&self, from_env: Option<HostCommandConfig>) -> Result<HostCommandConfig> {
        let mut config = match (&self.command, from_env) {
            (Some(command), Some(env)) => HostCommandConfig {
                program: command.clone(),
                ..env
            },
            (Some(command), None) => HostCommandConfig::new(command),
            (None, Some(env)) => env,
            (None, None) => anyhow::bail!(
                "No speech host configured; pass --host-command or set SPEECH_HOST_COMMAND"
            ),
        };

        if !self.args.is_empty() {
            config.args = self.args.clone();
        }
        if let Some(flag) = &self.port_flag {
            config = config.with_port_flag(flag);
        }
        if let Some(ms) = self.startup_timeout_ms {
            config = config.with_startup_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.connect_interval_ms {
            config = config.with_connect_interval(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize lines of text and write one audio file per line
    Speak {
        /// Lines to speak; each one becomes a separate request
        #[arg(required = true)]
        lines: Vec<String>,

        /// Directory for the audio files
        #[arg(long, short = 'd', default_value = ".")]
        out_dir: PathBuf,

        /// Voice name passed to the host
        #[arg(long, env = "CHATVOICE_VOICE")]
        voice: Option<String>,

        /// Language tag
        #[arg(long, env = "CHATVOICE_LANG", default_value = "en-US")]
        lang: String,

        /// Speaking rate, e.g. "fast" or "+10%"
        #[arg(long)]
        rate: Option<String>,
    },

    /// Start one speech host, run the handshake and report it
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatvoice=info,chatvoice_speech=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::parse(&cli.output);

    let mut pool_config =
        SpeechPoolConfig::from_env().context("Failed to load speech pool configuration")?;
    if cli.max_workers.is_some() {
        pool_config = pool_config.with_max_workers(cli.max_workers);
    }
    let host_env =
        HostCommandConfig::from_env().context("Failed to load speech host configuration")?;
    let host_config = cli.host.resolve(host_env)?;

    match cli.command {
        Commands::Speak {
            lines,
            out_dir,
            voice,
            lang,
            rate,
        } => {
            let options = commands::speak::SpeakOptions {
                out_dir,
                voice,
                lang,
                rate,
            };
            commands::speak::run(
                pool_config,
                host_config,
                lines,
                &options,
                output_format,
                cli.quiet,
            )
            .await
        }
        Commands::Probe => commands::probe::run(pool_config, host_config, output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_config() -> HostCommandConfig {
        HostCommandConfig::new("env-host")
            .with_arg("--voices")
            .with_arg("/srv/voices")
            .with_connect_interval(Duration::from_millis(25))
    }

    #[test]
    fn test_env_config_used_without_flags() {
        let config = HostArgs::default().resolve(Some(env_config())).unwrap();
        assert_eq!(config, env_config());
    }

    #[test]
    fn test_flags_override_env() {
        let args = HostArgs {
            command: Some("flag-host".to_string()),
            port_flag: Some("-p".to_string()),
            startup_timeout_ms: Some(500),
            ..Default::default()
        };

        let config = args.resolve(Some(env_config())).unwrap();

        assert_eq!(config.program, "flag-host");
        assert_eq!(config.command_args(9000), vec!["--voices", "/srv/voices", "-p", "9000"]);
        assert_eq!(config.startup_timeout, Duration::from_millis(500));
        assert_eq!(config.connect_interval, Duration::from_millis(25));
    }

    #[test]
    fn test_flag_args_replace_env_args() {
        let args = HostArgs {
            args: vec!["--quiet".to_string()],
            ..Default::default()
        };

        let config = args.resolve(Some(env_config())).unwrap();

        assert_eq!(config.program, "env-host");
        assert_eq!(config.args, vec!["--quiet"]);
    }

    #[test]
    fn test_missing_host_is_an_error() {
        assert!(HostArgs::default().resolve(None).is_err());

        let config = HostArgs {
            command: Some("speech-host".to_string()),
            ..Default::default()
        }
        .resolve(None)
        .unwrap();
        assert_eq!(config, HostCommandConfig::new("speech-host"));
    }
}
