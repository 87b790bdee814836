use anyhow::Result;
use clap::{Args, Subcommand};
use keystone::KeystoneConfig;

/// Arguments for the Session command
#[derive(Args)]
pub struct SessionArgs {
    #[clap(subcommand)]
    pub command: SessionCommands,
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Create a new session and print its record as JSON
    New {
        /// Lifetime in minutes, defaults to the configured session lifetime
        #[clap(short, long)]
        minutes: Option<i64>,

        /// Initial data as KEY=VALUE pairs; values are parsed as JSON when possible
        #[clap(short, long = "set")]
        set: Vec<String>,
    },
}

pub fn run(config: &KeystoneConfig, args: SessionArgs) -> Result<()> {
    match args.command {
        SessionCommands::New { minutes, set } => {
            let mut session = match minutes {
                Some(m) => keystone::Session::with_lifetime(m),
                None => config.new_session(),
            };

            for pair in set {
                let (key, raw) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got '{}'", pair))?;
                let value = serde_json::from_str::<serde_json::Value>(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
                session.set(key, value);
            }

            println!("{}", serde_json::to_string_pretty(&session.to_record())?);
        }
    }
    Ok(())
}
