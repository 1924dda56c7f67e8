// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface of the `escrow` client.

use std::io::Write;

use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use escrow_core::config::{ENV_AUTH_PASS, ENV_AUTH_USER};
use escrow_core::error::{EscrowError, Result};

use crate::client::{DEFAULT_SERVER, EscrowClient};

/// Actor recorded for writes made from the command line without `--actor`.
pub const DEFAULT_CLI_ACTOR: &str = "manual";

#[derive(Debug, Parser)]
#[command(name = "escrow", version, about = "Client for the credential escrow service")]
pub struct Cli {
    /// Server base URL.
    #[arg(long, global = true, env = "ESCROW_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Basic auth user name.
    #[arg(long, global = true, env = ENV_AUTH_USER)]
    pub user: Option<String>,

    /// Basic auth password.
    #[arg(long, global = true, env = ENV_AUTH_PASS, hide_env_values = true)]
    pub pass: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the current administrator password of a host.
    Fetch { host: String },

    /// Store a new administrator password for a host.
    Rotate {
        host: String,
        password: String,
        /// Who performed the rotation.
        #[arg(long, default_value = DEFAULT_CLI_ACTOR)]
        actor: String,
    },

    /// Print the current BitLocker recovery key of a host.
    Bde { host: String },

    /// Store a new BitLocker recovery key for a host.
    #[command(alias = "update_key")]
    UpdateKey {
        host: String,
        key: String,
        /// Who provided the key.
        #[arg(long, default_value = DEFAULT_CLI_ACTOR)]
        actor: String,
    },

    /// Print the client version.
    Version,
}

impl Cli {
    pub fn client(&self) -> Result<EscrowClient> {
        let client = EscrowClient::new(&self.server)?;
        Ok(match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => client.with_basic_auth(user, pass),
            (None, None) => client,
            _ => {
                return Err(EscrowError::Config(
                    "--user and --pass must be given together".into(),
                ));
            }
        })
    }
}

fn io_err(e: std::io::Error) -> EscrowError {
    EscrowError::Io(e)
}

/// Run one command, writing its human-readable output to `out`.
pub async fn execute(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Version => {
            writeln!(out, "escrow {}", env!("CARGO_PKG_VERSION")).map_err(io_err)?;
        }
        Command::Fetch { host } => {
            let info = cli.client()?.fetch_password(host).await?;
            writeln!(out, "Password:   {}", info.password).map_err(io_err)?;
            writeln!(
                out,
                "RotatedAt:  {}",
                info.rotated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
            .map_err(io_err)?;
            writeln!(out, "Actor:      {}", info.actor).map_err(io_err)?;
        }
        Command::Bde { host } => {
            let info = cli.client()?.fetch_bde_key(host).await?;
            writeln!(out, "Key:        {}", info.key).map_err(io_err)?;
            writeln!(
                out,
                "UpdatedAt:  {}",
                info.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
            .map_err(io_err)?;
            writeln!(out, "Actor:      {}", info.actor).map_err(io_err)?;
        }
        Command::Rotate {
            host,
            password,
            actor,
        } => {
            let ack = cli
                .client()?
                .rotate_password(host, password, Some(actor))
                .await?;
            writeln!(out, "{}", serde_json::to_string(&ack)?).map_err(io_err)?;
        }
        Command::UpdateKey { host, key, actor } => {
            let ack = cli.client()?.update_key(host, key, Some(actor)).await?;
            writeln!(out, "{}", serde_json::to_string(&ack)?).map_err(io_err)?;
        }
    }
    Ok(())
}
