// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use uuid::Uuid;

use crate::client::ControllerClient;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Create a new config version from a JSON or YAML document
    Create {
        /// Scope: global, group or agent
        #[arg(long)]
        scope: String,

        /// Ref id (required for group/agent scope)
        #[arg(long)]
        ref_id: Option<Uuid>,

        /// Optional config name
        #[arg(long)]
        name: Option<String>,

        /// Document file (.json or .yaml)
        file: PathBuf,
    },

    /// Pin an existing config row to an agent
    Assign {
        /// Agent id or unique name
        #[arg(long)]
        agent: String,

        /// Config row id
        #[arg(long)]
        config_id: Uuid,
    },

    /// Show the effective configuration for an agent
    Effective {
        /// Agent id or unique name
        agent: String,
    },
}

pub async fn handle_command(command: ConfigCommand, client: &ControllerClient) -> Result<()> {
    match command {
        ConfigCommand::Create {
            scope,
            ref_id,
            name,
            file,
        } => {
            let document = read_document(&file)?;
            let body = client
                .post(
                    "/api/configs",
                    &json!({
                        "scope": scope,
                        "ref_id": ref_id,
                        "name": name,
                        "document": document,
                    }),
                )
                .await?;
            let config = &body["config"];
            println!(
                "{} {} ({} v{})",
                "Created".green(),
                config["id"].as_str().unwrap_or("?"),
                config["scope"].as_str().unwrap_or("?"),
                config["version"]
            );
        }
        ConfigCommand::Assign { agent, config_id } => {
            let body = client
                .post(
                    "/api/configs/assign",
                    &json!({ "agent": agent, "config_id": config_id }),
                )
                .await?;
            println!(
                "{} effective_version {}",
                "Assigned".green(),
                body["assignment"]["effective_version"]
            );
        }
        ConfigCommand::Effective { agent } => {
            let body = client
                .get(&format!("/api/agents/{}/config/effective", agent))
                .await?;
            println!("{}", serde_json::to_string_pretty(&body["effective"])?);
        }
    }
    Ok(())
}

fn read_document(path: &PathBuf) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid YAML in {}", path.display()))
    }
}
