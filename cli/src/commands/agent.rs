// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use crate::client::ControllerClient;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List registered agents
    List,

    /// Show one agent by id or name
    Get {
        /// Agent id or unique name
        agent: String,
    },

    /// Remove an agent (idempotent)
    Remove {
        /// Agent id or unique name
        agent: String,
    },

    /// Probe an agent now and report latency
    Ping {
        /// Agent id or unique name
        agent: String,
    },
}

pub async fn handle_command(command: AgentCommand, client: &ControllerClient) -> Result<()> {
    match command {
        AgentCommand::List => {
            let body = client.get("/api/agents").await?;
            let agents = body["agents"].as_array().cloned().unwrap_or_default();
            if agents.is_empty() {
                println!("{}", "No agents registered.".yellow());
                return Ok(());
            }
            for agent in agents {
                println!(
                    "{}  {}  {}  {}",
                    agent["name"].as_str().unwrap_or("?").bold(),
                    status_colored(&agent),
                    agent["base_url"].as_str().unwrap_or("-"),
                    agent["version"].as_str().unwrap_or("-").dimmed(),
                );
            }
        }
        AgentCommand::Get { agent } => {
            let body = client.get(&format!("/api/agents/{}", agent)).await?;
            println!("{}", serde_json::to_string_pretty(&body["agent"])?);
        }
        AgentCommand::Remove { agent } => {
            let body = client.delete(&format!("/api/agents/{}", agent)).await?;
            if body["removed"].as_bool().unwrap_or(false) {
                println!("{} {}", "Removed".green(), agent);
            } else {
                println!("{} {}", "Nothing to remove for".yellow(), agent);
            }
        }
        AgentCommand::Ping { agent } => {
            let body = client
                .post(&format!("/api/agents/{}/ping", agent), &Value::Null)
                .await?;
            let ping = &body["ping"];
            println!(
                "{}  {} ms",
                ping["status"].as_str().unwrap_or("?").bold(),
                ping["latency_ms"]
            );
            if let Some(payload) = ping.get("payload").filter(|p| !p.is_null()) {
                println!("{}", serde_json::to_string_pretty(payload)?);
            }
        }
    }
    Ok(())
}

fn status_colored(agent: &Value) -> colored::ColoredString {
    match agent["status"].as_str().unwrap_or("offline") {
        "online" => "online".green(),
        "degraded" => "degraded".yellow(),
        other => other.red(),
    }
}
