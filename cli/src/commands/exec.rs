// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::time::Duration;

use crate::client::ControllerClient;

#[derive(Args)]
pub struct ExecArgs {
    /// Agent id or unique name
    pub agent: String,

    /// Command or script body
    pub command: String,

    /// Execution kind (bash, python, ssh)
    #[arg(long, default_value = "bash")]
    pub kind: String,

    /// Working directory on the agent
    #[arg(long)]
    pub cwd: Option<String>,

    /// Timeout forwarded to the agent, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Follow output until the run reaches a terminal state
    #[arg(long)]
    pub follow: bool,
}

pub async fn handle_command(args: ExecArgs, client: &ControllerClient) -> Result<()> {
    let body = client
        .post(
            &format!("/api/agents/{}/exec", args.agent),
            &json!({
                "kind": args.kind,
                "command": args.command,
                "cwd": args.cwd,
                "timeout_ms": args.timeout_ms,
                "requested_by": "cli",
            }),
        )
        .await?;
    let run_id = body["run_id"].as_str().unwrap_or_default().to_string();
    println!("{} {}", "Run".bold(), run_id);

    if args.follow {
        follow_run(client, &run_id).await?;
    }
    Ok(())
}

/// Poll the persisted run log until the terminal record appears.
async fn follow_run(client: &ControllerClient, run_id: &str) -> Result<()> {
    let mut after = 0i64;
    loop {
        let logs = client
            .get(&format!("/api/runs/{}/logs?after={}", run_id, after))
            .await?;
        for line in logs["logs"].as_array().cloned().unwrap_or_default() {
            after = line["seq"].as_i64().unwrap_or(after);
            let chunk = line["chunk"].as_str().unwrap_or_default();
            if line["stream"] == "stderr" {
                eprintln!("{}", chunk.red());
            } else {
                println!("{}", chunk);
            }
        }

        match client.get(&format!("/api/runs/{}", run_id)).await {
            Ok(body) => {
                let run = &body["run"];
                let status = run["status"].as_str().unwrap_or("?");
                let line = format!(
                    "{} (exit {}, {} ms)",
                    status,
                    run["exit_code"],
                    run["duration_ms"]
                );
                if status == "ok" {
                    println!("{}", line.green());
                } else {
                    println!("{}", line.red());
                }
                return Ok(());
            }
            // Not terminal yet; keep polling.
            Err(_) => tokio::time::sleep(Duration::from_millis(500)).await,
        }
    }
}
