//! Command handlers for the `prov-ctl` CLI

use crate::auth::{AuthSession, AuthStatus, KeyringStore, DEFAULT_LOGIN_TIMEOUT};
use crate::config::Config;
use crate::registry::api::{ItemSubType, RegistryApiError};
use crate::registry::{RegistryClient, ToolInvoker};
use crate::workflow::{EngineReply, Phase, SchemaRegistry, WorkflowEngine, WorkflowError};
use anyhow::Context;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Session key for the local single-user CLI session
const SESSION_KEY: &str = "default";

fn auth_session(config: &Config) -> Arc<AuthSession> {
    Arc::new(AuthSession::new(
        config.auth.clone(),
        Arc::new(KeyringStore::new()),
    ))
}

async fn fresh_token(config: &Config) -> anyhow::Result<String> {
    let session = auth_session(config);
    let credential = session
        .ensure_fresh(SESSION_KEY)
        .await
        .context("authentication required")?;
    Ok(credential.access_token)
}

pub async fn handle_login(config: &Config, no_browser: bool) -> anyhow::Result<()> {
    println!("🔐 Authenticating with {}...\n", config.auth.domain);

    let session = auth_session(config);
    let attempt = session.begin_login(SESSION_KEY).await?;

    println!("   ─────────────────────────────────────");
    println!("   Visit:  {}", attempt.authorize_url);
    println!("   ─────────────────────────────────────\n");

    if no_browser {
        println!("   Please open the URL above to continue.");
    } else if let Err(e) = open::that(&attempt.authorize_url) {
        println!("⚠️  Could not open browser automatically: {}", e);
        println!("   Please open the URL above manually.");
    } else {
        println!("🌐 Browser opened. Waiting for authorization...");
    }
    println!();

    let credential = session.await_callback(attempt, DEFAULT_LOGIN_TIMEOUT).await?;

    println!("\x1b[1;32m✅ Authentication successful!\x1b[0m");
    if let Some(expires_at) = credential.expires_at {
        println!("   Session valid until {}", expires_at.to_rfc3339());
    }
    Ok(())
}

pub async fn handle_logout(config: &Config) -> anyhow::Result<()> {
    let session = auth_session(config);
    session.logout(SESSION_KEY).await;
    println!("Logged out.");
    Ok(())
}

pub fn handle_status(config: &Config) -> anyhow::Result<()> {
    let session = auth_session(config);
    match session.status(SESSION_KEY) {
        AuthStatus::NotAuthenticated => {
            println!("Not authenticated. Run `prov-ctl auth login`.");
        }
        AuthStatus::Expired => {
            println!("Session expired. Run `prov-ctl auth login`.");
        }
        AuthStatus::Authenticated { expires_at } => match expires_at {
            Some(at) => println!("Authenticated (token expires {})", at.to_rfc3339()),
            None => println!("Authenticated"),
        },
    }
    Ok(())
}

pub async fn handle_search(
    config: &Config,
    query: &str,
    subtype: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let subtype_filter = match subtype {
        Some(raw) => match ItemSubType::parse(raw) {
            Some(parsed) => Some(parsed),
            None => {
                return Err(RegistryApiError::InvalidSubtype {
                    given: raw.to_string(),
                    valid: ItemSubType::valid_names(),
                }
                .into());
            }
        },
        None => None,
    };

    let token = fresh_token(config).await?;
    let client = RegistryClient::new(config.registry.clone())?;
    let candidates = client.search(&token, query, subtype_filter, limit).await?;

    if candidates.is_empty() {
        println!("No matches for \"{}\".", query);
        return Ok(());
    }
    println!("{} result(s) for \"{}\":", candidates.len(), query);
    for candidate in candidates {
        let subtype = candidate.subtype.as_deref().unwrap_or("?");
        println!(
            "  {:<28} {:<12} score {:.2}  {}",
            candidate.label,
            subtype,
            candidate.score,
            crate::handle_url(&candidate.id),
        );
    }
    Ok(())
}

pub async fn handle_fetch(config: &Config, id: &str) -> anyhow::Result<()> {
    let token = fresh_token(config).await?;
    let client = RegistryClient::new(config.registry.clone())?;
    let item = client.fetch_item(&token, id).await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

pub async fn handle_list(config: &Config, page_size: usize) -> anyhow::Result<()> {
    let token = fresh_token(config).await?;
    let client = RegistryClient::new(config.registry.clone())?;
    let (items, total) = client.list_items(&token, page_size).await?;

    for item in &items {
        let name = item
            .get("display_name")
            .and_then(|v| v.as_str())
            .unwrap_or("(unnamed)");
        let subtype = item
            .get("item_subtype")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        println!("  {:<28} {:<28} {}", name, subtype, id);
    }
    match total {
        Some(total) => println!("Showing {} of {} items.", items.len(), total),
        None => println!("Showing {} items.", items.len()),
    }
    Ok(())
}

pub async fn handle_count(config: &Config) -> anyhow::Result<()> {
    let token = fresh_token(config).await?;
    let client = RegistryClient::new(config.registry.clone())?;
    let counts = client.item_counts(&token).await?;

    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1));
    let total: u64 = counts.values().sum();
    for (subtype, count) in sorted {
        println!("  {:<32} {}", subtype.to_lowercase(), count);
    }
    println!("  {:<32} {}", "total", total);
    Ok(())
}

pub fn handle_operations() -> anyhow::Result<()> {
    let registry = SchemaRegistry::builtin();
    println!("Supported registration operations:\n");
    for schema in registry.operations() {
        let required = schema.required_keys();
        println!("  {:<38} {}", schema.name, schema.description);
        println!("  {:<38} required: {}\n", "", required.join(", "));
    }
    println!("Run one with: prov-ctl register <operation>");
    Ok(())
}

pub async fn handle_register(config: &Config, operation: &str) -> anyhow::Result<()> {
    let session = auth_session(config);
    let client = Arc::new(RegistryClient::new(config.registry.clone())?);
    let schemas = Arc::new(SchemaRegistry::builtin());
    let invoker = Arc::new(ToolInvoker::new(
        session,
        client,
        schemas.clone(),
        SESSION_KEY,
    ));

    let mut engine = WorkflowEngine::new(schemas, invoker.clone(), invoker);
    let mut reply = engine.start(operation)?;

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        match &reply {
            EngineReply::Prompt { message, .. } => {
                print!("{}\n> ", message);
            }
            EngineReply::Candidates { query, candidates, .. } => {
                println!("Matches for \"{}\":", query);
                for (i, candidate) in candidates.iter().enumerate() {
                    let subtype = candidate.subtype.as_deref().unwrap_or("?");
                    println!(
                        "  {}) {} [{}] {}",
                        i + 1,
                        candidate.label,
                        subtype,
                        crate::handle_url(&candidate.id),
                    );
                }
                print!("Pick a number, or type a new query\n> ");
            }
            EngineReply::Summary { rendered, .. } => {
                print!("\n{}\n> ", rendered);
            }
            EngineReply::ReturnedToSummary { status, body, rendered } => {
                println!("\x1b[1;31mThe registry rejected the call ({}): {}\x1b[0m", status, body);
                println!("Revise a field with `revise <name>`, or answer yes/no.");
                print!("\n{}\n> ", rendered);
            }
            EngineReply::Completed { outcome } => {
                println!("\x1b[1;32m✅ Registered successfully!\x1b[0m");
                if let Some(url) = &outcome.handle_url {
                    println!("   {}", url);
                } else if let Some(id) = &outcome.id {
                    println!("   Job session: {} (registration is asynchronous)", id);
                }
                return Ok(());
            }
            EngineReply::Cancelled => {
                println!("Cancelled. Nothing was registered.");
                return Ok(());
            }
        }
        std::io::stdout().flush().ok();

        let Some(line) = lines.next() else {
            engine.cancel();
            println!("\nInput closed. Nothing was registered.");
            return Ok(());
        };
        let input = line.context("failed to read input")?;
        let input = input.trim().to_string();

        reply = if engine.phase() == Some(Phase::AwaitingConfirmation) {
            match input.to_lowercase().as_str() {
                "yes" | "y" => match engine.confirm(true).await {
                    Ok(reply) => reply,
                    Err(WorkflowError::Invoke(e)) => {
                        println!("\x1b[1;31m{}\x1b[0m", e);
                        println!("Resolve the problem, then answer yes/no again.");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
                "no" | "n" => engine.confirm(false).await?,
                "cancel" => engine.cancel(),
                other if other.starts_with("revise ") => {
                    let key = other.trim_start_matches("revise ").trim();
                    match engine.revise(key) {
                        Ok(reply) => reply,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    }
                }
                _ => {
                    println!("Please answer yes or no (or `revise <field>` / `cancel`).");
                    continue;
                }
            }
        } else {
            engine.submit(&input).await?
        };
    }
}
