//! `declutter status` -- query a running server.
//!
//! ```text
//! declutter status              # all sessions
//! declutter status kitchen      # one session
//! declutter status --url http://10.0.0.5:8080
//! ```

use clap::Args;

use super::load_config;

/// Arguments for the `declutter status` subcommand.
#[derive(Args)]
pub struct StatusArgs {
    /// Session id; lists all sessions when omitted.
    pub session_id: Option<String>,

    /// Server base URL (defaults to the configured API address).
    #[arg(long)]
    pub url: Option<String>,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

fn endpoint(base: &str, session_id: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match session_id {
        Some(id) => format!("{base}/api/sessions/{id}"),
        None => format!("{base}/api/sessions"),
    }
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let base = match args.url {
        Some(url) => url,
        None => {
            let config = load_config(args.config.as_deref()).await?;
            format!("http://{}", config.api.bind_addr())
        }
    };
    let url = endpoint(&base, args.session_id.as_deref());

    let response = reqwest::get(&url)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach {url}: {e}"))?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("request failed");
        anyhow::bail!("{status}: {msg}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
