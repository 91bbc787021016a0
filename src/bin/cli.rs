//! Command-line client for the featurevote HTTP API

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use featurevote::common::auth::TokenPair;
use featurevote::coordinator::accounts::UserView;
use featurevote::coordinator::registry::{FeatureView, VoteView};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "featurevote")]
#[command(about = "featurevote command-line client")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    /// Access token
    #[arg(long, env = "FEATUREVOTE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        username: String,
        email: String,
        /// Prompted for when omitted
        #[arg(long, env = "FEATUREVOTE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Obtain an access/refresh token pair
    Login {
        username: String,
        #[arg(long, env = "FEATUREVOTE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Print only the access token
        #[arg(long)]
        access_only: bool,
    },

    /// List features, newest first
    List,

    /// Show one feature
    Show { id: Uuid },

    /// Propose a feature
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Upvote a feature
    Upvote { id: Uuid },

    /// Remove your upvote
    Unvote { id: Uuid },

    /// Delete a feature and its votes
    Delete { id: Uuid },
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn new(base: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> anyhow::Result<Response> {
        let response = builder.send().await.context("request failed")?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let detail = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
        bail!("{} ({})", detail, status.as_u16())
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = self.send(builder).await?;
        response.json().await.context("invalid response body")
    }
}

fn password_or_prompt(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_feature(f: &FeatureView) {
    let author = f
        .created_by
        .as_ref()
        .map(|u| u.username.as_str())
        .unwrap_or("-");
    let voted = if f.has_voted { " (voted)" } else { "" };
    println!("{}  [{:?}]  {} votes{}", f.id, f.status, f.vote_count, voted);
    println!("  {}", f.title);
    if !f.description.is_empty() {
        println!("  {}", f.description);
    }
    println!("  by {} at {}", author, f.created_at.format("%Y-%m-%d %H:%M"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let client = Client::new(&cli.server, cli.token);

    match cli.command {
        Commands::Register {
            username,
            email,
            password,
        } => {
            let password = password_or_prompt(password)?;
            let user: UserView = client
                .json(client.request(Method::POST, "/api/users/register").json(&json!({
                    "username": username,
                    "email": email,
                    "password": password,
                })))
                .await?;
            println!("Registered {} ({})", user.username, user.id);
        }

        Commands::Login {
            username,
            password,
            access_only,
        } => {
            let password = password_or_prompt(password)?;
            let pair: TokenPair = client
                .json(client.request(Method::POST, "/api/token").json(&json!({
                    "username": username,
                    "password": password,
                })))
                .await?;
            if access_only {
                println!("{}", pair.access);
            } else {
                println!("access:  {}", pair.access);
                println!("refresh: {}", pair.refresh);
            }
        }

        Commands::List => {
            let features: Vec<FeatureView> = client
                .json(client.request(Method::GET, "/api/features"))
                .await?;
            if features.is_empty() {
                println!("No features yet");
            }
            for f in &features {
                print_feature(f);
            }
        }

        Commands::Show { id } => {
            let feature: FeatureView = client
                .json(client.request(Method::GET, &format!("/api/features/{}", id)))
                .await?;
            print_feature(&feature);
        }

        Commands::Create { title, description } => {
            let feature: FeatureView = client
                .json(client.request(Method::POST, "/api/features").json(&json!({
                    "title": title,
                    "description": description,
                })))
                .await?;
            println!("Created {}", feature.id);
        }

        Commands::Upvote { id } => {
            let vote: VoteView = client
                .json(client.request(Method::POST, &format!("/api/features/{}/upvote", id)))
                .await?;
            println!(
                "Upvoted \"{}\" ({} votes)",
                vote.feature.title, vote.feature.vote_count
            );
        }

        Commands::Unvote { id } => {
            client
                .send(client.request(Method::POST, &format!("/api/features/{}/unvote", id)))
                .await?;
            println!("Vote removed");
        }

        Commands::Delete { id } => {
            client
                .send(client.request(Method::DELETE, &format!("/api/features/{}", id)))
                .await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}
