use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;

const TOKEN_FILE: &str = ".notes_token";

#[derive(Parser)]
#[command(name = "notes-cli")]
#[command(about = "CLI for the tenant notes API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:5000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Me,
    ListNotes,
    GetNote {
        #[arg(short, long)]
        id: String,
    },
    CreateNote {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        content: String,
    },
    UpdateNote {
        #[arg(short, long)]
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },
    DeleteNote {
        #[arg(short, long)]
        id: String,
    },
    Tenant {
        #[arg(short, long)]
        slug: String,
    },
    Upgrade {
        #[arg(short, long)]
        slug: String,
    },
    Logout,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authed(request: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    request.bearer_auth(token.trim())
}

async fn print_response(request: RequestBuilder) -> Result<(), reqwest::Error> {
    let res = request.send().await?;
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(text);
    println!("{status}\n{body}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = format!("{}/api", cli.url.trim_end_matches('/'));

    match cli.command {
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{api}/auth/login"))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {TOKEN_FILE}");
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Me => print_response(authed(client.get(format!("{api}/auth/me")))).await?,
        Commands::ListNotes => print_response(authed(client.get(format!("{api}/notes")))).await?,
        Commands::GetNote { id } => {
            print_response(authed(client.get(format!("{api}/notes/{id}")))).await?
        }
        Commands::CreateNote { title, content } => {
            let req = client
                .post(format!("{api}/notes"))
                .json(&json!({ "title": title, "content": content }));
            print_response(authed(req)).await?
        }
        Commands::UpdateNote { id, title, content } => {
            let mut body = Map::new();
            if let Some(title) = title {
                body.insert("title".into(), Value::String(title));
            }
            if let Some(content) = content {
                body.insert("content".into(), Value::String(content));
            }
            let req = client.put(format!("{api}/notes/{id}")).json(&body);
            print_response(authed(req)).await?
        }
        Commands::DeleteNote { id } => {
            print_response(authed(client.delete(format!("{api}/notes/{id}")))).await?
        }
        Commands::Tenant { slug } => {
            print_response(authed(client.get(format!("{api}/tenants/{slug}")))).await?
        }
        Commands::Upgrade { slug } => {
            print_response(authed(client.post(format!("{api}/tenants/{slug}/upgrade")))).await?
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
    }

    Ok(())
}
