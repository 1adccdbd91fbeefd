use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Method;
use std::sync::Arc;

use api_harness::config::{parse_environment_name, CliArgs, Command, Environment};
use api_harness::mock_server::{MockApiConfig, MockApiServer};
use api_harness::{ApiClient, RequestOptions};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let environment = Environment::from_env(parse_environment_name(&args.env));

    // Initialize logging; debug mode raises the default level
    let default_level = if environment.debug_mode { "debug" } else { "info" };
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(default_level)
        .to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    match args.command {
        Command::Mock {
            port,
            username,
            password,
        } => run_mock(port, username, password).await,
        Command::Login {
            username,
            password,
            prompt,
        } => {
            let client = build_client(environment)?;

            let password = if prompt {
                Some(
                    dialoguer::Password::new()
                        .with_prompt("Password")
                        .interact()?,
                )
            } else {
                password
            };

            client
                .login(username.as_deref(), password.as_deref())
                .await
                .context("Login failed")?;

            let expires_at = client.token_manager().expires_at().await;
            println!("✅ Logged in to {}", client.environment().name);
            if let Some(expires_at) = expires_at {
                println!("   Token expires at {}", expires_at.to_rfc3339());
            }

            client.logout().await;
            Ok(())
        }

        Command::Request {
            method,
            endpoint,
            data,
            headers,
        } => {
            let client = build_client(environment)?;
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;

            let body = data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("Request body is not valid JSON")?;

            let mut options = RequestOptions::new();
            for raw in &headers {
                let (name, value) = parse_header_arg(raw)?;
                options = options.header(name, value);
            }

            let response = client.request(method, &endpoint, body, options).await?;

            println!("{} ({}ms)", response.status(), response.elapsed().as_millis());
            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
            Ok(())
        }

        Command::Check => {
            let client = build_client(environment)?;
            let environment = client.environment();
            println!("Environment:  {}", environment.name);
            println!("Base URL:     {}", environment.base_url);
            println!("Timeout:      {}ms", environment.timeout.as_millis());
            println!("Retries:      {}", environment.retry_count);
            println!("Debug Mode:   {}", environment.debug_mode);
            println!("API Key:      {}", configured(environment.api_key.is_some()));
            println!("Credentials:  {}", configured(environment.has_credentials()));
            println!(
                "Static Token: {}",
                configured(environment.static_token.is_some())
            );
            Ok(())
        }
    }
}

fn build_client(environment: Environment) -> Result<ApiClient> {
    environment.validate()?;
    tracing::debug!("Environment: {:?}", environment);

    Ok(ApiClient::from_environment(Arc::new(environment))?)
}

async fn run_mock(port: u16, username: String, password: String) -> Result<()> {
    let mut server = MockApiServer::new(MockApiConfig {
        port,
        username,
        password,
        ..MockApiConfig::default()
    });
    server.start().await?;

    println!("Mock API running at {} (Ctrl-C to stop)", server.url());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Received Ctrl+C signal, shutting down mock API...");
    server.stop();
    Ok(())
}

/// Split a `Name: value` header argument
fn parse_header_arg(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header '{}' must look like 'Name: value'", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn configured(present: bool) -> &'static str {
    if present {
        "configured"
    } else {
        "not set"
    }
}
