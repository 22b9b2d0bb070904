//! Health check command - checks a running vaultsync server.

use std::time::Duration;

use crate::cli::HealthArgs;

/// The `/health` URL for a base URL that may or may not already name it.
fn health_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/health") {
        base.to_string()
    } else {
        format!("{base}/health")
    }
}

/// Run the health check command
pub async fn run(args: &HealthArgs) -> Result<(), Box<dyn std::error::Error>> {
    let url = health_url(&args.url);
    let timeout = Duration::from_secs(args.timeout);

    let client = reqwest::Client::builder().timeout(timeout).build()?;

    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = response.json().await?;
            let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("");
            if status == "healthy" {
                let backend = body.get("backend").and_then(|s| s.as_str()).unwrap_or("?");
                println!("healthy ({backend})");
                Ok(())
            } else {
                eprintln!("unhealthy: server returned status {status}");
                std::process::exit(1);
            }
        }
        Ok(response) => {
            eprintln!("unhealthy: server returned HTTP status {}", response.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("unhealthy: failed to connect to {url}: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_forms() {
        assert_eq!(health_url("http://h:3000"), "http://h:3000/health");
        assert_eq!(health_url("http://h:3000/"), "http://h:3000/health");
        assert_eq!(health_url("http://h:3000/health"), "http://h:3000/health");
    }
}
