//! Example: Solve a challenge through the solving service.
//!
//! # Usage
//!
//! ```bash
//! export CAPTCHA_API_KEY="your-service-key"
//! # Optional
//! export CHALLENGE_SITE_KEY="..."
//! export CHALLENGE_PAGE_URL="https://example.com/login"
//! export RUST_LOG=inbox_verify=debug
//! cargo run --example solve_challenge
//! ```

use inbox_verify::{ChallengeSolver, HttpSolverBackend, ServiceConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> inbox_verify::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("inbox_verify=info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let Some(solver_config) = config.solver else {
        eprintln!("CAPTCHA_API_KEY not configured");
        std::process::exit(1);
    };

    let solver =
        ChallengeSolver::from_config(HttpSolverBackend::new(&solver_config)?, &solver_config);

    println!(
        "Solving challenge on {} (up to {:?})...",
        config.challenge.page_url,
        solver.max_wait()
    );

    match solver
        .solve(&config.challenge.site_key, &config.challenge.page_url)
        .await
    {
        Ok(solved) => {
            println!(
                "Solved after {} polls ({}s)",
                solved.attempts,
                solved.solve_time.as_secs()
            );
            println!("Token: {}", solved.token);
        }
        Err(e) => {
            eprintln!("[{}] {e}", e.category());
            std::process::exit(1);
        }
    }

    Ok(())
}
