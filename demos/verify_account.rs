//! Example: Run the full verification workflow and print the step ledger.
//!
//! # Usage
//!
//! ```bash
//! export CAPTCHA_API_KEY="your-service-key"
//! export ACCOUNT_SERVICE_URL="https://accounts.example.com/api"
//! export ACCOUNT_USERNAME="@someone"
//! export ACCOUNT_TOKEN="bearer-token"
//! export EMAIL_ADDRESS="someone@gmx.net"
//! export EMAIL_PASSWORD="your-app-password"
//! cargo run --example verify_account
//! ```

use inbox_verify::{
    AccountHandle, ChallengeSolver, HttpAccountService, HttpSolverBackend, ImapConnector,
    MailCredential, MailboxCodeFetcher, ProviderDirectory, RetrievalQuery, ServiceConfig,
    StepPayload, VerificationOrchestrator,
};
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable required"))
}

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
    let solver_config = config.solver.clone().expect("CAPTCHA_API_KEY required");
    let account_url = config
        .account_service_url
        .clone()
        .expect("ACCOUNT_SERVICE_URL required");

    let account = AccountHandle::new(required("ACCOUNT_USERNAME"), required("ACCOUNT_TOKEN"))?;
    let credential = MailCredential::new(&required("EMAIL_ADDRESS"), required("EMAIL_PASSWORD"))?;

    let solver =
        ChallengeSolver::from_config(HttpSolverBackend::new(&solver_config)?, &solver_config);
    let fetcher = MailboxCodeFetcher::new(ImapConnector::new(config.fetcher.clone()));
    let accounts = HttpAccountService::new(account_url, Duration::from_secs(30))?;
    let directory = ProviderDirectory::with_defaults();
    let query = RetrievalQuery::from_senders(&config.senders)?;

    let outcome = VerificationOrchestrator::new(
        &solver,
        &fetcher,
        &accounts,
        &directory,
        &query,
        &config.challenge,
    )
    .with_delivery_wait(config.delivery_wait)
    .run(&account, &credential)
    .await;

    for step in &outcome.steps {
        let extra = match &step.payload {
            Some(StepPayload::Token(_)) => " (token received)".to_string(),
            Some(StepPayload::Code(code)) => format!(" (code {code})"),
            None => String::new(),
        };
        println!("{:<16} {:?}{extra}", step.step.as_str(), step.status);
        if let Some(detail) = &step.detail {
            println!("                 {detail}");
        }
    }

    match outcome.failure {
        None => println!("{} verified", outcome.username),
        Some(e) => {
            eprintln!("Verification failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
