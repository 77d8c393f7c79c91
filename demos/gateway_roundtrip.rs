//! Example: Drive the request/response gateway from JSON bodies.
//!
//! Reads the endpoint name and a JSON body from the command line, runs it through a
//! gateway built from the environment and prints the response.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example gateway_roundtrip -- fetch-code '{"email":"me@gmx.net","password":"..."}'
//! cargo run --example gateway_roundtrip -- solve-challenge '{}'
//! cargo run --example gateway_roundtrip -- request-code '{"username":"...","authToken":"...","email":"..."}'
//! cargo run --example gateway_roundtrip -- verify '{"username":"...","authToken":"...","email":"...","emailPassword":"..."}'
//! ```

use inbox_verify::{Gateway, GatewayRequest, ServiceConfig};
use std::env;
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

    let mut args = env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "fetch-code".to_string());
    let body = args.next();

    let gateway = Gateway::from_config(&ServiceConfig::from_env()?)?;
    let request = GatewayRequest::new("POST", body);

    let response = match endpoint.as_str() {
        "fetch-code" => gateway.fetch_code(request).await,
        "solve-challenge" => gateway.solve_challenge(request).await,
        "request-code" => gateway.request_code(request).await,
        "verify" => gateway.verify(request).await,
        other => {
            eprintln!("unknown endpoint: {other}");
            std::process::exit(2);
        }
    };

    println!("HTTP {}", response.status);
    for (name, value) in &response.headers {
        println!("{name}: {value}");
    }
    println!();
    println!("{}", response.body);

    Ok(())
}
