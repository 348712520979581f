//!
//! Validates an access token issued by a Microsoft Entra tenant.
//!
//! In order to run the example call:
//!
//! ```sh
//! ENTRA_CLIENT_ID=xxx ENTRA_TENANT=contoso.onmicrosoft.com ENTRA_TENANT_ID=yyy \
//!   ENTRA_AUDIENCE=api://xxx cargo run --example validate_token -- "Bearer eyJ..."
//! ```
//!

use bearer_token_validator::{bearer_token, IssuerPolicy, TenantConfig, ValidationService};

use std::env;
use std::process::exit;

fn handle_error<T: std::error::Error>(fail: &T, msg: &'static str) -> ! {
    let mut err_msg = format!("ERROR: {}", msg);
    let mut cur_fail: Option<&dyn std::error::Error> = Some(fail);
    while let Some(cause) = cur_fail {
        err_msg += &format!("\n    caused by: {}", cause);
        cur_fail = cause.source();
    }
    println!("{}", err_msg);
    exit(1);
}

fn env_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        println!("Missing the {} environment variable.", name);
        exit(1);
    })
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = TenantConfig::new(
        env_var("ENTRA_CLIENT_ID"),
        env_var("ENTRA_TENANT"),
        env_var("ENTRA_TENANT_ID"),
        env_var("ENTRA_AUDIENCE")
            .split(',')
            .map(|audience| audience.trim().to_string())
            .collect(),
    )
    .unwrap_or_else(|err| handle_error(&err, "Invalid tenant configuration"));

    let service = ValidationService::with_reqwest(config)
        .unwrap_or_else(|err| handle_error(&err, "Failed to build validation service"))
        .set_issuer_policy(IssuerPolicy::all_known_variants())
        .accept_client_id_audience(true);

    let authorization = env::args().nth(1).unwrap_or_else(|| {
        println!("Usage: validate_token \"Bearer <token>\"");
        exit(1);
    });
    let token = bearer_token(&authorization).unwrap_or_else(|| {
        println!("Argument is not a bearer token");
        exit(1);
    });

    match service.validate_access_token(token).await {
        Ok(identity) => {
            println!("Token is valid (signed by key {:?})", identity.key_id());
            for (name, value) in identity.claims() {
                println!("  {} = {}", name, value);
            }
        }
        Err(err) => handle_error(&err, "Token rejected"),
    }
}
