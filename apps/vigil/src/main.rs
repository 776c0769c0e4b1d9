//! # Vigil - Gated Training Pipeline
//!
//! The main binary for the Vigil training and promotion pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   apps/vigil (THE BINARY)                │
//! │                                                          │
//! │   ┌─────────────┐            ┌──────────────────────┐    │
//! │   │    CLI      │            │   Config loading     │    │
//! │   │   (clap)    │            │  (toml + VIGIL_*)    │    │
//! │   └──────┬──────┘            └──────────┬───────────┘    │
//! │          └──────────────┬───────────────┘                │
//! │                         ▼                                │
//! │                 ┌───────────────┐                        │
//! │                 │  vigil-core   │                        │
//! │                 │  (THE LOGIC)  │                        │
//! │                 └───────────────┘                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! vigil train
//! vigil predict --record '{"age": "41", "sex": "F", "TSH": "1.3"}'
//! vigil predict --input incoming.json
//! vigil registry list
//! vigil runs show 10182026__142501
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // VIGIL_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("VIGIL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vigil=info,vigil_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    match cli::execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print the Vigil startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗   ██╗██╗ ██████╗ ██╗██╗
  ██║   ██║██║██╔════╝ ██║██║
  ██║   ██║██║██║  ███╗██║██║
  ╚██╗ ██╔╝██║██║   ██║██║██║
   ╚████╔╝ ██║╚██████╔╝██║███████╗
    ╚═══╝  ╚═╝ ╚═════╝ ╚═╝╚══════╝

  Gated Training Pipeline v{}

  Validated • Never Regresses
"#,
        env!("CARGO_PKG_VERSION")
    );
}
