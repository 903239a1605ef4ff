//! `invariant-gateway` CLI entry point.
//!
//! Stdout carries nothing but newline-delimited JSON-RPC frames once a
//! bridge is running, so tracing is initialized onto stderr here rather
//! than the teacher's default of stdout.

mod args;
mod mcp;

const ACTIONS: &[(&str, &str)] = &[
    (
        "mcp",
        "Runs the Invariant Gateway against MCP servers with guardrailing and push to Explorer",
    ),
    (
        "llm",
        "Runs the Invariant Gateway against LLM providers with guardrailing and push to Explorer",
    ),
    ("help", "Shows this help message"),
];

fn print_help() {
    for (verb, description) in ACTIONS {
        println!("{verb}: {description}");
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let argv: Vec<String> = std::env::args().collect();
    let exit_code = match argv.get(1).map(String::as_str) {
        None => {
            print_help();
            1
        }
        Some("help") => {
            print_help();
            0
        }
        Some("mcp") => run_mcp(&argv[2..]).await,
        Some("llm") => {
            eprintln!("[ERROR] The llm verb is served by gateway-server, not the stdio CLI.");
            1
        }
        Some(other) => {
            eprintln!("[ERROR] Unknown action: {other}");
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run_mcp(raw_args: &[String]) -> i32 {
    let Ok(api_key) = std::env::var("INVARIANT_API_KEY") else {
        eprintln!("[ERROR] INVARIANT_API_KEY environment variable is not set.");
        return 1;
    };

    let parsed = match args::parse(raw_args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e.message());
            return 1;
        }
    };

    match mcp::run(parsed, api_key).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            1
        }
    }
}
