//! # relayrpc CLI Entry Point
//!
//! Makes single calls through the relayrpc client and runs a small echo
//! server to call against.
//!
//! ## Usage
//!
//! ```bash
//! # Start an echo server
//! relayrpc echo -b 127.0.0.1:9000
//!
//! # Call it directly (outputs raw JSON)
//! relayrpc call user.get -H 127.0.0.1:9000 -a '[7, "ann"]'
//!
//! # Call through a route, falling back from a dead direct host
//! relayrpc call user.get -H 127.0.0.1:9999 --route 127.0.0.1:9000 --backup --json '{"id": 7}'
//! ```

use anyhow::{bail, Result};
use argh::FromArgs;
use relayrpc_client::{EnvSettings, RpcClient};
use relayrpc_common::transport::TcpServer;
use relayrpc_common::{Host, Params, RelayError, Request, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// relayrpc - RPC client with failover and timeouts
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Call(CallArgs),
    Echo(EchoArgs),
}

/// Arguments for a single call.
///
/// Direct hosts (`-H`) are tried first, round-robin, skipping hosts that are
/// down. Route hosts (`--route`) serve the api when no direct host is given,
/// or when every direct host is down and `--backup` is set.
///
/// # Example
///
/// ```bash
/// relayrpc call order.create -H 10.0.0.5:9000 -H 10.0.0.6:9000 -a '["sku-1", 2]' --timeout-ms 2000
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call an api and print the result as JSON
struct CallArgs {
    /// name of the api to call
    #[argh(positional)]
    api: String,

    /// direct host to call, as ip:port (repeatable)
    #[argh(option, short = 'H', long = "host")]
    hosts: Vec<Host>,

    /// host serving the api through the route table, as ip:port (repeatable)
    #[argh(option, long = "route")]
    routes: Vec<Host>,

    /// positional arguments as a JSON array
    #[argh(option, short = 'a', long = "args")]
    args: Option<String>,

    /// a single raw JSON argument, sent as is
    #[argh(option, long = "json")]
    json: Option<String>,

    /// total timeout in milliseconds
    ///
    /// Defaults to `soa.timeout` from the environment
    /// (`RELAYRPC_SOA_TIMEOUT`), or 30000.
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// fall back to the route hosts when every direct host is down
    #[argh(switch)]
    backup: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "echo")]
/// run a server that echoes params back
struct EchoArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "\"127.0.0.1:9000\".into()")]
    bind: String,
}

/// Parameters of a call, validated before anything connects.
#[derive(Debug, PartialEq)]
enum CallParams {
    Array(Vec<Value>),
    Json(String),
}

fn call_params(args: Option<String>, json: Option<String>) -> Result<CallParams> {
    match (args, json) {
        (Some(_), Some(_)) => bail!("use either --args or --json, not both"),
        (Some(array), None) => {
            let value: Value = serde_json::from_str(&array)
                .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;
            match value {
                Value::Array(items) => Ok(CallParams::Array(items)),
                _ => bail!("--args must be a JSON array"),
            }
        }
        (None, Some(raw)) => Ok(CallParams::Json(raw)),
        (None, None) => Ok(CallParams::Array(Vec::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping and only logs when asked to
    let log = match cli.command {
        Commands::Call(_) => std::env::var_os("RUST_LOG").is_some(),
        Commands::Echo(_) => true,
    };
    if log {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Call(args) => run_call(args).await,
        Commands::Echo(args) => run_echo(args).await,
    }
}

/// Executes the `call` subcommand and prints the success payload.
///
/// # Errors
///
/// Bad arguments, or any communication or application failure of the call.
async fn run_call(args: CallArgs) -> Result<()> {
    let params = call_params(args.args, args.json)?;
    if args.hosts.is_empty() && args.routes.is_empty() {
        bail!("no host to call: pass -H <ip:port> or --route <ip:port>");
    }

    let tcp = RpcClient::connect_tcp(Arc::new(EnvSettings::new()))?;
    if !args.routes.is_empty() {
        tcp.routes().register(args.api.clone(), args.routes);
    }

    let mut sender = tcp
        .client()
        .sender(args.api)
        .direct_hosts(args.hosts)
        .backup(args.backup);
    sender = match params {
        CallParams::Array(items) => sender.params_as_array(items),
        CallParams::Json(raw) => sender.params_as_json(raw),
    };
    if let Some(ms) = args.timeout_ms {
        sender = sender.total_timeout(Duration::from_millis(ms));
    }

    let result = sender.execute()?.await.into_result()?;

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_echo(args: EchoArgs) -> Result<()> {
    let server = TcpServer::new(&args.bind).await?;
    tracing::info!("Echo server listening on {}", server.local_addr()?);

    server
        .run_with_handler(|request| async move { Ok::<_, RelayError>(echo_response(request)) })
        .await?;
    Ok(())
}

/// Echoes the params back as the result; api `fail` answers with code 500.
fn echo_response(request: Request) -> Response {
    tracing::debug!(request_id = request.id, api = %request.api, "Echo request");

    if request.api == "fail" {
        return Response::error(request.id, 500, format!("{} failed on request", request.api));
    }

    let result = match request.params {
        Params::Array(args) => Value::Array(args.iter().map(|a| parse_or_string(a)).collect()),
        Params::Json(raw) => parse_or_string(&raw),
    };
    Response::success(request.id, result)
}

fn parse_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
