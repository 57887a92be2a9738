use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, Response};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "dlogctl")]
#[command(about = "Client for the dlog commit log server", long_about = None)]
struct Cli {
    /// Base URL of the server.
    #[clap(long, env = "DLOG_ADDR", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Root certificate used to verify the server (PEM).
    #[clap(long)]
    ca: Option<PathBuf>,

    /// Client certificate presented to the server (PEM).
    #[clap(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Private key for the client certificate (PEM).
    #[clap(long, requires = "cert")]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append a record and print the offset it was assigned.
    Produce { value: String },
    /// Read the record stored at an offset.
    Consume { offset: u64 },
    /// Print the lowest and highest offsets.
    Offsets,
    /// Delete every record and start the log over.
    Reset,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let client = build_client(&args)?;
    let base = args.addr.trim_end_matches('/');

    match args.command {
        Command::Produce { value } => {
            let body = json!({ "record": { "value": BASE64.encode(value.as_bytes()) } });
            let rsp = check(client.post(base).json(&body).send()?)?;
            let rsp: serde_json::Value = rsp.json()?;
            println!("{}", rsp["offset"]);
        }
        Command::Consume { offset } => {
            let rsp = check(client.get(format!("{base}/?offset={offset}")).send()?)?;
            let rsp: serde_json::Value = rsp.json()?;
            let value = rsp["record"]["value"].as_str().unwrap_or_default();
            let decoded = BASE64.decode(value).context("decoding record value")?;
            println!("{}", String::from_utf8_lossy(&decoded));
        }
        Command::Offsets => {
            let rsp = check(client.get(format!("{base}/offsets")).send()?)?;
            let rsp: serde_json::Value = rsp.json()?;
            println!("lowest: {} highest: {}", rsp["lowest"], rsp["highest"]);
        }
        Command::Reset => {
            check(client.delete(base).send()?)?;
            println!("reset ok");
        }
    }
    Ok(())
}

fn build_client(args: &Cli) -> anyhow::Result<Client> {
    let mut builder = Client::builder().use_rustls_tls();
    if let Some(ca) = &args.ca {
        let pem = fs::read(ca).with_context(|| format!("reading {}", ca.display()))?;
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
    }
    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        // reqwest wants key and certificate in one PEM bundle.
        let mut pem = fs::read(key).with_context(|| format!("reading {}", key.display()))?;
        pem.extend(fs::read(cert).with_context(|| format!("reading {}", cert.display()))?);
        builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}

fn check(rsp: Response) -> anyhow::Result<Response> {
    if rsp.status().is_success() {
        return Ok(rsp);
    }
    let status = rsp.status();
    let body = rsp.text().unwrap_or_default();
    bail!("server returned {status}: {body}");
}
