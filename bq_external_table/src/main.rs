//! A CLI tool for loading Google Cloud Storage objects into BigQuery.

#![warn(rust_2018_idioms, unused_extern_crates, clippy::all)]

use bq_external_table::cmd;
use clap::Parser;
use std::process;

#[tokio::main]
async fn main() {
    let opt = cmd::Opt::parse();
    if let Err(err) = cmd::run(opt).await {
        eprintln!("ERROR: {:#}", err);
        process::exit(1);
    }
}
