use clap::Parser;

use crate::args::WrunApp;
use crate::commands::Command;

mod args;
mod commands;
mod context;
mod display;
mod utils;

fn main() {
    if let Err(error) = WrunApp::parse().execute() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
