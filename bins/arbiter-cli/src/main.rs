mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use arbiter_common::types::Language;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Submit code to the judge and print the verdict", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file and wait for the judged results
    Submit {
        /// Source file to judge
        file: String,

        /// Language (c, cpp, java, python)
        #[arg(short, long)]
        language: Language,

        /// One stdin payload per test case (repeatable)
        #[arg(short, long)]
        stdin: Vec<String>,

        /// Expected output per test case (repeatable, optional)
        #[arg(short, long)]
        expected: Vec<String>,

        /// Per-case time limit in milliseconds
        #[arg(short, long, default_value = "30000")]
        time_limit: u64,

        /// Wall-clock budget for the whole batch in milliseconds
        #[arg(short, long)]
        wall_time_limit: Option<u64>,

        /// Memory limit in MB
        #[arg(short, long, default_value = "256")]
        memory_limit: u64,

        /// Stop at the first failing case (needs --expected)
        #[arg(long, default_value = "false")]
        early_stop: bool,

        /// Print raw results as JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            file,
            language,
            stdin,
            expected,
            time_limit,
            wall_time_limit,
            memory_limit,
            early_stop,
            json,
        } => {
            commands::submit(
                &file,
                language,
                stdin,
                expected,
                time_limit,
                wall_time_limit,
                memory_limit,
                early_stop,
                json,
            )
            .await?;
        }
    }

    Ok(())
}
