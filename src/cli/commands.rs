use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fieldconsensus")]
#[command(author, version, about = "Consensus field labelling and shared-fact deduplication for captured pages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask every configured provider what a field means and merge the answers
    Analyze {
        field: String,

        /// HTML attribute as key=value, repeatable
        #[arg(short, long = "attr", value_parser = parse_key_value)]
        attributes: Vec<(String, String)>,

        /// Text surrounding the field on the page
        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// Record contacts from a JSON array file as shared data elements
    Contacts {
        file: PathBuf,

        /// URL of the page the contacts were captured from
        #[arg(short, long)]
        page: String,

        #[arg(short, long)]
        label: Option<String>,
    },

    /// Print the calculations found in a captured HTML page
    Extract { file: PathBuf },

    /// Process every captured *.html page in a directory
    Batch { dir: PathBuf },

    /// Show crawl state and shared element counts
    Status {
        /// Forget all processed and discovered URLs
        #[arg(long)]
        reset: bool,
    },

    /// List shared data elements
    Elements {
        /// contact_info, calculation or metric
        #[arg(short = 't', long = "type")]
        element_type: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
