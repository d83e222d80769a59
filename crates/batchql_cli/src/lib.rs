//! Command-line interface for batchql.
//!
//! # Usage
//!
//! ```bash
//! # Decompose a relation predicate into batching keys
//! batchql relation "(p, c) => p.id == c.author_id && c.published == true"
//!
//! # Paginate the integers 0..20
//! batchql page --count 20 --after 4 --first 5
//!
//! # Paginate a JSON array from a file
//! batchql page --input rows.json --last 3 --no-total-count
//!
//! # Print version information
//! batchql version
//! ```

use batchql_core::{Relation, RelationError};
use batchql_runtime::{paginate, ConnectionOptions, PageArgs};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "batchql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decompose a relation predicate into parent key, child key and residual
    Relation {
        /// Predicate text, e.g. "(p, c) => p.id == c.owner_id"
        predicate: String,

        /// Print the decomposition as JSON
        #[arg(long)]
        json: bool,
    },

    /// Paginate a sequence and print the connection as JSON
    Page {
        /// Paginate the integers 0..COUNT
        #[arg(long, conflicts_with = "input")]
        count: Option<usize>,

        /// Paginate the JSON array stored in this file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Keep at most this many items from the head of the window
        #[arg(long, allow_hyphen_values = true)]
        first: Option<i64>,

        /// Keep at most this many items from the tail of the window
        #[arg(long, allow_hyphen_values = true)]
        last: Option<i64>,

        /// Only items before this cursor
        #[arg(long, allow_hyphen_values = true)]
        before: Option<String>,

        /// Only items after this cursor
        #[arg(long, allow_hyphen_values = true)]
        after: Option<String>,

        /// Do not report totalCount
        #[arg(long)]
        no_total_count: bool,

        /// Print edges with per-item cursors instead of bare items
        #[arg(long)]
        edges: bool,
    },

    /// Print version information
    Version,
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn Error>> {
    match cli.command {
        Commands::Relation { predicate, json } => describe_relation(&predicate, json),
        Commands::Page {
            count,
            input,
            first,
            last,
            before,
            after,
            no_total_count,
            edges,
        } => {
            let args = PageArgs {
                first,
                last,
                before,
                after,
            };
            let options = ConnectionOptions::default().with_total_count(!no_total_count);
            page(count, input.as_deref(), &args, options, edges).await
        }
        Commands::Version => {
            println!("batchql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn describe_relation(source: &str, json: bool) -> Result<i32, Box<dyn Error>> {
    let relation = match Relation::parse(source) {
        Ok(relation) => relation,
        Err(err) => {
            report(err);
            return Ok(1);
        }
    };

    let residual: Vec<String> = relation
        .residual
        .terms()
        .iter()
        .map(|term| relation.predicate.display(term).to_string())
        .collect();

    if json {
        let output = serde_json::json!({
            "parentKey": relation.parent_key.to_string(),
            "childKey": relation.child_key.to_string(),
            "residual": residual,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(0);
    }

    println!("{} {}", "Parent key:".bold(), relation.parent_key);
    println!("{} {}", "Child key: ".bold(), relation.child_key);
    if residual.is_empty() {
        println!("{} {}", "Residual:  ".bold(), "none".dimmed());
    } else {
        println!("{}", "Residual:".bold());
        for term in &residual {
            println!("  {} {}", "-".dimmed(), term);
        }
    }
    println!("{} {}", "OK".green(), relation);
    Ok(0)
}

fn report(err: RelationError) {
    let kind = match &err {
        RelationError::Syntax(_) => "invalid predicate syntax",
        RelationError::Shape(_) => "predicate cannot be batched",
    };
    eprintln!("{} {}", "Error:".red().bold(), kind);
    eprintln!("{:?}", miette::Report::new(err));
}

async fn page(
    count: Option<usize>,
    input: Option<&Path>,
    args: &PageArgs,
    options: ConnectionOptions,
    edges: bool,
) -> Result<i32, Box<dyn Error>> {
    let items: Vec<Value> = match (count, input) {
        (_, Some(path)) => read_items(path)?,
        (Some(n), None) => (0..n).map(Value::from).collect(),
        (None, None) => {
            eprintln!("{} pass --count or --input", "Error:".red().bold());
            return Ok(2);
        }
    };
    tracing::debug!(items = items.len(), ?args, "paginating");

    let connection = match paginate(&items, args, options).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            return Ok(1);
        }
    };

    let output = if edges {
        serde_json::json!({
            "edges": connection.edges(),
            "pageInfo": connection.page_info,
            "totalCount": connection.total_count,
        })
    } else {
        serde_json::to_value(&connection)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(0)
}

fn read_items(path: &Path) -> Result<Vec<Value>, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str(&text)? {
        Value::Array(items) => Ok(items),
        _ => Err(format!("{}: expected a JSON array", path.display()).into()),
    }
}
