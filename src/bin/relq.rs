//! relq: compile and run declarative table queries
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL for a query
//! relq --schema schema.json compile teams -c name,owner.full_name -f '{"name":{"$startsWith":"A"}}'
//!
//! # Execute it and print the first page
//! relq --schema schema.json run teams -c name --sort name:desc --size 10
//!
//! # Continue from a page cursor
//! relq --schema schema.json run teams --after <CURSOR>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use relq::prelude::*;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relq")]
#[command(version)]
#[command(about = "Compile declarative selections and filters into parameterized SQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    relq --schema schema.json compile teams -c 'name,owner.*' -f '{\"owner.full_name\":\"Ada\"}'
    relq --schema schema.json explain teams -f '{\"$any\":[{\"name\":\"a\"},{\"name\":\"b\"}]}'
    relq --schema schema.json run teams --sort name:desc --size 5")]
struct Cli {
    /// Schema file (JSON or TOML)
    #[arg(short, long, env = "RELQ_SCHEMA", global = true)]
    schema: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "RELQ_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Table to query
    table: String,

    /// Column paths, comma separated
    #[arg(short, long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Filter expression (JSON)
    #[arg(short, long)]
    filter: Option<String>,

    /// Sort terms: `column`, `column:asc`, `column:desc` or `random`
    #[arg(long)]
    sort: Vec<String>,

    /// Page size
    #[arg(long)]
    size: Option<u64>,

    /// Row offset
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL and parameters for a query
    Compile(QueryArgs),
    /// Show how a query resolves: selection tree, filter tree and SQL
    Explain(QueryArgs),
    /// Execute a query and print one page
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Fetch the page after this cursor
        #[arg(long, conflicts_with = "before")]
        after: Option<String>,

        /// Fetch the page before this cursor
        #[arg(long)]
        before: Option<String>,
    },
    /// List tables, columns and links
    Tables,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RELQ_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RelqConfig::load()?;
    let schema_path = cli
        .schema
        .clone()
        .or_else(|| config.schema_path.clone())
        .context("no schema file: pass --schema, set RELQ_SCHEMA or schema_path in relq.toml")?;
    let schema = Arc::new(Schema::from_file(&schema_path)?);
    let registry = Registry::new(schema);

    match &cli.command {
        Commands::Compile(args) => {
            let query = build_query(&registry, args)?;
            let compiled = match args.size {
                Some(size) => query.compile_page(&Window::start(args.offset, size))?,
                None => query.compile()?,
            };
            print_compiled(&compiled, &cli.format)?;
        }
        Commands::Explain(args) => explain(&registry, args)?,
        Commands::Run { query: args, after, before } => {
            let url = cli
                .database_url
                .clone()
                .or_else(|| config.database_url.clone())
                .context("no database URL: pass --database-url or set RELQ_DATABASE_URL")?;
            let transport = PgTransport::connect(&url, config.max_connections).await?;
            let query = build_query(&registry, args)?;

            let request = match (after, before) {
                (Some(cursor), _) => PageRequest::After {
                    cursor: cursor.clone(),
                    size: args.size,
                },
                (None, Some(cursor)) => PageRequest::Before {
                    cursor: cursor.clone(),
                    size: args.size,
                },
                (None, None) => PageRequest::Offset {
                    size: args.size.unwrap_or(config.page_size),
                    offset: args.offset,
                },
            };
            let page = query.get_paginated(&transport, request).await?;
            print_page(&page, &cli.format)?;
        }
        Commands::Tables => show_tables(registry.schema()),
    }

    Ok(())
}

fn build_query(registry: &Registry, args: &QueryArgs) -> anyhow::Result<Query> {
    let mut query = registry.table(&args.table)?.query();
    if !args.columns.is_empty() {
        query = query.select(args.columns.iter().map(|c| c.trim().to_string()));
    }
    if let Some(filter) = &args.filter {
        let value: Value = serde_json::from_str(filter).context("filter is not valid JSON")?;
        query = query.filter(value);
    }
    for term in &args.sort {
        query = query.sort(parse_sort(term)?);
    }
    Ok(query)
}

fn parse_sort(term: &str) -> anyhow::Result<Sort> {
    if term == "random" {
        return Ok(Sort::random());
    }
    match term.split_once(':') {
        None => Ok(Sort::asc(term)),
        Some((column, "asc")) => Ok(Sort::asc(column)),
        Some((column, "desc")) => Ok(Sort::desc(column)),
        Some((_, other)) => bail!("unknown sort direction '{}' (expected asc or desc)", other),
    }
}

fn explain(registry: &Registry, args: &QueryArgs) -> anyhow::Result<()> {
    let query = build_query(registry, args)?;
    let schema = registry.schema();

    println!("{}", "📋 Query Analysis".cyan().bold());
    println!();
    println!("  {} {}", "Table:".dimmed(), query.table().yellow());

    let columns: Vec<&str> = query.columns().unwrap_or_default().iter().map(String::as_str).collect();
    let selection = relq::selection::resolve_columns(schema, query.table(), &columns)?;
    println!("  {}", "Selection:".dimmed());
    print_selection(&selection, 2);

    let filter = query.filter_value();
    let expr = relq::filter::FilterExpr::from_json(&filter)?;
    if !expr.is_empty() {
        println!("  {} {}", "Filter:".dimmed(), filter.to_string().white());
    }
    for sort in query.sorts() {
        println!("  {} {} {:?}", "Sort:".dimmed(), sort.column.white(), sort.direction);
    }

    println!();
    println!("{}", "Generated SQL:".green().bold());
    let compiled = query.compile()?;
    println!("{}", compiled.sql.white());
    print_params(&compiled.params);
    Ok(())
}

fn print_selection(tree: &relq::selection::SelectionTree, depth: usize) {
    let indent = "  ".repeat(depth);
    for column in &tree.regular {
        println!("{}• {}", indent, column.white());
    }
    for (name, sub) in &tree.links {
        println!("{}↳ {}", indent, name.cyan());
        print_selection(sub, depth + 1);
    }
}

fn print_compiled(compiled: &CompiledQuery, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(compiled)?),
        OutputFormat::Table => {
            println!("{}", compiled.sql);
            print_params(&compiled.params);
        }
    }
    Ok(())
}

fn print_params(params: &[Value]) {
    if params.is_empty() {
        return;
    }
    println!();
    println!("{}", "Bindings:".cyan());
    for (i, value) in params.iter().enumerate() {
        println!("  ${} = {}", i + 1, value.to_string().yellow());
    }
}

fn print_page(page: &Page, format: &OutputFormat) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        let body = serde_json::json!({ "records": page.records, "meta": page.meta });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match table_lines(&page.records) {
        Some((header, rows)) => {
            println!("{}", header.bold());
            for row in rows {
                println!("{}", row);
            }
        }
        None => println!("{}", "(empty page)".dimmed()),
    }

    println!();
    println!(
        "{} {}  {} {}",
        "records:".dimmed(),
        page.records.len().to_string().cyan(),
        "window:".dimmed(),
        format!("{:?} +{}", page.window().anchor, page.window().offset).cyan()
    );
    println!("{} {}", "cursor:".dimmed(), page.meta.cursor);
    if page.meta.more {
        println!("{}", "more rows follow (pass --after <cursor>)".dimmed());
    }
    Ok(())
}

/// Header line plus one padded line per record; `None` for an empty page.
fn table_lines(records: &[Row]) -> Option<(String, Vec<String>)> {
    let header: Vec<String> = records.first()?.keys().cloned().collect();
    let body: Vec<Vec<String>> = records
        .iter()
        .map(|r| header.iter().map(|c| r.get(c).map(val_to_string).unwrap_or_default()).collect())
        .collect();
    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            body.iter()
                .map(|cells| cells[i].chars().count())
                .fold(header[i].chars().count(), usize::max)
        })
        .collect();
    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    Some((line(&header[..]), body.iter().map(|cells| line(&cells[..])).collect()))
}

fn val_to_string(val: &Value) -> String {
    match val {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn show_tables(schema: &Schema) {
    println!("{}", "📚 Tables".cyan().bold());
    for table in &schema.tables {
        println!();
        println!("  {} {}", table.name.yellow().bold(), format!("(pk: {})", table.primary_key()).dimmed());
        if table.is_open() {
            println!("    {}", "(no declared columns)".dimmed());
        }
        for column in &table.columns {
            let link = table.link(&column.name);
            match link {
                Some(link) => println!(
                    "    {} {} → {}.{}",
                    column.name.white(),
                    column.typ.dimmed(),
                    link.target_table.cyan(),
                    link.target_column
                ),
                None => println!("    {} {}", column.name.white(), column.typ.dimmed()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(id: &str, name: Value) -> Row {
        let mut row = Row::new();
        row.insert("xata_id".to_string(), json!(id));
        row.insert("name".to_string(), name);
        row
    }

    #[test]
    fn test_table_lines_pad_to_widest_cell() {
        let rows = [row("rec_1", json!("Ada Lovelace")), row("rec_22", Value::Null)];
        let (header, body) = table_lines(&rows).unwrap();

        assert_eq!(header, "xata_id  name");
        assert_eq!(body, vec!["rec_1    Ada Lovelace", "rec_22   NULL"]);
    }

    #[test]
    fn test_table_lines_empty_page() {
        assert_eq!(table_lines(&[]), None);
    }

    #[test]
    fn test_parse_sort_terms() {
        assert_eq!(parse_sort("name").unwrap(), Sort::asc("name"));
        assert_eq!(parse_sort("name:desc").unwrap(), Sort::desc("name"));
        assert_eq!(parse_sort("random").unwrap(), Sort::random());
        assert!(parse_sort("name:up").is_err());
    }
}
