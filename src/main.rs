use clap::{Parser as ClapParser, Subcommand};
use eql::cli::{self, CheckResult, CliError, CommandOptions};
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "eql")]
#[command(about = "eql - compile entity queries (SELECT/UPDATE/DELETE over entities) into SQL")]
#[command(version)]
struct Cli {
    /// Log compiler decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query and print the SQL and its parameter bindings
    Compile {
        /// The query (reads from stdin if not provided)
        query: Option<String>,

        /// JSON schema document
        #[arg(short, long)]
        schema: PathBuf,

        /// Print the compiled query as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Validate a query against a schema
    Check {
        /// The query (reads from stdin if not provided)
        query: Option<String>,

        /// JSON schema document
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Print the tokens of a query
    Tokens {
        /// The query (reads from stdin if not provided)
        query: Option<String>,
    },

    /// List documentation categories
    Docs,

    /// Show documentation for a specific category
    Doc {
        /// Category name (use 'eql docs' to list categories)
        category: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Compile {
            query,
            schema,
            json,
            pretty,
        } => run_compile(query, schema, json, pretty),
        Commands::Check { query, schema } => run_check(query, schema),
        Commands::Tokens { query } => run_tokens(query),
        Commands::Docs => {
            print!("{}", cli::get_docs_overview());
            Ok(())
        }
        Commands::Doc { category } => match cli::get_doc_category(&category) {
            Ok(content) => {
                print!("{}", content);
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("eql=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_query(query: Option<String>) -> Result<String, CliError> {
    match query {
        Some(q) => Ok(q),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).map_err(CliError::Io)?;
            Ok(buffer)
        }
        None => Err(CliError::NoInput),
    }
}

fn command_options(
    query: Option<String>,
    schema: PathBuf,
    json: bool,
    pretty: bool,
) -> Result<CommandOptions, CliError> {
    Ok(CommandOptions {
        query: read_query(query)?,
        schema: std::fs::read_to_string(schema)?,
        json,
        pretty,
    })
}

fn run_compile(
    query: Option<String>,
    schema: PathBuf,
    json: bool,
    pretty: bool,
) -> Result<(), CliError> {
    let options = command_options(query, schema, json, pretty)?;
    println!("{}", cli::execute_compile(&options)?);
    Ok(())
}

fn run_check(query: Option<String>, schema: PathBuf) -> Result<(), CliError> {
    let options = command_options(query, schema, false, false)?;
    match cli::execute_check(&options)? {
        CheckResult::Valid { kind, parameters } => {
            println!("Query is valid ({kind:?}, {parameters} parameter(s))")
        }
    }
    Ok(())
}

fn run_tokens(query: Option<String>) -> Result<(), CliError> {
    let query = read_query(query)?;
    for token in cli::execute_tokens(&query)? {
        println!("{token:?}");
    }
    Ok(())
}
