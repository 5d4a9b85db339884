use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use astrodbkit::{
    config::SearchColumn,
    document,
    names::StaticResolver,
    CollisionPolicy, Config, Database, ExportOptions, LoadOptions, NameResolver, OutputFormat,
    QueryResult, SchemaDefinition, SearchOptions, TableData,
};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "astrodbkit")]
#[command(about = "Object catalog toolkit: SQLite sources with per-object JSON export and reload")]
#[command(version)]
struct Cli {
    /// Connection string, e.g. sqlite:///astrodb.db
    #[arg(short, long, env = "ASTRODB_CONNECTION")]
    connection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    Create {
        /// SQL script with CREATE TABLE statements; the example schema when omitted
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Print every row describing one object
    Inventory { name: String },

    /// Export the database to a directory of JSON files.
    /// Every file already in the directory is deleted first unless --no-clear is given.
    Save {
        directory: PathBuf,

        /// Keep existing files in the directory
        #[arg(long)]
        no_clear: bool,

        /// Fail when an object has no file name of its own instead of warning
        #[arg(long)]
        strict_filenames: bool,
    },

    /// Replace the database contents with a directory of JSON files
    Load {
        directory: PathBuf,

        /// Convert date-like strings to datetimes
        #[arg(long)]
        parse_dates: bool,
    },

    /// Find objects by name
    Search {
        name: String,

        /// Table to return rows from
        #[arg(long)]
        output_table: Option<String>,

        /// Columns to match, as Table.column
        #[arg(long = "column")]
        columns: Vec<String>,

        /// Require a case-insensitive exact match
        #[arg(long)]
        exact: bool,

        /// JSON alias table ({"name": ["alias", ...]}) used to expand the name
        #[arg(long)]
        aliases: Option<PathBuf>,

        /// rows, table or dataframe
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Find a string in every text column
    SearchString {
        value: String,

        #[arg(long)]
        exact: bool,

        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Run a raw SQL query
    Query {
        sql: String,

        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Insert rows from a CSV file
    AddData {
        table: String,
        file: PathBuf,

        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Copy the table definitions to another database
    Copy {
        destination: String,

        /// Copy rows as well
        #[arg(long)]
        with_data: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "astrodbkit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to read configuration")?;
    if let Some(connection) = cli.connection {
        config.connection_string = connection;
    }

    match cli.command {
        Commands::Create { schema } => {
            let definition = match schema {
                Some(path) => SchemaDefinition::from_script(
                    fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read schema {}", path.display()))?,
                ),
                None => SchemaDefinition::example(),
            };
            astrodbkit::create_database(&config.connection_string, &definition)
                .with_context(|| format!("Failed to create {}", config.connection_string))?;
        }
        Commands::Inventory { name } => {
            let db = open(&config)?;
            let inventory = db.inventory(name.as_str())?;
            println!("{}", document::serialize(&inventory)?);
        }
        Commands::Save {
            directory,
            no_clear,
            strict_filenames,
        } => {
            let db = open(&config)?;
            let options = ExportOptions {
                clear: config.export_clear && !no_clear,
                collisions: if strict_filenames {
                    CollisionPolicy::Error
                } else {
                    CollisionPolicy::Warn
                },
            };
            let summary = db
                .save_database(&directory, &options)
                .with_context(|| format!("Failed to save to {}", directory.display()))?;
            info!(
                entities = summary.entity_files.len(),
                collisions = summary.collisions.len(),
                skipped = summary.skipped_entities.len(),
                "Export finished"
            );
        }
        Commands::Load {
            directory,
            parse_dates,
        } => {
            let mut db = open(&config)?;
            let options = LoadOptions {
                parse_dates: config.parse_dates || parse_dates,
            };
            db.load_database(&directory, &options)
                .with_context(|| format!("Failed to load from {}", directory.display()))?;
        }
        Commands::Search {
            name,
            output_table,
            columns,
            exact,
            aliases,
            format,
        } => {
            let db = open(&config)?;
            let columns = if columns.is_empty() {
                None
            } else {
                Some(
                    columns
                        .iter()
                        .map(|target| {
                            SearchColumn::parse(target)
                                .with_context(|| format!("Expected Table.column, got `{target}`"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                )
            };
            let resolver = match aliases {
                Some(path) => Some(StaticResolver::from_json(
                    &fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read aliases {}", path.display()))?,
                )?),
                None => None,
            };
            let options = SearchOptions {
                output_table,
                columns,
                fuzzy: !exact,
                resolve_aliases: resolver.is_some(),
                format: OutputFormat::parse(&format),
            };
            let result = db.search_object(
                &name,
                &options,
                resolver.as_ref().map(|r| r as &dyn NameResolver),
            )?;
            print_result(&result)?;
        }
        Commands::SearchString {
            value,
            exact,
            format,
        } => {
            let db = open(&config)?;
            for (table, result) in db.search_string(&value, !exact, OutputFormat::parse(&format))? {
                println!("{table}");
                print_result(&result)?;
            }
        }
        Commands::Query { sql, format } => {
            let db = open(&config)?;
            print_result(&db.sql_query(&sql, OutputFormat::parse(&format))?)?;
        }
        Commands::AddData {
            table,
            file,
            format,
        } => {
            let mut db = open(&config)?;
            let input = fs::File::open(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let inserted = db.add_table_data(&table, TableData::from_reader(input)?, &format)?;
            info!(table = %table, rows = inserted, "Rows added");
        }
        Commands::Copy {
            destination,
            with_data,
        } => {
            let created =
                astrodbkit::copy_database_schema(&config.connection_string, &destination, with_data)
                    .with_context(|| format!("Failed to copy into {destination}"))?;
            info!(tables = created, "Copy finished");
        }
    }
    Ok(())
}

fn open(config: &Config) -> Result<Database> {
    Database::open(&config.connection_string, config.catalog.clone())
        .with_context(|| format!("Failed to open {}", config.connection_string))
}

fn print_result(result: &QueryResult) -> Result<()> {
    match result {
        QueryResult::Rows(rows) => println!("{}", document::serialize_rows(rows)?),
        QueryResult::Table(table) => print!("{table}"),
        QueryResult::DataFrame(frame) => print!("{frame}"),
    }
    Ok(())
}
