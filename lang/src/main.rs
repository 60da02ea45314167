use std::{path::PathBuf, process::exit};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use scriptc::{
    compile_file,
    literate::LiterateSource,
    version::VersionStamp,
    CompileOptions, ConfigStore,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a script and print the resulting method.
    Compile {
        path: PathBuf,
        /// Read the file as literate source whatever its extension.
        #[arg(long)]
        lrb: bool,
        /// Keep literate prose as comments.
        #[arg(long)]
        comments: bool,
        #[arg(long, value_enum, default_value_t = Emit::Listing)]
        emit: Emit,
    },
    /// Print the code held in a literate source file.
    Extract {
        path: PathBuf,
        #[arg(long)]
        comments: bool,
    },
    /// Print the compiler's version stamp.
    Version {
        /// Report this unix time instead of reading the sources.
        #[arg(long)]
        at: Option<i64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Emit {
    Json,
    Listing,
}

fn main() -> anyhow::Result<()> {
    if let Ok(filter) = EnvFilter::try_from_env("SCRIPTC_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    // Compiler flags never reach clap.
    let mut store = ConfigStore::new();
    let mut tokens: Vec<String> = std::env::args().collect();
    store.parse_flags(&mut tokens);
    let args = Args::parse_from(tokens);

    match args.command {
        Commands::Compile {
            path,
            lrb,
            comments,
            emit,
        } => {
            let options = CompileOptions { lrb, comments };
            let method = match compile_file(&path, &[] as &[&str], &options, &store) {
                Ok(method) => method,
                Err(diagnostic) => {
                    eprintln!("{diagnostic}");
                    exit(1);
                }
            };
            match emit {
                Emit::Json => println!("{}", serde_json::to_string_pretty(&method)?),
                Emit::Listing => print!("{}", method.listing()),
            }
        }
        Commands::Extract { path, comments } => {
            let source = LiterateSource::open(&path)?;
            println!("{}", source.to_code(comments));
        }
        Commands::Version { at } => {
            let mut stamp = VersionStamp::default();
            stamp.set(at);
            println!("{}", stamp.number());
        }
    }
    Ok(())
}
