use clap::{Parser, Subcommand};
use md_collab::{CodecConfig, MarkdownCodec, RawNode, Registry, paste};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse markdown into the JSON node format
    Parse {
        /// Input file (stdin when omitted)
        file: Option<PathBuf>,
    },
    /// Render a JSON node tree as markdown
    Render { file: Option<PathBuf> },
    /// Parse and render markdown again
    Normalize { file: Option<PathBuf> },
    /// Report whether pasted text would be inserted as a table
    Detect {
        file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct Detection {
    table: bool,
}

fn main() {
    let cli = Cli::parse();
    let codec = MarkdownCodec::new(Arc::new(Registry::foundation()), CodecConfig::default());

    let result = match &cli.command {
        Commands::Parse { file } => parse_command(&codec, file.as_ref()),
        Commands::Render { file } => render_command(&codec, file.as_ref()),
        Commands::Normalize { file } => normalize_command(&codec, file.as_ref()),
        Commands::Detect { file, json } => detect_command(&codec, file.as_ref(), *json),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn read_input(file: Option<&PathBuf>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read {}: {err}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|err| format!("cannot read stdin: {err}"))?;
            Ok(text)
        }
    }
}

fn parse_command(codec: &MarkdownCodec, file: Option<&PathBuf>) -> Result<(), String> {
    let text = read_input(file)?;
    let doc = codec.parse(&text).map_err(|err| err.to_string())?;
    let json = serde_json::to_string_pretty(&RawNode::from(&doc)).map_err(|err| err.to_string())?;
    println!("{json}");
    Ok(())
}

fn render_command(codec: &MarkdownCodec, file: Option<&PathBuf>) -> Result<(), String> {
    let text = read_input(file)?;
    let raw: RawNode = serde_json::from_str(&text).map_err(|err| format!("invalid node JSON: {err}"))?;
    let node = codec.registry().build(&raw).map_err(|err| err.to_string())?;
    codec.registry().validate(&node).map_err(|err| err.to_string())?;
    println!("{}", codec.render(&node));
    Ok(())
}

fn normalize_command(codec: &MarkdownCodec, file: Option<&PathBuf>) -> Result<(), String> {
    let text = read_input(file)?;
    let doc = codec.parse(&text).map_err(|err| err.to_string())?;
    println!("{}", codec.render(&doc));
    Ok(())
}

fn detect_command(codec: &MarkdownCodec, file: Option<&PathBuf>, json: bool) -> Result<(), String> {
    let text = read_input(file)?;
    // A tokenizer failure means literal paste, the same as plain text.
    let table = paste::detect_table(codec, &text).unwrap_or(false);
    if json {
        let output = serde_json::to_string(&Detection { table }).map_err(|err| err.to_string())?;
        println!("{output}");
    } else if table {
        println!("table");
    } else {
        println!("text");
    }
    Ok(())
}
