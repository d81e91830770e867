use std::path::PathBuf;
use std::process::ExitCode;

use clap::{
    Parser,
    ValueEnum,
};
use env_logger::{
    Builder,
    Env,
};
use esp_nvs_decoder::{
    Entry,
    EntryData,
    EntryState,
    Finding,
    ItemType,
    Page,
    Partition,
    Severity,
};
use log::info;

#[derive(Parser)]
#[command(name = "esp-nvs-decoder")]
#[command(about = "Decode and validate ESP NVS partition binaries", long_about = None)]
struct Cli {
    /// Input binary file path
    input: PathBuf,

    /// Partition name, defaults to the file name without extension
    #[arg(short, long)]
    name: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Run the integrity check and exit with 1 if it reports errors
    #[arg(short, long)]
    check: bool,

    /// Omit empty pages and entry slots that were never written
    #[arg(long)]
    skip_empty: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn init_logger() {
    // RUST_LOG=debug shows every anomaly noticed while decoding
    Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_logger();
    let cli = Cli::parse();

    let mut partition = Partition::from_file(&cli.input)?;
    if let Some(name) = cli.name {
        partition.name = name;
    }
    info!(
        "read {} bytes ({} pages) from {}",
        partition.raw_data.len(),
        partition.pages.len(),
        cli.input.display()
    );

    let findings = if cli.check { partition.check() } else { Vec::new() };

    match cli.format {
        Format::Json => {
            let output = if cli.check {
                serde_json::json!({ "partition": partition, "findings": findings })
            } else {
                serde_json::to_value(&partition)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => {
            print_partition(&partition, cli.skip_empty);
            if cli.check {
                print_findings(&findings);
            }
        }
    }

    if findings.iter().any(|f| f.severity == Severity::Error) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_partition(partition: &Partition, skip_empty: bool) {
    println!(
        "Partition '{}': {} pages",
        partition.name,
        partition.pages.len()
    );
    let namespaces = partition.namespaces();
    for (idx, name) in &namespaces {
        println!("  namespace {idx:>3}: {name}");
    }

    for (page_pos, page) in partition.pages.iter().enumerate() {
        if skip_empty && page.is_empty {
            continue;
        }
        print_page(page_pos, page, skip_empty);
    }
}

fn print_page(page_pos: usize, page: &Page, skip_empty: bool) {
    let header = &page.header;
    let crc = if header.is_crc_valid() { "ok" } else { "mismatch" };
    println!(
        "Page {page_pos} @0x{:08x}: {}, index {}, version {}, header CRC {crc}",
        page.start_address, header.status, header.page_index, header.version
    );

    for entry in &page.entries {
        if skip_empty && entry.state == EntryState::Empty {
            continue;
        }
        println!("  {}", format_entry(entry));
    }
}

fn format_entry(entry: &Entry) -> String {
    let meta = &entry.metadata;
    let key = entry.key.as_deref().unwrap_or("<invalid>");
    let crc = if entry.is_crc_valid() { "" } else { " (CRC mismatch)" };
    format!(
        "[{:>3}] {:<7} ns {:>3} type {:<9} span {:>3} chunk {:>3} key '{key}': {}{crc}",
        entry.index,
        entry.state,
        meta.namespace,
        meta.item_type,
        meta.span,
        meta.chunk_index,
        format_value(entry)
    )
}

fn format_value(entry: &Entry) -> String {
    let Some(data) = entry.data else {
        return "-".to_string();
    };
    let data_crc = match entry.is_data_crc_valid() {
        Some(false) => " (data CRC mismatch)",
        _ => "",
    };
    match (entry.metadata.item_type, data) {
        (ItemType::String, EntryData::Sized { .. }) => match entry.as_str() {
            Some(text) => format!("{text:?}{data_crc}"),
            None => format!("<{data}>{data_crc}"),
        },
        (_, EntryData::Sized { .. }) => {
            let payload = entry.payload().unwrap_or_default();
            format!("{}{data_crc}", hex::encode(payload))
        }
        _ => data.to_string(),
    }
}

fn print_findings(findings: &[Finding]) {
    if findings.is_empty() {
        println!("Integrity check: no findings");
        return;
    }
    println!("Integrity check: {} findings", findings.len());
    for finding in findings {
        println!("  {finding}");
    }
}
