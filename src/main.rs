use anyhow::{Context, Result};
use clap::Parser;
use fieldconsensus::cli::{Cli, Commands};
use fieldconsensus::core::model::ElementType;
use fieldconsensus::extraction::extract_calculations;
use fieldconsensus::{init_logging, utils, ApiKeys, AppContext, Contact, Settings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new().context("Failed to load configuration")?;
    init_logging(&settings.logging);

    let cli = Cli::parse();

    // Extraction needs neither providers nor storage
    if let Commands::Extract { file } = &cli.command {
        return handle_extract(file).await;
    }

    let ctx = AppContext::init(settings, &ApiKeys::from_env()).await?;

    let result = match cli.command {
        Commands::Analyze {
            field,
            attributes,
            context,
        } => handle_analyze(&ctx, field, attributes, context).await,
        Commands::Contacts { file, page, label } => handle_contacts(&ctx, file, page, label).await,
        Commands::Batch { dir } => handle_batch(&ctx, dir).await,
        Commands::Status { reset } => handle_status(&ctx, reset).await,
        Commands::Elements { element_type } => handle_elements(&ctx, element_type).await,
        Commands::Extract { .. } => Ok(()),
    };

    if let Err(e) = &result {
        utils::print_error(&format!("Error: {:#}", e));
    }
    result
}

async fn handle_analyze(
    ctx: &AppContext,
    field: String,
    attributes: Vec<(String, String)>,
    context: String,
) -> Result<()> {
    let names = ctx.analyzer.provider_names();
    utils::print_info(&format!("Asking {} provider(s): {}", names.len(), names.join(", ")));

    let attributes: BTreeMap<String, String> = attributes.into_iter().collect();
    let result = ctx
        .analyzer
        .analyze_with_consensus(&field, &attributes, &context)
        .await;

    utils::print_analysis(&field, &result);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn handle_contacts(
    ctx: &AppContext,
    file: PathBuf,
    page: String,
    label: Option<String>,
) -> Result<()> {
    let json = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let contacts: Vec<Contact> =
        serde_json::from_str(&json).context("Expected a JSON array of contacts")?;

    utils::print_header(&format!("Recording {} contact(s) from {}", contacts.len(), page));

    for contact in &contacts {
        match ctx.shared.record_contact(&page, contact, label.as_deref()).await {
            Ok(outcome) => utils::print_outcome(&outcome),
            Err(e) => utils::print_warning(&format!("Skipped {:?}: {:#}", contact, e)),
        }
    }
    Ok(())
}

async fn handle_extract(file: &Path) -> Result<()> {
    let html = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let report = extract_calculations(&html);

    utils::print_header("Calculations");
    if report.is_empty() {
        utils::print_warning("No calculations found");
        return Ok(());
    }

    for total in &report.keyword_totals {
        println!("{}: {}", total.label, total.raw);
    }
    for formula in &report.sum_formulas {
        println!(
            "{}: {}",
            formula.row_label.as_deref().unwrap_or("(unlabelled row)"),
            formula.expression
        );
    }
    if !report.percentages.is_empty() {
        println!("Percentages: {}", report.percentages.join(", "));
    }
    if !report.currency_values.is_empty() {
        println!("Amounts: {}", report.currency_values.join(", "));
    }
    Ok(())
}

async fn handle_batch(ctx: &AppContext, dir: PathBuf) -> Result<()> {
    utils::print_header(&format!("Processing captures in {:?}", dir));
    utils::print_info("Ctrl+C saves progress and exits");

    let mut processor = ctx.page_processor().await?;
    let (summary, reports) = processor.process_dir(&dir).await?;

    for report in reports.iter().filter(|r| !r.skipped) {
        match &report.error {
            Some(e) => utils::print_error(&format!("{}: {}", report.url, e)),
            None => utils::print_success(&format!(
                "{}: {} fields, {} elements, {} new links",
                report.url,
                report.fields.len(),
                report.elements.len(),
                report.discovered
            )),
        }
    }

    println!(
        "\nprocessed {}, skipped {}, failed {}{}",
        summary.processed,
        summary.skipped,
        summary.failed,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

async fn handle_status(ctx: &AppContext, reset: bool) -> Result<()> {
    let mut state = ctx.state_store.load().await?;
    if reset {
        state.clear();
        ctx.state_store.save(&state).await?;
        utils::print_success("Crawl state cleared");
    }

    utils::print_header("Crawl State");
    println!("processed pages:  {}", state.processed.len());
    println!("pending links:    {}", state.pending().count());

    utils::print_header("Shared Data");
    for element_type in [ElementType::ContactInfo, ElementType::Calculation, ElementType::Metric] {
        let count = ctx.shared.store().list_elements(Some(element_type)).await?.len();
        println!("{:<16}{}", format!("{}:", element_type), count);
    }
    Ok(())
}

async fn handle_elements(ctx: &AppContext, element_type: Option<String>) -> Result<()> {
    let filter = element_type
        .map(|t| t.parse::<ElementType>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let elements = ctx.shared.store().list_elements(filter).await?;
    utils::print_header(&format!("{} element(s)", elements.len()));
    for element in &elements {
        utils::print_element(element);
    }
    Ok(())
}
