use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use tracing::info;

use iams_extract::{
    config::Config,
    docx::extract_header_footer,
    mime_detection,
    ocr::{health::OcrHealthChecker, types::ExtractionOverrides},
    DocumentExtractor, FeeStatement, TranscriptSummary, UploadedFile,
};

fn cli() -> Command {
    Command::new("iams-extract")
        .about("Extract text from uploaded PDF and image documents")
        .subcommand_required(true)
        .subcommand(
            Command::new("extract")
                .about("Run the extraction pipeline on a PDF or image")
                .arg(
                    Arg::new("file")
                        .help("Document to extract")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("content-type")
                        .help("Declared content type; detected from the file when omitted")
                        .long("content-type")
                        .short('t')
                        .value_name("MIME"),
                )
                .arg(
                    Arg::new("language")
                        .help("OCR language code, e.g. eng or eng+swa")
                        .long("language")
                        .short('l')
                        .value_name("LANG"),
                )
                .arg(
                    Arg::new("scale")
                        .help("Page render scale, 1.0 = 72 DPI")
                        .long("scale")
                        .value_parser(clap::value_parser!(f32)),
                )
                .arg(
                    Arg::new("max-pages")
                        .help("Maximum number of pages to OCR")
                        .long("max-pages")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("min-confidence")
                        .help("Per-page OCR confidence (0-100) a page must exceed")
                        .long("min-confidence")
                        .value_parser(clap::value_parser!(f32)),
                )
                .arg(
                    Arg::new("no-preprocessing")
                        .help("Skip image binarization before OCR")
                        .long("no-preprocessing")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("balance")
                        .help("Also parse a fee-statement balance from the text")
                        .long("balance")
                        .short('b')
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("transcript")
                        .help("Also analyze the text as an academic transcript")
                        .long("transcript")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("student-name")
                        .help("Registered student name to compare with the transcript")
                        .long("student-name")
                        .value_name("NAME")
                        .requires("transcript"),
                ),
        )
        .subcommand(
            Command::new("docx-parts")
                .about("Print the header and footer text of a DOCX template")
                .arg(Arg::new("file").required(true).index(1)),
        )
        .subcommand(Command::new("doctor").about("Check OCR and rasterizer installation"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
            .add_directive("lopdf=error".parse().unwrap())
            .add_directive("iams_extract=info".parse().unwrap())
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    match cli().get_matches().subcommand() {
        Some(("extract", args)) => run_extract(&config, args).await,
        Some(("docx-parts", args)) => run_docx_parts(args).await,
        Some(("doctor", _)) => run_doctor(&config),
        _ => unreachable!("subcommand_required is set"),
    }
}

async fn run_extract(config: &Config, args: &ArgMatches) -> Result<()> {
    let path = Path::new(args.get_one::<String>("file").context("missing file argument")?);
    if !path.exists() {
        anyhow::bail!("File {} does not exist", path.display());
    }

    let content_type = match args.get_one::<String>("content-type") {
        Some(declared) => declared.clone(),
        None => {
            let name = path.file_name().and_then(|n| n.to_str());
            let head = read_head(path).await?;
            mime_detection::resolve_content_type("", name, &head).mime_type
        }
    };

    let options = ExtractionOverrides {
        language: args.get_one::<String>("language").cloned(),
        raster_scale: args.get_one::<f32>("scale").copied(),
        max_pages: args.get_one::<usize>("max-pages").copied(),
        min_confidence: args.get_one::<f32>("min-confidence").copied(),
        enable_preprocessing: args.get_flag("no-preprocessing").then_some(false),
    }
    .apply(config.default_options());

    info!("Extracting {} as {}", path.display(), content_type);
    let extractor = DocumentExtractor::from_config(config);
    let result = extractor
        .extract(&UploadedFile::from_path(path, content_type), &options)
        .await;
    extractor.engine().shutdown().await;

    let fee_statement = args
        .get_flag("balance")
        .then(|| FeeStatement::from_extraction(&result));
    let transcript = args.get_flag("transcript").then(|| {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let registered = args.get_one::<String>("student-name").map(String::as_str);
        TranscriptSummary::from_extraction(&result, filename, registered)
    });

    let output = if fee_statement.is_none() && transcript.is_none() {
        serde_json::to_value(&result)?
    } else {
        let mut output = serde_json::json!({ "extraction": result });
        if let Some(fee_statement) = fee_statement {
            output["feeStatement"] = serde_json::to_value(fee_statement)?;
        }
        if let Some(transcript) = transcript {
            output["transcript"] = serde_json::to_value(transcript)?;
        }
        output
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn read_head(path: &Path) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut head = vec![0u8; 8192];
    let read = file.read(&mut head).await?;
    head.truncate(read);
    Ok(head)
}

async fn run_docx_parts(args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<String>("file").context("missing file argument")?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let parts = extract_header_footer(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&parts)?);
    Ok(())
}

fn run_doctor(config: &Config) -> Result<()> {
    let checker = OcrHealthChecker::new(config.pdftoppm_path.clone());
    let report = checker.perform_full_health_check(&config.ocr_language);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}
