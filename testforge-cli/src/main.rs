use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

// Import from testforge-core
use testforge_core::archive::{self, ArchiveMeta};
use testforge_core::{
    GenerationOutcome, GenerationReport, GenerationRequest, GeneratorConfig, ModelBackend, TestCaseGenerator,
};

// Import CLI utilities
use testforge_cli::resolve_config_path;

#[derive(Parser)]
#[command(name = "testforge")]
#[command(about = "Generate confidence-tiered test-case mind maps from requirements documents")]
#[command(version)]
struct Cli {
    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Turn a .docx/.doc/.pdf requirements document into a .xmind archive
    Generate(GenerateArgs),

    /// Validate an archive and fix its manifest and missing documents in place
    Repair {
        /// Path to the .xmind archive
        archive: PathBuf,

        /// Path to custom config file (YAML format)
        #[arg(short, long)]
        config: Option<String>,
    },

    /// List an archive's members and manifest entries
    Inspect {
        /// Path to the .xmind archive
        archive: PathBuf,
    },

    /// Print the effective configuration with credentials removed
    ShowConfig {
        /// Path to custom config file (YAML format)
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Path to the requirements document
    #[arg(short, long)]
    input: PathBuf,

    /// Output archive path (if not specified, auto-generated under output_dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to custom config file (YAML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Model backend: openai or anthropic
    #[arg(long)]
    backend: Option<ModelBackend>,

    /// Skip requirement defect detection
    #[arg(long)]
    no_defects: bool,

    /// Skip clarification question generation
    #[arg(long)]
    no_questions: bool,

    /// Print the statistics as JSON instead of the human summary
    #[arg(long)]
    json_summary: bool,

    /// Capture normalized blocks, prompt and raw model reply under this directory
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Command::Generate(args) => generate(args),
        Command::Repair { archive, config } => repair(&archive, config.as_deref()),
        Command::Inspect { archive } => inspect(&archive),
        Command::ShowConfig { config } => show_config(config.as_deref()),
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TESTFORGE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

/// File config (explicit or per-user), then environment overrides.
/// Status goes to stderr; stdout is reserved for command output.
fn load_config(explicit: Option<&str>) -> GeneratorConfig {
    let path = resolve_config_path(explicit);
    tracing::debug!(path = ?path, "resolved config path");
    let path_str = path.as_ref().map(|p| p.to_string_lossy().into_owned());

    let mut config = GeneratorConfig::load_with_fallback(path_str.as_deref());
    match &path_str {
        Some(p) => eprintln!("📋 Loaded config from: {p}"),
        None => eprintln!("📋 Using default config"),
    }
    config.apply_env_overrides();
    config
}

fn generate(args: GenerateArgs) -> Result<()> {
    eprintln!("🧪 TestForge test-case generator");

    let mut config = load_config(args.config.as_deref());
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(dir) = args.diagnostics_dir {
        config.diagnostics_dir = Some(dir);
    }
    let enable_defects = config.features.defect_detection && !args.no_defects;
    let enable_questions = config.features.question_generation && !args.no_questions;

    eprintln!("📄 Processing: {}", args.input.display());
    eprintln!("🤖 Backend: {}", config.backend.name());

    let mut request = GenerationRequest::new(&args.input).with_flags(enable_defects, enable_questions);
    if let Some(output) = args.output {
        request = request.with_output(output);
    }

    let generator = TestCaseGenerator::from_config(config);
    match generator.generate(request) {
        GenerationOutcome::Success(report) => {
            if args.json_summary {
                println!("{}", serde_json::to_string_pretty(&report.result.statistics)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        GenerationOutcome::Failure(failure) => {
            eprintln!("❌ Generation failed at stage '{}' ({:?})", failure.stage(), failure.kind());
            eprintln!("   {}", failure.error);
            std::process::exit(1);
        }
    }
}

fn print_report(report: &GenerationReport) {
    let stats = &report.result.statistics;
    println!("✅ Archive written: {}", report.archive_path.display());
    println!("📊 Test cases: {} across {} modules", stats.total_cases, stats.modules_count);
    println!("   🟢 green:  {:>4} ({:.1}%)", stats.green_cases, stats.green_percentage);
    println!("   🟡 yellow: {:>4} ({:.1}%)", stats.yellow_cases, stats.yellow_percentage);
    println!("   🔴 red:    {:>4} ({:.1}%)", stats.red_cases, stats.red_percentage);
    println!("❓ Questions: {}", stats.questions_count);
    println!("🐞 Defects: {}", stats.defects_count);

    if report.repair.changed {
        println!("🔧 Archive repaired: synthesized {:?}", report.repair.synthesized);
    }

    let total: std::time::Duration = report.timings.iter().map(|(_, d)| *d).sum();
    println!("\n⏱️  Stage timings:");
    for (step, duration) in &report.timings {
        println!("   {:.<20} {:.0}ms", step, duration.as_millis());
    }
    println!("   {:.<20} {:.0}ms", "Total", total.as_millis());
}

fn repair(path: &Path, config: Option<&str>) -> Result<()> {
    let config = load_config(config);
    let meta = ArchiveMeta::from_config(&config.archive);

    let report = archive::repair(path, &meta).with_context(|| format!("failed to repair {}", path.display()))?;
    if report.changed {
        println!("🔧 Repaired {}", path.display());
        for doc in &report.synthesized {
            println!("   + synthesized {doc}");
        }
        for entry in &report.added_entries {
            println!("   + manifest entry {entry}");
        }
        for entry in &report.dropped_entries {
            println!("   - manifest entry {entry}");
        }
    } else {
        println!("✅ {} is consistent, no changes made", path.display());
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let inspection = archive::inspect(path).with_context(|| format!("failed to read {}", path.display()))?;

    println!("📦 {}", path.display());
    println!("Members:");
    for member in &inspection.members {
        println!("   {member}");
    }
    match &inspection.manifest {
        Some(entries) => {
            println!("Manifest:");
            for entry in entries {
                println!("   {} ({})", entry.path, entry.media_type);
            }
        }
        None => println!("⚠️  No readable manifest"),
    }
    if !inspection.missing_mandatory.is_empty() {
        println!("⚠️  Missing documents: {}", inspection.missing_mandatory.join(", "));
    }
    if inspection.consistent {
        println!("✅ Manifest matches members");
    } else {
        println!("⚠️  Manifest does not match members; run `testforge repair`");
    }
    Ok(())
}

fn show_config(config: Option<&str>) -> Result<()> {
    let config = load_config(config);
    println!("{}", config.to_redacted_yaml()?);
    Ok(())
}
