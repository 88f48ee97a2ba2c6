use clap::{Parser, Subcommand};
use packsmith::config::{self, PipelineConfig};
use packsmith::generate::{self, BatchOptions, GenerateRequest};
use packsmith::manifest::{self, Channel};
use packsmith::naming::Layout;
use packsmith::publish::{self, AwsCliStore};
use packsmith::quality::{self, GateContext, QualityReport};
use packsmith::review::{self, Transition};
use packsmith::scan::{self, WorkspaceScan};
use packsmith::template::TemplateStore;
use packsmith::tokens::{self, TokenDictionary};
use packsmith::types::{ContentKind, Level, ReviewStatus};
use packsmith::{analytics, bundle, dedupe, index, output};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

type CliResult = Result<ExitCode, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "packsmith")]
#[command(about = "Content pipeline for language-learning curriculum packs")]
#[command(long_about = "\
Content pipeline for language-learning curriculum packs

Generates packs from scenario templates, gates them on quality rules, walks
them through review, and turns approved content into paginated indexes,
bundles, hashed manifests and an object-storage upload.

Project structure:

  packsmith.toml                        # Pipeline config (optional)
  content/
  ├── meta/
  │   ├── scenario-tokens.json          # Per-scenario token dictionaries
  │   ├── bundles/a2-work.json          # Bundle definitions
  │   ├── manifest.staging.json         # Written by `manifest`
  │   └── manifest.json                 # Written by `promote`
  ├── templates/v1/scenarios/work.json  # Scenario templates
  └── v1/workspaces/de/
      ├── config.toml                   # Workspace overrides (optional)
      ├── catalog.json                  # Written by `index`
      ├── packs/index.json              # Written by `index`
      └── packs/work_a2_s42/pack.json   # Entries
  exports/bundles/a2-work/              # Written by `bundle`

Typical flow:
  generate → validate → review → index → bundle → manifest → promote → publish

Run 'packsmith gen-config' to print a documented packsmith.toml.")]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one pack from a scenario template
    Generate {
        #[arg(long)]
        scenario: String,
        #[arg(long)]
        level: Level,
        #[arg(long)]
        seed: u64,
        /// Pack id (default: {scenario}_{level}_s{seed})
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "de")]
        workspace: String,
        /// Provenance timestamp (default: now)
        #[arg(long)]
        generated_at: Option<String>,
        /// Generate and check without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate every pack listed in a plan file
    GenerateBatch {
        plan: PathBuf,
        #[arg(long)]
        generated_at: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the quality gate over one or all workspaces
    Validate {
        #[arg(long)]
        workspace: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find prompts that repeat across entries and workspaces
    Duplicates {
        #[arg(long)]
        workspace: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Analytics maintenance
    #[command(subcommand)]
    Analytics(AnalyticsCommand),
    /// Move an entry through the review workflow
    Review {
        kind: ContentKind,
        id: String,
        /// Target status: draft, needs_review or approved
        #[arg(long)]
        to: ReviewStatus,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value = "de")]
        workspace: String,
    },
    /// Rebuild paginated indexes and catalogs
    Index {
        #[arg(long)]
        workspace: Option<String>,
        /// Fail if anything on disk differs instead of writing
        #[arg(long)]
        check: bool,
    },
    /// Build bundles (all definitions when no id is given)
    Bundle { ids: Vec<String> },
    /// Write the staging manifest
    Manifest {
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Verify the staging manifest and copy it to production
    Promote,
    /// Upload the promoted content to object storage
    Publish {
        #[arg(long)]
        dry_run: bool,
    },
    /// Token dictionary maintenance
    #[command(subcommand)]
    Tokens(TokensCommand),
    /// Print a stock packsmith.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum AnalyticsCommand {
    /// Recompute missing or stale analytics on generated, unapproved packs
    Backfill {
        #[arg(long)]
        workspace: Option<String>,
        /// Rewrite the pack files (default: report only)
        #[arg(long)]
        write: bool,
    },
}

#[derive(Subcommand)]
enum TokensCommand {
    /// Apply an add/remove patch to scenario-tokens.json
    Apply {
        patch: PathBuf,
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr so stdout stays parseable with `--json`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "packsmith=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: the config can constrain
/// down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn status(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::from(1) }
}

/// Everything the quality rules need, loaded once per config.
struct GateInputs {
    config: PipelineConfig,
    tokens: TokenDictionary,
    required: BTreeMap<String, Vec<String>>,
}

impl GateInputs {
    fn load(layout: &Layout, config: PipelineConfig) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            config,
            tokens: TokenDictionary::load(&layout.tokens_path())?.normalized(),
            required: TemplateStore::new(layout).required_tokens()?,
        })
    }

    fn ctx(&self) -> GateContext<'_> {
        GateContext {
            config: &self.config.quality,
            tokens: &self.tokens,
            required_tokens: &self.required,
        }
    }
}

/// Scans paired with the config cascade of their workspace.
fn scans_with_config(
    layout: &Layout,
    only: Option<&str>,
) -> Result<Vec<(WorkspaceScan, PipelineConfig)>, Box<dyn Error>> {
    scan::scan_selected(layout, only)?
        .into_iter()
        .map(|scan| -> Result<_, Box<dyn Error>> {
            let cfg = config::load_workspace_config(layout, &scan.workspace)?;
            Ok((scan, cfg))
        })
        .collect()
}

fn run(cli: Cli) -> CliResult {
    let layout = Layout::new(&cli.root);
    let root = layout.root().to_path_buf();
    let project_config = config::load_config(&layout)?;
    init_thread_pool(&project_config.processing);

    match cli.command {
        Command::Generate {
            scenario,
            level,
            seed,
            id,
            workspace,
            generated_at,
            dry_run,
        } => {
            let cfg = config::load_workspace_config(&layout, &workspace)?;
            let tokens = TokenDictionary::load(&layout.tokens_path())?.normalized();
            let template = TemplateStore::new(&layout).load(&scenario)?;
            let generated = generate::generate_pack(
                &GenerateRequest {
                    template: &template,
                    level,
                    seed,
                    pack_id: id,
                    generated_at: Some(generated_at.unwrap_or_else(now)),
                },
                &cfg,
                &tokens,
            )?;
            let (path, outcome) = generate::write_generated(&layout, &workspace, &generated, dry_run)?;
            output::print_generated(&generated.pack, &path, outcome, &root);
            Ok(ExitCode::SUCCESS)
        }

        Command::GenerateBatch {
            plan,
            generated_at,
            dry_run,
        } => {
            let plan = generate::load_plan(&plan)?;
            let cfg = config::load_workspace_config(&layout, &plan.workspace)?;
            let tokens = TokenDictionary::load(&layout.tokens_path())?.normalized();
            let generated_at = generated_at.unwrap_or_else(now);
            let results = generate::run_batch(
                &layout,
                &plan,
                &cfg,
                &tokens,
                &BatchOptions {
                    generated_at: Some(&generated_at),
                    dry_run,
                },
            );
            output::print_batch(&results, &root);
            Ok(status(results.iter().all(|r| r.outcome.is_ok())))
        }

        Command::Validate { workspace, json } => {
            let mut report = QualityReport {
                passed: true,
                ..QualityReport::default()
            };
            for (scan, cfg) in scans_with_config(&layout, workspace.as_deref())? {
                let inputs = GateInputs::load(&layout, cfg)?;
                let part = quality::evaluate(std::slice::from_ref(&scan), &inputs.ctx());
                report.passed &= part.passed;
                report.packs.extend(part.packs);
                report.failures.extend(part.failures);
                report.warnings.extend(part.warnings);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_quality_report(&report, &root);
            }
            Ok(status(report.passed))
        }

        Command::Duplicates { workspace, json } => {
            let scans = scan::scan_selected(&layout, workspace.as_deref())?;
            let clusters = dedupe::find_duplicates(&scans);
            let failures: Vec<_> = scans.into_iter().flat_map(|s| s.failures).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
                // keep stdout parseable
                for line in output::format_load_failures(&failures, &root) {
                    eprintln!("{line}");
                }
            } else {
                output::print_duplicates(&clusters);
                output::print_load_failures(&failures, &root);
            }
            Ok(status(clusters.is_empty() && failures.is_empty()))
        }

        Command::Analytics(AnalyticsCommand::Backfill { workspace, write }) => {
            let mut changes = Vec::new();
            let mut failures = Vec::new();
            for (scan, cfg) in scans_with_config(&layout, workspace.as_deref())? {
                let inputs = GateInputs::load(&layout, cfg)?;
                changes.extend(analytics::backfill(
                    std::slice::from_ref(&scan),
                    &inputs.ctx(),
                    write,
                )?);
                failures.extend(scan.failures);
            }
            output::print_backfill(&changes, &root, write);
            output::print_load_failures(&failures, &root);
            Ok(status(
                failures.is_empty() && changes.iter().all(|c| c.remaining.is_empty()),
            ))
        }

        Command::Review {
            kind,
            id,
            to,
            reviewer,
            notes,
            workspace,
        } => {
            let path = layout.entry_path(&workspace, kind, &id);
            let mut entry = scan::load_entry(kind, &path)
                .map_err(|message| format!("{}: {message}", path.display()))?;
            let findings = if to == ReviewStatus::Approved {
                let inputs =
                    GateInputs::load(&layout, config::load_workspace_config(&layout, &workspace)?)?;
                quality::entry_failures(&entry, &inputs.ctx())
            } else {
                Vec::new()
            };
            let at = now();
            let from = review::apply(
                &mut entry,
                &Transition {
                    to,
                    reviewer: reviewer.as_deref(),
                    notes: notes.as_deref(),
                    at: &at,
                },
                &findings,
            )?;
            fs::write(&path, entry.to_json()?)?;
            output::print_review(&id, from, to, &path, &root);
            Ok(ExitCode::SUCCESS)
        }

        Command::Index { workspace, check } => {
            let mut clean = true;
            for (scan, cfg) in scans_with_config(&layout, workspace.as_deref())? {
                let files = index::render_workspace(&layout, &scan, cfg.index.page_size)?;
                let stale = index::stale_pages(&layout, &scan.workspace, &files)?;
                if check {
                    let drift = index::check_files(&files, &stale);
                    clean &= drift.is_empty();
                    output::print_drift(&scan.workspace, &drift, &root);
                } else {
                    let summary = index::write_files(&files, &stale)?;
                    output::print_write_summary(&scan.workspace, &summary, &root);
                }
                output::print_load_failures(&scan.failures, &root);
                clean &= scan.failures.is_empty();
            }
            Ok(status(clean))
        }

        Command::Bundle { ids } => {
            let ids = if ids.is_empty() {
                bundle::list_definitions(&layout)?
            } else {
                ids
            };
            let mut clean = true;
            for id in &ids {
                let built = bundle::build(&layout, id)?;
                output::print_bundle(id, &built.files, &built.summary, &root);
                output::print_load_failures(&built.failures, &root);
                clean &= built.failures.is_empty();
            }
            Ok(status(clean))
        }

        Command::Manifest { workspace } => {
            let built = manifest::build(&layout, workspace.as_deref())?;
            let (path, changed) = manifest::write(&layout, Channel::Staging, &built)?;
            output::print_manifest(&built, &path, changed, &root);
            Ok(ExitCode::SUCCESS)
        }

        Command::Promote => {
            let outcome = manifest::promote(&layout)?;
            output::print_promote(&outcome);
            Ok(ExitCode::SUCCESS)
        }

        Command::Publish { dry_run } => {
            let cfg = &project_config.publish;
            let store = AwsCliStore::from_config(cfg);
            let report = publish::publish(&layout, cfg, &store, dry_run)?;
            output::print_publish(&report, &root);
            Ok(ExitCode::SUCCESS)
        }

        Command::Tokens(TokensCommand::Apply { patch, write }) => {
            let path = layout.tokens_path();
            let mut dict = TokenDictionary::load(&path)?;
            let summary = dict.apply_patch(&tokens::load_patch(&patch)?);
            if write && !summary.is_empty() {
                dict.save(&path)?;
            }
            output::print_token_patch(&summary, &path, write, &root);
            Ok(ExitCode::SUCCESS)
        }

        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(ExitCode::SUCCESS)
        }
    }
}
