use anchor_patcher::anchor::{self, AnchorSpec};
use anchor_patcher::buffer::{self, SourceBuffer};
use anchor_patcher::config::{
    apply_patches, check_patches, discover_patch_files, load_from_path, PatchConfig,
    PatchOutcome, PatchReport, RunOptions,
};
use anchor_patcher::logging;
use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};

const WORKSPACE_ENV: &str = "ANCHOR_PATCHER_WORKSPACE";

#[derive(Parser)]
#[command(name = "anchor-patcher")]
#[command(about = "Idempotent anchor-based patching for UI source files", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PatchSource {
    /// Path to workspace root (defaults to $ANCHOR_PATCHER_WORKSPACE, then the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Specific patch file (otherwise every .toml in patches/)
    #[arg(short, long)]
    patches: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patches to a workspace
    Apply {
        #[command(flatten)]
        source: PatchSource,

        /// Patch this file instead of each patch's configured target
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Report which patches are applied, pending, or blocked (read-only)
    Status {
        #[command(flatten)]
        source: PatchSource,
    },

    /// Exit non-zero unless every patch is already applied
    Verify {
        #[command(flatten)]
        source: PatchSource,
    },

    /// List available patches
    List {
        #[command(flatten)]
        source: PatchSource,
    },

    /// Show every match of an anchor with surrounding context
    Locate {
        /// File to search
        #[arg(short, long)]
        file: PathBuf,

        /// Literal anchor text
        #[arg(long, conflicts_with = "regex", required_unless_present = "regex")]
        literal: Option<String>,

        /// Regex anchor pattern
        #[arg(long)]
        regex: Option<String>,

        /// Only search after the first occurrence of this marker
        #[arg(long)]
        after: Option<String>,

        /// Lines of context around each match
        #[arg(short = 'C', long, default_value_t = 2)]
        context: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Apply {
            source,
            target,
            dry_run,
            diff,
        } => cmd_apply(source, target, dry_run, diff),
        Commands::Status { source } => cmd_status(source),
        Commands::Verify { source } => cmd_verify(source),
        Commands::List { source } => cmd_list(source),
        Commands::Locate {
            file,
            literal,
            regex,
            after,
            context,
        } => cmd_locate(&file, literal, regex, after, context),
    }
}

/// Resolve workspace path.
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. ANCHOR_PATCHER_WORKSPACE environment variable
/// 3. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return path
            .canonicalize()
            .with_context(|| format!("workspace not found: {}", path.display()));
    }

    if let Ok(env_path) = env::var(WORKSPACE_ENV) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!("Warning: {WORKSPACE_ENV} is set but path doesn't exist: {env_path}").yellow()
        );
    }

    Ok(env::current_dir()?.canonicalize()?)
}

/// Patch files to load: the explicit one, else `<workspace>/patches`, else
/// `./patches`.
fn patch_files(workspace: &Path, explicit: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(vec![path]);
    }

    let candidates = std::iter::once(workspace.join("patches"))
        .chain(env::current_dir().ok().map(|cwd| cwd.join("patches")));
    for dir in candidates {
        if !dir.is_dir() {
            continue;
        }
        let files = discover_patch_files(&dir);
        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch files found in either {}/patches or ./patches",
        workspace.display()
    )
}

fn load_sets(source: PatchSource) -> Result<(PathBuf, Vec<(PathBuf, PatchConfig)>)> {
    let workspace = resolve_workspace(source.workspace)?;
    let mut sets = Vec::new();
    for path in patch_files(&workspace, source.patches)? {
        let config = load_from_path(&path)?;
        sets.push((path, config));
    }
    Ok((workspace, sets))
}

fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        println!("{}", format!("{}", hunk.header()).cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{change}").red(),
                ChangeTag::Insert => format!("+{change}").green(),
                ChangeTag::Equal => format!(" {change}").normal(),
            };
            print!("{line}");
            if change.missing_newline() {
                println!();
            }
        }
    }
}

/// Print one report line plus diagnostics. Returns false for failures.
fn print_report(report: &PatchReport, dry_run: bool, show_diff: bool) -> bool {
    let id = &report.id;
    match &report.outcome {
        PatchOutcome::Applied {
            warnings, change, ..
        } => {
            let verb = if dry_run { "Would apply" } else { "Applied" };
            println!(
                "{} {}: {} to {} ({})",
                "✓".green(),
                id,
                verb,
                report.file.display(),
                report.outcome
            );
            for warning in warnings {
                println!("  {} {}", "⚠".yellow(), warning.to_string().yellow());
            }
            if show_diff {
                if let Some(change) = change {
                    display_diff(&report.file, &change.before, &change.after);
                }
            }
            true
        }
        PatchOutcome::AlreadyApplied => {
            println!("{} {}: Already applied", "⊙".yellow(), id);
            true
        }
        PatchOutcome::AmbiguousMatch { count } => {
            eprintln!("{} {}: {}", "✗".red(), id, report.outcome);
            eprintln!("  File: {}", report.file.display());
            eprintln!(
                "  Action: narrow the anchor with a scope or an explicit select rule ({count} candidates)"
            );
            false
        }
        PatchOutcome::AnchorNotFound | PatchOutcome::TerminatorNotFound { .. } => {
            eprintln!("{} {}: {}", "✗".red(), id, report.outcome);
            eprintln!("  File: {}", report.file.display());
            eprintln!("  Possible causes:");
            eprintln!("    - The anchored markup was edited or moved");
            eprintln!("    - The scope marker no longer exists");
            false
        }
        PatchOutcome::Failed { .. } => {
            eprintln!("{} {}: {}", "✗".red(), id, report.outcome);
            eprintln!("  File: {}", report.file.display());
            false
        }
    }
}

fn cmd_apply(
    source: PatchSource,
    target: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let (workspace, sets) = load_sets(source)?;
    println!("Workspace: {}", workspace.display());
    println!();

    let options = RunOptions {
        dry_run,
        capture_text: show_diff,
        target_override: target,
        ..RunOptions::default()
    };

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_failed = 0;

    for (path, config) in sets {
        println!("Loading patches from {}...", path.display());
        if dry_run {
            println!("{}", "  [DRY RUN - nothing is written]".cyan());
        }

        let reports = apply_patches(&config, &workspace, &options)?;
        for report in &reports {
            match (&report.outcome, print_report(report, dry_run, show_diff)) {
                (PatchOutcome::Applied { .. }, _) => total_applied += 1,
                (PatchOutcome::AlreadyApplied, _) => total_already_applied += 1,
                (_, _) => total_failed += 1,
            }
        }
        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{total_applied}").green());
    println!(
        "  {} already applied",
        format!("{total_already_applied}").yellow()
    );
    println!("  {} failed", format!("{total_failed}").red());

    if total_failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_status(source: PatchSource) -> Result<()> {
    let (workspace, sets) = load_sets(source)?;

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut blocked = Vec::new();

    for (_, config) in &sets {
        for report in check_patches(config, &workspace)? {
            match report.outcome {
                PatchOutcome::AlreadyApplied => applied.push(report.id),
                PatchOutcome::Applied { .. } => pending.push(report.id),
                ref outcome => blocked.push((report.id.clone(), outcome.to_string())),
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {id}");
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "PENDING".yellow().bold(),
            pending.len()
        );
        for id in &pending {
            println!("  - {id}");
        }
        println!();
    }

    if !blocked.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊘".red(),
            "BLOCKED".red().bold(),
            blocked.len()
        );
        for (id, reason) in &blocked {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(source: PatchSource) -> Result<()> {
    let (workspace, sets) = load_sets(source)?;

    println!("{}", "Verifying patches...".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut verified = 0;
    let mut mismatch = 0;

    for (_, config) in &sets {
        for report in check_patches(config, &workspace)? {
            match &report.outcome {
                PatchOutcome::AlreadyApplied => {
                    println!("{} {}: Verified (already applied)", "✓".green(), report.id);
                    verified += 1;
                }
                PatchOutcome::Applied { .. } => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), report.id);
                    eprintln!("  Expected: patch already applied");
                    eprintln!("  Found: patch not yet applied");
                    eprintln!("  Location: {}", report.file.display());
                    mismatch += 1;
                }
                outcome => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), report.id);
                    eprintln!("  Error: {outcome}");
                    eprintln!("  Location: {}", report.file.display());
                    mismatch += 1;
                }
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{verified}").green());
    println!("  {} mismatch", format!("{mismatch}").red());

    if mismatch > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_list(source: PatchSource) -> Result<()> {
    let (_, sets) = load_sets(source)?;

    for (path, config) in &sets {
        let name = if config.meta.name.is_empty() {
            path.display().to_string()
        } else {
            config.meta.name.clone()
        };
        println!("{}", name.bold());
        if let Some(description) = &config.meta.description {
            println!("  {}", description.dimmed());
        }

        for patch in &config.patches {
            let target = patch.target(&config.meta).unwrap_or("?");
            println!(
                "  {} {} [{} -> {}] {}",
                "•".cyan(),
                patch.id,
                patch.anchor.kind(),
                patch.operation.kind(),
                target.dimmed()
            );
            if let Some(description) = &patch.description {
                println!("      {description}");
            }
        }
        println!();
    }
    Ok(())
}

fn cmd_locate(
    file: &Path,
    literal: Option<String>,
    regex: Option<String>,
    after: Option<String>,
    context: usize,
) -> Result<()> {
    let buffer = buffer::load(file)?;

    let mut spec = match (literal, regex) {
        (Some(text), _) => AnchorSpec::literal(text),
        (None, Some(pattern)) => AnchorSpec::regex(pattern),
        (None, None) => anyhow::bail!("one of --literal or --regex is required"),
    };
    if let Some(marker) = after {
        spec = spec.after(marker);
    }
    spec.validate()?;

    let result = anchor::locate(&buffer, &spec)?;
    for (idx, found) in result.matches().iter().enumerate() {
        println!(
            "{} match {} at line {}",
            "•".cyan(),
            idx + 1,
            found.line_number()
        );
        print_context(&buffer, found.line, found.end_line, context);
        println!();
    }

    let count = result.count();
    let summary = format!("{count} match(es) in {}", file.display());
    match count {
        0 => println!("{}", summary.red()),
        1 => println!("{}", summary.green()),
        _ => println!("{}", summary.yellow()),
    }
    Ok(())
}

/// Print lines around `first..=last`, marking the matched ones.
fn print_context(buffer: &SourceBuffer, first: usize, last: usize, context: usize) {
    let start = first.saturating_sub(context);
    let end = (last + context).min(buffer.line_count().saturating_sub(1));
    for line in start..=end {
        let number = format!("{:>6}", line + 1);
        if (first..=last).contains(&line) {
            println!("{} {} {}", number.bold(), ">".green(), buffer.line_text(line));
        } else {
            println!("{} {} {}", number.dimmed(), "|".dimmed(), buffer.line_text(line));
        }
    }
}
