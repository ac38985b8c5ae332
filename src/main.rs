use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use object_patcher::{
    build_plan_with, linear_ranges, load_from_path, patch_object, plan_object, FileStore, Plan,
    PlanStep, Selector,
};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "object-patcher")]
#[command(about = "Range-based byte patching with streaming plans", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the keep/insert plan for a patch set
    Plan {
        /// Patch set (TOML)
        #[arg(short, long)]
        patches: PathBuf,

        /// Source file to plan against
        #[arg(short, long, conflicts_with = "length", required_unless_present = "length")]
        source: Option<PathBuf>,

        /// Plan against a source of this many bytes instead of a file
        #[arg(short, long)]
        length: Option<usize>,

        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply a patch set to a file
    Apply {
        /// Patch set (TOML)
        #[arg(short, long)]
        patches: PathBuf,

        /// File to patch
        #[arg(short, long)]
        source: PathBuf,

        /// Where to write the result (defaults to patching in place)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dry run - show the plan without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Resolve selectors against a length and check they do not overlap
    Ranges {
        /// Container length in bytes
        #[arg(short, long)]
        length: usize,

        /// Selectors in Python slice syntax, e.g. `2:-1`
        #[arg(required = true, allow_hyphen_values = true)]
        selectors: Vec<Selector>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan {
            patches,
            source,
            length,
            json,
        } => cmd_plan(&patches, source.as_deref(), length, json),

        Commands::Apply {
            patches,
            source,
            output,
            dry_run,
        } => cmd_apply(&patches, &source, output.as_deref(), dry_run),

        Commands::Ranges { length, selectors } => cmd_ranges(length, &selectors),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Absolute path of a file whose parent directory exists.
fn absolute_file(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("{} does not name a file", path.display()))?;
    let parent = parent
        .canonicalize()
        .with_context(|| format!("directory of {} does not exist", path.display()))?;
    Ok(parent.join(name))
}

/// A store rooted at the deepest directory containing every given file.
fn store_for(files: &[&Path]) -> Result<FileStore> {
    let mut root: Option<PathBuf> = None;
    for file in files.iter().copied() {
        let dir = file.parent().unwrap_or(file);
        root = Some(match root {
            None => dir.to_path_buf(),
            Some(root) => root
                .components()
                .zip(dir.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    let root = root.context("no files given")?;
    Ok(FileStore::new(root)?)
}

fn base_dir(patch_file: &Path) -> &Path {
    patch_file.parent().unwrap_or_else(|| Path::new("."))
}

fn cmd_plan(
    patch_file: &Path,
    source: Option<&Path>,
    length: Option<usize>,
    json: bool,
) -> Result<()> {
    let set = load_from_path(patch_file)?;
    let patches = set.to_patches(base_dir(patch_file))?;

    let plan = match (source, length) {
        (Some(source), _) => {
            let source = absolute_file(source)?;
            let store = store_for(&[source.as_path()])?;
            plan_object(&store, &*source, &patches, set.options())?
        }
        (None, Some(length)) => build_plan_with(length, &patches, set.options())?,
        (None, None) => anyhow::bail!("either --source or --length is required"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn cmd_apply(patch_file: &Path, source: &Path, output: Option<&Path>, dry_run: bool) -> Result<()> {
    let set = load_from_path(patch_file)?;
    let patches = set.to_patches(base_dir(patch_file))?;
    let name = if set.meta.name.is_empty() {
        patch_file.display().to_string()
    } else {
        set.meta.name.clone()
    };

    println!("Loading patches from {}...", name);

    let object = absolute_file(source)?;
    let destination = match output {
        Some(output) => absolute_file(output)?,
        None => object.clone(),
    };
    let store = store_for(&[object.as_path(), destination.as_path()])?;

    if dry_run {
        let plan = plan_object(&store, &*object, &patches, set.options())?;
        print_plan(&plan);
        println!(
            "\n{} {} patches would produce {} bytes (dry run)",
            "✓".green(),
            patches.len(),
            plan.output_len()
        );
        return Ok(());
    }

    let written = patch_object(&store, &*object, &*destination, &patches, set.options())
        .with_context(|| format!("failed to patch {}", source.display()))?;

    println!(
        "{} Applied {} patches, wrote {} bytes to {}",
        "✓".green(),
        patches.len(),
        written,
        output.unwrap_or(source).display()
    );
    Ok(())
}

fn cmd_ranges(length: usize, selectors: &[Selector]) -> Result<()> {
    let ranges = linear_ranges(length, selectors)?;
    for range in ranges {
        println!("{range}");
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    for step in plan {
        let line = step.to_string();
        match step {
            PlanStep::Keep { .. } => println!("  {}", line.dimmed()),
            PlanStep::Insert { .. } => println!("  {}", line.green()),
        }
    }
    println!(
        "{} steps, {} bytes kept, {} bytes inserted, {} bytes total",
        plan.len(),
        plan.kept_len(),
        plan.inserted_len(),
        plan.output_len()
    );
}
