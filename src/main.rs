use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use rewire::image::{ElfImage, ImageDirectory};
use rewire::redirect::{Redirect, RedirectTable};
use rewire::scan::ScanStats;
use rewire::session::{RedirectSession, ScanReport};
use rewire::types::VirtAddr;

#[derive(Parser)]
#[command(name = "rewire", about = "Redirect direct calls inside ELF images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show an image's code areas and function symbols
    Inspect {
        /// ELF image to inspect
        image: PathBuf,
    },
    /// Rewrite calls so they land on the replacement functions
    Apply {
        /// ELF image to patch
        image: PathBuf,
        /// Redirection as original=replacement (symbol names or hex addresses)
        #[arg(short = 'r', long = "redirect", required = true)]
        redirects: Vec<String>,
        /// Write the patched image here instead of in place
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Scan and report without writing the image back
        #[arg(long)]
        dry_run: bool,
    },
    /// Undo redirections applied earlier with the same pairs
    Revert {
        /// ELF image to restore
        image: PathBuf,
        /// The pairs given to apply, in the same original=replacement order
        #[arg(short = 'r', long = "redirect", required = true)]
        redirects: Vec<String>,
        /// Write the restored image here instead of in place
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Scan and report without writing the image back
        #[arg(long)]
        dry_run: bool,
    },
}

enum Direction {
    Apply,
    Revert,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Inspect { image } => cmd_inspect(&image),
        Command::Apply {
            image,
            redirects,
            output,
            dry_run,
        } => cmd_rewrite(&image, &redirects, output.as_deref(), dry_run, Direction::Apply),
        Command::Revert {
            image,
            redirects,
            output,
            dry_run,
        } => cmd_rewrite(&image, &redirects, output.as_deref(), dry_run, Direction::Revert),
    }
}

fn cmd_inspect(path: &Path) -> anyhow::Result<()> {
    let image =
        ElfImage::load(path).with_context(|| format!("load image {}", path.display()))?;

    println!("{} {} ({})", "image".bold().cyan(), image.name(), image.width());
    if let Some(init) = image.init_span() {
        println!("  init area: {} ({} bytes)", init.vaddr, init.size);
    }
    let text = image.text_span();
    println!("  core area: {} ({} bytes)", text.vaddr, text.size);

    if image.symbols().is_empty() {
        println!("  no function symbols (stripped image)");
    } else {
        println!("  functions:");
        for sym in image.symbols() {
            println!("    {:>18}  {}", format!("{}", sym.addr), sym.name);
        }
    }
    Ok(())
}

fn cmd_rewrite(
    path: &Path,
    redirects: &[String],
    output: Option<&Path>,
    dry_run: bool,
    direction: Direction,
) -> anyhow::Result<()> {
    let mut directory = ImageDirectory::new();
    let id = directory
        .load(path)
        .with_context(|| format!("load image {}", path.display()))?;
    let image = directory.get(id).context("image not registered")?;
    let name = image.name().to_string();
    let width = image.width();
    let table = build_table(image, redirects)?;

    let mut session = match direction {
        Direction::Apply => RedirectSession::new(table, width),
        Direction::Revert => RedirectSession::resume_attached(table, width),
    };
    let report = match direction {
        Direction::Apply => session.attach_module(&mut directory, &name)?,
        Direction::Revert => session.detach_module(&mut directory, &name)?,
    };

    print_report(&name, session.table().len(), &report);

    if dry_run {
        println!("{}", "dry run, image not written".yellow());
        return Ok(());
    }
    let out = output.unwrap_or(path);
    let image = directory.get(id).context("image not registered")?;
    image
        .save_as(out)
        .with_context(|| format!("write image {}", out.display()))?;
    println!("{} {}", "wrote".green(), out.display());
    Ok(())
}

/// Turn `original=replacement` pairs into a validated table, resolving
/// symbol names against the image.
fn build_table(image: &ElfImage, redirects: &[String]) -> anyhow::Result<RedirectTable> {
    let mut pairs = Vec::new();
    for arg in redirects {
        let (original, replacement) = arg.split_once('=').with_context(|| {
            format!("bad redirect '{}', expected original=replacement", arg)
        })?;
        pairs.push(Redirect {
            original: resolve(image, original)?,
            replacement: resolve(image, replacement)?,
        });
    }
    Ok(RedirectTable::new(pairs)?)
}

fn resolve(image: &ElfImage, what: &str) -> anyhow::Result<VirtAddr> {
    if let Some(hex) = what.strip_prefix("0x") {
        let addr = u64::from_str_radix(hex, 16)
            .with_context(|| format!("bad address '{}'", what))?;
        return Ok(VirtAddr(addr));
    }
    image
        .lookup(what)
        .with_context(|| format!("no function symbol '{}' in {}", what, image.name()))
}

fn print_report(name: &str, redirections: usize, report: &ScanReport) {
    println!("{} {}", "module".bold().cyan(), name);
    println!("  redirections: {}", redirections);
    if let Some(init) = &report.init {
        print_stats("init", init);
    }
    print_stats("core", &report.core);
    println!("  calls rewritten: {}", report.patched());
}

fn print_stats(which: &str, stats: &ScanStats) {
    let status = if !stats.completed() {
        "abandoned".red()
    } else if stats.truncated {
        "ran past the end".yellow()
    } else {
        "ok".green()
    };
    println!(
        "  {} area: {} instructions, {} rewritten, {} skipped ({})",
        which,
        stats.instructions,
        stats.patched,
        stats.unsupported_width + stats.out_of_range,
        status,
    );
    if let Some(addr) = stats.failed_at {
        println!("    {} could not decode at {}", "warning:".yellow(), addr);
    }
}
