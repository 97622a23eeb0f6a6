use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use outline::ops::BatchOutcome;
use outline::projectors::listing::{self, SectionListing};
use outline::projectors::{stats, summary};
use outline::{FileStore, NodePath, Outline, OutlineError, OutlineStore, format_outline};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "outline",
    about = "Numbered task outlines kept in a Markdown file",
    version
)]
struct Cli {
    /// Outline document to read and rewrite.
    #[arg(
        long,
        short = 'f',
        global = true,
        env = "OUTLINE_FILE",
        default_value = "TODO_FEATURES.md"
    )]
    file: PathBuf,
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Append a main item to a section.
    Add(AddArgs),
    /// Append several main items to a section.
    AddMultiple(AddMultipleArgs),
    /// Append a sub-item under an item or sub-item.
    AddSub(AddSubArgs),
    /// Mark a main item as done.
    Complete(ItemArgs),
    /// Mark several main items as done.
    CompleteMultiple(ItemsArgs),
    /// Mark a main item as not done.
    Uncomplete(ItemArgs),
    /// Mark a sub-item as done.
    CompleteSub(PathArgs),
    /// Mark a sub-item as not done.
    UncompleteSub(PathArgs),
    /// Move a main item to the end of another section.
    Move(MoveArgs),
    /// Exchange two main items.
    Swap(PairArgs),
    /// Move a main item so that it gets the given number.
    MoveTo(MoveToArgs),
    /// Move a sub-item under a new parent.
    MoveSub(PathPairArgs),
    /// Exchange two sub-items.
    SwapSub(PathPairArgs),
    /// Move a sub-item one level up.
    PromoteSub(PathArgs),
    /// Move a sub-item one level down, under a sibling.
    DemoteSub(PathPairArgs),
    /// Create an empty section at the end.
    NewSection(SectionArgs),
    /// Move every item of one section into another and delete the first.
    Merge(MergeArgs),
    /// Remove a main item with its sub-items.
    Remove(ItemArgs),
    /// Remove several main items, numbered as before the removal.
    RemoveMultiple(ItemsArgs),
    /// Remove a section with all of its items.
    RemoveSection(SectionArgs),
    /// List sections with their item counts.
    Sections(JsonArgs),
    /// List the items of one section.
    List(ListArgs),
    /// List unfinished items of every section.
    AllIncomplete(JsonArgs),
    /// List every item of every section.
    All(JsonArgs),
    /// Rewrite the document with canonical numbering.
    Reorder,
    /// Show completion statistics.
    Stats(JsonArgs),
    /// Report lines the parser could not place.
    Check(JsonArgs),
    /// Print the canonical document without writing it.
    Show,
}

#[derive(Debug, Args)]
struct AddArgs {
    text: String,
    section: String,
    /// Create the item already done.
    #[arg(long)]
    completed: bool,
}

#[derive(Debug, Args)]
struct AddMultipleArgs {
    section: String,
    #[arg(required = true)]
    texts: Vec<String>,
    /// Create the items already done.
    #[arg(long)]
    completed: bool,
}

#[derive(Debug, Args)]
struct AddSubArgs {
    /// Parent path, e.g. `4` or `4.2`.
    parent: NodePath,
    text: String,
    /// Create the sub-item already done.
    #[arg(long)]
    completed: bool,
}

#[derive(Debug, Args)]
struct ItemArgs {
    number: usize,
}

#[derive(Debug, Args)]
struct ItemsArgs {
    #[arg(required = true)]
    numbers: Vec<usize>,
}

#[derive(Debug, Args)]
struct PathArgs {
    /// Dotted sub-item path, e.g. `4.2.1`.
    path: NodePath,
}

#[derive(Debug, Args)]
struct PairArgs {
    first: usize,
    second: usize,
}

#[derive(Debug, Args)]
struct PathPairArgs {
    /// Dotted sub-item path.
    first: NodePath,
    /// Dotted path of the other node.
    second: NodePath,
}

#[derive(Debug, Args)]
struct MoveArgs {
    number: usize,
    section: String,
}

#[derive(Debug, Args)]
struct MoveToArgs {
    number: usize,
    position: usize,
}

#[derive(Debug, Args)]
struct SectionArgs {
    name: String,
}

#[derive(Debug, Args)]
struct MergeArgs {
    source: String,
    target: String,
}

#[derive(Debug, Args)]
struct JsonArgs {
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    section: String,
    /// Skip finished items and everything below them.
    #[arg(long)]
    incomplete: bool,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let store = FileStore::new(&cli.file);
    debug!(file = ?store.path(), "using outline file");
    let output = run(cli.command, &store)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Executes one command against `store` and returns what should be printed.
fn run(command: Commands, store: &impl OutlineStore) -> Result<String> {
    match command {
        Commands::Add(args) => {
            let number =
                mutate(store, |o| o.add_item(&args.text, &args.section, args.completed))?;
            Ok(format!("Added item {number} to '{}'", args.section))
        }
        Commands::AddMultiple(args) => mutate_batch(
            store,
            |o| o.add_items(args.texts.as_slice(), &args.section, args.completed),
            |text, result| match result {
                Ok(number) => format!("Added item {number}: {text}"),
                Err(err) => format!("Failed {text:?}: {err}"),
            },
        ),
        Commands::AddSub(args) => {
            let path =
                mutate(store, |o| o.add_sub_item(&args.parent, &args.text, args.completed))?;
            Ok(format!("Added sub-item {path} under {}", args.parent))
        }
        Commands::Complete(args) => {
            mutate(store, |o| o.complete_item(args.number))?;
            Ok(format!("Completed item {}", args.number))
        }
        Commands::CompleteMultiple(args) => {
            mutate_batch(store, |o| Ok(o.complete_items(&args.numbers)), per_item("Completed"))
        }
        Commands::Uncomplete(args) => {
            mutate(store, |o| o.uncomplete_item(args.number))?;
            Ok(format!("Reopened item {}", args.number))
        }
        Commands::CompleteSub(args) => {
            mutate(store, |o| sub_item_only(&args.path).and_then(|p| o.complete(p)))?;
            Ok(format!("Completed sub-item {}", args.path))
        }
        Commands::UncompleteSub(args) => {
            mutate(store, |o| sub_item_only(&args.path).and_then(|p| o.uncomplete(p)))?;
            Ok(format!("Reopened sub-item {}", args.path))
        }
        Commands::Move(args) => {
            let number = mutate(store, |o| o.move_item(args.number, &args.section))?;
            Ok(format!(
                "Moved item {} to '{}' as item {number}",
                args.number, args.section
            ))
        }
        Commands::Swap(args) => {
            mutate(store, |o| o.swap_items(args.first, args.second))?;
            Ok(format!("Swapped items {} and {}", args.first, args.second))
        }
        Commands::MoveTo(args) => {
            mutate(store, |o| o.move_to_position(args.number, args.position))?;
            Ok(format!(
                "Moved item {} to position {}",
                args.number, args.position
            ))
        }
        Commands::MoveSub(args) => {
            let path = mutate(store, |o| o.move_sub_item(&args.first, &args.second))?;
            Ok(format!("Moved sub-item {} to {path}", args.first))
        }
        Commands::SwapSub(args) => {
            mutate(store, |o| o.swap_sub_items(&args.first, &args.second))?;
            Ok(format!(
                "Swapped sub-items {} and {}",
                args.first, args.second
            ))
        }
        Commands::PromoteSub(args) => {
            let path = mutate(store, |o| o.promote_sub_item(&args.path))?;
            Ok(format!("Promoted sub-item {} to {path}", args.path))
        }
        Commands::DemoteSub(args) => {
            let path = mutate(store, |o| o.demote_sub_item(&args.first, &args.second))?;
            Ok(format!("Demoted sub-item {} to {path}", args.first))
        }
        Commands::NewSection(args) => {
            let index = mutate(store, |o| o.new_section(&args.name))?;
            Ok(format!("Created section {index}. {}", args.name))
        }
        Commands::Merge(args) => {
            let moved = mutate(store, |o| o.merge_sections(&args.source, &args.target))?;
            Ok(format!(
                "Merged '{}' into '{}' ({moved} items moved)",
                args.source, args.target
            ))
        }
        Commands::Remove(args) => {
            let removed = mutate(store, |o| o.remove_item(args.number))?;
            Ok(format!("Removed item {}: {}", args.number, removed.text))
        }
        Commands::RemoveMultiple(args) => {
            mutate_batch(store, |o| Ok(o.remove_items(&args.numbers)), per_item("Removed"))
        }
        Commands::RemoveSection(args) => {
            let removed = mutate(store, |o| o.remove_section(&args.name))?;
            Ok(format!(
                "Removed section '{}' with {} items",
                removed.name,
                removed.items.len()
            ))
        }
        Commands::Sections(args) => {
            let rows = summary::sections(&store.load()?);
            if args.json {
                return to_json(&rows);
            }
            Ok(rows
                .iter()
                .map(|r| format!("{}. {} ({} items)", r.index, r.name, r.items))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Commands::List(args) => {
            let listing = listing::section_entries(&store.load()?, &args.section, args.incomplete)?;
            if args.json {
                return to_json(&listing);
            }
            Ok(render_listing(&listing))
        }
        Commands::AllIncomplete(args) => list_all(store, true, args.json),
        Commands::All(args) => list_all(store, false, args.json),
        Commands::Reorder => {
            let outline = store.load()?;
            store.save(&outline)?;
            Ok(format!("Renumbered {} items", outline.item_count()))
        }
        Commands::Stats(args) => {
            let stats = stats::compute(&store.load()?);
            if args.json {
                return to_json(&stats);
            }
            Ok(render_stats(&stats))
        }
        Commands::Check(args) => {
            let (_, report) = store.load_with_report()?;
            if args.json {
                return to_json(&report);
            }
            if report.is_clean() {
                return Ok("No malformed lines".to_string());
            }
            let dropped = report.dropped.iter().map(|d| {
                format!("line {}: {} ({})", d.line, d.text.trim(), d.reason.describe())
            });
            let shadowed = report.shadowed_sections.iter().map(|s| {
                format!(
                    "line {}: section '{}' is hidden by earlier section '{}'",
                    s.line, s.name, s.shadowed_by
                )
            });
            Ok(dropped.chain(shadowed).collect::<Vec<_>>().join("\n"))
        }
        Commands::Show => Ok(format_outline(&store.load()?).trim_end().to_string()),
    }
}

/* ------------------------------ Helpers ------------------------------ */

/// Loads, applies `apply`, and saves only when it succeeded.
fn mutate<T>(
    store: &impl OutlineStore,
    apply: impl FnOnce(&mut Outline) -> Result<T, OutlineError>,
) -> Result<T> {
    let mut outline = store.load()?;
    let value = apply(&mut outline)?;
    store.save(&outline)?;
    Ok(value)
}

/// Saves when at least one step of the batch succeeded; fails when none did.
fn mutate_batch<K: Clone, T>(
    store: &impl OutlineStore,
    apply: impl FnOnce(&mut Outline) -> Result<BatchOutcome<K, T>, OutlineError>,
    describe: impl Fn(&K, &Result<T, OutlineError>) -> String,
) -> Result<String> {
    let mut outline = store.load()?;
    let outcome = apply(&mut outline)?;
    let summary = render_batch(&outcome, describe);
    if !outcome.any_succeeded() {
        bail!(summary);
    }
    store.save(&outline)?;
    Ok(summary)
}

fn sub_item_only(path: &NodePath) -> Result<&NodePath, OutlineError> {
    if path.is_item() {
        return Err(OutlineError::NotFound(format!("sub-item {path}")));
    }
    Ok(path)
}

fn list_all(store: &impl OutlineStore, only_incomplete: bool, json: bool) -> Result<String> {
    let listings = listing::all_entries(&store.load()?, only_incomplete);
    if json {
        return to_json(&listings);
    }
    if listings.is_empty() {
        return Ok(if only_incomplete {
            "Nothing left to do".to_string()
        } else {
            "No sections".to_string()
        });
    }
    let total: usize = listings.iter().map(SectionListing::item_count).sum();
    let mut blocks: Vec<String> = listings.iter().map(render_listing).collect();
    blocks.push(format!("Total: {total} items"));
    Ok(blocks.join("\n\n"))
}

fn render_listing(listing: &SectionListing) -> String {
    let mut lines = vec![format!("{}. {}", listing.index, listing.name)];
    for entry in &listing.entries {
        let mark = if entry.completed { 'x' } else { ' ' };
        let indent = "  ".repeat(usize::from(entry.level));
        if entry.path.is_item() {
            lines.push(format!("{indent}{}. [{mark}] {}", entry.path, entry.text));
        } else {
            lines.push(format!("{indent}- [{mark}] {} {}", entry.path, entry.text));
        }
    }
    lines.join("\n")
}

fn render_stats(stats: &stats::Stats) -> String {
    let mut lines = vec![
        format!(
            "Items: {} ({} done, {} remaining)",
            stats.total_items, stats.completed_items, stats.remaining_items
        ),
        format!(
            "Sub-items: {} ({} done)",
            stats.total_sub_items, stats.completed_sub_items
        ),
        format!("Sections: {}", stats.sections),
    ];
    if let Some(progress) = stats.progress {
        lines.push(format!("Progress: {progress:.1}%"));
    }
    for (name, counts) in &stats.per_section {
        lines.push(format!("  {name}: {}/{}", counts.completed, counts.items));
    }
    lines.join("\n")
}

fn per_item(verb: &str) -> impl Fn(&usize, &Result<(), OutlineError>) -> String + '_ {
    move |n, result| match result {
        Ok(()) => format!("{verb} item {n}"),
        Err(err) => format!("Failed item {n}: {err}"),
    }
}

fn render_batch<K: Clone, T>(
    outcome: &BatchOutcome<K, T>,
    describe: impl Fn(&K, &Result<T, OutlineError>) -> String,
) -> String {
    let mut lines: Vec<String> = outcome
        .outcomes
        .iter()
        .map(|(key, result)| describe(key, result))
        .collect();
    lines.push(format!(
        "{} of {} succeeded",
        outcome.succeeded().len(),
        outcome.outcomes.len()
    ));
    lines.join("\n")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SEED: &str = "# Project
## 1. Backlog

1. [ ] Write parser
    - [ ] 1.1 Headers
        - [ ] 1.1.1 Numbers
2. [ ] Write formatter

## 2. Done

3. [x] Set up repo
";

    fn seeded() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("TODO_FEATURES.md");
        fs::write(&path, SEED).expect("seed");
        let store = FileStore::new(path);
        (dir, store)
    }

    fn exec(store: &FileStore, argv: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("outline").chain(argv.iter().copied()))
            .expect("arguments");
        run(cli.command, store)
    }

    fn contents(store: &FileStore) -> String {
        fs::read_to_string(store.path()).expect("read")
    }

    #[test]
    fn add_writes_canonical_document() {
        let (_dir, store) = seeded();
        let out = exec(&store, &["add", "Write tests", "backlog"]).expect("add");
        assert_eq!(out, "Added item 3 to 'backlog'");
        let text = contents(&store);
        assert!(text.starts_with("# Project\n\n## 1. Backlog\n"));
        assert!(text.contains("3. [ ] Write tests\n\n## 2. Done\n\n4. [x] Set up repo\n"));
    }

    #[test]
    fn promote_sub_renumbers_on_disk() {
        let (_dir, store) = seeded();
        let out = exec(&store, &["promote-sub", "1.1.1"]).expect("promote");
        assert_eq!(out, "Promoted sub-item 1.1.1 to 1.2");
        assert!(contents(&store).contains("    - [ ] 1.1 Headers\n    - [ ] 1.2 Numbers\n"));
    }

    #[test]
    fn failed_mutation_leaves_file_untouched() {
        let (_dir, store) = seeded();
        let err = exec(&store, &["demote-sub", "1.1", "1.1.1"]).expect_err("level mismatch");
        assert!(matches!(
            err.downcast_ref::<OutlineError>(),
            Some(OutlineError::LevelMismatch { .. })
        ));
        assert!(exec(&store, &["add", "x", "Nowhere"]).is_err());
        assert!(exec(&store, &["complete-sub", "1"]).is_err());
        assert_eq!(contents(&store), SEED);
    }

    #[test]
    fn batch_remove_saves_partial_success() {
        let (_dir, store) = seeded();
        let out = exec(&store, &["remove-multiple", "2", "999"]).expect("partial");
        assert!(out.contains("Removed item 2"));
        assert!(out.contains("Failed item 999"));
        assert!(out.ends_with("1 of 2 succeeded"));
        assert!(!contents(&store).contains("Write formatter"));

        let before = contents(&store);
        assert!(exec(&store, &["complete-multiple", "41", "42"]).is_err());
        assert_eq!(contents(&store), before);
    }

    #[test]
    fn batch_add_keeps_valid_texts() {
        let (_dir, store) = seeded();
        let out = exec(&store, &["add-multiple", "backlog", "Write docs", "two\nlines", "Ship"])
            .expect("partial");
        assert!(out.contains("Added item 3: Write docs"));
        assert!(out.contains("Failed \"two\\nlines\""));
        assert!(out.contains("Added item 4: Ship"));
        assert!(out.ends_with("2 of 3 succeeded"));
        let text = contents(&store);
        assert!(text.contains("3. [ ] Write docs\n4. [ ] Ship\n\n## 2. Done\n\n5. [x] Set up repo\n"));

        let before = contents(&store);
        assert!(exec(&store, &["add-multiple", "Backlog", "a\nb"]).is_err());
        let err = exec(&store, &["add-multiple", "Nowhere", "fine"]).expect_err("no section");
        assert!(matches!(
            err.downcast_ref::<OutlineError>(),
            Some(OutlineError::SectionNotFound(_))
        ));
        assert_eq!(contents(&store), before);
    }

    #[test]
    fn reorder_canonicalizes_hand_edits() {
        let (_dir, store) = seeded();
        fs::write(store.path(), "## 1. A\n\n9. [ ] a\n    - [ ] 9.1 b\n7. [ ] c\n").expect("seed");
        exec(&store, &["reorder"]).expect("reorder");
        assert_eq!(
            contents(&store),
            "## 1. A\n\n1. [ ] a\n    - [ ] 1.1 b\n2. [ ] c\n"
        );
    }

    #[test]
    fn read_only_verbs_do_not_write() {
        let (_dir, store) = seeded();
        let listed = exec(&store, &["list", "Backlog", "--incomplete"]).expect("list");
        assert!(listed.starts_with("1. Backlog\n"));
        assert!(listed.contains("- [ ] 1.1.1 Numbers"));

        let open = exec(&store, &["all-incomplete"]).expect("all-incomplete");
        assert!(!open.contains("Done"));
        assert!(open.ends_with("Total: 2 items"));

        let stats = exec(&store, &["stats", "--json"]).expect("stats");
        let value: serde_json::Value = serde_json::from_str(&stats).expect("json");
        assert_eq!(value["total_items"], 3);
        assert_eq!(value["per_section"]["Done"]["completed"], 1);

        let sections = exec(&store, &["sections"]).expect("sections");
        assert_eq!(sections, "1. Backlog (2 items)\n2. Done (1 items)");
        assert!(exec(&store, &["show"]).expect("show").starts_with("# Project\n\n## 1. Backlog"));
        assert_eq!(contents(&store), SEED);
    }

    #[test]
    fn check_reports_dropped_lines() {
        let (_dir, store) = seeded();
        assert_eq!(exec(&store, &["check"]).expect("check"), "No malformed lines");
        fs::write(store.path(), "## 1. A\n\n1. [ ] a\n        - [ ] 1.9.1 lost\n").expect("seed");
        let out = exec(&store, &["check"]).expect("check");
        assert_eq!(out, "line 4: - [ ] 1.9.1 lost (parent sub-item not found)");

        fs::write(store.path(), "## 1. Work\n\n## 2. work\n").expect("seed");
        let out = exec(&store, &["check"]).expect("check");
        assert_eq!(out, "line 3: section 'work' is hidden by earlier section 'Work'");
    }

    #[test]
    fn invalid_paths_are_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["outline", "promote-sub", "1..2"]).is_err());
        assert!(Cli::try_parse_from(["outline", "swap", "1", "x"]).is_err());
    }

    #[test]
    fn file_option_reads_from_flag() {
        let cli = Cli::try_parse_from(["outline", "--file", "/tmp/o.md", "show"]).expect("cli");
        assert_eq!(cli.file, PathBuf::from("/tmp/o.md"));
        assert!(!cli.verbose);
    }
}
