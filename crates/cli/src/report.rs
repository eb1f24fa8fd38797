//! Batch summary tables.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use cvsgitsync_core::models::{BatchReport, SyncOutcome};
use cvsgitsync_core::BranchMap;

use super::style;

/// Print one row per branch pair, plus repository-wide failures.
pub fn print_batch(batch: &BatchReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Repository", "Direction", "Branches", "Result", "Commit"]);

    for repo in &batch.repositories {
        if let Some(ref e) = repo.error {
            table.add_row(vec![
                Cell::new(&repo.repository),
                Cell::new(repo.direction),
                Cell::new("—"),
                Cell::new(format!("✗ {}", e)).fg(Color::Red),
                Cell::new(""),
            ]);
            continue;
        }

        for branch in &repo.branches {
            let result = match &branch.result {
                Ok(SyncOutcome::ConflictFailed) => {
                    Cell::new("⚠ merge conflict").fg(Color::Yellow)
                }
                Ok(SyncOutcome::NoChange) => Cell::new("✓ unchanged"),
                Ok(outcome) => Cell::new(format!("✓ {}", outcome)).fg(Color::Green),
                Err(e) => Cell::new(format!("✗ {}", e)).fg(Color::Red),
            };
            let commit = branch
                .commit
                .as_deref()
                .map(|sha| sha.chars().take(10).collect::<String>())
                .unwrap_or_default();

            table.add_row(vec![
                Cell::new(&repo.repository),
                Cell::new(repo.direction),
                Cell::new(&branch.pair),
                result,
                Cell::new(commit),
            ]);
        }
    }

    println!();
    println!("{}", table);

    let failed = batch.failed_count();
    if batch.aborted {
        println!("{}", style::error("batch aborted after a repository failure"));
    } else if failed > 0 {
        println!(
            "{}",
            style::error(&format!("{} repository run(s) failed", failed))
        );
    } else {
        println!(
            "{}",
            style::success(&format!(
                "{} repository run(s) synchronized",
                batch.repositories.len()
            ))
        );
    }
}

/// Print the resolved pairs and merge edges of one repository.
pub fn print_branch_map(map: &BranchMap) {
    println!();
    println!("{}", style::header(map.repository()));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Kind", "From", "To"]);

    for pair in map.import_pairs() {
        table.add_row(vec![
            Cell::new("import").fg(Color::Blue),
            Cell::new(format!("cvs:{}", pair.cvs_branch)),
            Cell::new(format!("git:{}", pair.git_branch)),
        ]);
    }
    for pair in map.export_pairs() {
        table.add_row(vec![
            Cell::new("export").fg(Color::Green),
            Cell::new(format!("git:{}", pair.git_branch)),
            Cell::new(format!("cvs:{}", pair.cvs_branch)),
        ]);
    }
    for edge in map.edges() {
        table.add_row(vec![
            Cell::new("merge"),
            Cell::new(format!("git:{}", edge.from)),
            Cell::new(format!("git:{}", edge.to)),
        ]);
    }

    let empty = map.import_pairs().is_empty()
        && map.export_pairs().is_empty()
        && map.edges().next().is_none();
    if empty {
        println!("  {}", style::dim("no branches mapped"));
    } else {
        println!("{}", table);
    }
}
