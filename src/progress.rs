use cadventory_indexer::Progress;
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

const TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {prefix:.bold} {wide_msg}";

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.set_prefix("Indexing");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Show progress events on a spinner until the run closes the channel.
pub async fn follow(mut progress: mpsc::Receiver<Progress>) {
    let bar = spinner();
    bar.set_message("scanning…");
    while let Some(Progress { processed, seen, current }) = progress.recv().await {
        bar.set_message(format!("{}/{} {}", HumanCount(processed), HumanCount(seen), current.display()));
    }
    bar.finish_and_clear();
}
