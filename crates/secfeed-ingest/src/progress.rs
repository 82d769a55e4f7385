//! Progress indicators for page retrieval

use indicatif::{ProgressBar, ProgressStyle};

/// Bar counting pages of one session
///
/// Hidden when disabled so callers never branch on it. The length is set
/// once page 0 reveals the total; cursor sessions stay open-ended.
pub fn create_page_progress(enabled: bool, prefix: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} pages ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(format!("Fetching {prefix}"));
    pb
}
