use tracing::debug;

use crate::models::history::History;

/// Drop the oldest tool-result images so that roughly `keep` remain.
///
/// The surplus is rounded down to a multiple of `chunk`, so history only changes once every
/// `chunk` new images; in between, the prompt prefix stays stable for upstream caching.
/// Text and any image not removed are left untouched. Returns the number of images removed.
pub fn filter_to_n_most_recent_images(history: &mut History, keep: usize, chunk: usize) -> usize {
    let chunk = chunk.max(1);
    let total: usize = history
        .tool_result_contents_mut()
        .map(|content| content.iter().filter(|item| item.is_image()).count())
        .sum();

    let surplus = total.saturating_sub(keep);
    let to_remove = surplus - surplus % chunk;
    if to_remove == 0 {
        return 0;
    }

    let mut remaining = to_remove;
    for content in history.tool_result_contents_mut() {
        if remaining == 0 {
            break;
        }
        content.retain(|item| {
            if remaining > 0 && item.is_image() {
                remaining -= 1;
                false
            } else {
                true
            }
        });
    }

    debug!(total, keep, removed = to_remove, "Filtered tool result images");
    to_remove
}
