// ===== TOKEN SELECTOR =====
//
// Decides which tokens a fetch cycle should cover. A token is due when its
// last update is at least update_interval seconds old (never-updated tokens
// are always due). Fast-tier tokens win ties, then the most stale first, so
// a large backlog degrades the slow tiers before the fast ones.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::database::tokens;
use crate::logger::{self, LogTag};
use crate::types::TrackedToken;

use super::classifier::{FAST_INTERVAL_SECS, MEDIUM_INTERVAL_SECS, SLOW_INTERVAL_SECS};

/// Cap on tokens selected per cycle
pub const SELECTION_LIMIT: usize = 150;

fn tier_rank(update_interval: i64) -> u8 {
    if update_interval <= FAST_INTERVAL_SECS {
        0
    } else if update_interval <= MEDIUM_INTERVAL_SECS {
        1
    } else if update_interval <= SLOW_INTERVAL_SECS {
        2
    } else {
        3
    }
}

/// Active tokens due for a refresh, ordered by tier then staleness
pub fn select_due_tokens(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<TrackedToken>, String> {
    let mut due: Vec<TrackedToken> = tokens::get_active_tokens(conn)?
        .into_iter()
        .filter(|t| match t.last_updated_at {
            None => true,
            Some(ts) => (now - ts).num_seconds() >= t.update_interval,
        })
        .collect();

    due.sort_by(|a, b| {
        tier_rank(a.update_interval)
            .cmp(&tier_rank(b.update_interval))
            .then_with(|| match (a.last_updated_at, b.last_updated_at) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            })
    });

    if due.len() > limit {
        logger::debug(
            LogTag::Selector,
            &format!("{} tokens due, truncating to {}", due.len(), limit),
        );
        due.truncate(limit);
    }

    Ok(due)
}

// ===== TESTS =====
