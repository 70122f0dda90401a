use crate::types::{MigrationCounts, Region};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn popup_content(region: &Region, counts: MigrationCounts) -> String {
    format!(
        "<b>{}</b><br>Positive Migration: {}<br>Negative Migration: {}",
        v_htmlescape::escape(&region.name),
        counts.positive,
        counts.negative,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestToken {
    pub region: String,
    pub seq: u64,
}

// Clicks may resolve in any order; only the newest token per region may show its result.
#[derive(Debug, Default)]
pub struct RequestTokens {
    latest: Mutex<HashMap<String, u64>>,
}

impl RequestTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, region: &str) -> RequestToken {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        let seq = latest.entry(region.to_string()).or_insert(0);
        *seq += 1;
        RequestToken { region: region.to_string(), seq: *seq }
    }

    /// True while no newer token has been issued for the token's region.
    pub fn is_current(&self, token: &RequestToken) -> bool {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.get(&token.region) == Some(&token.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::MultiPolygon;
    use std::sync::Arc;

    fn region(name: &str) -> Region {
        Region { code: "091".to_string(), name: name.to_string(), geometry: MultiPolygon::new(vec![]) }
    }

    #[test]
    fn test_popup_content() {
        let content = popup_content(&region("Helsinki"), MigrationCounts { positive: 100, negative: 50 });
        assert_eq!(content, "<b>Helsinki</b><br>Positive Migration: 100<br>Negative Migration: 50");
    }

    #[test]
    fn test_popup_escapes_name() {
        let content = popup_content(&region("<Pori & Ulvila>"), MigrationCounts { positive: 1, negative: 2 });
        assert!(content.starts_with("<b>&lt;Pori &amp; Ulvila&gt;</b>"));
    }

    #[test]
    fn test_newest_token_wins() {
        let tokens = RequestTokens::new();
        let first = tokens.issue("091");
        let second = tokens.issue("091");

        // The first request resolves last but must not overwrite the second.
        assert!(tokens.is_current(&second));
        assert!(!tokens.is_current(&first));
    }

    #[test]
    fn test_regions_do_not_interfere() {
        let tokens = RequestTokens::new();
        let helsinki = tokens.issue("091");
        let espoo = tokens.issue("049");
        tokens.issue("049");

        assert!(tokens.is_current(&helsinki));
        assert!(!tokens.is_current(&espoo));
    }

    #[test]
    fn test_unknown_token() {
        let tokens = RequestTokens::new();
        assert!(!tokens.is_current(&RequestToken { region: "091".to_string(), seq: 1 }));
    }

    #[test]
    fn test_concurrent_issue_is_unique() {
        let tokens = Arc::new(RequestTokens::new());
        let handles: Vec<_> = (0..8).map(|_| {
            let tokens = Arc::clone(&tokens);
            std::thread::spawn(move || (0..100).map(|_| tokens.issue("091").seq).collect::<Vec<_>>())
        }).collect();

        let mut seqs: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 800);
        assert!(tokens.is_current(&RequestToken { region: "091".to_string(), seq: 800 }));
    }
}
