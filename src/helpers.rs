//! Pure helper functions: two-side arithmetic, mailbox id generation, and
//! usage summarization.

use data_encoding::BASE32;
use rand::prelude::*;

use crate::error::Error;

/// The result of adding or removing a side from a two-sided row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideResult {
    pub changed: bool,
    pub empty: bool,
    pub side1: Option<String>,
    pub side2: Option<String>,
}

impl SideResult {
    fn unchanged() -> Self {
        SideResult {
            changed: false,
            empty: false,
            side1: None,
            side2: None,
        }
    }
}

/// Add `new` to the set of sides present in `(side1, side2)`.
///
/// Returns `Ok(Unchanged)` if `new` is already present, `Ok(changed)` with
/// the new pair if there was room, and `Err(Error::Crowded)` if a third side
/// would result. Callers persist `(side1, side2)` exactly as returned; on
/// `Crowded` the caller is responsible for marking the row crowded before
/// propagating the error.
pub fn add_side(
    side1: Option<&str>,
    side2: Option<&str>,
    new: &str,
) -> Result<SideResult, Error> {
    let old_sides: Vec<&str> = [side1, side2].into_iter().flatten().collect();
    debug_assert!(!old_sides.is_empty(), "add_side called on an empty row");
    if old_sides.contains(&new) {
        return Ok(SideResult::unchanged());
    }
    if old_sides.len() == 2 {
        return Err(Error::Crowded);
    }
    Ok(SideResult {
        changed: true,
        empty: false,
        side1: Some(old_sides[0].to_owned()),
        side2: Some(new.to_owned()),
    })
}

/// Remove `side` from the set of sides present in `(side1, side2)`.
pub fn remove_side(side1: Option<&str>, side2: Option<&str>, side: &str) -> SideResult {
    let old_sides: Vec<&str> = [side1, side2].into_iter().flatten().collect();
    if !old_sides.contains(&side) {
        return SideResult::unchanged();
    }
    let remaining: Vec<&str> = old_sides.into_iter().filter(|s| *s != side).collect();
    if remaining.is_empty() {
        return SideResult {
            changed: true,
            empty: true,
            side1: None,
            side2: None,
        };
    }
    SideResult {
        changed: true,
        empty: false,
        side1: Some(remaining[0].to_owned()),
        side2: None,
    }
}

/// Generate 13 characters of random, lowercase, unpadded base32: 8 random
/// octets encoded as base32 with the trailing padding stripped.
pub fn generate_mailbox_id() -> String {
    let mut rng = rand::thread_rng();
    let mut buffer = [0u8; 8];
    rng.fill_bytes(&mut buffer);
    BASE32
        .encode(&buffer)
        .to_ascii_lowercase()
        .trim_end_matches('=')
        .to_owned()
}

/// One usage-log row worth of data, shared by mailbox and nameplate
/// summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub started: f64,
    pub waiting_time: Option<f64>,
    pub total_time: f64,
    pub result: String,
}

fn blur(started: f64, blur_usage: Option<f64>) -> f64 {
    match blur_usage {
        Some(b) if b > 0.0 => b * (started / b).floor(),
        _ => started,
    }
}

fn waiting_time(started: f64, second: Option<f64>) -> Option<f64> {
    second.map(|s| s - started)
}

/// Summarize a mailbox row's lifetime into a `mailbox_usage` record
///. `num_sides` must be the count of *distinct authors of
/// persisted messages*, not the count of joined sides.
#[allow(clippy::too_many_arguments)]
pub fn summarize_mailbox(
    started: f64,
    second: Option<f64>,
    num_sides: usize,
    moods: &[Option<&str>],
    delete_time: f64,
    pruned: bool,
    crowded: bool,
    blur_usage: Option<f64>,
) -> Usage {
    let mut result = match num_sides {
        0 => "quiet",
        1 => "lonely",
        _ => "happy",
    };
    if moods.contains(&Some("lonely")) {
        result = "lonely";
    }
    if moods.contains(&Some("errory")) {
        result = "errory";
    }
    if moods.contains(&Some("scary")) {
        result = "scary";
    }
    if pruned {
        result = "pruney";
    }
    if crowded {
        result = "crowded";
    }
    Usage {
        started: blur(started, blur_usage),
        waiting_time: waiting_time(started, second),
        total_time: delete_time - started,
        result: result.to_owned(),
    }
}

/// Summarize a nameplate row's lifetime into a `nameplate_usage` record.
pub fn summarize_nameplate(
    started: f64,
    second: Option<f64>,
    delete_time: f64,
    pruned: bool,
    crowded: bool,
    blur_usage: Option<f64>,
) -> Usage {
    let mut result = if second.is_some() { "happy" } else { "lonely" };
    if pruned {
        result = "pruney";
    }
    if crowded {
        result = "crowded";
    }
    Usage {
        started: blur(started, blur_usage),
        waiting_time: waiting_time(started, second),
        total_time: delete_time - started,
        result: result.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_side_to_empty_slot() {
        let r = add_side(Some("A"), None, "B").unwrap();
        assert!(r.changed);
        assert!(!r.empty);
        assert_eq!(r.side1.as_deref(), Some("A"));
        assert_eq!(r.side2.as_deref(), Some("B"));
    }

    #[test]
    fn add_side_already_present_is_unchanged() {
        let r = add_side(Some("A"), Some("B"), "A").unwrap();
        assert!(!r.changed);
    }

    #[test]
    fn add_side_third_is_crowded() {
        let err = add_side(Some("A"), Some("B"), "C").unwrap_err();
        assert!(matches!(err, Error::Crowded));
    }

    #[test]
    fn remove_side_absent_is_unchanged() {
        let r = remove_side(Some("A"), None, "Z");
        assert!(!r.changed);
    }

    #[test]
    fn remove_side_last_is_empty() {
        let r = remove_side(Some("A"), None, "A");
        assert!(r.changed);
        assert!(r.empty);
    }

    #[test]
    fn remove_side_leaves_remaining() {
        let r = remove_side(Some("A"), Some("B"), "A");
        assert!(r.changed);
        assert!(!r.empty);
        assert_eq!(r.side1.as_deref(), Some("B"));
        assert_eq!(r.side2, None);
    }

    #[test]
    fn mailbox_id_shape() {
        let id = generate_mailbox_id();
        assert_eq!(id.len(), 13);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn mood_precedence_scary_beats_errory() {
        let u = summarize_mailbox(
            0.0,
            Some(10.0),
            2,
            &[Some("scary"), Some("errory")],
            40.0,
            false,
            false,
            None,
        );
        assert_eq!(u.result, "scary");
    }

    #[test]
    fn crowded_overrides_everything() {
        let u = summarize_mailbox(0.0, Some(10.0), 2, &[Some("happy")], 40.0, false, true, None);
        assert_eq!(u.result, "crowded");
    }

    #[test]
    fn blur_quantizes_started() {
        let u = summarize_nameplate(1234.0, None, 1300.0, false, false, Some(100.0));
        assert_eq!(u.started % 100.0, 0.0);
        assert_eq!(u.started, 1200.0);
    }
}
