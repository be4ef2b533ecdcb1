// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::event::ReadyState;

use super::{fuse, last_nonblank_line, ReadinessCell};

fn markers(items: &[&str]) -> Vec<String> {
    items.iter().map(|m| m.to_string()).collect()
}

#[yare::parameterized(
    active_stdout_is_busy = { false, "❯ ", ReadyState::Busy },
    silent_clean_pane_is_ready = { true, "all done\n❯ ", ReadyState::Ready },
    silent_confirm_pane_is_confirm = { true, "Do you want to run this command?\n  1. Yes", ReadyState::Confirm },
    confirm_wins_over_glyph = { true, "Do you want to proceed?\n❯ 1. Yes", ReadyState::Confirm },
    empty_pane_is_ready_when_silent = { true, "", ReadyState::Ready },
)]
fn fuse_derives_state(silent: bool, snapshot: &str, expected: ReadyState) {
    let confirm = markers(&["Do you want", "Would you like"]);
    let (state, _) = fuse(silent, snapshot, "❯", &confirm);
    assert_eq!(state, expected);
}

#[test]
fn glyph_is_advisory_and_reported_separately() {
    let confirm = markers(&["Do you want"]);

    // Ready without the glyph: silence alone is sufficient.
    let (state, glyph) = fuse(true, "some trailing output", "❯", &confirm);
    assert_eq!(state, ReadyState::Ready);
    assert!(!glyph);

    // Glyph on the last non-blank line is recorded.
    let (state, glyph) = fuse(true, "reply text\n❯ \n\n", "❯", &confirm);
    assert_eq!(state, ReadyState::Ready);
    assert!(glyph);
}

#[test]
fn glyph_only_counts_on_the_last_nonblank_line() {
    let confirm = markers(&[]);
    let (_, glyph) = fuse(true, "❯ earlier prompt\nnow other text", "❯", &confirm);
    assert!(!glyph);
}

#[test]
fn confirm_marker_matches_anywhere_in_the_snapshot() {
    let confirm = markers(&["(y/n)"]);
    let snapshot = "Overwrite file? (y/n)\n\nsome more text";
    let (state, _) = fuse(true, snapshot, "❯", &confirm);
    assert_eq!(state, ReadyState::Confirm);
}

#[yare::parameterized(
    plain = { "a\nb\nc\n", Some("c") },
    trailing_blanks = { "a\nb\n\n   \n", Some("b") },
    all_blank = { "\n  \n", None },
    empty = { "", None },
)]
fn finds_last_nonblank_line(snapshot: &str, expected: Option<&str>) {
    assert_eq!(last_nonblank_line(snapshot), expected);
}

#[test]
fn cell_starts_busy() {
    let cell = ReadinessCell::new();
    assert_eq!(cell.state(), ReadyState::Busy);
}

#[tokio::test]
async fn silence_clock_tracks_output() {
    let cell = ReadinessCell::new();
    cell.note_output();
    let before = cell.millis_since_output();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let after = cell.millis_since_output();

    assert!(before < 100, "fresh output should read as recent, got {before}ms");
    // ±200ms tolerance on timing-sensitive assertions.
    assert!(after >= 100, "clock did not advance, got {after}ms");
    assert!(after < 400, "clock ran far ahead, got {after}ms");
}

#[test]
fn fresh_cell_counts_silence_from_start() {
    let cell = ReadinessCell::new();
    // No output yet: the clock runs from daemon start, so a brand-new
    // cell reads as recently active rather than instantly silent.
    assert!(cell.millis_since_output() < 100);
}
