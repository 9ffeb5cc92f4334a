//! Comparison cases using datatest-stable.
//!
//! Each test case is a file in `tests/compare-cases/` with format:
//! ```
//! <A HTML>
//! ===
//! <B HTML>
//! ===
//! <kind> <count>
//! ...
//! ```
//!
//! Kinds not listed are expected to have no differences.

use pagediff::{CompareOptions, Comparison, DifferenceKind};
use std::path::Path;

fn run_compare_case(path: &Path) -> datatest_stable::Result<()> {
    facet_testhelpers::setup();

    let content = std::fs::read_to_string(path)?;
    let parts: Vec<&str> = content.split("\n===\n").collect();

    if parts.len() != 3 {
        return Err(format!(
            "Test file must have exactly two '===' separators, found {} parts",
            parts.len()
        )
        .into());
    }

    let a = parts[0].trim();
    let b = parts[1].trim();

    let mut expected = [0usize; DifferenceKind::ALL.len()];
    for line in parts[2].lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, count) = line
            .split_once(' ')
            .ok_or_else(|| format!("expected '<kind> <count>', got {line:?}"))?;
        let kind = DifferenceKind::from_name(name.trim())
            .ok_or_else(|| format!("unknown difference kind {name:?}"))?;
        expected[kind as usize] = count.trim().parse()?;
    }

    let outcome = Comparison::from_html(a, b, CompareOptions::default())
        .map_err(|e| format!("comparison failed: {e}"))?
        .run_to_completion()
        .map_err(|e| format!("comparison failed: {e}"))?;
    let log = outcome.log();

    for kind in DifferenceKind::ALL {
        let actual = log.count(kind);
        if actual != expected[kind as usize] {
            return Err(format!(
                "{kind}: expected {}, found {actual}\nA: {a}\nB: {b}",
                expected[kind as usize]
            )
            .into());
        }
    }

    Ok(())
}

datatest_stable::harness! {
    { test = run_compare_case, root = "tests/compare-cases", pattern = r".*\.html$" },
}
