//! Line-oriented extraction of steps from a recorded script.
//!
//! This is a heuristic view, not a parser. Each source line yields at most
//! one step, classified by substring: `click` beats `fill` beats `goto`.
//! Lines matching none of them are dropped; the raw script stays the
//! authoritative artifact for replay.

use crate::clock::{Clock, SystemClock};

use super::types::{Step, StepAction};

const CLICK_TOKEN: &str = "click";
const FILL_TOKEN: &str = "fill";
const NAVIGATE_TOKEN: &str = "goto";

/// Locator constructors whose argument list becomes the selector, in lookup order
const LOCATOR_CALLS: [&str; 3] = ["get_by_role", "get_by_placeholder", "get_by_text"];

/// Lines starting with one of these words are definitions or imports
const SKIP_KEYWORDS: [&str; 4] = ["def", "async def", "import", "from"];

/// Lines starting with one of these are comments or decorators
const SKIP_SYMBOLS: [&str; 3] = ["#", "@", "//"];

/// Extract steps, stamping them with the wall clock
pub fn extract(raw_script: &str) -> Vec<Step> {
    extract_with_clock(raw_script, &SystemClock)
}

/// Extract steps, stamping them with `clock`
pub fn extract_with_clock(raw_script: &str, clock: &dyn Clock) -> Vec<Step> {
    let mut steps = Vec::new();

    for (index, raw_line) in raw_script.lines().enumerate() {
        let line = raw_line.trim();
        if is_skipped(line) {
            continue;
        }

        match classify_line(line) {
            Some(action) => steps.push(Step::new(action, clock.now())),
            None => tracing::trace!(line = index + 1, "No step in `{}`", line),
        }
    }

    tracing::debug!("Extracted {} steps", steps.len());
    steps
}

/// Map one trimmed, non-skipped line to an action
fn classify_line(line: &str) -> Option<StepAction> {
    if line.contains(CLICK_TOKEN) {
        Some(StepAction::Click {
            selector: extract_selector(line),
        })
    } else if line.contains(FILL_TOKEN) {
        Some(StepAction::Fill {
            selector: extract_selector(line),
            value: extract_value(line),
        })
    } else if line.contains(NAVIGATE_TOKEN) {
        Some(StepAction::Navigate {
            url: extract_url(line),
        })
    } else {
        None
    }
}

fn is_skipped(line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if SKIP_SYMBOLS.iter().any(|symbol| line.starts_with(symbol)) {
        return true;
    }
    SKIP_KEYWORDS.iter().any(|keyword| {
        line.strip_prefix(keyword)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    })
}

/// Argument list of the first known locator call, or the whole line
fn extract_selector(line: &str) -> String {
    LOCATOR_CALLS
        .iter()
        .find_map(|call| segment_after(line, call))
        .map(|args| trim_call(args).to_string())
        .unwrap_or_else(|| line.to_string())
}

/// Last argument of the fill invocation, unquoted
fn extract_value(line: &str) -> String {
    segment_after(line, FILL_TOKEN)
        .map(|args| trim_quotes(trim_call(last_argument(trim_call(args)))).to_string())
        .unwrap_or_default()
}

/// First argument of the navigation invocation, unquoted
fn extract_url(line: &str) -> String {
    segment_after(line, NAVIGATE_TOKEN)
        .map(|args| trim_quotes(trim_call(first_argument(trim_call(args)))).to_string())
        .unwrap_or_default()
}

/// Text between the first occurrence of `token` and the next one
fn segment_after<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    line.split(token).nth(1)
}

fn trim_call(text: &str) -> &str {
    text.trim()
        .trim_matches(|c| c == '(' || c == ')')
        .trim()
}

fn trim_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'')
}

fn first_argument(args: &str) -> &str {
    match top_level_commas(args).first() {
        Some(&comma) => &args[..comma],
        None => args,
    }
}

fn last_argument(args: &str) -> &str {
    match top_level_commas(args).last() {
        Some(&comma) => &args[comma + 1..],
        None => args,
    }
}

/// Byte offsets of commas outside string literals and nested brackets
fn top_level_commas(args: &str) -> Vec<usize> {
    let mut commas = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in args.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => commas.push(offset),
            _ => {}
        }
    }
    commas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::recording::types::StepKind;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
    }

    #[test]
    fn test_extract_preserves_line_order() {
        let script = "goto(\"https://x\")\nclick(get_by_role(\"button\"))\nfill(get_by_placeholder(\"name\"), \"Bob\")\n";
        let steps = extract_with_clock(script, &clock());

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].kind(), StepKind::Navigate);
        assert_eq!(steps[0].url(), Some("https://x"));
        assert_eq!(steps[1].kind(), StepKind::Click);
        assert!(steps[1].selector().unwrap().contains("button"));
        assert_eq!(steps[2].kind(), StepKind::Fill);
        assert!(steps[2].selector().unwrap().contains("name"));
        assert_eq!(steps[2].value(), Some("Bob"));
    }

    #[test]
    fn test_extract_codegen_script() {
        let script = r#"import re
from playwright.sync_api import Playwright, sync_playwright, expect


def run(playwright: Playwright) -> None:
    browser = playwright.chromium.launch(headless=False)
    context = browser.new_context()
    page = context.new_page()
    page.goto("https://shop.example.com/")
    page.get_by_role("link", name="Sign in").click()
    page.get_by_placeholder("Email").fill("bob@example.com")
    page.get_by_text("Continue").click()

    # ---------------------
    context.close()
    browser.close()


with sync_playwright() as playwright:
    run(playwright)
"#;
        let steps = extract_with_clock(script, &clock());
        let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Navigate, StepKind::Click, StepKind::Fill, StepKind::Click]
        );
        assert_eq!(steps[0].url(), Some("https://shop.example.com/"));
        assert!(steps[1].selector().unwrap().contains("Sign in"));
        assert!(steps[2].selector().unwrap().contains("Email"));
        assert_eq!(steps[2].value(), Some("bob@example.com"));
        assert!(steps[3].selector().unwrap().contains("Continue"));
    }

    #[test]
    fn test_no_actions_yields_empty() {
        let script = "import os\n\nprint('hello')\n# click here\nx = 1\n";
        assert!(extract_with_clock(script, &clock()).is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn test_click_wins_over_fill_on_same_line() {
        let steps = extract_with_clock("page.fill('#a', 'x'); page.click('#b')", &clock());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind(), StepKind::Click);
    }

    #[test]
    fn test_selector_degrades_to_whole_line() {
        let steps = extract_with_clock("  page.locator('#submit').click()  ", &clock());
        assert_eq!(steps[0].selector(), Some("page.locator('#submit').click()"));
    }

    #[test]
    fn test_keyword_prefix_needs_word_boundary() {
        let steps = extract_with_clock("default_button.click()\ndef click_all():", &clock());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].selector(), Some("default_button.click()"));
    }

    #[test]
    fn test_fill_value_keeps_commas_inside_quotes() {
        let steps = extract_with_clock("page.locator('#addr').fill(\"1 Main St, Springfield\")", &clock());
        assert_eq!(steps[0].value(), Some("1 Main St, Springfield"));
    }

    #[test]
    fn test_goto_ignores_keyword_arguments() {
        let steps = extract_with_clock("page.goto(\"https://x/a\", wait_until=\"load\")", &clock());
        assert_eq!(steps[0].url(), Some("https://x/a"));
    }

    #[test]
    fn test_steps_are_stamped_by_clock() {
        let steps = extract_with_clock("page.goto('https://x')", &clock());
        assert_eq!(steps[0].recorded_at, clock().0);
    }
}
