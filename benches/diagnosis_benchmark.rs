use criterion::{Criterion, black_box, criterion_group, criterion_main};
use web_replay::{classify, extract};

const CODEGEN_SCRIPT: &str = r#"from playwright.sync_api import Playwright, sync_playwright

def run(playwright: Playwright) -> None:
    browser = playwright.chromium.launch(headless=False)
    page = browser.new_page()
    page.goto("https://shop.example.com/")
    page.get_by_role("link", name="Sign in").click()
    page.get_by_placeholder("Email").fill("bob@example.com")
    page.get_by_placeholder("Password").fill("hunter2")
    page.get_by_role("button", name="Log in").click()
    page.get_by_text("Checkout").click()
"#;

const TRACEBACK: &str = "Traceback (most recent call last):\n  File \"login.py\", line 9, in run\n\
playwright._impl._errors.TimeoutError: Page.fill: Timeout 30000ms exceeded.\nCall log:\n  - waiting for locator(\"#email\")\n";

fn benchmark_extract(c: &mut Criterion) {
    c.bench_function("extract_codegen_script", |b| {
        b.iter(|| {
            let steps = extract(black_box(CODEGEN_SCRIPT));
            assert_eq!(steps.len(), 6);
        })
    });
}

fn benchmark_classify(c: &mut Criterion) {
    c.bench_function("classify_traceback", |b| b.iter(|| classify(black_box(TRACEBACK))));
    c.bench_function("classify_unmatched", |b| {
        b.iter(|| classify(black_box("segmentation fault (core dumped)")))
    });
}

criterion_group!(benches, benchmark_extract, benchmark_classify);
criterion_main!(benches);
