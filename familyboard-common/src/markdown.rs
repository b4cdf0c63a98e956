use crate::escape::escape_html;
use regex::{Captures, Regex};
use std::sync::LazyLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

impl Rule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("Invalid markdown rule pattern."),
            replacement,
        }
    }
}

/// Applied in order; each rule sees the output of the previous ones.
static INLINE_RULES: LazyLock<[Rule; 9]> = LazyLock::new(|| {
    [
        Rule::new(r"(?m)^### (.*)$", "<h3>${1}</h3>"),
        Rule::new(r"(?m)^## (.*)$", "<h2>${1}</h2>"),
        Rule::new(r"(?m)^# (.*)$", "<h1>${1}</h1>"),
        Rule::new(r"\*\*(.+?)\*\*", "<strong>${1}</strong>"),
        Rule::new(r"\*(.+?)\*", "<em>${1}</em>"),
        // Fences before spans, or the span rule eats the inner backticks.
        Rule::new(r"(?s)```(.*?)```", "<pre><code>${1}</code></pre>"),
        Rule::new(r"`([^`]+)`", "<code>${1}</code>"),
        Rule::new(
            r"\[(.*?)\]\((https?://[^\s)]+)\)",
            r#"<a href="${2}" target="_blank" rel="noreferrer noopener">${1}</a>"#,
        ),
        Rule::new(r"(?m)^(?:- |\* )(.*)$", "<li>${1}</li>"),
    ]
});

static LIST_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:<li>.*</li>\n?)+").expect("Invalid list pattern."));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("Invalid paragraph pattern."));

const BLOCK_TAGS: [&str; 5] = ["<h1>", "<h2>", "<h3>", "<ul>", "<pre>"];

#[must_use]
pub fn render_markdown(source: &str) -> String {
    let mut html = escape_html(&source.replace("\r\n", "\n"));

    for rule in INLINE_RULES.iter() {
        html = rule
            .pattern
            .replace_all(&html, rule.replacement)
            .into_owned();
    }

    let html = LIST_RUN.replace_all(&html, |captures: &Captures| {
        let run = &captures[0];
        let items = run.trim_end_matches('\n');
        format!("<ul>{items}</ul>{}", &run[items.len()..])
    });

    BLANK_LINES
        .split(&html)
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            if BLOCK_TAGS.iter().any(|tag| block.starts_with(tag)) {
                block.to_owned()
            } else {
                format!("<p>{}</p>", block.replace('\n', "<br>"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
