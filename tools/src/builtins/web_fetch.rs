//! `web_fetch`: fetch the URLs mentioned in a prompt and return their text.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anvil_types::{ConfirmationOutcome, ToolResult, ToolResultDisplay};
use anvil_utils::truncate_output;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::confirm::{ConfirmationDetails, ConfirmationKind};
use crate::{ConfirmFut, Tool, ToolCtx, ToolError, ToolFut, parse_args, validate_args};

const NAME: &str = "web_fetch";
const MAX_URLS: usize = 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONTENT_CHARS: usize = 100_000;

#[derive(Debug, Deserialize)]
struct WebFetchArgs {
    prompt: String,
}

/// Subtrees that never carry readable text.
const SKIPPED_TAGS: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];

/// Elements that start and end on their own line.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol",
    "p", "section", "table", "tr", "ul",
];

/// Convert an HTML document to plain text.
///
/// The document goes through the html5ever tree builder, so entities are
/// decoded and comments, CDATA and markup inside attribute values never
/// reach the output. `<pre>` keeps its whitespace; everything else is
/// collapsed to single spaces with one line per block element.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut output = String::new();
    push_children(&mut output, document.root_element(), false);
    normalize_lines(&output)
}

fn push_children(output: &mut String, element: ElementRef<'_>, preformatted: bool) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) if preformatted => output.push_str(text),
            Node::Text(text) => push_inline(output, text),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    push_element(output, el, preformatted);
                }
            }
            // Comments, doctypes and processing instructions.
            _ => {}
        }
    }
}

fn push_element(output: &mut String, element: ElementRef<'_>, preformatted: bool) {
    let tag = element.value().name();
    if SKIPPED_TAGS.contains(&tag) {
        return;
    }
    match tag {
        "br" => output.push('\n'),
        "pre" => {
            end_line(output);
            push_children(output, element, true);
            end_line(output);
        }
        "td" | "th" => {
            push_children(output, element, preformatted);
            output.push(' ');
        }
        _ if BLOCK_TAGS.contains(&tag) => {
            end_line(output);
            push_children(output, element, preformatted);
            end_line(output);
        }
        _ => push_children(output, element, preformatted),
    }
}

/// Append a text node with its whitespace collapsed, keeping one separating
/// space at either edge.
fn push_inline(output: &mut String, text: &str) {
    let at_line_start = output.is_empty() || output.ends_with([' ', '\n']);
    let mut words = text.split_whitespace().peekable();
    if words.peek().is_none() {
        if !text.is_empty() && !at_line_start {
            output.push(' ');
        }
        return;
    }
    if text.starts_with(char::is_whitespace) && !at_line_start {
        output.push(' ');
    }
    for (i, word) in words.enumerate() {
        if i > 0 {
            output.push(' ');
        }
        output.push_str(word);
    }
    if text.ends_with(char::is_whitespace) {
        output.push(' ');
    }
}

fn end_line(output: &mut String) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
}

/// Trim trailing whitespace per line and keep at most one blank line in a row.
fn normalize_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() && lines.last().is_none_or(|last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

/// Rewrite a GitHub `blob` page URL to the raw file URL.
#[must_use]
pub fn github_raw_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.host_str() != Some("github.com") {
        return url.to_string();
    }
    let segments: Vec<&str> = parsed.path().trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        [owner, repo, "blob", rest @ ..] if !rest.is_empty() => format!(
            "https://raw.githubusercontent.com/{owner}/{repo}/{}",
            rest.join("/")
        ),
        _ => url.to_string(),
    }
}

fn parse_content_type(header: Option<&str>) -> Option<String> {
    let media_type = header?.split(';').next()?.trim();
    (!media_type.is_empty()).then(|| media_type.to_ascii_lowercase())
}

fn is_html(media_type: Option<&str>) -> bool {
    matches!(media_type, Some("text/html" | "application/xhtml+xml"))
}

#[derive(Debug)]
pub struct WebFetchTool {
    client: reqwest::Client,
    url_pattern: Regex,
    max_content_chars: usize,
    /// Set once the user answers "always allow".
    always_allowed: Arc<AtomicBool>,
}

impl WebFetchTool {
    pub fn new() -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("anvil/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ToolError::execution(NAME, format!("failed to build HTTP client: {e}")))?;
        let url_pattern = Regex::new(r#"https?://[^\s<>"'`]+"#)
            .map_err(|e| ToolError::execution(NAME, e.to_string()))?;
        Ok(Self {
            client,
            url_pattern,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            always_allowed: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    /// URLs in `prompt`, in order of appearance, deduplicated.
    fn extract_urls(&self, prompt: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for found in self.url_pattern.find_iter(prompt) {
            let candidate = found
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}']);
            if Url::parse(candidate).is_ok() && !urls.iter().any(|u| u == candidate) {
                urls.push(candidate.to_string());
            }
        }
        urls
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        let media_type = parse_content_type(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.map_err(|e| e.to_string())?;
        let text = if is_html(media_type.as_deref()) {
            html_to_text(&body)
        } else {
            body
        };
        Ok(truncate_output(text, self.max_content_chars))
    }
}

impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "WebFetch"
    }

    fn description(&self) -> &str {
        "Fetches the http(s) URLs contained in `prompt` (up to 20) and returns their \
         text content. HTML is converted to plain text; GitHub blob links are \
         fetched as raw files."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Request text containing the URLs to fetch."
                }
            },
            "required": ["prompt"]
        })
    }

    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: WebFetchArgs = parse_args(args)?;
        if self.extract_urls(&typed.prompt).is_empty() {
            return Err(ToolError::BadArgs {
                message: "prompt must contain at least one http:// or https:// URL".to_string(),
            });
        }
        Ok(())
    }

    fn describe(&self, args: &Value) -> String {
        match parse_args::<WebFetchArgs>(args) {
            Ok(typed) => format!("Fetch content for: {}", typed.prompt),
            Err(_) => args.to_string(),
        }
    }

    fn should_confirm_execute<'a>(
        &'a self,
        args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async move {
            if self.always_allowed.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let typed: WebFetchArgs = parse_args(args)?;
            let urls = self
                .extract_urls(&typed.prompt)
                .iter()
                .map(|u| github_raw_url(u))
                .collect();
            let always = Arc::clone(&self.always_allowed);
            Ok(Some(
                ConfirmationDetails::new(
                    "Confirm Web Fetch",
                    ConfirmationKind::Info {
                        prompt: typed.prompt,
                        urls,
                    },
                )
                .with_on_confirm(move |outcome| {
                    if outcome == ConfirmationOutcome::ProceedAlways {
                        always.store(true, Ordering::Relaxed);
                    }
                }),
            ))
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WebFetchArgs = parse_args(&args)?;
            let urls = self.extract_urls(&typed.prompt);
            let mut llm = String::new();
            let mut fetched = 0usize;
            let mut failures: Vec<String> = Vec::new();

            for url in urls.iter().take(MAX_URLS) {
                let target = github_raw_url(url);
                debug!(tool = NAME, url = %target, "fetching");
                let result = tokio::select! {
                    result = self.fetch(&target) => result,
                    () = ctx.signal.cancelled() => {
                        return Err(ToolError::cancelled("Web fetch was cancelled by user."));
                    }
                };
                match result {
                    Ok(text) => {
                        fetched += 1;
                        if !llm.is_empty() {
                            llm.push_str("\n\n");
                        }
                        let _ = write!(llm, "Content from {url}:\n{text}");
                    }
                    Err(e) => failures.push(format!("Error fetching {url}: {e}")),
                }
            }

            if fetched == 0 {
                return Err(ToolError::execution(NAME, failures.join("\n")));
            }
            for failure in &failures {
                let _ = write!(llm, "\n\n{failure}");
            }
            let display = format!("Fetched {fetched} of {} URL(s).", urls.len().min(MAX_URLS));
            Ok(ToolResult::new(llm, ToolResultDisplay::Text(display)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{WebFetchTool, github_raw_url, html_to_text};

    #[test]
    fn rewrites_github_blob_urls() {
        assert_eq!(
            github_raw_url("https://github.com/owner/repo/blob/main/src/lib.rs"),
            "https://raw.githubusercontent.com/owner/repo/main/src/lib.rs"
        );
        assert_eq!(
            github_raw_url("https://github.com/owner/repo"),
            "https://github.com/owner/repo"
        );
        assert_eq!(github_raw_url("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn extracts_urls_without_trailing_punctuation() {
        let tool = WebFetchTool::new().unwrap();
        let urls = tool.extract_urls(
            "Summarize https://example.com/a. Then compare (https://example.org/b) and https://example.com/a",
        );
        assert_eq!(urls, ["https://example.com/a", "https://example.org/b"]);
        assert!(tool.extract_urls("no links here").is_empty());
    }

    #[test]
    fn converts_html_to_text() {
        let text = html_to_text(
            "<html><head><title>t</title></head><body><script>var x;</script>\
             <h1>Title</h1><p>One &amp; two</p><p>Three</p></body></html>",
        );
        assert_eq!(text, "Title\nOne & two\nThree");
    }

    #[test]
    fn decodes_numeric_and_named_entities() {
        let text = html_to_text("<p>It&#8217;s &#x2014; &copy; 2024</p>");
        assert_eq!(text, "It\u{2019}s \u{2014} \u{a9} 2024");
    }

    #[test]
    fn markup_in_attributes_and_comments_is_not_text() {
        let text = html_to_text(
            "<body><!-- <p>hidden</p> --><a title=\"a > b\" href=\"/x\">link</a>\
             <noscript>enable js</noscript><p>after</p></body>",
        );
        assert_eq!(text, "link\nafter");
    }

    #[test]
    fn preformatted_text_keeps_its_layout() {
        let text = html_to_text("<p>Run:</p><pre>fn main() {\n    go();\n}</pre><p>done</p>");
        assert_eq!(text, "Run:\nfn main() {\n    go();\n}\ndone");
    }

    #[test]
    fn inline_whitespace_collapses_between_words() {
        let text = html_to_text("<p>one\n   <b>two</b>  three<br>four</p>");
        assert_eq!(text, "one two three\nfour");
    }
}
