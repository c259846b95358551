//! Markdown to styled HTML for assistant messages.
//!
//! Input may be a partial stream; pulldown-cmark closes whatever is still
//! open at the end of the text. Raw HTML in the input is always escaped.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::fmt::Write;

const PRE_CLASS: &str = "not-prose text-sm w-full overflow-x-auto dark:bg-zinc-900 p-4 border border-zinc-200 dark:border-zinc-700 rounded-xl mb-4";
const INLINE_CODE_CLASS: &str = "text-sm bg-zinc-100 dark:bg-zinc-800 py-0.5 px-1 rounded-md";
const HEADING_CLASS: &str = "font-semibold mt-6 mb-2";
const OL_CLASS: &str = "list-decimal list-outside ml-4";
const UL_CLASS: &str = "list-disc list-outside ml-4";
const LI_CLASS: &str = "py-1";
const STRONG_CLASS: &str = "font-semibold";
const LINK_CLASS: &str = "text-blue-500 hover:underline";

fn heading_size(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "text-3xl",
        HeadingLevel::H2 => "text-2xl",
        HeadingLevel::H3 => "text-xl",
        HeadingLevel::H4 => "text-lg",
        HeadingLevel::H5 => "text-base",
        HeadingLevel::H6 => "text-sm",
    }
}

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
}

pub fn render(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, options());
    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    let mut in_code_block = false;
    let mut code_lang = String::new();
    let mut code_content = String::new();
    let mut in_table_head = false;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                let _ = write!(
                    html,
                    r#"<h{} class="{} {}">"#,
                    level as u8,
                    heading_size(level),
                    HEADING_CLASS
                );
            }
            Event::End(TagEnd::Heading(level)) => {
                let _ = write!(html, "</h{}>", level as u8);
            }
            Event::Start(Tag::Paragraph) => html.push_str("<p>"),
            Event::End(TagEnd::Paragraph) => html.push_str("</p>"),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                code_lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                code_content.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                let lang = if code_lang.is_empty() {
                    "plaintext"
                } else {
                    code_lang.as_str()
                };
                let _ = write!(
                    html,
                    r#"<pre class="{}"><code class="language-{}">{}</code></pre>"#,
                    PRE_CLASS,
                    html_escape(lang),
                    html_escape(&code_content)
                );
            }
            Event::Start(Tag::List(None)) => {
                let _ = write!(html, r#"<ul class="{}">"#, UL_CLASS);
            }
            Event::End(TagEnd::List(false)) => html.push_str("</ul>"),
            Event::Start(Tag::List(Some(start))) => {
                if start == 1 {
                    let _ = write!(html, r#"<ol class="{}">"#, OL_CLASS);
                } else {
                    let _ = write!(html, r#"<ol class="{}" start="{}">"#, OL_CLASS, start);
                }
            }
            Event::End(TagEnd::List(true)) => html.push_str("</ol>"),
            Event::Start(Tag::Item) => {
                let _ = write!(html, r#"<li class="{}">"#, LI_CLASS);
            }
            Event::End(TagEnd::Item) => html.push_str("</li>"),
            Event::Start(Tag::BlockQuote(_)) => html.push_str("<blockquote>"),
            Event::End(TagEnd::BlockQuote(_)) => html.push_str("</blockquote>"),
            Event::Start(Tag::Strong) => {
                let _ = write!(html, r#"<span class="{}">"#, STRONG_CLASS);
            }
            Event::End(TagEnd::Strong) => html.push_str("</span>"),
            Event::Start(Tag::Emphasis) => html.push_str("<em>"),
            Event::End(TagEnd::Emphasis) => html.push_str("</em>"),
            Event::Start(Tag::Strikethrough) => html.push_str("<del>"),
            Event::End(TagEnd::Strikethrough) => html.push_str("</del>"),
            Event::Start(Tag::Link { dest_url, .. }) => {
                let _ = write!(
                    html,
                    r#"<a class="{}" href="{}" target="_blank" rel="noreferrer">"#,
                    LINK_CLASS,
                    html_escape(safe_href(&dest_url))
                );
            }
            Event::End(TagEnd::Link) => html.push_str("</a>"),
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                let _ = write!(
                    html,
                    r#"<img src="{}" title="{}" alt=""#,
                    html_escape(safe_href(&dest_url)),
                    html_escape(&title)
                );
            }
            // Alt text arrives as Text events between Start and End.
            Event::End(TagEnd::Image) => html.push_str(r#"" />"#),
            Event::Start(Tag::Table(_)) => html.push_str("<table>"),
            Event::End(TagEnd::Table) => html.push_str("</tbody></table>"),
            Event::Start(Tag::TableHead) => {
                in_table_head = true;
                html.push_str("<thead><tr>");
            }
            Event::End(TagEnd::TableHead) => {
                in_table_head = false;
                html.push_str("</tr></thead><tbody>");
            }
            Event::Start(Tag::TableRow) => html.push_str("<tr>"),
            Event::End(TagEnd::TableRow) => html.push_str("</tr>"),
            Event::Start(Tag::TableCell) => {
                html.push_str(if in_table_head { "<th>" } else { "<td>" });
            }
            Event::End(TagEnd::TableCell) => {
                html.push_str(if in_table_head { "</th>" } else { "</td>" });
            }
            Event::Start(Tag::FootnoteDefinition(name)) => {
                let _ = write!(
                    html,
                    r#"<div class="footnote" id="fn-{}"><sup>{}</sup>"#,
                    html_escape(&name),
                    html_escape(&name)
                );
            }
            Event::End(TagEnd::FootnoteDefinition) => html.push_str("</div>"),
            Event::FootnoteReference(name) => {
                let _ = write!(
                    html,
                    r##"<sup><a href="#fn-{}">{}</a></sup>"##,
                    html_escape(&name),
                    html_escape(&name)
                );
            }
            Event::TaskListMarker(checked) => {
                html.push_str(if checked {
                    r#"<input type="checkbox" disabled checked /> "#
                } else {
                    r#"<input type="checkbox" disabled /> "#
                });
            }
            Event::Code(text) => {
                let _ = write!(
                    html,
                    r#"<code class="{}">{}</code>"#,
                    INLINE_CODE_CLASS,
                    html_escape(&text)
                );
            }
            Event::Text(text) => {
                if in_code_block {
                    code_content.push_str(&text);
                } else {
                    html.push_str(&html_escape(&text));
                }
            }
            Event::Html(raw) | Event::InlineHtml(raw) => {
                html.push_str(&html_escape(&raw));
            }
            Event::SoftBreak => {
                if in_code_block {
                    code_content.push('\n');
                } else {
                    html.push('\n');
                }
            }
            Event::HardBreak => html.push_str("<br />"),
            Event::Rule => html.push_str("<hr />"),
            _ => {}
        }
    }

    html
}

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Keeps relative links and allow-listed schemes. Browsers drop ASCII
/// whitespace and control characters while parsing a URL, so the scheme is
/// read with those removed.
fn safe_href(url: &str) -> &str {
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect();

    let scheme = cleaned
        .find(|c: char| matches!(c, ':' | '/' | '?' | '#'))
        .filter(|&i| cleaned[i..].starts_with(':'))
        .map(|i| cleaned[..i].to_ascii_lowercase());

    match scheme {
        None => url,
        Some(scheme) if ALLOWED_SCHEMES.contains(&scheme.as_str()) => url,
        Some(_) => "#",
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renderer that skips work when the input has not changed since the last
/// call, as happens when a stream delivers an event that does not touch
/// the text.
#[derive(Debug, Default)]
pub struct MemoMarkdown {
    last_input: Option<String>,
    last_output: String,
    renders: usize,
}

impl MemoMarkdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, markdown: &str) -> &str {
        if self.last_input.as_deref() != Some(markdown) {
            self.last_output = render(markdown);
            self.last_input = Some(markdown.to_string());
            self.renders += 1;
        }
        &self.last_output
    }

    pub fn renders(&self) -> usize {
        self.renders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_code_gets_styled_pre_and_language() {
        let html = render("```rust\nfn main() {}\n```\n");
        assert_eq!(
            html,
            format!(
                r#"<pre class="{}"><code class="language-rust">fn main() {{}}
</code></pre>"#,
                PRE_CLASS
            )
        );
    }

    #[test]
    fn inline_code_is_compact() {
        let html = render("run `cargo fmt` first");
        assert!(html.contains(&format!(r#"<code class="{}">cargo fmt</code>"#, INLINE_CODE_CLASS)));
    }

    #[test]
    fn headings_have_distinct_sizes_and_shared_margins() {
        let html = render("# One\n\n###### Six\n");
        assert!(html.contains(r#"<h1 class="text-3xl font-semibold mt-6 mb-2">One</h1>"#));
        assert!(html.contains(r#"<h6 class="text-sm font-semibold mt-6 mb-2">Six</h6>"#));
    }

    #[test]
    fn ordered_and_unordered_lists_differ() {
        let ol = render("1. a\n2. b\n");
        let ul = render("- a\n- b\n");
        assert!(ol.starts_with(r#"<ol class="list-decimal list-outside ml-4"><li class="py-1">a</li>"#));
        assert!(ul.starts_with(r#"<ul class="list-disc list-outside ml-4"><li class="py-1">a</li>"#));
        assert!(render("3. c\n").contains(r#"start="3""#));
    }

    #[test]
    fn links_open_in_new_tab() {
        let html = render("[docs](https://example.com/a?b=1&c=2)");
        assert_eq!(
            html,
            r#"<p><a class="text-blue-500 hover:underline" href="https://example.com/a?b=1&amp;c=2" target="_blank" rel="noreferrer">docs</a></p>"#
        );
        assert!(render("[x](javascript:alert(1))").contains(r##"href="#""##));
    }

    #[test]
    fn obfuscated_schemes_are_neutralized() {
        for link in [
            "[x](java&#9;script:alert(1))",
            "[x](java&#10;script:alert(1))",
            "[x](JaVaScRiPt:alert(1))",
            "[x](vbscript:msgbox(1))",
            "[x](data:text/html;base64,PHNjcmlwdD4=)",
        ] {
            assert!(render(link).contains(r##"href="#""##), "{}", link);
        }
    }

    #[test]
    fn relative_and_mail_links_are_kept() {
        assert!(render("[a](/docs/intro)").contains(r#"href="/docs/intro""#));
        assert!(render("[a](#top)").contains(r##"href="#top""##));
        assert!(render("[a](./notes?x=1:2)").contains(r#"href="./notes?x=1:2""#));
        assert!(render("[a](mailto:me@example.com)").contains(r#"href="mailto:me@example.com""#));
    }

    #[test]
    fn bold_is_a_semibold_span() {
        assert_eq!(
            render("**hi**"),
            r#"<p><span class="font-semibold">hi</span></p>"#
        );
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = render("<script>alert(1)</script>\n\nok <b>x</b>");
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn gfm_extensions_render() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~\n\n- [x] done\n");
        assert!(html.contains("<thead><tr><th>a</th><th>b</th></tr></thead><tbody><tr><td>1</td><td>2</td></tr></tbody></table>"));
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains(r#"<input type="checkbox" disabled checked />"#));
    }

    #[test]
    fn partial_fence_still_renders() {
        let html = render("```py\nprint(");
        assert!(html.contains(r#"<code class="language-py">print("#));
    }

    #[test]
    fn memo_renders_only_on_change() {
        let mut memo = MemoMarkdown::new();
        let first = memo.render("# Hi").to_string();
        assert_eq!(memo.render("# Hi"), first);
        assert_eq!(memo.renders(), 1);
        memo.render("# Hi there");
        assert_eq!(memo.renders(), 2);
        memo.render("# Hi there");
        assert_eq!(memo.renders(), 2);
    }
}
