//! Markdown → HTML for displaying turns.

use pulldown_cmark::{html, Options, Parser};

/// Render a reply (or any message) as HTML.
pub fn render_markdown(text: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() + text.len() / 2);
    html::push_html(&mut out, parser);
    out
}
