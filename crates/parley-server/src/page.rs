//! The chat page served at `/`.

/// Template text; `{{host}}` sits inside a JavaScript string literal and is
/// replaced with the request's host.
const CHAT_TEMPLATE: &str = include_str!("../templates/chat.html");

/// Placeholder substituted at render time.
const HOST_PLACEHOLDER: &str = "{{host}}";

/// Renders the chat page.
#[derive(Debug, Clone, Copy)]
pub struct ChatPage {
    template: &'static str,
}

impl ChatPage {
    /// Use the built-in template.
    #[must_use]
    pub fn new() -> Self {
        Self {
            template: CHAT_TEMPLATE,
        }
    }

    /// Render the page for a client that reached us at `host`.
    #[must_use]
    pub fn render(&self, host: &str) -> String {
        self.template.replace(HOST_PLACEHOLDER, &escape_js(host))
    }
}

impl Default for ChatPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `host` looks like `name[:port]` or `[v6][:port]`.
#[must_use]
pub fn is_plain_authority(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']'))
}

/// Escape for a single- or double-quoted string inside a `<script>` block.
fn escape_js(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '"' | '\'' | '<' | '>' | '&' | '/' => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
