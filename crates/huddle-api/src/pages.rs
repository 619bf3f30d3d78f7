use axum::response::Html;

use huddle_types::api::DEFAULT_AVATAR;

const INDEX_TEMPLATE: &str = include_str!("../res/index.html");

/// GET /: the chat page. Visitors start with the default avatar and no
/// display name until they fill in their profile.
pub async fn index() -> Html<String> {
    Html(render_index("Chat App", "", DEFAULT_AVATAR))
}

pub fn render_index(title: &str, display_name: &str, profile_picture: &str) -> String {
    INDEX_TEMPLATE
        .replace("{{title}}", &escape_html(title))
        .replace("{{display_name}}", &escape_html(display_name))
        .replace("{{profile_picture}}", &escape_html(profile_picture))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
