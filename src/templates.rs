//! Embedded HTML templates and static assets.

use std::fmt::Write as _;

use axum::response::Html;
use minijinja::{Environment, HtmlEscape, Value};
use serde::Serialize;

use crate::error::TubeResult;

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("cards.html", include_str!("../templates/cards.html")),
    ("home.html", include_str!("../templates/home.html")),
    ("channel.html", include_str!("../templates/channel.html")),
    ("watch.html", include_str!("../templates/watch.html")),
    ("statistics.html", include_str!("../templates/statistics.html")),
    ("error.html", include_str!("../templates/error.html")),
];

const ASSETS: &[(&str, &str, &str)] = &[(
    "style.css",
    "text/css; charset=utf-8",
    include_str!("../static/style.css"),
)];

/// Looks up an embedded asset, returning `(content type, body)`.
pub fn static_asset(name: &str) -> Option<(&'static str, &'static str)> {
    ASSETS
        .iter()
        .find(|(file, _, _)| *file == name)
        .map(|(_, mime, body)| (*mime, *body))
}

pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> TubeResult<Self> {
        let mut env = Environment::new();
        // `.html` names are auto-escaped by minijinja's default callback.
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        env.add_filter("paragraphs", paragraphs);
        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, page: &S) -> TubeResult<Html<String>> {
        let template = self.env.get_template(name)?;
        Ok(Html(template.render(page)?))
    }
}

/// Escapes plain text and turns line breaks into `<br>`.
fn paragraphs(text: &str) -> Value {
    let mut html = String::with_capacity(text.len());
    for (index, line) in text.lines().enumerate() {
        if index > 0 {
            html.push_str("<br>\n");
        }
        let _ = write!(html, "{}", HtmlEscape(line));
    }
    Value::from_safe_string(html)
}
