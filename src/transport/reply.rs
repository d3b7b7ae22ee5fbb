//! Reply composition from command outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use super::TransportError;
use crate::dispatcher::InboundMessage;
use crate::plugins::PluginResult;

const SUCCESS_SUBJECT: &str = "success_subject";
const SUCCESS_BODY: &str = "success_body";
const PARTIAL_SUBJECT: &str = "partial_subject";
const PARTIAL_BODY: &str = "partial_body";

const DEFAULT_SUCCESS_SUBJECT: &str = "Re: {{ subject }} - done ✓";
const DEFAULT_SUCCESS_BODY: &str = "Hello!

Your request has been carried out.

Results:
{% for r in results %}  ✓ {{ r.message }}
{% endfor %}
---
{{ app_name }}
{{ timestamp }}
";

const DEFAULT_PARTIAL_SUBJECT: &str = "Re: {{ subject }} - some tasks had problems";
const DEFAULT_PARTIAL_BODY: &str = "Hello,

Some of your tasks ran into problems.

Results:
{% for r in results %}  {% if r.success %}✓{% else %}✗{% endif %} {{ r.message }}
{% endfor %}
Please check the logs or try again.

---
{{ app_name }}
{{ timestamp }}
";

/// Subject and body ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    pub subject: String,
    pub body: String,
    pub all_succeeded: bool,
}

#[derive(Serialize)]
struct ResultLine<'a> {
    success: bool,
    message: &'a str,
}

/// Renders replies with one template pair for full success and another for
/// anything else.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    tera: Tera,
    app_name: String,
}

impl ReplyComposer {
    pub fn new(app_name: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_templates(
            app_name,
            [
                DEFAULT_SUCCESS_SUBJECT,
                DEFAULT_SUCCESS_BODY,
                DEFAULT_PARTIAL_SUBJECT,
                DEFAULT_PARTIAL_BODY,
            ],
        )
    }

    /// Custom templates, in order: success subject, success body, partial
    /// subject, partial body.
    pub fn with_templates(
        app_name: impl Into<String>,
        templates: [&str; 4],
    ) -> Result<Self, TransportError> {
        let mut tera = Tera::default();
        let names = [SUCCESS_SUBJECT, SUCCESS_BODY, PARTIAL_SUBJECT, PARTIAL_BODY];
        tera.add_raw_templates(names.into_iter().zip(templates))?;
        Ok(Self {
            tera,
            app_name: app_name.into(),
        })
    }

    pub fn compose(
        &self,
        original: &InboundMessage,
        results: &[PluginResult],
    ) -> Result<ComposedReply, TransportError> {
        self.compose_at(original, results, Utc::now())
    }

    pub(crate) fn compose_at(
        &self,
        original: &InboundMessage,
        results: &[PluginResult],
        now: DateTime<Utc>,
    ) -> Result<ComposedReply, TransportError> {
        let all_succeeded = results.iter().all(|r| r.success);
        let lines: Vec<ResultLine<'_>> = results
            .iter()
            .map(|r| ResultLine {
                success: r.success,
                message: &r.message,
            })
            .collect();

        let mut context = Context::new();
        context.insert("subject", &original.subject);
        context.insert("sender", &original.sender);
        context.insert("results", &lines);
        context.insert("app_name", &self.app_name);
        context.insert("timestamp", &now.format("%Y-%m-%d %H:%M:%S").to_string());

        let (subject_tpl, body_tpl) = if all_succeeded {
            (SUCCESS_SUBJECT, SUCCESS_BODY)
        } else {
            (PARTIAL_SUBJECT, PARTIAL_BODY)
        };

        Ok(ComposedReply {
            subject: self.tera.render(subject_tpl, &context)?.trim().to_string(),
            body: self.tera.render(body_tpl, &context)?,
            all_succeeded,
        })
    }
}
