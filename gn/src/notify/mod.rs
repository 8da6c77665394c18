//! Change notifications
//!
//! Email goes through an HTTP relay with bodies rendered from handlebars
//! templates. Webhooks receive either Slack messages or the raw snapshot.

mod dispatcher;
mod email;
mod error;
mod templates;
mod webhook;

pub use dispatcher::{Channel, ChannelOutcome, DispatchReport, NotificationDispatcher};
pub use email::{HttpMailRelay, MailMessage, MailTransport};
pub use error::NotifyError;
pub use templates::TemplateRenderer;
pub use webhook::{HttpWebhook, SlackAttachment, SlackMessage, WebhookTransport, build_slack_messages};

#[cfg(test)]
pub use email::mock as mail_mock;
#[cfg(test)]
pub use webhook::mock as webhook_mock;
