use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Plain and/or rich (HTML) message body. At least one variant must be set
/// for the body to be sendable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich: Option<String>,
}

impl Body {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plain: Some(text.into()),
            rich: None,
        }
    }

    pub fn rich(html: impl Into<String>) -> Self {
        Self {
            plain: None,
            rich: Some(html.into()),
        }
    }

    /// `true` if neither variant carries any content
    pub fn is_empty(&self) -> bool {
        let blank = |part: &Option<String>| part.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.plain) && blank(&self.rich)
    }
}

/// Where an attachment's bytes come from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentContent {
    Inline(Vec<u8>),
    Path(PathBuf),
}

impl fmt::Debug for AttachmentContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: AttachmentContent,
    /// MIME type, `application/octet-stream` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A single message addressed to a single recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUnit {
    pub recipient: String,
    pub subject: String,
    pub body: Body,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Units with a hint are dispatched first, lowest hint first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_hint: Option<u32>,
}

impl MessageUnit {
    pub fn new(recipient: impl Into<String>, subject: impl Into<String>, body: Body) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body,
            attachment: None,
            order_hint: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    #[must_use]
    pub const fn with_order_hint(mut self, hint: u32) -> Self {
        self.order_hint = Some(hint);
        self
    }
}
