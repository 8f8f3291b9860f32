use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ICON: &str = "/static/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/static/icons/badge-72x72.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: NotificationData,
}

impl NotificationPayload {
    pub fn builder(title: impl Into<String>, body: impl Into<String>) -> NotificationBuilder {
        NotificationBuilder {
            title: title.into(),
            body: body.into(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            tag: "payment".to_string(),
            url: "/".to_string(),
        }
    }
}

pub struct NotificationBuilder {
    title: String,
    body: String,
    icon: String,
    badge: String,
    tag: String,
    url: String,
}

impl NotificationBuilder {
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = badge.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn build(self) -> NotificationPayload {
        NotificationPayload {
            title: self.title,
            body: self.body,
            icon: self.icon,
            badge: self.badge,
            tag: self.tag,
            data: NotificationData {
                url: self.url,
                timestamp: Utc::now(),
            },
        }
    }
}
