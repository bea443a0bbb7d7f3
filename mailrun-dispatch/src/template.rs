//! Stored email templates.
//!
//! Templates live with the transport and are referenced by name when a
//! batch is sent. Bodies use `{{placeholder}}` substitution, filled from the
//! shared defaults and per-recipient replacement data of each batch.

use std::{collections::BTreeSet, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Where the parts of a template are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Template name registered with the transport.
    #[serde(default = "default_template_name")]
    pub name: String,

    /// File holding the subject line.
    #[serde(default = "default_subject_path")]
    pub subject_path: PathBuf,

    /// File holding the plain-text body.
    #[serde(default = "default_text_path")]
    pub text_path: PathBuf,

    /// File holding the HTML body.
    #[serde(default = "default_html_path")]
    pub html_path: PathBuf,
}

fn default_template_name() -> String {
    "mailrun-campaign".to_string()
}

fn default_subject_path() -> PathBuf {
    PathBuf::from("template/subject.txt")
}

fn default_text_path() -> PathBuf {
    PathBuf::from("template/body.txt")
}

fn default_html_path() -> PathBuf {
    PathBuf::from("template/body.html")
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            name: default_template_name(),
            subject_path: default_subject_path(),
            text_path: default_text_path(),
            html_path: default_html_path(),
        }
    }
}

/// A template ready to be registered with the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl EmailTemplate {
    /// Read the subject and both bodies from the configured files.
    ///
    /// The subject is trimmed to a single line.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the first file that cannot be read.
    pub async fn load(config: &TemplateConfig) -> std::io::Result<Self> {
        let subject = tokio::fs::read_to_string(&config.subject_path).await?;
        let text = tokio::fs::read_to_string(&config.text_path).await?;
        let html = tokio::fs::read_to_string(&config.html_path).await?;

        Ok(Self {
            name: config.name.clone(),
            subject: subject.lines().next().unwrap_or_default().trim().to_string(),
            text,
            html,
        })
    }

    /// Every `{{placeholder}}` referenced by the subject or either body.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<String> {
        [&self.subject, &self.text, &self.html]
            .into_iter()
            .flat_map(|part| placeholders_in(part))
            .collect()
    }
}

fn placeholders_in(content: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };

        let name = after[..end].trim();
        if !name.is_empty() {
            found.push(name.to_string());
        }
        rest = &after[end + 2..];
    }

    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_placeholders() {
        let template = EmailTemplate {
            name: "t".to_string(),
            subject: "Hello {{name}}".to_string(),
            text: "Visit {{ site_link }} or {{support_channel}}".to_string(),
            html: "<img src=\"{{image_url}}\">{{name}} {{unterminated".to_string(),
        };

        let names: Vec<_> = template.placeholders().into_iter().collect();
        assert_eq!(names, vec!["image_url", "name", "site_link", "support_channel"]);
    }

    #[tokio::test]
    async fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let subject_path = dir.path().join("subject.txt");
        let text_path = dir.path().join("body.txt");
        let html_path = dir.path().join("body.html");

        std::fs::write(&subject_path, "  Security notice for {{name}}  \nignored\n").unwrap();
        std::fs::write(&text_path, "Hi {{name}}").unwrap();
        std::fs::write(&html_path, "<p>Hi {{name}}</p>").unwrap();

        let template = EmailTemplate::load(&TemplateConfig {
            name: "notice".to_string(),
            subject_path,
            text_path,
            html_path,
        })
        .await
        .unwrap();

        assert_eq!(template.name, "notice");
        assert_eq!(template.subject, "Security notice for {{name}}");
        assert_eq!(template.html, "<p>Hi {{name}}</p>");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let config = TemplateConfig {
            subject_path: PathBuf::from("/nonexistent/subject.txt"),
            ..TemplateConfig::default()
        };
        assert!(EmailTemplate::load(&config).await.is_err());
    }
}
