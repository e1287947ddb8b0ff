//! Pure rendering of the toast stack into view models.

use chrono::{DateTime, Utc};

use super::handle::{Severity, ToastHandle, ToastId};

/// Language for default toast titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Es,
}

impl Locale {
    /// Unknown tags fall back to English. Region suffixes are ignored (`es-MX` → `es`).
    pub fn parse(tag: &str) -> Self {
        let lang = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match lang.as_str() {
            "es" => Locale::Es,
            _ => Locale::En,
        }
    }
}

/// Visual scheme of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    pub accent: &'static str,
    pub background: &'static str,
    pub foreground: &'static str,
    pub icon: &'static str,
}

impl Scheme {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Success => Scheme {
                accent: "#16a34a",
                background: "#f0fdf4",
                foreground: "#14532d",
                icon: "check-circle",
            },
            Severity::Info => Scheme {
                accent: "#2563eb",
                background: "#eff6ff",
                foreground: "#1e3a8a",
                icon: "info",
            },
            Severity::Warning => Scheme {
                accent: "#d97706",
                background: "#fffbeb",
                foreground: "#78350f",
                icon: "alert-triangle",
            },
            Severity::Error => Scheme {
                accent: "#dc2626",
                background: "#fef2f2",
                foreground: "#7f1d1d",
                icon: "x-circle",
            },
        }
    }
}

pub fn default_title(severity: Severity, locale: Locale) -> &'static str {
    match (locale, severity) {
        (Locale::En, Severity::Success) => "Success",
        (Locale::En, Severity::Info) => "Information",
        (Locale::En, Severity::Warning) => "Warning",
        (Locale::En, Severity::Error) => "Error",
        (Locale::Es, Severity::Success) => "Éxito",
        (Locale::Es, Severity::Info) => "Información",
        (Locale::Es, Severity::Warning) => "Advertencia",
        (Locale::Es, Severity::Error) => "Error",
    }
}

/// Everything a UI needs to draw one toast.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastView {
    pub id: ToastId,
    pub title: String,
    pub message: String,
    pub scheme: Scheme,
    /// Time left before auto-dismiss; `None` for toasts that wait for the user.
    pub remaining_ms: Option<u64>,
}

/// Render toasts in stack order (first element is drawn at the top).
pub fn render<'a>(
    toasts: impl IntoIterator<Item = &'a ToastHandle>,
    locale: Locale,
    now: DateTime<Utc>,
) -> Vec<ToastView> {
    toasts
        .into_iter()
        .map(|toast| ToastView {
            id: toast.id,
            title: toast
                .title
                .clone()
                .unwrap_or_else(|| default_title(toast.severity, locale).to_string()),
            message: toast.message.clone(),
            scheme: toast
                .scheme
                .unwrap_or_else(|| Scheme::for_severity(toast.severity)),
            remaining_ms: toast.remaining_ms(now),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toast::ToastRequest;
    use chrono::Duration;

    #[test]
    fn locale_parsing() {
        assert_eq!(Locale::parse("es"), Locale::Es);
        assert_eq!(Locale::parse("es-MX"), Locale::Es);
        assert_eq!(Locale::parse("ES_es"), Locale::Es);
        assert_eq!(Locale::parse("fr"), Locale::En);
        assert_eq!(Locale::parse(""), Locale::En);
    }

    #[test]
    fn every_severity_has_a_title_and_scheme() {
        for severity in Severity::ALL {
            assert!(!default_title(severity, Locale::En).is_empty());
            assert!(!default_title(severity, Locale::Es).is_empty());
            assert!(Scheme::for_severity(severity).accent.starts_with('#'));
        }
    }

    #[test]
    fn render_uses_defaults_and_overrides() {
        let created = Utc::now();
        let plain = ToastHandle::from_request(ToastRequest::new(Severity::Warning, "low disk"), created);
        let custom_scheme = Scheme::for_severity(Severity::Success);
        let custom = ToastHandle::from_request(
            ToastRequest::new(Severity::Error, "boom")
                .title("Payment failed")
                .scheme(custom_scheme)
                .duration_ms(0),
            created,
        );

        let views = render([&custom, &plain], Locale::Es, created + Duration::milliseconds(1_000));
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].title, "Payment failed");
        assert_eq!(views[0].scheme, custom_scheme);
        assert_eq!(views[0].remaining_ms, None);
        assert_eq!(views[1].title, "Advertencia");
        assert_eq!(views[1].scheme, Scheme::for_severity(Severity::Warning));
        assert_eq!(views[1].remaining_ms, Some(4_000));
    }
}
