use std::fmt;

use regex::Regex;
use url::Url;

use crate::VdcError;

pub const USER_MARKER: &str = r#""user":"#;
pub const TOKEN_MARKER: &str = r#""token":"#;
pub const API_MARKER: &str = r#""api":"#;

/// API credentials the panel embeds in its landing page for an authenticated session.
///
/// The panel has no endpoint handing these out; they sit in an inline script
/// and are located by their literal keys. Any change in the panel markup should
/// only need changes in [`ApiContext::from_panel`].
#[derive(Clone, PartialEq, Eq)]
pub struct ApiContext {
    pub user: String,
    pub token: String,
    pub api: Url,
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .field("api", &self.api.as_str())
            .finish()
    }
}

impl ApiContext {
    /// Scrape the context out of the panel html. A relative api url is
    /// resolved against `base`.
    pub fn from_panel(html: &str, base: &Url) -> Result<Self, VdcError> {
        let user = marker_value(html, USER_MARKER)?;
        let token = marker_value(html, TOKEN_MARKER)?;
        let api = marker_value(html, API_MARKER)?;
        let api = base.join(&api)?;

        Ok(Self { user, token, api })
    }
}

// Values are either json strings or bare literals (numeric user ids)
fn marker_value(html: &str, marker: &'static str) -> Result<String, VdcError> {
    let pattern = format!(
        r#"{}\s*(?:(?<quoted>"(?:[^"\\]|\\.)*")|(?<nested>[\[{{])|(?<bare>[^\s,;}}\]\[{{]+))"#,
        regex::escape(marker)
    );
    let re = Regex::new(&pattern)?;
    let captures = re
        .captures(html)
        .ok_or(VdcError::MissingMarker(marker))?;

    if captures.name("nested").is_some() {
        Err(VdcError::NestedValue(marker))
    } else if let Some(quoted) = captures.name("quoted") {
        serde_json::from_str(quoted.as_str())
            .map_err(|source| VdcError::InvalidValue { marker, source })
    } else {
        match captures.name("bare").map(|m| m.as_str()) {
            Some("null") | None => Err(VdcError::MissingMarker(marker)),
            Some(bare) => Ok(bare.to_string()),
        }
    }
}
