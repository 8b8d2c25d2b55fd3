//! Helpers shared by articles and the forums.

pub mod sanitize;

pub use sanitize::{excerpt, plain_text, sanitize_html, slugify};

use crate::{config::ContentConfig, errors::Error};

const MAX_TITLE_LENGTH: usize = 200;

/// Sanitize a rich-text body and enforce the configured size limit on what is stored.
pub fn prepare_body(body: &str, limits: &ContentConfig) -> Result<String, Error> {
    let html = sanitize_html(body);
    if plain_text(&html).is_empty() && !html.contains("<img") {
        return Err(Error::BadRequest {
            message: "Body must not be empty".to_string(),
        });
    }
    if html.len() > limits.max_body_length {
        return Err(Error::BadRequest {
            message: format!("Body must be no more than {} bytes", limits.max_body_length),
        });
    }
    Ok(html)
}

/// Reduce a title to non-empty plain text
pub fn prepare_title(title: &str) -> Result<String, Error> {
    let title = plain_text(title);
    if title.is_empty() {
        return Err(Error::BadRequest {
            message: "Title must not be empty".to_string(),
        });
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(Error::BadRequest {
            message: format!("Title must be no more than {MAX_TITLE_LENGTH} characters"),
        });
    }
    Ok(title)
}
