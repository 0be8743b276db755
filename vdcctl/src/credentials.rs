use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Failed to read password")]
    Prompt(#[source] std::io::Error),
    #[error("Password prompt did not complete")]
    Join(#[from] tokio::task::JoinError),
}

/// Use the supplied password, or ask for one on the terminal without echo.
pub async fn resolve_password(
    supplied: Option<String>,
    label: &str,
) -> Result<String, CredentialsError> {
    if let Some(password) = supplied {
        return Ok(password);
    }

    let prompt = format!("{label}: ");
    tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
        .await?
        .map_err(CredentialsError::Prompt)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn supplied_password_skips_prompt() {
        let password = resolve_password(Some("hunter2".into()), "Password")
            .await
            .unwrap();
        assert_eq!(password, "hunter2");
    }

    #[tokio::test]
    async fn empty_password_is_still_supplied() {
        let password = resolve_password(Some(String::new()), "Password")
            .await
            .unwrap();
        assert_eq!(password, "");
    }
}
