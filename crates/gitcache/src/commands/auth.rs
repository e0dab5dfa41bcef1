use std::fmt::Write;

use anyhow::{bail, Result};
use owo_colors::OwoColorize;

use gitcache_client::{AuthRecord, TokenType, TokenValidation};

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// `auth login <email>`: store a user session.
pub(crate) fn auth_login(
    context: &Context,
    email: &str,
    token: Option<&str>,
    org: &str,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let Some(token) = token
        .map(ToString::to_string)
        .or_else(|| std::env::var(gitcache_client::env::GITCACHE_TOKEN).ok())
        .filter(|token| !token.is_empty())
    else {
        bail!(
            "no token provided; pass --token or set {}",
            gitcache_client::env::GITCACHE_TOKEN
        );
    };

    let record = AuthRecord::new(token, org.to_string(), Some(email.to_string()));
    context.auth.store(&record)?;
    writeln!(printer, "Logged in as {}", email.bold())?;
    Ok(ExitStatus::Success)
}

pub(crate) fn auth_logout(context: &Context, mut printer: Printer) -> Result<ExitStatus> {
    context.auth.logout()?;
    writeln!(printer, "Logged out")?;
    Ok(ExitStatus::Success)
}

pub(crate) fn auth_status(context: &Context, mut printer: Printer) -> Result<ExitStatus> {
    match context.auth.load()? {
        Some(record) if !record.token.is_empty() => {
            let kind = match record.token_type {
                TokenType::Ci => "CI token (never expires)".to_string(),
                TokenType::User => match record.expires_at {
                    Some(_) if record.is_expired() => "user token (expired)".to_string(),
                    Some(_) => "user token".to_string(),
                    None => "user token (no expiry recorded)".to_string(),
                },
            };
            writeln!(
                printer,
                "{} to {} as {} ({kind})",
                if record.is_expired() {
                    "Expired session".yellow().to_string()
                } else {
                    "Authenticated".green().to_string()
                },
                record.org_id.bold(),
                record.email.as_deref().unwrap_or("(no email)")
            )?;
            Ok(ExitStatus::Success)
        }
        _ => {
            writeln!(printer, "Not authenticated")?;
            Ok(ExitStatus::Success)
        }
    }
}

pub(crate) async fn auth_orgs(context: &Context, mut printer: Printer) -> Result<ExitStatus> {
    let organizations = context.client.organizations().await?;
    if organizations.is_empty() {
        writeln!(printer, "No organizations available")?;
        return Ok(ExitStatus::Success);
    }
    for org in organizations {
        writeln!(
            printer,
            "  {}{}",
            org.name.bold(),
            if org.is_default {
                " (default)".dimmed().to_string()
            } else {
                String::new()
            }
        )?;
    }
    Ok(ExitStatus::Success)
}

/// `auth setup-ci`: validate the `GITCACHE_TOKEN` CI token and store it.
pub(crate) async fn auth_setup_ci(context: &Context, mut printer: Printer) -> Result<ExitStatus> {
    let Ok(token) = std::env::var(gitcache_client::env::GITCACHE_TOKEN) else {
        bail!(
            "{} is not set; CI setup is non-interactive",
            gitcache_client::env::GITCACHE_TOKEN
        );
    };
    if !token.starts_with("ci_") {
        bail!("CI tokens must start with `ci_`");
    }

    match context.client.validate_ci_token(&token).await {
        TokenValidation::Valid { organization } => {
            context
                .auth
                .store(&AuthRecord::new(token, organization.clone(), None))?;
            writeln!(printer, "CI token stored for {}", organization.bold())?;
            Ok(ExitStatus::Success)
        }
        TokenValidation::Invalid => bail!("the CI token was rejected as invalid"),
        TokenValidation::AccessDenied => bail!("the CI token is valid but access was denied"),
        TokenValidation::Http(code) => bail!("token validation failed with HTTP {code}"),
        TokenValidation::Network => bail!("could not reach the registry to validate the token"),
    }
}
