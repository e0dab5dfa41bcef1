use std::fmt::Write;

use anyhow::{bail, Result};
use owo_colors::OwoColorize;

use gitcache_client::{AuthRecord, TokenValidation};

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Connect this machine to a registry organization.
///
/// Tokens arrive via `--token` or `GITCACHE_TOKEN`; interactive prompts
/// are deliberately not part of this command.
pub(crate) async fn setup(
    context: &Context,
    org: Option<&str>,
    ci: bool,
    token: Option<&str>,
    list_orgs: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    if list_orgs {
        let organizations = context.client.organizations().await?;
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
        return Ok(ExitStatus::Success);
    }

    let org = org.expect("clap requires --org without --list-orgs");
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

    if ci {
        match context.client.validate_ci_token(&token).await {
            TokenValidation::Valid { organization } => {
                if organization != org {
                    bail!("token belongs to `{organization}`, not `{org}`");
                }
            }
            TokenValidation::Invalid => bail!("the token was rejected as invalid"),
            TokenValidation::AccessDenied => bail!("the token is valid but access was denied"),
            TokenValidation::Http(code) => bail!("token validation failed with HTTP {code}"),
            TokenValidation::Network => bail!("could not reach the registry to validate the token"),
        }
    }

    context
        .auth
        .store(&AuthRecord::new(token, org.to_string(), None))?;
    writeln!(
        printer,
        "Connected to {} ({})",
        org.bold(),
        if ci { "CI token" } else { "user token" }
    )?;
    Ok(ExitStatus::Success)
}
