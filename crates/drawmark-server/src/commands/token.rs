//! Token command handler

use anyhow::{bail, Context, Result};

use drawmark_core::Config;
use drawmark_server::auth::CallerAuth;

use crate::output::Output;

/// Mint a caller identity token for a user id
pub fn mint(config: &Config, user_id: String, output: &Output) -> Result<()> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        bail!("User id cannot be empty");
    }

    let secret = config
        .auth_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .context("auth_secret is not configured. Set it with: drawmark config set auth_secret <value>")?;
    let auth = CallerAuth::new(secret).map_err(|e| anyhow::anyhow!("Invalid auth_secret: {}", e))?;

    output.print_token(user_id, &auth.mint(user_id));
    Ok(())
}
