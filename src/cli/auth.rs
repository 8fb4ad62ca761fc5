use crate::config;
use crate::dirs;
use crate::error::{ConductorError, Result};
use std::io::BufRead;

/// Execute the `auth` command: persist the tracker token.
pub fn execute(token: Option<&str>) -> Result<()> {
    let token = match token {
        Some(token) => token.to_string(),
        None => {
            eprintln!("Paste the tracker API token and press Enter:");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line
        }
    };
    if token.trim().is_empty() {
        return Err(ConductorError::ConfigInvalid {
            message: "No token given".to_string(),
            available: Vec::new(),
            hint: Some("Run `a3s-conductor auth --token <token>`".to_string()),
        });
    }

    let path = dirs::credentials_path();
    config::store_token(&path, &token)?;
    println!("Token saved to {}", path.display());
    Ok(())
}
